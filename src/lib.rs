//! Hemmer provider for Azure Cosmos DB MongoDB databases.
//!
//! This crate manages `azurerm_cosmosdb_mongo_database` resources through
//! Azure Resource Manager and serves them to Hemmer over the provider gRPC
//! protocol. It also exposes the standard `tags` schema fragments shared by
//! Azure resources.
//!
//! # Overview
//!
//! - **[`cosmos`]**: the control-plane seam ([`MongoDatabaseApi`]), the ARM
//!   REST client and resource ID parsing
//! - **[`resources`]**: the Mongo database lifecycle (plan, create, read,
//!   update, delete, import)
//! - **[`tags`]**: `tags` attribute variants for resource and data source schemas
//! - **[`timeouts`]**: per-operation deadlines and cancellation
//! - **[`server`]**: the [`ProviderService`] trait and the gRPC server
//! - **[`testing`]**: an in-memory control plane and a test harness
//!
//! # Running
//!
//! ```ignore
//! use hemmer_provider_azure_cosmos::{init_logging, serve, AzureCosmosProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!     serve(AzureCosmosProvider::new()).await
//! }
//! ```
//!
//! # Handshake Protocol
//!
//! When the provider starts via [`serve`], it outputs a handshake string to stdout:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `HEMMER_PROVIDER|<protocol_version>|<address>`
//!
//! # Provider Protocol
//!
//! - **GetMetadata**: Returns provider capabilities and resource names
//! - **GetSchema**: Returns the provider configuration and resource schemas
//! - **ValidateProviderConfig**: Validates provider configuration
//! - **Configure**: Builds the Azure Resource Manager client
//! - **Stop**: Cancels in-flight operations
//! - **ValidateResourceConfig**: Validates resource configuration
//! - **Plan**: Calculates required changes
//! - **Create/Read/Update/Delete**: Lifecycle operations for resources
//! - **ImportResourceState**: Imports an existing database by ARM ID

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod cosmos;
pub mod error;
pub mod logging;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod server;
pub mod tags;
pub mod testing;
pub mod timeouts;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

// Re-export main types at crate root
pub use cosmos::{ArmMongoClient, CosmosDatabaseId, MongoDatabaseApi};
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::AzureCosmosProvider;
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ProviderService, ServeOptions,
};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX,
    PROTOCOL_VERSION,
};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tonic;
pub use tracing;
