//! Azure Cosmos DB control-plane access.
//!
//! [`MongoDatabaseApi`] is the seam between the resource adapter and the
//! remote service. [`ArmMongoClient`] talks to Azure Resource Manager over
//! HTTPS; tests use the in-memory implementation in [`crate::testing`].

mod api;
mod arm;
mod id;

pub use api::{
    wait_for_completion, ApiError, CreateUpdateOptions, DatabaseKey, LongRunningOperation,
    MongoDatabase, MongoDatabaseApi, OperationStatus, Throughput, DEFAULT_POLL_INTERVAL,
};
pub use arm::{ArmMongoClient, API_VERSION, DEFAULT_ENDPOINT};
pub use id::CosmosDatabaseId;
