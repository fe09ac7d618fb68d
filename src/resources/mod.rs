//! Resource adapters.

pub mod mongo_database;

pub use mongo_database::{MongoDatabaseResource, MongoDatabaseState, RESOURCE_TYPE};
