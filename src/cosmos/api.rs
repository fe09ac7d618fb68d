use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Identifies a MongoDB database within a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseKey {
    /// The resource group holding the account.
    pub resource_group: String,
    /// The Cosmos DB account name.
    pub account: String,
    /// The database name.
    pub database: String,
}

impl DatabaseKey {
    /// Create a new key.
    pub fn new(
        resource_group: impl Into<String>,
        account: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            resource_group: resource_group.into(),
            account: account.into(),
            database: database.into(),
        }
    }
}

impl fmt::Display for DatabaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Account {}, Resource Group {})",
            self.database, self.account, self.resource_group
        )
    }
}

/// A MongoDB database as returned by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoDatabase {
    /// The ARM resource ID.
    pub id: String,
    /// The database name reported by the service.
    pub name: String,
}

/// The provisioned throughput settings of a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Throughput {
    /// Request units per second, if reported.
    pub throughput: Option<i64>,
}

/// Options sent with a create/update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreateUpdateOptions {
    /// Initial provisioned throughput. Only honoured when the database is first created.
    pub throughput: Option<i64>,
}

/// A failed control-plane call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status of the failed response, when one was received.
    pub status: Option<u16>,
    /// The ARM error code.
    pub code: String,
    /// The ARM error message.
    pub message: String,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(status: Option<u16>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// A 404 response.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Some(404), "NotFound", message)
    }

    /// Whether the service answered 404.
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(
                f,
                "StatusCode={} Code={:?} Message={:?}",
                status, self.code, self.message
            ),
            None => write!(f, "Code={:?} Message={:?}", self.code, self.message),
        }
    }
}

impl std::error::Error for ApiError {}

/// Handle to an operation the service completes asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongRunningOperation {
    /// Where to poll for the outcome. `None` means the operation already finished.
    pub poll_url: Option<String>,
    /// Server-suggested delay between polls.
    pub retry_after: Option<Duration>,
}

impl LongRunningOperation {
    /// An operation the service finished synchronously.
    pub fn completed() -> Self {
        Self {
            poll_url: None,
            retry_after: None,
        }
    }

    /// An operation to be polled at `url`.
    pub fn pending(url: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            poll_url: Some(url.into()),
            retry_after,
        }
    }

    /// Whether there is nothing left to poll.
    pub fn is_done(&self) -> bool {
        self.poll_url.is_none()
    }
}

/// Outcome of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// Still running.
    InProgress,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed(ApiError),
    /// Cancelled on the service side.
    Canceled,
}

/// Default delay between polls of a long-running operation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// The Cosmos DB MongoDB database operations the provider needs.
///
/// Every method is keyed by resource group, account and database name; the
/// subscription is a property of the implementation.
#[async_trait]
pub trait MongoDatabaseApi: Send + Sync {
    /// Fetch a database.
    async fn get_database(&self, key: &DatabaseKey) -> Result<MongoDatabase, ApiError>;

    /// Create or update a database (idempotent upsert).
    async fn begin_create_update(
        &self,
        key: &DatabaseKey,
        options: &CreateUpdateOptions,
    ) -> Result<LongRunningOperation, ApiError>;

    /// Delete a database.
    async fn begin_delete(&self, key: &DatabaseKey) -> Result<LongRunningOperation, ApiError>;

    /// Fetch the throughput settings of a database.
    async fn get_throughput(&self, key: &DatabaseKey) -> Result<Throughput, ApiError>;

    /// Change the provisioned throughput of a database.
    ///
    /// Fails with a 404 when the database was created without throughput.
    async fn begin_update_throughput(
        &self,
        key: &DatabaseKey,
        throughput: i64,
    ) -> Result<LongRunningOperation, ApiError>;

    /// Poll a long-running operation once.
    async fn poll(&self, operation: &LongRunningOperation) -> Result<OperationStatus, ApiError>;

    /// Delay between polls when the service does not suggest one.
    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }
}

/// Poll `operation` until it leaves the in-progress state.
///
/// This loops without a deadline; callers bound it with an operation timeout.
pub async fn wait_for_completion(
    api: &dyn MongoDatabaseApi,
    operation: &LongRunningOperation,
) -> Result<(), ApiError> {
    if operation.is_done() {
        return Ok(());
    }

    let mut polls = 0u32;
    loop {
        polls += 1;
        match api.poll(operation).await? {
            OperationStatus::Succeeded => {
                debug!(polls, "Long-running operation succeeded");
                return Ok(());
            },
            OperationStatus::Failed(err) => return Err(err),
            OperationStatus::Canceled => {
                return Err(ApiError::new(None, "Canceled", "the operation was canceled"));
            },
            OperationStatus::InProgress => {
                let delay = operation.retry_after.unwrap_or_else(|| api.poll_interval());
                debug!(polls, delay = ?delay, "Long-running operation in progress");
                tokio::time::sleep(delay).await;
            },
        }
    }
}
