//! Per-operation deadlines and cancellation.

use std::future::Future;
use std::time::Duration;

use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ProviderError;
use crate::schema::{Attribute, Block, NestedBlock, Validator};

/// Default deadline for create.
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Default deadline for read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Default deadline for update.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Default deadline for delete.
pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// The `timeouts` block as configured. Durations are kept as written so they
/// round-trip through state unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Deadline override for create.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
    /// Deadline override for read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<String>,
    /// Deadline override for update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    /// Deadline override for delete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
}

/// The lifecycle operation a deadline applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Creating a new database.
    Create,
    /// Refreshing state from the service.
    Read,
    /// Updating an existing database in place.
    Update,
    /// Deleting the database.
    Delete,
}

impl Operation {
    /// Lowercase name used in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Resolved deadlines for each lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceTimeouts {
    /// Deadline for create.
    pub create: Duration,
    /// Deadline for read and import.
    pub read: Duration,
    /// Deadline for update.
    pub update: Duration,
    /// Deadline for delete.
    pub delete: Duration,
}

impl Default for ResourceTimeouts {
    fn default() -> Self {
        Self {
            create: DEFAULT_CREATE_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
            update: DEFAULT_UPDATE_TIMEOUT,
            delete: DEFAULT_DELETE_TIMEOUT,
        }
    }
}

impl ResourceTimeouts {
    /// Apply the overrides in a `timeouts` block to the defaults.
    pub fn from_config(config: Option<&TimeoutsConfig>) -> Result<Self, ProviderError> {
        let mut timeouts = Self::default();
        let Some(config) = config else {
            return Ok(timeouts);
        };

        for (field, value, target) in [
            ("create", &config.create, &mut timeouts.create),
            ("read", &config.read, &mut timeouts.read),
            ("update", &config.update, &mut timeouts.update),
            ("delete", &config.delete, &mut timeouts.delete),
        ] {
            if let Some(value) = value {
                *target = humantime::parse_duration(value).map_err(|e| {
                    ProviderError::Validation(format!("timeouts.{}: {}", field, e))
                })?;
            }
        }

        Ok(timeouts)
    }

    /// The deadline for `operation`.
    pub fn get(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Create => self.create,
            Operation::Read => self.read,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }
}

/// Schema of the `timeouts` block.
pub fn block() -> NestedBlock {
    let duration = || Attribute::optional_string().with_validator(Validator::Duration);
    NestedBlock::single(
        Block::new()
            .with_attribute("create", duration())
            .with_attribute("read", duration())
            .with_attribute("update", duration())
            .with_attribute("delete", duration())
            .with_description("Overrides for the operation deadlines, e.g. `45m`."),
    )
}

/// Bounds every remote call of one operation by a deadline and the host's
/// stop signal.
#[derive(Debug, Clone)]
pub struct OperationContext {
    operation: Operation,
    timeout: Duration,
    deadline: Instant,
    stop: watch::Receiver<bool>,
}

impl OperationContext {
    /// Start the clock for `operation`.
    pub fn new(operation: Operation, timeout: Duration, stop: watch::Receiver<bool>) -> Self {
        Self {
            operation,
            timeout,
            deadline: Instant::now() + timeout,
            stop,
        }
    }

    /// A context that can only expire, never be stopped.
    pub fn detached(operation: Operation, timeout: Duration) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(operation, timeout, rx)
    }

    /// The operation this context bounds.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Run `fut`, failing with `DeadlineExceeded` or `Cancelled` if it does
    /// not finish first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let mut stop = self.stop.clone();
        if *stop.borrow_and_update() {
            return Err(self.cancelled());
        }

        tokio::select! {
            result = fut => result,
            _ = tokio::time::sleep_until(self.deadline) => Err(ProviderError::DeadlineExceeded(format!(
                "{} did not complete within {}",
                self.operation.as_str(),
                humantime::format_duration(self.timeout)
            ))),
            _ = stopped(&mut stop) => Err(self.cancelled()),
        }
    }

    fn cancelled(&self) -> ProviderError {
        ProviderError::Cancelled(format!(
            "{} interrupted by a stop request",
            self.operation.as_str()
        ))
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        // Sender gone: nobody can stop us any more.
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let timeouts = ResourceTimeouts::from_config(None).unwrap();
        assert_eq!(timeouts.get(Operation::Create), Duration::from_secs(1800));
        assert_eq!(timeouts.get(Operation::Read), Duration::from_secs(300));
        assert_eq!(timeouts.get(Operation::Update), Duration::from_secs(1800));
        assert_eq!(timeouts.get(Operation::Delete), Duration::from_secs(1800));
    }

    #[test]
    fn test_overrides() {
        let config = TimeoutsConfig {
            create: Some("45m".to_string()),
            read: Some("1h 30m".to_string()),
            ..Default::default()
        };
        let timeouts = ResourceTimeouts::from_config(Some(&config)).unwrap();
        assert_eq!(timeouts.create, Duration::from_secs(45 * 60));
        assert_eq!(timeouts.read, Duration::from_secs(90 * 60));
        assert_eq!(timeouts.delete, DEFAULT_DELETE_TIMEOUT);
    }

    #[test]
    fn test_invalid_override() {
        let config = TimeoutsConfig {
            delete: Some("eventually".to_string()),
            ..Default::default()
        };
        let err = ResourceTimeouts::from_config(Some(&config)).unwrap_err();
        assert!(err.to_string().contains("timeouts.delete"));
    }

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = OperationContext::detached(Operation::Read, Duration::from_secs(5));
        let value = ctx.run(async { Ok::<_, ProviderError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_deadline_exceeded() {
        let ctx = OperationContext::detached(Operation::Create, Duration::from_millis(20));
        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(120)).await;
                Ok::<_, ProviderError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::DeadlineExceeded(_)));
        assert!(err.to_string().contains("create did not complete within 20ms"));
    }

    #[tokio::test]
    async fn test_run_cancelled_by_stop() {
        let (tx, rx) = watch::channel(false);
        let ctx = OperationContext::new(Operation::Delete, Duration::from_secs(60), rx);

        let handle = tokio::spawn(async move {
            ctx.run(std::future::pending::<Result<(), ProviderError>>()).await
        });
        tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_run_already_stopped() {
        let (_tx, rx) = watch::channel(true);
        let ctx = OperationContext::new(Operation::Update, Duration::from_secs(60), rx);
        let err = ctx.run(async { Ok::<_, ProviderError>(()) }).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled(_)));
    }
}
