//! Testing utilities.
//!
//! [`ProviderTester`] drives a `ProviderService` without a gRPC server, and
//! [`InMemoryMongoApi`] stands in for Azure Resource Manager.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use hemmer_provider_azure_cosmos::testing::{InMemoryMongoApi, ProviderTester};
//! use hemmer_provider_azure_cosmos::AzureCosmosProvider;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let api = Arc::new(InMemoryMongoApi::new());
//! let tester = ProviderTester::new(AzureCosmosProvider::with_api(api.clone(), true));
//!
//! let state = tester
//!     .lifecycle_create(
//!         "azurerm_cosmosdb_mongo_database",
//!         json!({"name": "db1", "resource_group_name": "rg1", "account_name": "acc1"}),
//!     )
//!     .await
//!     .unwrap();
//!
//! assert_eq!(state["name"], "db1");
//! assert_eq!(api.database_count(), 1);
//! # });
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::cosmos::{
    ApiError, CosmosDatabaseId, CreateUpdateOptions, DatabaseKey, LongRunningOperation,
    MongoDatabase, MongoDatabaseApi, OperationStatus, Throughput,
};
use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// Subscription the in-memory service pretends to manage.
pub const TEST_SUBSCRIPTION_ID: &str = "00000000-0000-0000-0000-000000000000";

/// A test harness for provider implementations.
///
/// This wraps a `ProviderService` implementation and provides
/// simplified methods for testing without a gRPC server.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Validate provider configuration.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create a new resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource. `None` means it no longer exists.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Run a full create lifecycle: plan → create → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self.plan_create(resource_type, config).await?;
        let created_state = self
            .create(resource_type, plan_result.planned_state)
            .await?;
        self.read_existing(resource_type, created_state).await
    }

    /// Run a full update lifecycle: plan → update → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated_state = self
            .update(resource_type, prior_state, plan_result.planned_state)
            .await?;
        self.read_existing(resource_type, updated_state).await
    }

    /// Run a full delete lifecycle: plan → delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        let _ = self
            .plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }

    async fn read_existing(&self, resource_type: &str, state: Value) -> Result<Value, ProviderError> {
        self.read(resource_type, state).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("{} vanished right after being written", resource_type))
        })
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    /// The operation failed with diagnostics.
    #[error("{}", format_diagnostics(.0))]
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let mut out = format!("Operation failed with {} diagnostic(s):\n", diagnostics.len());
    for diag in diagnostics {
        out.push_str(&format!("  [{:?}] {}", diag.severity, diag.summary));
        if let Some(detail) = &diag.detail {
            out.push_str(&format!(": {}", detail));
        }
        if let Some(attr) = &diag.attribute {
            out.push_str(&format!(" (at {})", attr));
        }
        out.push('\n');
    }
    out
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

/// A remote call of [`MongoDatabaseApi`], for failure injection and call recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCall {
    /// [`MongoDatabaseApi::get_database`].
    GetDatabase,
    /// [`MongoDatabaseApi::begin_create_update`].
    CreateUpdate,
    /// [`MongoDatabaseApi::begin_delete`].
    Delete,
    /// [`MongoDatabaseApi::get_throughput`].
    GetThroughput,
    /// [`MongoDatabaseApi::begin_update_throughput`].
    UpdateThroughput,
    /// [`MongoDatabaseApi::poll`].
    Poll,
}

#[derive(Default)]
struct Store {
    // database -> provisioned throughput, if the database was created with one
    databases: HashMap<DatabaseKey, Option<i64>>,
    pending: HashMap<String, u32>,
    failures: HashMap<ApiCall, ApiError>,
    calls: Vec<ApiCall>,
    next_operation: u64,
}

/// An in-memory Cosmos DB control plane.
///
/// Models the throughput rules of the real service: throughput is only
/// accepted at creation, and a database created without it has no
/// throughput settings to read or update (both answer 404).
///
/// Every long-running operation reports in progress for a configurable
/// number of polls before succeeding.
#[derive(Default)]
pub struct InMemoryMongoApi {
    store: Mutex<Store>,
    polls_per_operation: u32,
}

impl InMemoryMongoApi {
    /// An empty service whose operations complete synchronously.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every long-running operation take `polls` polls.
    pub fn with_polls_per_operation(mut self, polls: u32) -> Self {
        self.polls_per_operation = polls;
        self
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a database.
    pub fn insert_database(&self, key: DatabaseKey, throughput: Option<i64>) {
        self.store().databases.insert(key, throughput);
    }

    /// Whether `key` exists.
    pub fn contains(&self, key: &DatabaseKey) -> bool {
        self.store().databases.contains_key(key)
    }

    /// Provisioned throughput of `key`, `None` if it does not exist.
    pub fn throughput(&self, key: &DatabaseKey) -> Option<Option<i64>> {
        self.store().databases.get(key).copied()
    }

    /// Number of databases.
    pub fn database_count(&self) -> usize {
        self.store().databases.len()
    }

    /// Fail every `call` with `error` until [`clear_failures`](Self::clear_failures).
    pub fn fail_on(&self, call: ApiCall, error: ApiError) {
        self.store().failures.insert(call, error);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.store().failures.clear();
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.store().calls.clone()
    }

    /// How many times `call` was made.
    pub fn call_count(&self, call: ApiCall) -> usize {
        self.store().calls.iter().filter(|c| **c == call).count()
    }

    fn begin(&self, call: ApiCall) -> Result<MutexGuard<'_, Store>, ApiError> {
        let mut store = self.store();
        store.calls.push(call);
        match store.failures.get(&call) {
            Some(err) => Err(err.clone()),
            None => Ok(store),
        }
    }

    fn start_operation(&self, store: &mut Store) -> LongRunningOperation {
        if self.polls_per_operation == 0 {
            return LongRunningOperation::completed();
        }
        store.next_operation += 1;
        let url = format!("memory://operations/{}", store.next_operation);
        store.pending.insert(url.clone(), self.polls_per_operation);
        LongRunningOperation::pending(url, Some(Duration::ZERO))
    }
}

fn not_found(key: &DatabaseKey) -> ApiError {
    ApiError::not_found(format!("Database {} does not exist", key))
}

#[async_trait]
impl MongoDatabaseApi for InMemoryMongoApi {
    async fn get_database(&self, key: &DatabaseKey) -> Result<MongoDatabase, ApiError> {
        let store = self.begin(ApiCall::GetDatabase)?;
        if !store.databases.contains_key(key) {
            return Err(not_found(key));
        }
        Ok(MongoDatabase {
            id: CosmosDatabaseId::new(TEST_SUBSCRIPTION_ID, key).to_string(),
            name: key.database.clone(),
        })
    }

    async fn begin_create_update(
        &self,
        key: &DatabaseKey,
        options: &CreateUpdateOptions,
    ) -> Result<LongRunningOperation, ApiError> {
        let mut store = self.begin(ApiCall::CreateUpdate)?;
        store
            .databases
            .entry(key.clone())
            .or_insert(options.throughput);
        Ok(self.start_operation(&mut store))
    }

    async fn begin_delete(&self, key: &DatabaseKey) -> Result<LongRunningOperation, ApiError> {
        let mut store = self.begin(ApiCall::Delete)?;
        if store.databases.remove(key).is_none() {
            return Err(not_found(key));
        }
        Ok(self.start_operation(&mut store))
    }

    async fn get_throughput(&self, key: &DatabaseKey) -> Result<Throughput, ApiError> {
        let store = self.begin(ApiCall::GetThroughput)?;
        match store.databases.get(key) {
            Some(Some(throughput)) => Ok(Throughput {
                throughput: Some(*throughput),
            }),
            _ => Err(not_found(key)),
        }
    }

    async fn begin_update_throughput(
        &self,
        key: &DatabaseKey,
        throughput: i64,
    ) -> Result<LongRunningOperation, ApiError> {
        let mut store = self.begin(ApiCall::UpdateThroughput)?;
        match store.databases.get_mut(key) {
            Some(Some(current)) => *current = throughput,
            _ => return Err(not_found(key)),
        }
        Ok(self.start_operation(&mut store))
    }

    async fn poll(&self, operation: &LongRunningOperation) -> Result<OperationStatus, ApiError> {
        let mut store = self.begin(ApiCall::Poll)?;
        let Some(url) = operation.poll_url.as_deref() else {
            return Ok(OperationStatus::Succeeded);
        };
        match store.pending.get_mut(url) {
            Some(remaining) if *remaining > 1 => {
                *remaining -= 1;
                Ok(OperationStatus::InProgress)
            }
            Some(_) => {
                store.pending.remove(url);
                Ok(OperationStatus::Succeeded)
            }
            None => Err(ApiError::not_found(format!("unknown operation {}", url))),
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::ZERO
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result indicates the resource will be created.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(
        !plan.requires_replace,
        "Expected plan to create, not replace"
    );
}

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan does not require resource replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has a change for a specific attribute path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| d.is_error() && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosmos::wait_for_completion;

    fn key() -> DatabaseKey {
        DatabaseKey::new("rg", "acc", "db")
    }

    #[tokio::test]
    async fn test_create_keeps_initial_throughput_only() {
        let api = InMemoryMongoApi::new();
        api.begin_create_update(&key(), &CreateUpdateOptions { throughput: Some(400) })
            .await
            .unwrap();
        assert_eq!(api.throughput(&key()), Some(Some(400)));

        api.begin_create_update(&key(), &CreateUpdateOptions { throughput: Some(800) })
            .await
            .unwrap();
        assert_eq!(api.throughput(&key()), Some(Some(400)));
    }

    #[tokio::test]
    async fn test_throughput_missing_without_initial_value() {
        let api = InMemoryMongoApi::new();
        api.insert_database(key(), None);

        assert!(api.get_throughput(&key()).await.unwrap_err().is_not_found());
        assert!(api
            .begin_update_throughput(&key(), 500)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_operations_poll_to_completion() {
        let api = InMemoryMongoApi::new().with_polls_per_operation(3);
        let op = api
            .begin_create_update(&key(), &CreateUpdateOptions::default())
            .await
            .unwrap();
        assert!(!op.is_done());

        wait_for_completion(&api, &op).await.unwrap();
        assert_eq!(api.call_count(ApiCall::Poll), 3);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let api = InMemoryMongoApi::new();
        api.fail_on(
            ApiCall::GetDatabase,
            ApiError::new(Some(500), "InternalServerError", "boom"),
        );
        let err = api.get_database(&key()).await.unwrap_err();
        assert_eq!(err.status, Some(500));

        api.clear_failures();
        assert!(api.get_database(&key()).await.unwrap_err().is_not_found());
        assert_eq!(api.calls(), vec![ApiCall::GetDatabase, ApiCall::GetDatabase]);
    }

    #[test]
    fn test_assert_no_errors() {
        let diagnostics = vec![Diagnostic::warning("Just a warning")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        let diagnostics = vec![Diagnostic::error("An error")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    fn test_assert_error_contains() {
        let diagnostics = vec![Diagnostic::error("throughput must be a minimum of 400")];
        assert_error_contains(&diagnostics, "minimum");
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("name"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = err.to_string();
        assert!(display.contains("First error"));
        assert!(display.contains("Second error"));
        assert!(display.contains("(at name)"));
        assert!(display.contains("More info"));
    }
}
