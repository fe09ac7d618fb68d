//! The Azure Cosmos DB provider.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use crate::config::{self, ProviderConfig};
use crate::cosmos::{ArmMongoClient, MongoDatabaseApi};
use crate::error::ProviderError;
use crate::resources::mongo_database::{self, MongoDatabaseResource, MongoDatabaseState, RESOURCE_TYPE};
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::timeouts::{Operation, OperationContext, ResourceTimeouts};
use crate::types::{ImportedResource, PlanResult};
use crate::validation::validate;

struct Configured {
    api: Arc<dyn MongoDatabaseApi>,
    fail_on_existing_resources: bool,
    // set by `with_api`; Configure then leaves the API alone
    injected: bool,
}

/// Manages `azurerm_cosmosdb_mongo_database` resources.
///
/// Resource operations fail with a configuration error until
/// [`configure`](ProviderService::configure) has run, unless the provider was
/// built with [`with_api`](Self::with_api).
pub struct AzureCosmosProvider {
    configured: RwLock<Option<Configured>>,
    stop: watch::Sender<bool>,
}

impl Default for AzureCosmosProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AzureCosmosProvider {
    /// An unconfigured provider; Configure connects it to Azure Resource Manager.
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            configured: RwLock::new(None),
            stop,
        }
    }

    /// A provider that talks to `api` instead of Azure Resource Manager.
    ///
    /// Configure still validates its input but keeps `api`.
    pub fn with_api(api: Arc<dyn MongoDatabaseApi>, fail_on_existing_resources: bool) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            configured: RwLock::new(Some(Configured {
                api,
                fail_on_existing_resources,
                injected: true,
            })),
            stop,
        }
    }

    async fn resource(&self) -> Result<MongoDatabaseResource, ProviderError> {
        let guard = self.configured.read().await;
        let configured = guard.as_ref().ok_or_else(|| {
            ProviderError::Configuration("provider has not been configured".to_string())
        })?;
        Ok(MongoDatabaseResource::new(
            Arc::clone(&configured.api),
            configured.fail_on_existing_resources,
        ))
    }

    fn context(
        &self,
        operation: Operation,
        state: &MongoDatabaseState,
    ) -> Result<OperationContext, ProviderError> {
        let timeouts = ResourceTimeouts::from_config(state.timeouts.as_ref())?;
        Ok(OperationContext::new(
            operation,
            timeouts.get(operation),
            self.stop.subscribe(),
        ))
    }
}

fn check_resource_type(resource_type: &str) -> Result<(), ProviderError> {
    if resource_type == RESOURCE_TYPE {
        Ok(())
    } else {
        Err(ProviderError::UnknownResource(resource_type.to_string()))
    }
}

#[async_trait::async_trait]
impl ProviderService for AzureCosmosProvider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(config::schema())
            .with_resource(RESOURCE_TYPE, mongo_database::schema())
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validate(&config::schema(), &config))
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = validate(&config::schema(), &config);
        if diagnostics.iter().any(Diagnostic::is_error) {
            return Ok(diagnostics);
        }

        let mut configured = self.configured.write().await;
        if let Some(existing) = configured.as_mut().filter(|c| c.injected) {
            if let Some(flag) = config
                .get("fail_on_existing_resources")
                .and_then(Value::as_bool)
            {
                existing.fail_on_existing_resources = flag;
            }
            debug!("Provider has an injected API client, keeping it");
            return Ok(diagnostics);
        }

        let settings = ProviderConfig::from_value(&config)?;
        let client = ArmMongoClient::new(
            settings.endpoint.as_str(),
            settings.subscription_id.as_str(),
            settings.access_token,
        )?
        .with_poll_interval(settings.poll_interval);

        info!(
            subscription_id = %settings.subscription_id,
            endpoint = %settings.endpoint,
            fail_on_existing_resources = settings.fail_on_existing_resources,
            "Configured Azure Resource Manager client"
        );

        *configured = Some(Configured {
            api: Arc::new(client),
            fail_on_existing_resources: settings.fail_on_existing_resources,
            injected: false,
        });
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        info!("Stop requested, cancelling in-flight operations");
        self.stop.send_replace(true);
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        check_resource_type(resource_type)?;
        Ok(validate(&mongo_database::schema(), &config))
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        check_resource_type(resource_type)?;
        mongo_database::plan(prior_state.as_ref(), proposed_state)
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        check_resource_type(resource_type)?;
        let state = MongoDatabaseState::from_value(planned_state)?;
        let ctx = self.context(Operation::Create, &state)?;
        let resource = self.resource().await?;

        resource.create_update(&ctx, state, true).await?.to_value()
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Option<Value>, ProviderError> {
        check_resource_type(resource_type)?;
        let state = MongoDatabaseState::from_value(current_state)?;
        let ctx = self.context(Operation::Read, &state)?;
        let resource = self.resource().await?;

        match resource.read(&ctx, state).await? {
            Some(state) => Ok(Some(state.to_value()?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        check_resource_type(resource_type)?;
        let prior = MongoDatabaseState::from_value(prior_state)?;
        let mut state = MongoDatabaseState::from_value(planned_state)?;
        if state.id.is_none() {
            state.id = prior.id;
        }
        let ctx = self.context(Operation::Update, &state)?;
        let resource = self.resource().await?;

        resource.create_update(&ctx, state, false).await?.to_value()
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        check_resource_type(resource_type)?;
        let state = MongoDatabaseState::from_value(current_state)?;
        let ctx = self.context(Operation::Delete, &state)?;
        let resource = self.resource().await?;

        resource.delete(&ctx, &state).await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        check_resource_type(resource_type)?;
        let ctx = OperationContext::new(
            Operation::Read,
            ResourceTimeouts::default().read,
            self.stop.subscribe(),
        );
        let resource = self.resource().await?;

        let state = resource.import(&ctx, id).await?;
        Ok(vec![ImportedResource::new(RESOURCE_TYPE, state.to_value()?)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosmos::DatabaseKey;
    use crate::testing::{InMemoryMongoApi, TEST_SUBSCRIPTION_ID};
    use serde_json::json;

    fn provider(api: &Arc<InMemoryMongoApi>) -> AzureCosmosProvider {
        AzureCosmosProvider::with_api(api.clone(), true)
    }

    fn config() -> Value {
        json!({
            "name": "db1",
            "resource_group_name": "rg1",
            "account_name": "acc1",
            "throughput": 400
        })
    }

    #[tokio::test]
    async fn test_unconfigured_provider_rejects_operations() {
        let provider = AzureCosmosProvider::new();
        let err = provider.create(RESOURCE_TYPE, config()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_configure_builds_client() {
        let provider = AzureCosmosProvider::new();
        let diagnostics = provider
            .configure(json!({
                "subscription_id": "sub",
                "access_token": "token",
                "endpoint": "http://127.0.0.1:1",
                "poll_interval": "1s"
            }))
            .await
            .unwrap();
        assert!(diagnostics.is_empty());
        assert!(provider.configured.read().await.is_some());
    }

    #[tokio::test]
    async fn test_reconfigure_replaces_client() {
        use httpmock::prelude::*;

        let stale = MockServer::start_async().await;
        let current = MockServer::start_async().await;
        let db_path = "/subscriptions/sub2/resourceGroups/rg1/providers/Microsoft.DocumentDB/databaseAccounts/acc1/apis/mongodb/databases/db1";
        let get = current
            .mock_async(|when, then| {
                when.method(GET)
                    .path(db_path)
                    .header("authorization", "Bearer token2");
                then.status(200)
                    .json_body(json!({"name": "db1", "properties": {"id": "db1"}}));
            })
            .await;
        current
            .mock_async(|when, then| {
                when.method(GET).path(format!("{}/settings/throughput", db_path));
                then.status(200)
                    .json_body(json!({"properties": {"throughput": 400}}));
            })
            .await;

        let provider = AzureCosmosProvider::new();
        for (endpoint, subscription_id, token) in [
            (stale.base_url(), "sub1", "token1"),
            (current.base_url(), "sub2", "token2"),
        ] {
            let diagnostics = provider
                .configure(json!({
                    "subscription_id": subscription_id,
                    "access_token": token,
                    "endpoint": endpoint,
                    "fail_on_existing_resources": false
                }))
                .await
                .unwrap();
            assert!(diagnostics.is_empty());
        }

        let state = provider
            .read(RESOURCE_TYPE, json!({
                "id": db_path,
                "name": "db1",
                "resource_group_name": "rg1",
                "account_name": "acc1"
            }))
            .await
            .unwrap()
            .unwrap();
        get.assert_async().await;
        assert_eq!(state["id"], db_path);
        assert_eq!(state["throughput"], 400);
        assert!(!provider.configured.read().await.as_ref().unwrap().fail_on_existing_resources);
    }

    #[tokio::test]
    async fn test_configure_keeps_injected_api() {
        let api = Arc::new(InMemoryMongoApi::new());
        let provider = provider(&api);
        provider
            .configure(json!({
                "subscription_id": "sub",
                "access_token": "token",
                "endpoint": "http://127.0.0.1:1",
                "fail_on_existing_resources": false
            }))
            .await
            .unwrap();

        let created = provider.create(RESOURCE_TYPE, config()).await.unwrap();
        assert_eq!(created["name"], "db1");
        assert_eq!(api.database_count(), 1);
        assert!(!provider.configured.read().await.as_ref().unwrap().fail_on_existing_resources);
    }

    #[tokio::test]
    async fn test_configure_reports_invalid_block() {
        let provider = AzureCosmosProvider::new();
        let diagnostics = provider
            .configure(json!({"poll_interval": "whenever"}))
            .await
            .unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(provider.configured.read().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_resource_type() {
        let api = Arc::new(InMemoryMongoApi::new());
        let err = provider(&api)
            .read("azurerm_cosmosdb_sql_database", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_create_read_update_delete() {
        let api = Arc::new(InMemoryMongoApi::new());
        let provider = provider(&api);

        let created = provider.create(RESOURCE_TYPE, config()).await.unwrap();
        let key = DatabaseKey::new("rg1", "acc1", "db1");
        assert_eq!(
            created["id"],
            format!(
                "/subscriptions/{}/resourceGroups/rg1/providers/Microsoft.DocumentDB/databaseAccounts/acc1/apis/mongodb/databases/db1",
                TEST_SUBSCRIPTION_ID
            )
        );
        assert_eq!(api.throughput(&key), Some(Some(400)));

        let mut planned = created.clone();
        planned["throughput"] = json!(700);
        let updated = provider
            .update(RESOURCE_TYPE, created.clone(), planned)
            .await
            .unwrap();
        assert_eq!(updated["throughput"], 700);

        provider.delete(RESOURCE_TYPE, updated.clone()).await.unwrap();
        assert!(!api.contains(&key));
        assert_eq!(provider.read(RESOURCE_TYPE, updated).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stop_cancels_later_operations() {
        let api = Arc::new(InMemoryMongoApi::new());
        let provider = provider(&api);
        provider.stop().await.unwrap();

        let err = provider.create(RESOURCE_TYPE, config()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled(_)));
        assert_eq!(api.database_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_timeouts_block() {
        let api = Arc::new(InMemoryMongoApi::new());
        let mut config = config();
        config["timeouts"] = json!({"create": "soonish"});

        let err = provider(&api).create(RESOURCE_TYPE, config).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }
}
