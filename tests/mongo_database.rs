//! End-to-end lifecycle of `azurerm_cosmosdb_mongo_database` against the
//! in-memory control plane.

use std::sync::Arc;

use hemmer_provider_azure_cosmos::cosmos::{ApiError, DatabaseKey};
use hemmer_provider_azure_cosmos::testing::{
    assert_error_contains, assert_plan_changes_attribute, assert_plan_creates,
    assert_plan_no_changes, assert_plan_replaces, assert_plan_updates_in_place, ApiCall,
    InMemoryMongoApi, ProviderTester, TestError, TEST_SUBSCRIPTION_ID,
};
use hemmer_provider_azure_cosmos::{tags, AzureCosmosProvider, ProviderError, ProviderService};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

const RESOURCE_TYPE: &str = "azurerm_cosmosdb_mongo_database";

fn tester(api: &Arc<InMemoryMongoApi>) -> ProviderTester<AzureCosmosProvider> {
    ProviderTester::new(AzureCosmosProvider::with_api(api.clone(), true))
}

fn database_id(database: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/rg1/providers/Microsoft.DocumentDB/databaseAccounts/acc1/apis/mongodb/databases/{}",
        TEST_SUBSCRIPTION_ID, database
    )
}

fn config(throughput: Option<i64>) -> Value {
    let mut config = json!({
        "name": "db1",
        "resource_group_name": "rg1",
        "account_name": "acc1"
    });
    if let Some(throughput) = throughput {
        config["throughput"] = json!(throughput);
    }
    config
}

#[tokio::test]
async fn create_then_read_matches_config() {
    let api = Arc::new(InMemoryMongoApi::new().with_polls_per_operation(3));
    let tester = tester(&api);

    let state = assert_ok!(tester.lifecycle_create(RESOURCE_TYPE, config(Some(400))).await);

    let mut expected = config(Some(400));
    expected["id"] = json!(database_id("db1"));
    assert_eq!(state, expected);
    assert_eq!(
        api.throughput(&DatabaseKey::new("rg1", "acc1", "db1")),
        Some(Some(400))
    );
}

#[tokio::test]
async fn create_without_throughput_reads_back_none() {
    let api = Arc::new(InMemoryMongoApi::new());
    let tester = tester(&api);

    let state = assert_ok!(tester.lifecycle_create(RESOURCE_TYPE, config(None)).await);
    assert!(state.get("throughput").is_none());
    assert_eq!(state["id"], database_id("db1"));
}

#[tokio::test]
async fn create_conflicts_with_existing_database() {
    let api = Arc::new(InMemoryMongoApi::new());
    api.insert_database(DatabaseKey::new("rg1", "acc1", "db1"), Some(400));
    let tester = tester(&api);

    let err = assert_err!(tester.create(RESOURCE_TYPE, config(Some(1000))).await);
    match err {
        ProviderError::ImportAsExists { id, resource_type } => {
            assert_eq!(id, database_id("db1"));
            assert_eq!(resource_type, RESOURCE_TYPE);
        }
        other => panic!("expected ImportAsExists, got {other:?}"),
    }
    assert_eq!(api.call_count(ApiCall::CreateUpdate), 0);
    assert_eq!(
        api.throughput(&DatabaseKey::new("rg1", "acc1", "db1")),
        Some(Some(400))
    );
}

#[tokio::test]
async fn create_adopts_existing_database_when_allowed() {
    let api = Arc::new(InMemoryMongoApi::new());
    api.insert_database(DatabaseKey::new("rg1", "acc1", "db1"), Some(400));
    let tester = ProviderTester::new(AzureCosmosProvider::with_api(api.clone(), false));

    let state = assert_ok!(tester.create(RESOURCE_TYPE, config(Some(400))).await);
    assert_eq!(state["id"], database_id("db1"));
    assert_eq!(api.database_count(), 1);
}

#[tokio::test]
async fn update_throughput_in_place() {
    let api = Arc::new(InMemoryMongoApi::new());
    let tester = tester(&api);
    let created = assert_ok!(tester.lifecycle_create(RESOURCE_TYPE, config(Some(400))).await);

    let mut proposed = created.clone();
    proposed["throughput"] = json!(1000);
    let plan = assert_ok!(
        tester
            .plan_update(RESOURCE_TYPE, created.clone(), proposed.clone())
            .await
    );
    assert_plan_updates_in_place(&plan);
    assert_plan_changes_attribute(&plan, "throughput");

    let updated = assert_ok!(
        tester
            .lifecycle_update(RESOURCE_TYPE, created, proposed)
            .await
    );
    assert_eq!(updated["throughput"], 1000);
    assert_eq!(
        api.throughput(&DatabaseKey::new("rg1", "acc1", "db1")),
        Some(Some(1000))
    );
}

#[tokio::test]
async fn throughput_cannot_be_added_later() {
    let api = Arc::new(InMemoryMongoApi::new());
    let tester = tester(&api);
    let created = assert_ok!(tester.lifecycle_create(RESOURCE_TYPE, config(None)).await);

    let mut planned = created.clone();
    planned["throughput"] = json!(500);
    let err = assert_err!(tester.update(RESOURCE_TYPE, created, planned).await);

    let message = err.to_string();
    assert!(message.contains("setting Throughput for Cosmos MongoDB Database db1 (Account acc1)"));
    assert!(message.contains(
        "If the database has not been created with an initial throughput, you cannot configure it later."
    ));

    let state = err.partial_state().cloned().unwrap();
    assert!(state.get("throughput").is_none());
    assert_eq!(state["id"], database_id("db1"));
    assert_eq!(
        api.throughput(&DatabaseKey::new("rg1", "acc1", "db1")),
        Some(None)
    );
}

#[tokio::test]
async fn replace_on_name_change() {
    let api = Arc::new(InMemoryMongoApi::new());
    let tester = tester(&api);
    let created = assert_ok!(tester.lifecycle_create(RESOURCE_TYPE, config(Some(400))).await);

    let mut proposed = created.clone();
    proposed["name"] = json!("db2");
    let plan = assert_ok!(tester.plan_update(RESOURCE_TYPE, created.clone(), proposed).await);
    assert_plan_replaces(&plan);
    assert_plan_changes_attribute(&plan, "name");

    let plan = assert_ok!(tester.plan_update(RESOURCE_TYPE, created.clone(), created).await);
    assert_plan_no_changes(&plan);
}

#[tokio::test]
async fn plan_create_marks_every_attribute_added() {
    let api = Arc::new(InMemoryMongoApi::new());
    let plan = assert_ok!(tester(&api).plan_create(RESOURCE_TYPE, config(Some(400))).await);
    assert_plan_creates(&plan);
    assert_plan_changes_attribute(&plan, "account_name");
    assert!(plan.planned_state.get("id").is_none());
}

#[tokio::test]
async fn delete_then_read_is_gone() {
    let api = Arc::new(InMemoryMongoApi::new().with_polls_per_operation(2));
    let tester = tester(&api);
    let created = assert_ok!(tester.lifecycle_create(RESOURCE_TYPE, config(Some(400))).await);

    assert_ok!(tester.lifecycle_delete(RESOURCE_TYPE, created.clone()).await);
    assert_eq!(api.database_count(), 0);
    assert_eq!(assert_ok!(tester.read(RESOURCE_TYPE, created.clone()).await), None);

    // deleting again is a no-op
    assert_ok!(tester.delete(RESOURCE_TYPE, created).await);
}

#[tokio::test]
async fn read_surfaces_service_errors() {
    let api = Arc::new(InMemoryMongoApi::new());
    let tester = tester(&api);
    let created = assert_ok!(tester.lifecycle_create(RESOURCE_TYPE, config(Some(400))).await);

    api.fail_on(
        ApiCall::GetDatabase,
        ApiError::new(Some(500), "InternalServerError", "try again later"),
    );
    let err = assert_err!(tester.read(RESOURCE_TYPE, created.clone()).await);
    assert!(!err.is_not_found());
    assert!(err.to_string().contains("try again later"));

    api.clear_failures();
    assert!(assert_ok!(tester.read(RESOURCE_TYPE, created).await).is_some());
}

#[tokio::test]
async fn import_existing_database() {
    let api = Arc::new(InMemoryMongoApi::new());
    api.insert_database(DatabaseKey::new("rg1", "acc1", "imported"), Some(800));
    let tester = tester(&api);

    let imported = assert_ok!(
        tester
            .import_resource(RESOURCE_TYPE, &database_id("imported"))
            .await
    );
    assert_eq!(imported.len(), 1);
    assert_eq!(imported[0].resource_type, RESOURCE_TYPE);
    assert_eq!(
        imported[0].state,
        json!({
            "id": database_id("imported"),
            "name": "imported",
            "resource_group_name": "rg1",
            "account_name": "acc1",
            "throughput": 800
        })
    );

    let err = assert_err!(
        tester
            .import_resource(RESOURCE_TYPE, &database_id("missing"))
            .await
    );
    assert!(err.is_not_found());

    let err = assert_err!(tester.import_resource(RESOURCE_TYPE, "not-an-id").await);
    assert!(matches!(err, ProviderError::InvalidResourceId(_)));
}

#[tokio::test]
async fn resource_config_validation() {
    let api = Arc::new(InMemoryMongoApi::new());
    let tester = tester(&api);

    assert_ok!(
        tester
            .validate_resource_config(RESOURCE_TYPE, config(Some(400)))
            .await
    );

    let mut bad = config(Some(450));
    bad["name"] = json!("bad/name");
    match assert_err!(tester.validate_resource_config(RESOURCE_TYPE, bad).await) {
        TestError::Diagnostics(diagnostics) => {
            assert_eq!(diagnostics.len(), 2);
            assert_error_contains(&diagnostics, "throughput");
        }
        other => panic!("expected diagnostics, got {other}"),
    }
}

#[tokio::test]
async fn stop_cancels_pending_operations() {
    let api = Arc::new(InMemoryMongoApi::new());
    let provider = AzureCosmosProvider::with_api(api.clone(), true);
    assert_ok!(provider.stop().await);

    let err = assert_err!(provider.create(RESOURCE_TYPE, config(None)).await);
    assert!(matches!(err, ProviderError::Cancelled(_)));
    assert_eq!(api.database_count(), 0);
}

#[test]
fn tag_schema_variants() {
    let data_source = tags::data_source_schema();
    assert!(data_source.flags.computed);
    assert!(!data_source.flags.optional);
    assert!(!data_source.force_new);

    let resource = tags::schema();
    assert!(resource.flags.optional && resource.flags.computed);
    assert!(!resource.force_new);
    assert!(resource.validator.is_some());

    let force_new = tags::force_new_schema();
    assert!(force_new.flags.optional && force_new.flags.computed);
    assert!(force_new.force_new);
    assert_eq!(force_new.validator, resource.validator);
}
