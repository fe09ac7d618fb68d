//! `azurerm_cosmosdb_mongo_database`: a MongoDB-API database inside a Cosmos
//! DB account.
//!
//! Throughput is asymmetric: the service only accepts a throughput update
//! for a database that was created with throughput. Configuring throughput
//! on a database created without it fails with an explanatory error and
//! clears the locally recorded value.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cosmos::{
    wait_for_completion, ApiError, CosmosDatabaseId, CreateUpdateOptions, DatabaseKey,
    LongRunningOperation, MongoDatabaseApi,
};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema, Validator};
use crate::timeouts::{self, OperationContext, TimeoutsConfig};
use crate::types::{AttributeChange, PlanResult};

/// The resource type name.
pub const RESOURCE_TYPE: &str = "azurerm_cosmosdb_mongo_database";

const THROUGHPUT_NOT_CONFIGURABLE: &str =
    "If the database has not been created with an initial throughput, you cannot configure it later.";

/// Local state of a Mongo database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MongoDatabaseState {
    /// ARM resource ID, known once the database exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Database name.
    pub name: String,
    /// Resource group holding the account.
    pub resource_group_name: String,
    /// Cosmos DB account name.
    pub account_name: String,
    /// Provisioned throughput in RU/s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<i64>,
    /// Operation deadline overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<TimeoutsConfig>,
}

impl MongoDatabaseState {
    /// Decode a state or config value.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Encode for the host.
    pub fn to_value(&self) -> Result<Value, ProviderError> {
        Ok(serde_json::to_value(self)?)
    }

    fn key(&self) -> DatabaseKey {
        DatabaseKey::new(&self.resource_group_name, &self.account_name, &self.name)
    }

    fn parsed_id(&self) -> Result<CosmosDatabaseId, ProviderError> {
        match self.id.as_deref() {
            Some(id) => CosmosDatabaseId::parse(id),
            None => Err(ProviderError::InvalidResourceId(format!(
                "Cosmos Mongo Database {} (Account {}) has no ID in state",
                self.name, self.account_name
            ))),
        }
    }

    fn throughput_configured(&self) -> Option<i64> {
        self.throughput.filter(|t| *t > 0)
    }
}

/// Schema of the resource.
pub fn schema() -> Schema {
    Schema::v0()
        .with_attribute(
            "id",
            Attribute::computed_string().with_description("The ARM resource ID of the database."),
        )
        .with_attribute(
            "name",
            Attribute::required_string()
                .with_force_new()
                .with_validator(Validator::CosmosEntityName)
                .with_description("The name of the Cosmos DB Mongo Database."),
        )
        .with_attribute(
            "resource_group_name",
            Attribute::required_string()
                .with_force_new()
                .with_validator(Validator::ResourceGroupName)
                .with_description("The resource group holding the Cosmos DB account."),
        )
        .with_attribute(
            "account_name",
            Attribute::required_string()
                .with_force_new()
                .with_validator(Validator::CosmosAccountName)
                .with_description("The name of the Cosmos DB account."),
        )
        .with_attribute(
            "throughput",
            Attribute::optional_int64()
                .with_validator(Validator::CosmosThroughput)
                .with_description(
                    "Provisioned throughput in RU/s. Can only be changed later if set at creation.",
                ),
        )
        .with_block("timeouts", timeouts::block())
}

/// Diff `proposed` against `prior`.
///
/// A change to any force-new attribute requires replacement. The ID carries
/// over from prior state; on create it is unknown. A null `proposed` plans
/// the destroy.
pub fn plan(prior: Option<&Value>, proposed: Value) -> Result<PlanResult, ProviderError> {
    if proposed.is_null() {
        let changes = prior
            .map(attribute_values)
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| AttributeChange::removed(name, value))
            .collect();
        return Ok(PlanResult::with_changes(Value::Null, changes, false));
    }

    let mut planned = MongoDatabaseState::from_value(proposed)?;

    let Some(prior) = prior else {
        planned.id = None;
        let planned_state = planned.to_value()?;
        let changes = attribute_values(&planned_state)
            .into_iter()
            .map(|(name, value)| AttributeChange::added(name, value))
            .collect();
        return Ok(PlanResult::with_changes(planned_state, changes, false));
    };

    let prior_state = MongoDatabaseState::from_value(prior.clone())?;
    planned.id = prior_state.id.clone();

    let before = prior_state.to_value()?;
    let after = planned.to_value()?;
    let schema = schema();

    let mut changes = Vec::new();
    let mut requires_replace = false;
    for name in ["name", "resource_group_name", "account_name", "throughput", "timeouts"] {
        let old = before.get(name).cloned();
        let new = after.get(name).cloned();
        if old == new {
            continue;
        }

        if schema.attribute(name).is_some_and(|attr| attr.force_new) {
            requires_replace = true;
        }
        changes.push(AttributeChange::new(name, old, new));
    }

    if changes.is_empty() {
        Ok(PlanResult::no_change(before))
    } else {
        Ok(PlanResult::with_changes(after, changes, requires_replace))
    }
}

fn attribute_values(state: &Value) -> Vec<(String, Value)> {
    let mut values: Vec<(String, Value)> = state
        .as_object()
        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    values.sort_by(|a, b| a.0.cmp(&b.0));
    values
}

/// Lifecycle operations against one subscription.
pub struct MongoDatabaseResource {
    api: Arc<dyn MongoDatabaseApi>,
    fail_on_existing_resources: bool,
}

impl MongoDatabaseResource {
    /// Create an adapter. With `fail_on_existing_resources`, creating a
    /// database that already exists fails instead of adopting it.
    pub fn new(api: Arc<dyn MongoDatabaseApi>, fail_on_existing_resources: bool) -> Self {
        Self {
            api,
            fail_on_existing_resources,
        }
    }

    /// Create the database (`is_new`) or bring an existing one in line with `state`.
    ///
    /// Returns the state as read back after the change. If the throughput
    /// update fails, the error is a [`ProviderError::PartialState`] carrying
    /// `state` with throughput cleared.
    pub async fn create_update(
        &self,
        ctx: &OperationContext,
        mut state: MongoDatabaseState,
        is_new: bool,
    ) -> Result<MongoDatabaseState, ProviderError> {
        let key = state.key();
        let name = state.name.clone();
        let account = state.account_name.clone();
        let throughput = state.throughput_configured();

        let mut options = CreateUpdateOptions::default();
        if is_new {
            if self.fail_on_existing_resources {
                match bounded(ctx, self.api.get_database(&key)).await? {
                    Ok(existing) => {
                        warn!(id = %existing.id, "Cosmos Mongo Database already exists");
                        return Err(ProviderError::ImportAsExists {
                            resource_type: RESOURCE_TYPE.to_string(),
                            id: existing.id,
                        });
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        return Err(ProviderError::api(
                            format!(
                                "checking for presence of existing Cosmos Mongo Database {} (Account {})",
                                name, account
                            ),
                            e,
                        ))
                    }
                }
            }
            options.throughput = throughput;
        }

        info!(database = %name, account = %account, is_new, "Creating/updating Cosmos Mongo Database");
        let operation = bounded(ctx, self.api.begin_create_update(&key, &options))
            .await?
            .map_err(|e| {
                ProviderError::api(
                    format!(
                        "issuing create/update request for Cosmos Mongo Database {} (Account {})",
                        name, account
                    ),
                    e,
                )
            })?;
        self.wait(ctx, &operation).await?.map_err(|e| {
            ProviderError::api(
                format!(
                    "waiting on create/update future for Cosmos Mongo Database {} (Account {})",
                    name, account
                ),
                e,
            )
        })?;

        if let (Some(throughput), false) = (throughput, is_new) {
            if let Err(err) = self.update_throughput(ctx, &key, throughput).await {
                state.throughput = None;
                return Err(ProviderError::PartialState {
                    state: state.to_value()?,
                    source: Box::new(err),
                });
            }
        }

        let database = bounded(ctx, self.api.get_database(&key)).await?.map_err(|e| {
            ProviderError::api(
                format!(
                    "making get request for Cosmos Mongo Database {} (Account {})",
                    name, account
                ),
                e,
            )
        })?;
        state.id = Some(database.id);

        match self.read(ctx, state).await? {
            Some(state) => Ok(state),
            None => Err(ProviderError::NotFound(format!(
                "Cosmos Mongo Database {} disappeared after create/update",
                key
            ))),
        }
    }

    async fn update_throughput(
        &self,
        ctx: &OperationContext,
        key: &DatabaseKey,
        throughput: i64,
    ) -> Result<(), ProviderError> {
        info!(database = %key.database, account = %key.account, throughput, "Updating Cosmos Mongo Database throughput");
        let operation = match bounded(ctx, self.api.begin_update_throughput(key, throughput)).await? {
            Ok(operation) => operation,
            Err(e) if e.is_not_found() => {
                warn!(database = %key.database, account = %key.account, "Database has no throughput settings");
                return Err(ProviderError::FailedPrecondition(format!(
                    "setting Throughput for Cosmos MongoDB Database {} (Account {}): {} - {}",
                    key.database, key.account, e, THROUGHPUT_NOT_CONFIGURABLE
                )));
            }
            Err(e) => {
                return Err(ProviderError::api(
                    format!(
                        "setting Throughput for Cosmos MongoDB Database {} (Account {})",
                        key.database, key.account
                    ),
                    e,
                ))
            }
        };

        self.wait(ctx, &operation).await?.map_err(|e| {
            ProviderError::api(
                format!(
                    "waiting on ThroughputUpdate future for Cosmos Mongo Database {} (Account {})",
                    key.database, key.account
                ),
                e,
            )
        })
    }

    /// Refresh `state` from the service. `None` means the database is gone.
    ///
    /// A failure to read throughput is a [`ProviderError::PartialState`]
    /// carrying the refreshed state with throughput cleared.
    pub async fn read(
        &self,
        ctx: &OperationContext,
        mut state: MongoDatabaseState,
    ) -> Result<Option<MongoDatabaseState>, ProviderError> {
        let id = state.parsed_id()?;
        let key = id.key();

        debug!(database = %id.database, account = %id.account, "Reading Cosmos Mongo Database");
        let database = match bounded(ctx, self.api.get_database(&key)).await? {
            Ok(database) => database,
            Err(e) if e.is_not_found() => {
                info!(
                    database = %id.database,
                    account = %id.account,
                    "Cosmos Mongo Database not found - removing from state"
                );
                return Ok(None);
            }
            Err(e) => {
                return Err(ProviderError::api(
                    format!(
                        "reading Cosmos Mongo Database {} (Account {})",
                        id.database, id.account
                    ),
                    e,
                ))
            }
        };

        state.resource_group_name = id.resource_group.clone();
        state.account_name = id.account.clone();
        state.name = database.name;

        match bounded(ctx, self.api.get_throughput(&key)).await? {
            Ok(settings) => state.throughput = settings.throughput,
            Err(e) if e.is_not_found() => {
                debug!(database = %id.database, "No throughput settings on database");
                state.throughput = None;
            }
            Err(e) => {
                state.throughput = None;
                return Err(ProviderError::PartialState {
                    state: state.to_value()?,
                    source: Box::new(ProviderError::api(
                        format!(
                            "reading Throughput on Cosmos Mongo Database {} (Account {})",
                            id.database, id.account
                        ),
                        e,
                    )),
                });
            }
        }

        Ok(Some(state))
    }

    /// Delete the database. A database that is already gone counts as deleted.
    pub async fn delete(
        &self,
        ctx: &OperationContext,
        state: &MongoDatabaseState,
    ) -> Result<(), ProviderError> {
        let id = state.parsed_id()?;
        let key = id.key();

        info!(database = %id.database, account = %id.account, "Deleting Cosmos Mongo Database");
        let operation = match bounded(ctx, self.api.begin_delete(&key)).await? {
            Ok(operation) => operation,
            Err(e) if e.is_not_found() => {
                debug!(database = %id.database, "Cosmos Mongo Database already deleted");
                return Ok(());
            }
            Err(e) => {
                return Err(ProviderError::api(
                    format!(
                        "deleting Cosmos Mongo Database {} (Account {})",
                        id.database, id.account
                    ),
                    e,
                ))
            }
        };

        match self.wait(ctx, &operation).await? {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(ProviderError::api(
                format!(
                    "waiting on delete future for Cosmos Mongo Database {} (Account {})",
                    id.database, id.account
                ),
                e,
            )),
        }
    }

    /// Build state for an existing database from its ID.
    pub async fn import(
        &self,
        ctx: &OperationContext,
        id: &str,
    ) -> Result<MongoDatabaseState, ProviderError> {
        let parsed = CosmosDatabaseId::parse(id)?;
        let state = MongoDatabaseState {
            id: Some(parsed.to_string()),
            name: parsed.database.clone(),
            resource_group_name: parsed.resource_group.clone(),
            account_name: parsed.account.clone(),
            throughput: None,
            timeouts: None,
        };

        self.read(ctx, state).await?.ok_or_else(|| {
            ProviderError::NotFound(format!(
                "Cosmos Mongo Database {} does not exist",
                parsed.key()
            ))
        })
    }

    async fn wait(
        &self,
        ctx: &OperationContext,
        operation: &LongRunningOperation,
    ) -> Result<Result<(), ApiError>, ProviderError> {
        bounded(ctx, wait_for_completion(self.api.as_ref(), operation)).await
    }
}

/// Run one remote call under the operation's deadline and stop signal,
/// keeping the API error for the caller to classify.
async fn bounded<T, F>(ctx: &OperationContext, call: F) -> Result<Result<T, ApiError>, ProviderError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    ctx.run(async { Ok(call.await) }).await
}
