//! Plan, import and metadata values exchanged with the host.

use serde_json::Value;

use crate::generated;

/// One attribute's value before and after a planned change. `None` on
/// either side means the attribute is absent there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeChange {
    /// Attribute name, e.g. `throughput`.
    pub path: String,
    /// Value in the prior state.
    pub before: Option<Value>,
    /// Value in the planned state.
    pub after: Option<Value>,
}

impl AttributeChange {
    /// A change between two optional values.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// An attribute that appears with the resource.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// An attribute that goes away with the resource.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }
}

fn to_bytes(value: Option<&Value>) -> Vec<u8> {
    value
        .map(|v| serde_json::to_vec(v).unwrap_or_default())
        .unwrap_or_default()
}

impl From<AttributeChange> for generated::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        Self {
            before: to_bytes(change.before.as_ref()),
            after: to_bytes(change.after.as_ref()),
            path: change.path,
        }
    }
}

/// Outcome of planning one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanResult {
    /// State the apply step will receive; null for a destroy.
    pub planned_state: Value,
    /// Attribute-level differences from the prior state.
    pub changes: Vec<AttributeChange>,
    /// True when a force-new attribute changed and the resource must be
    /// destroyed and created again.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Nothing to do: the resource already matches.
    pub fn no_change(state: Value) -> Self {
        Self::with_changes(state, Vec::new(), false)
    }

    /// A plan carrying changes.
    pub fn with_changes(planned_state: Value, changes: Vec<AttributeChange>, requires_replace: bool) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }
}

/// State adopted by ImportResourceState.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedResource {
    /// Resource type of the adopted object.
    pub resource_type: String,
    /// State as read from the service.
    pub state: Value,
}

impl ImportedResource {
    /// Pair a resource type with its imported state.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

impl From<ImportedResource> for generated::ImportedResource {
    fn from(imported: ImportedResource) -> Self {
        Self {
            state: to_bytes(Some(&imported.state)),
            resource_type: imported.resource_type,
        }
    }
}

/// What GetMetadata reports.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProviderMetadata {
    /// Resource type names, sorted.
    pub resources: Vec<String>,
    /// Whether Plan accepts a null proposed state to plan a destroy.
    pub plan_destroy: bool,
}

/// The protocol version for the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// The handshake prefix output by providers.
pub const HANDSHAKE_PREFIX: &str = "HEMMER_PROVIDER";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_to_proto_leaves_absent_side_empty() {
        let proto: generated::AttributeChange = AttributeChange::added("throughput", json!(400)).into();
        assert_eq!(proto.path, "throughput");
        assert!(proto.before.is_empty());
        assert_eq!(proto.after, b"400");

        let proto: generated::AttributeChange = AttributeChange::removed("name", json!("db1")).into();
        assert_eq!(proto.before, br#""db1""#);
        assert!(proto.after.is_empty());

        let proto: generated::AttributeChange =
            AttributeChange::new("throughput", Some(json!(400)), Some(json!(700))).into();
        assert_eq!(proto.before, b"400");
        assert_eq!(proto.after, b"700");
    }

    #[test]
    fn test_no_change_plan() {
        let plan = PlanResult::no_change(json!({"name": "db1"}));
        assert!(plan.changes.is_empty());
        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["name"], "db1");
    }

    #[test]
    fn test_imported_resource_to_proto() {
        let id = "/subscriptions/sub/resourceGroups/rg1/providers/Microsoft.DocumentDB/databaseAccounts/acc1/apis/mongodb/databases/db1";
        let imported = ImportedResource::new(
            "azurerm_cosmosdb_mongo_database",
            json!({"id": id, "throughput": 400}),
        );

        let proto: generated::ImportedResource = imported.into();
        assert_eq!(proto.resource_type, "azurerm_cosmosdb_mongo_database");
        let state: Value = serde_json::from_slice(&proto.state).unwrap();
        assert_eq!(state["id"], id);
        assert_eq!(state["throughput"], 400);
    }
}
