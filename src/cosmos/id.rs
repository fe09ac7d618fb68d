use std::collections::HashMap;
use std::fmt;

use crate::error::ProviderError;

use super::DatabaseKey;

/// The ARM resource ID of a Cosmos DB MongoDB database.
///
/// Formats as
/// `/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.DocumentDB/databaseAccounts/{account}/apis/mongodb/databases/{db}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CosmosDatabaseId {
    /// The subscription ID.
    pub subscription_id: String,
    /// The resource group name.
    pub resource_group: String,
    /// The Cosmos DB account name.
    pub account: String,
    /// The database name.
    pub database: String,
}

impl CosmosDatabaseId {
    /// Build an ID from its components.
    pub fn new(subscription_id: impl Into<String>, key: &DatabaseKey) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: key.resource_group.clone(),
            account: key.account.clone(),
            database: key.database.clone(),
        }
    }

    /// Parse an ARM resource ID.
    ///
    /// The ID must consist of key/value segment pairs and contain
    /// `subscriptions`, `resourceGroups`, `databaseAccounts` and `databases`.
    /// Any other pairs (such as `providers/Microsoft.DocumentDB` or
    /// `apis/mongodb`) are accepted and ignored.
    pub fn parse(id: &str) -> Result<Self, ProviderError> {
        let trimmed = id.trim_matches('/');
        if trimmed.is_empty() {
            return Err(ProviderError::InvalidResourceId(
                "cannot parse an empty resource ID".to_string(),
            ));
        }

        let segments: Vec<&str> = trimmed.split('/').collect();
        if segments.len() % 2 != 0 {
            return Err(ProviderError::InvalidResourceId(format!(
                "the number of path segments is not divisible by 2 in {:?}",
                id
            )));
        }

        let mut components: HashMap<&str, &str> = HashMap::new();
        for pair in segments.chunks(2) {
            let (key, value) = (pair[0], pair[1]);
            if key.is_empty() || value.is_empty() {
                return Err(ProviderError::InvalidResourceId(format!(
                    "key/value cannot be empty strings in {:?}",
                    id
                )));
            }
            components.insert(key, value);
        }

        let component = |name: &str| -> Result<String, ProviderError> {
            components
                .get(name)
                .map(|v| v.to_string())
                .ok_or_else(|| {
                    ProviderError::InvalidResourceId(format!(
                        "no {:?} segment in resource ID {:?}",
                        name, id
                    ))
                })
        };

        Ok(Self {
            subscription_id: component("subscriptions")?,
            resource_group: component("resourceGroups")?,
            account: component("databaseAccounts")?,
            database: component("databases")?,
        })
    }

    /// The key the control-plane API is addressed by.
    pub fn key(&self) -> DatabaseKey {
        DatabaseKey::new(&self.resource_group, &self.account, &self.database)
    }
}

impl fmt::Display for CosmosDatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.DocumentDB/databaseAccounts/{}/apis/mongodb/databases/{}",
            self.subscription_id, self.resource_group, self.account, self.database
        )
    }
}

impl std::str::FromStr for CosmosDatabaseId {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
