//! Error types for the Azure Cosmos provider.

use thiserror::Error;

use crate::cosmos::ApiError;

/// Errors that can occur while serving provider requests.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A stored resource identifier could not be parsed.
    #[error("Invalid resource ID: {0}")]
    InvalidResourceId(String),

    /// The resource already exists remotely and must be imported instead of created.
    #[error(
        "A resource with the ID {id:?} already exists - to be managed via Hemmer this resource \
         needs to be imported into the State. Please see the resource documentation for \
         {resource_type:?} for more information."
    )]
    ImportAsExists {
        /// The resource type being created.
        resource_type: String,
        /// The identifier of the existing remote resource.
        id: String,
    },

    /// A call to the Azure control plane failed.
    #[error("{context}: {source}")]
    Api {
        /// What was being attempted, naming the database and account.
        context: String,
        /// The underlying API failure.
        #[source]
        source: ApiError,
    },

    /// Operation timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The host asked the provider to stop while the operation was running.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// The operation failed after the local state had already been changed.
    ///
    /// The host should persist `state` and report `source`.
    #[error("{source}")]
    PartialState {
        /// The state as it stood when the operation failed.
        state: serde_json::Value,
        /// The failure that stopped the operation.
        #[source]
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Wrap an API failure with the operation it interrupted.
    pub fn api(context: impl Into<String>, source: ApiError) -> Self {
        Self::Api {
            context: context.into(),
            source,
        }
    }

    /// Returns true if this error (or the error it carries) is an API not-found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Api { source, .. } => source.is_not_found(),
            Self::PartialState { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// The state carried by a [`ProviderError::PartialState`], if any.
    pub fn partial_state(&self) -> Option<&serde_json::Value> {
        match self {
            Self::PartialState { state, .. } => Some(state),
            _ => None,
        }
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => tonic::Status::not_found(msg),
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            ProviderError::Transport(err) => {
                tonic::Status::unavailable(format!("Transport error: {}", err))
            },
            ProviderError::InvalidResourceId(msg) => tonic::Status::invalid_argument(msg),
            err @ ProviderError::ImportAsExists { .. } => {
                tonic::Status::already_exists(err.to_string())
            },
            ProviderError::Api { context, source } => {
                let message = format!("{}: {}", context, source);
                match source.status {
                    Some(404) => tonic::Status::not_found(message),
                    Some(401) | Some(403) => tonic::Status::permission_denied(message),
                    Some(409) => tonic::Status::already_exists(message),
                    Some(429) => tonic::Status::resource_exhausted(message),
                    Some(503) => tonic::Status::unavailable(message),
                    _ => tonic::Status::internal(message),
                }
            },
            ProviderError::DeadlineExceeded(msg) => tonic::Status::deadline_exceeded(msg),
            ProviderError::Cancelled(msg) => tonic::Status::cancelled(msg),
            ProviderError::FailedPrecondition(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::PartialState { source, .. } => (*source).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("resource-123".to_string());
        assert_eq!(format!("{}", err), "Resource not found: resource-123");

        let err = ProviderError::Validation("invalid input".to_string());
        assert_eq!(format!("{}", err), "Validation error: invalid input");

        let err = ProviderError::UnknownResource("custom_resource".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: custom_resource");
    }

    #[test]
    fn test_import_as_exists_names_id() {
        let err = ProviderError::ImportAsExists {
            resource_type: "azurerm_cosmosdb_mongo_database".to_string(),
            id: "/subscriptions/sub/resourceGroups/rg".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("\"/subscriptions/sub/resourceGroups/rg\""));
        assert!(message.contains("needs to be imported"));
        assert!(message.contains("azurerm_cosmosdb_mongo_database"));
    }

    #[test]
    fn test_api_error_display_and_not_found() {
        let err = ProviderError::api(
            "reading Cosmos Mongo Database db1 (Account acc1)",
            ApiError::new(Some(404), "NotFound", "Resource not found"),
        );
        assert!(err.is_not_found());
        assert!(err
            .to_string()
            .starts_with("reading Cosmos Mongo Database db1 (Account acc1): "));

        let err = ProviderError::api("ctx", ApiError::new(Some(500), "InternalError", "boom"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_to_status() {
        let err = ProviderError::NotFound("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let err = ProviderError::Validation("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let err = ProviderError::Configuration("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);

        let err = ProviderError::InvalidResourceId("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let err = ProviderError::ImportAsExists {
            resource_type: "t".to_string(),
            id: "i".to_string(),
        };
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::AlreadyExists);

        let err = ProviderError::Cancelled("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::Cancelled);

        let err = ProviderError::DeadlineExceeded("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
    }

    #[test]
    fn test_api_status_codes() {
        let cases = [
            (Some(404), tonic::Code::NotFound),
            (Some(403), tonic::Code::PermissionDenied),
            (Some(429), tonic::Code::ResourceExhausted),
            (Some(503), tonic::Code::Unavailable),
            (Some(500), tonic::Code::Internal),
            (None, tonic::Code::Internal),
        ];
        for (http_status, code) in cases {
            let err = ProviderError::api("ctx", ApiError::new(http_status, "Code", "msg"));
            let status: tonic::Status = err.into();
            assert_eq!(status.code(), code, "status {:?}", http_status);
        }
    }

    #[test]
    fn test_partial_state_delegates() {
        let err = ProviderError::PartialState {
            state: serde_json::json!({"throughput": null}),
            source: Box::new(ProviderError::FailedPrecondition("nope".to_string())),
        };
        assert_eq!(err.to_string(), "Failed precondition: nope");
        assert_eq!(
            err.partial_state(),
            Some(&serde_json::json!({"throughput": null}))
        );

        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    }
}
