use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::error::ProviderError;

use super::{
    ApiError, CosmosDatabaseId, CreateUpdateOptions, DatabaseKey, LongRunningOperation,
    MongoDatabase, MongoDatabaseApi, OperationStatus, Throughput, DEFAULT_POLL_INTERVAL,
};

/// The public Azure Resource Manager endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

/// The Cosmos DB resource provider API version used for every call.
pub const API_VERSION: &str = "2015-04-08";

const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";

/// [`MongoDatabaseApi`] over the Azure Resource Manager REST API.
pub struct ArmMongoClient {
    http: Client,
    endpoint: String,
    subscription_id: String,
    access_token: SecretString,
    poll_interval: Duration,
}

impl std::fmt::Debug for ArmMongoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmMongoClient")
            .field("endpoint", &self.endpoint)
            .field("subscription_id", &self.subscription_id)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ArmMongoClient {
    /// Create a client for `subscription_id` against `endpoint`.
    pub fn new(
        endpoint: impl Into<String>,
        subscription_id: impl Into<String>,
        access_token: SecretString,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .user_agent(concat!("hemmer-provider-azure-cosmos/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Configuration(format!("building HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            subscription_id: subscription_id.into(),
            access_token,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Set the delay between polls when the service does not send `Retry-After`.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The subscription this client manages.
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    fn database_url(&self, key: &DatabaseKey) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.DocumentDB/databaseAccounts/{}/apis/mongodb/databases/{}",
            self.endpoint, self.subscription_id, key.resource_group, key.account, key.database
        )
    }

    fn throughput_url(&self, key: &DatabaseKey) -> String {
        format!("{}/settings/throughput", self.database_url(key))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| ApiError::new(None, "RequestFailed", e.to_string()))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    fn versioned(&self, request: RequestBuilder) -> RequestBuilder {
        request.query(&[("api-version", API_VERSION)])
    }
}

#[derive(Debug, Deserialize)]
struct CloudError {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CloudErrorBody {
    error: Option<CloudError>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DatabaseResponse {
    name: Option<String>,
    properties: Option<DatabaseProperties>,
}

#[derive(Debug, Deserialize)]
struct DatabaseProperties {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThroughputResponse {
    properties: Option<ThroughputProperties>,
}

#[derive(Debug, Deserialize)]
struct ThroughputProperties {
    throughput: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AsyncOperationResponse {
    status: Option<String>,
    error: Option<CloudError>,
}

async fn error_from_response(response: Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    parse_error(status, &body)
}

fn parse_error(status: StatusCode, body: &str) -> ApiError {
    let fallback_message = || {
        if body.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("unexpected response")
                .to_string()
        } else {
            body.to_string()
        }
    };

    let (code, message) = match serde_json::from_str::<CloudErrorBody>(body) {
        Ok(CloudErrorBody {
            error: Some(err), ..
        }) => (err.code, err.message),
        Ok(CloudErrorBody { code, message, .. }) => (code, message),
        Err(_) => (None, None),
    };

    ApiError::new(
        Some(status.as_u16()),
        code.unwrap_or_else(|| status.as_u16().to_string()),
        message.unwrap_or_else(fallback_message),
    )
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn long_running_operation(response: &Response) -> LongRunningOperation {
    let headers = response.headers();
    let poll_url = headers
        .get(AZURE_ASYNC_OPERATION)
        .or_else(|| {
            if response.status() == StatusCode::ACCEPTED {
                headers.get(LOCATION)
            } else {
                None
            }
        })
        .and_then(|v| v.to_str().ok());

    match poll_url {
        Some(url) => LongRunningOperation::pending(url, retry_after(headers)),
        None => LongRunningOperation::completed(),
    }
}

/// Canonical ID from a request path, with percent-escapes such as `%20` decoded.
fn id_from_path(path: &str) -> Option<String> {
    let path = urlencoding::decode(path).ok()?;
    CosmosDatabaseId::parse(&path).ok().map(|id| id.to_string())
}

#[async_trait]
impl MongoDatabaseApi for ArmMongoClient {
    #[instrument(skip(self), fields(database = %key.database, account = %key.account))]
    async fn get_database(&self, key: &DatabaseKey) -> Result<MongoDatabase, ApiError> {
        let request = self.versioned(self.http.get(self.database_url(key)));
        let response = self.send(request).await?;

        // The ID is rebuilt from the request path; the service has returned
        // IDs with the wrong casing for this resource type.
        let id = id_from_path(response.url().path())
            .unwrap_or_else(|| CosmosDatabaseId::new(&self.subscription_id, key).to_string());

        let body: DatabaseResponse = response
            .json()
            .await
            .map_err(|e| ApiError::new(None, "InvalidResponse", e.to_string()))?;

        let name = body
            .properties
            .and_then(|p| p.id)
            .or(body.name)
            .unwrap_or_else(|| key.database.clone());

        Ok(MongoDatabase { id, name })
    }

    #[instrument(skip(self, options), fields(database = %key.database, account = %key.account))]
    async fn begin_create_update(
        &self,
        key: &DatabaseKey,
        options: &CreateUpdateOptions,
    ) -> Result<LongRunningOperation, ApiError> {
        let mut request_options = serde_json::Map::new();
        if let Some(throughput) = options.throughput {
            request_options.insert("throughput".to_string(), json!(throughput.to_string()));
        }

        let body = json!({
            "properties": {
                "resource": { "id": key.database },
                "options": request_options,
            }
        });

        let request = self.versioned(self.http.put(self.database_url(key))).json(&body);
        let response = self.send(request).await?;
        Ok(long_running_operation(&response))
    }

    #[instrument(skip(self), fields(database = %key.database, account = %key.account))]
    async fn begin_delete(&self, key: &DatabaseKey) -> Result<LongRunningOperation, ApiError> {
        let request = self.versioned(self.http.delete(self.database_url(key)));
        let response = self.send(request).await?;
        if response.status() == StatusCode::NO_CONTENT {
            // 204: nothing to delete
            return Err(ApiError::not_found(format!("database {} does not exist", key)));
        }
        Ok(long_running_operation(&response))
    }

    #[instrument(skip(self), fields(database = %key.database, account = %key.account))]
    async fn get_throughput(&self, key: &DatabaseKey) -> Result<Throughput, ApiError> {
        let request = self.versioned(self.http.get(self.throughput_url(key)));
        let response = self.send(request).await?;
        let body: ThroughputResponse = response
            .json()
            .await
            .map_err(|e| ApiError::new(None, "InvalidResponse", e.to_string()))?;

        Ok(Throughput {
            throughput: body.properties.and_then(|p| p.throughput),
        })
    }

    #[instrument(skip(self), fields(database = %key.database, account = %key.account))]
    async fn begin_update_throughput(
        &self,
        key: &DatabaseKey,
        throughput: i64,
    ) -> Result<LongRunningOperation, ApiError> {
        let body = json!({
            "properties": {
                "resource": { "throughput": throughput }
            }
        });

        let request = self.versioned(self.http.put(self.throughput_url(key))).json(&body);
        let response = self.send(request).await?;
        Ok(long_running_operation(&response))
    }

    async fn poll(&self, operation: &LongRunningOperation) -> Result<OperationStatus, ApiError> {
        let Some(url) = operation.poll_url.as_deref() else {
            return Ok(OperationStatus::Succeeded);
        };

        debug!(url, "Polling long-running operation");
        let response = self.send(self.http.get(url)).await?;
        if response.status() == StatusCode::ACCEPTED {
            return Ok(OperationStatus::InProgress);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<AsyncOperationResponse>(&body).ok();

        let Some(AsyncOperationResponse {
            status: Some(state),
            error,
        }) = parsed
        else {
            // Location polling: a final non-202 response means done.
            return Ok(OperationStatus::Succeeded);
        };

        Ok(match state.as_str() {
            "Succeeded" => OperationStatus::Succeeded,
            "Failed" => {
                let (code, message) = error
                    .map(|e| (e.code, e.message))
                    .unwrap_or((None, None));
                OperationStatus::Failed(ApiError::new(
                    Some(status.as_u16()),
                    code.unwrap_or_else(|| "OperationFailed".to_string()),
                    message.unwrap_or_else(|| "the long-running operation failed".to_string()),
                ))
            },
            "Canceled" | "Cancelled" => OperationStatus::Canceled,
            _ => OperationStatus::InProgress,
        })
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
