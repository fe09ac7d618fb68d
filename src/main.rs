use hemmer_provider_azure_cosmos::{init_logging, serve, AzureCosmosProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Azure Cosmos provider");
    serve(AzureCosmosProvider::new()).await
}
