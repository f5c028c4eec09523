//! Dry-run provider binary.
//!
//! Serves the New Relic provider over the in-memory API, so plans and applies
//! run end to end without touching a New Relic account.

use std::sync::Arc;
use std::time::Duration;

use newrelic_provider::{init_logging, serve_with_options, MemoryClient, NewRelicProvider, ServeOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let provider = NewRelicProvider::new(Arc::new(MemoryClient::new()));
    let options = ServeOptions::new().with_shutdown_timeout(Duration::from_secs(10));
    serve_with_options(provider, options).await
}
