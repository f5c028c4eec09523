//! New Relic provider for Hemmer.
//!
//! Maps declarative resource blocks to New Relic API calls: alert policies,
//! channels and conditions, entity tags, events-to-metrics rules and custom
//! events.
//! The host engine talks to the provider over the gRPC plugin protocol in
//! `proto/provider.proto`.
//!
//! # Layout
//!
//! - [`resources`]: one module per resource kind, each with `schema()`,
//!   `expand` (configuration to API object), `flatten` (API object to state)
//!   and the `create`/`read`/`update`/`delete` lifecycle.
//! - [`id`]: composite resource IDs (`policyID:conditionID`,
//!   `accountID:ruleID`) and base64 entity GUIDs.
//! - [`client`]: the [`NewRelicApi`] traits the resources call, plus the
//!   in-memory [`MemoryClient`].
//! - [`provider`]: [`NewRelicProvider`], which dispatches host requests.
//! - [`server`]: the plugin server and the [`ProviderService`] trait.
//!
//! # Running
//!
//! ```ignore
//! use std::sync::Arc;
//! use newrelic_provider::{init_logging, serve, MemoryClient, NewRelicProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!     serve(NewRelicProvider::new(Arc::new(MemoryClient::new()))).await
//! }
//! ```
//!
//! # Handshake Protocol
//!
//! On start the server prints one line to stdout and logs only to stderr:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `HEMMER_PROVIDER|<protocol_version>|<address>`.

#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod data;
pub mod error;
pub mod id;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod retry;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use client::{ApiError, MemoryClient, NewRelicApi};
pub use config::{ProviderConfig, Region};
pub use data::{Attributes, ResourceData};
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::NewRelicProvider;
pub use resources::{DataSourceKind, ResourceKind};
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ProviderService, ServeOptions,
};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::{is_valid, validate, validate_result};

pub use async_trait::async_trait;
