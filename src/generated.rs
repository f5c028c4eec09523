// Protocol messages and server plumbing for `hemmer.provider.v1`.
//
// Mirrors proto/provider.proto. Regenerate with
// `cargo build --features regenerate-proto` after editing the proto.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Diagnostic {
    #[prost(enumeration = "diagnostic::Severity", tag = "1")]
    pub severity: i32,
    #[prost(string, tag = "2")]
    pub summary: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub detail: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub attribute: ::prost::alloc::string::String,
}
/// Nested message and enum types in `Diagnostic`.
pub mod diagnostic {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Severity {
        Unspecified = 0,
        Error = 1,
        Warning = 2,
    }
    impl Severity {
        pub fn as_str_name(&self) -> &'static str {
            match self {
                Self::Unspecified => "SEVERITY_UNSPECIFIED",
                Self::Error => "SEVERITY_ERROR",
                Self::Warning => "SEVERITY_WARNING",
            }
        }
        pub fn from_str_name(value: &str) -> ::core::option::Option<Self> {
            match value {
                "SEVERITY_UNSPECIFIED" => Some(Self::Unspecified),
                "SEVERITY_ERROR" => Some(Self::Error),
                "SEVERITY_WARNING" => Some(Self::Warning),
                _ => None,
            }
        }
    }
}
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ServerCapabilities {
    #[prost(bool, tag = "1")]
    pub plan_destroy: bool,
}
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct GetMetadataRequest {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetMetadataResponse {
    #[prost(message, optional, tag = "1")]
    pub server_capabilities: ::core::option::Option<ServerCapabilities>,
    #[prost(string, repeated, tag = "2")]
    pub resources: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, repeated, tag = "3")]
    pub data_sources: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(message, repeated, tag = "4")]
    pub diagnostics: ::prost::alloc::vec::Vec<Diagnostic>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Attribute {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub r#type: ::prost::alloc::vec::Vec<u8>,
    #[prost(bool, tag = "3")]
    pub required: bool,
    #[prost(bool, tag = "4")]
    pub optional: bool,
    #[prost(bool, tag = "5")]
    pub computed: bool,
    #[prost(bool, tag = "6")]
    pub sensitive: bool,
    #[prost(string, tag = "7")]
    pub description: ::prost::alloc::string::String,
    #[prost(bool, tag = "8")]
    pub force_new: bool,
    #[prost(bytes = "vec", tag = "9")]
    pub default_value: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NestedBlock {
    #[prost(string, tag = "1")]
    pub type_name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub block: ::core::option::Option<Block>,
    #[prost(enumeration = "nested_block::NestingMode", tag = "3")]
    pub nesting_mode: i32,
    #[prost(int32, tag = "4")]
    pub min_items: i32,
    #[prost(int32, tag = "5")]
    pub max_items: i32,
}
/// Nested message and enum types in `NestedBlock`.
pub mod nested_block {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum NestingMode {
        Unspecified = 0,
        Single = 1,
        List = 2,
        Set = 3,
        Map = 4,
    }
    impl NestingMode {
        pub fn as_str_name(&self) -> &'static str {
            match self {
                Self::Unspecified => "NESTING_MODE_UNSPECIFIED",
                Self::Single => "NESTING_MODE_SINGLE",
                Self::List => "NESTING_MODE_LIST",
                Self::Set => "NESTING_MODE_SET",
                Self::Map => "NESTING_MODE_MAP",
            }
        }
        pub fn from_str_name(value: &str) -> ::core::option::Option<Self> {
            match value {
                "NESTING_MODE_UNSPECIFIED" => Some(Self::Unspecified),
                "NESTING_MODE_SINGLE" => Some(Self::Single),
                "NESTING_MODE_LIST" => Some(Self::List),
                "NESTING_MODE_SET" => Some(Self::Set),
                "NESTING_MODE_MAP" => Some(Self::Map),
                _ => None,
            }
        }
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Block {
    #[prost(message, repeated, tag = "1")]
    pub attributes: ::prost::alloc::vec::Vec<Attribute>,
    #[prost(message, repeated, tag = "2")]
    pub block_types: ::prost::alloc::vec::Vec<NestedBlock>,
    #[prost(string, tag = "3")]
    pub description: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Schema {
    #[prost(int64, tag = "1")]
    pub version: i64,
    #[prost(message, optional, tag = "2")]
    pub block: ::core::option::Option<Block>,
}
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct GetSchemaRequest {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSchemaResponse {
    #[prost(message, optional, tag = "1")]
    pub provider: ::core::option::Option<Schema>,
    #[prost(map = "string, message", tag = "2")]
    pub resources: ::std::collections::HashMap<::prost::alloc::string::String, Schema>,
    #[prost(map = "string, message", tag = "3")]
    pub data_sources: ::std::collections::HashMap<::prost::alloc::string::String, Schema>,
    #[prost(message, repeated, tag = "4")]
    pub diagnostics: ::prost::alloc::vec::Vec<Diagnostic>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateProviderConfigRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub config: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateProviderConfigResponse {
    #[prost(message, repeated, tag = "1")]
    pub diagnostics: ::prost::alloc::vec::Vec<Diagnostic>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigureRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub config: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigureResponse {
    #[prost(message, repeated, tag = "1")]
    pub diagnostics: ::prost::alloc::vec::Vec<Diagnostic>,
}
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct StopRequest {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StopResponse {
    #[prost(string, tag = "1")]
    pub error: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateResourceConfigRequest {
    #[prost(string, tag = "1")]
    pub resource_type: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub config: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateResourceConfigResponse {
    #[prost(message, repeated, tag = "1")]
    pub diagnostics: ::prost::alloc::vec::Vec<Diagnostic>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpgradeResourceStateRequest {
    #[prost(string, tag = "1")]
    pub resource_type: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub version: i64,
    #[prost(bytes = "vec", tag = "3")]
    pub raw_state: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpgradeResourceStateResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub upgraded_state: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: ::prost::alloc::vec::Vec<Diagnostic>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttributeChange {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub before: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub after: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlanRequest {
    #[prost(string, tag = "1")]
    pub resource_type: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub prior_state: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub proposed_state: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub config: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlanResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub planned_state: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub changes: ::prost::alloc::vec::Vec<AttributeChange>,
    #[prost(bool, tag = "3")]
    pub requires_replace: bool,
    #[prost(message, repeated, tag = "4")]
    pub diagnostics: ::prost::alloc::vec::Vec<Diagnostic>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateRequest {
    #[prost(string, tag = "1")]
    pub resource_type: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub planned_state: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub state: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: ::prost::alloc::vec::Vec<Diagnostic>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadRequest {
    #[prost(string, tag = "1")]
    pub resource_type: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub current_state: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub state: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: ::prost::alloc::vec::Vec<Diagnostic>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateRequest {
    #[prost(string, tag = "1")]
    pub resource_type: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub prior_state: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub planned_state: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub state: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: ::prost::alloc::vec::Vec<Diagnostic>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteRequest {
    #[prost(string, tag = "1")]
    pub resource_type: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub current_state: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteResponse {
    #[prost(message, repeated, tag = "1")]
    pub diagnostics: ::prost::alloc::vec::Vec<Diagnostic>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ImportedResource {
    #[prost(string, tag = "1")]
    pub resource_type: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub state: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ImportResourceStateRequest {
    #[prost(string, tag = "1")]
    pub resource_type: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub id: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ImportResourceStateResponse {
    #[prost(message, repeated, tag = "1")]
    pub imported: ::prost::alloc::vec::Vec<ImportedResource>,
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: ::prost::alloc::vec::Vec<Diagnostic>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateDataSourceConfigRequest {
    #[prost(string, tag = "1")]
    pub data_source_type: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub config: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateDataSourceConfigResponse {
    #[prost(message, repeated, tag = "1")]
    pub diagnostics: ::prost::alloc::vec::Vec<Diagnostic>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadDataSourceRequest {
    #[prost(string, tag = "1")]
    pub data_source_type: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub config: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadDataSourceResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub state: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: ::prost::alloc::vec::Vec<Diagnostic>,
}

/// Server side of the `hemmer.provider.v1.Provider` service.
pub mod provider_server {
    #![allow(clippy::type_complexity)]

    use std::convert::Infallible;
    use std::future::Future;
    use std::marker::PhantomData;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};

    use tonic::codegen::{http, Body};

    type StdError = Box<dyn std::error::Error + Send + Sync + 'static>;
    type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'static>>;
    type UnaryResult<T> = BoxFuture<tonic::Response<T>, tonic::Status>;

    /// Handlers for every RPC of the provider protocol.
    #[tonic::async_trait]
    pub trait Provider: std::marker::Send + std::marker::Sync + 'static {
        async fn get_metadata(
            &self,
            request: tonic::Request<super::GetMetadataRequest>,
        ) -> std::result::Result<tonic::Response<super::GetMetadataResponse>, tonic::Status>;
        async fn get_schema(
            &self,
            request: tonic::Request<super::GetSchemaRequest>,
        ) -> std::result::Result<tonic::Response<super::GetSchemaResponse>, tonic::Status>;
        async fn validate_provider_config(
            &self,
            request: tonic::Request<super::ValidateProviderConfigRequest>,
        ) -> std::result::Result<
            tonic::Response<super::ValidateProviderConfigResponse>,
            tonic::Status,
        >;
        async fn configure(
            &self,
            request: tonic::Request<super::ConfigureRequest>,
        ) -> std::result::Result<tonic::Response<super::ConfigureResponse>, tonic::Status>;
        async fn stop(
            &self,
            request: tonic::Request<super::StopRequest>,
        ) -> std::result::Result<tonic::Response<super::StopResponse>, tonic::Status>;
        async fn validate_resource_config(
            &self,
            request: tonic::Request<super::ValidateResourceConfigRequest>,
        ) -> std::result::Result<
            tonic::Response<super::ValidateResourceConfigResponse>,
            tonic::Status,
        >;
        async fn upgrade_resource_state(
            &self,
            request: tonic::Request<super::UpgradeResourceStateRequest>,
        ) -> std::result::Result<
            tonic::Response<super::UpgradeResourceStateResponse>,
            tonic::Status,
        >;
        async fn plan(
            &self,
            request: tonic::Request<super::PlanRequest>,
        ) -> std::result::Result<tonic::Response<super::PlanResponse>, tonic::Status>;
        async fn create(
            &self,
            request: tonic::Request<super::CreateRequest>,
        ) -> std::result::Result<tonic::Response<super::CreateResponse>, tonic::Status>;
        async fn read(
            &self,
            request: tonic::Request<super::ReadRequest>,
        ) -> std::result::Result<tonic::Response<super::ReadResponse>, tonic::Status>;
        async fn update(
            &self,
            request: tonic::Request<super::UpdateRequest>,
        ) -> std::result::Result<tonic::Response<super::UpdateResponse>, tonic::Status>;
        async fn delete(
            &self,
            request: tonic::Request<super::DeleteRequest>,
        ) -> std::result::Result<tonic::Response<super::DeleteResponse>, tonic::Status>;
        async fn import_resource_state(
            &self,
            request: tonic::Request<super::ImportResourceStateRequest>,
        ) -> std::result::Result<
            tonic::Response<super::ImportResourceStateResponse>,
            tonic::Status,
        >;
        async fn validate_data_source_config(
            &self,
            request: tonic::Request<super::ValidateDataSourceConfigRequest>,
        ) -> std::result::Result<
            tonic::Response<super::ValidateDataSourceConfigResponse>,
            tonic::Status,
        >;
        async fn read_data_source(
            &self,
            request: tonic::Request<super::ReadDataSourceRequest>,
        ) -> std::result::Result<tonic::Response<super::ReadDataSourceResponse>, tonic::Status>;
    }

    /// Tower service routing gRPC paths to a [`Provider`] implementation.
    #[derive(Debug)]
    pub struct ProviderServer<T> {
        inner: Arc<T>,
    }

    impl<T> ProviderServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T> Clone for ProviderServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    /// Adapts one trait method to `tonic::server::UnaryService`.
    struct Unary<T, H, Req, Resp> {
        inner: Arc<T>,
        handler: H,
        _marker: PhantomData<fn(Req) -> Resp>,
    }

    impl<T, H, Req, Resp> tonic::server::UnaryService<Req> for Unary<T, H, Req, Resp>
    where
        H: Fn(Arc<T>, tonic::Request<Req>) -> UnaryResult<Resp>,
    {
        type Response = Resp;
        type Future = UnaryResult<Resp>;

        fn call(&mut self, request: tonic::Request<Req>) -> Self::Future {
            (self.handler)(Arc::clone(&self.inner), request)
        }
    }

    fn route<T, B, Req, Resp, H>(
        inner: Arc<T>,
        req: http::Request<B>,
        handler: H,
    ) -> BoxFuture<http::Response<tonic::body::Body>, Infallible>
    where
        T: Provider,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
        Req: ::prost::Message + Default + std::marker::Send + 'static,
        Resp: ::prost::Message + std::marker::Send + 'static,
        H: Fn(Arc<T>, tonic::Request<Req>) -> UnaryResult<Resp> + std::marker::Send + 'static,
    {
        Box::pin(async move {
            let method = Unary {
                inner,
                handler,
                _marker: PhantomData,
            };
            let codec = tonic_prost::ProstCodec::default();
            let mut grpc = tonic::server::Grpc::new(codec);
            Ok(grpc.unary(method, req).await)
        })
    }

    impl<T, B> tonic::codegen::Service<http::Request<B>> for ProviderServer<T>
    where
        T: Provider,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
    {
        type Response = http::Response<tonic::body::Body>;
        type Error = Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = Arc::clone(&self.inner);
            match req.uri().path() {
                "/hemmer.provider.v1.Provider/GetMetadata" => route(
                    inner,
                    req,
                    |svc: Arc<T>, request: tonic::Request<super::GetMetadataRequest>| -> UnaryResult<super::GetMetadataResponse> {
                        Box::pin(async move { svc.get_metadata(request).await })
                    },
                ),
                "/hemmer.provider.v1.Provider/GetSchema" => route(
                    inner,
                    req,
                    |svc: Arc<T>, request: tonic::Request<super::GetSchemaRequest>| -> UnaryResult<super::GetSchemaResponse> {
                        Box::pin(async move { svc.get_schema(request).await })
                    },
                ),
                "/hemmer.provider.v1.Provider/ValidateProviderConfig" => route(
                    inner,
                    req,
                    |svc: Arc<T>, request: tonic::Request<super::ValidateProviderConfigRequest>| -> UnaryResult<super::ValidateProviderConfigResponse> {
                        Box::pin(async move { svc.validate_provider_config(request).await })
                    },
                ),
                "/hemmer.provider.v1.Provider/Configure" => route(
                    inner,
                    req,
                    |svc: Arc<T>, request: tonic::Request<super::ConfigureRequest>| -> UnaryResult<super::ConfigureResponse> {
                        Box::pin(async move { svc.configure(request).await })
                    },
                ),
                "/hemmer.provider.v1.Provider/Stop" => route(
                    inner,
                    req,
                    |svc: Arc<T>, request: tonic::Request<super::StopRequest>| -> UnaryResult<super::StopResponse> {
                        Box::pin(async move { svc.stop(request).await })
                    },
                ),
                "/hemmer.provider.v1.Provider/ValidateResourceConfig" => route(
                    inner,
                    req,
                    |svc: Arc<T>, request: tonic::Request<super::ValidateResourceConfigRequest>| -> UnaryResult<super::ValidateResourceConfigResponse> {
                        Box::pin(async move { svc.validate_resource_config(request).await })
                    },
                ),
                "/hemmer.provider.v1.Provider/UpgradeResourceState" => route(
                    inner,
                    req,
                    |svc: Arc<T>, request: tonic::Request<super::UpgradeResourceStateRequest>| -> UnaryResult<super::UpgradeResourceStateResponse> {
                        Box::pin(async move { svc.upgrade_resource_state(request).await })
                    },
                ),
                "/hemmer.provider.v1.Provider/Plan" => route(
                    inner,
                    req,
                    |svc: Arc<T>, request: tonic::Request<super::PlanRequest>| -> UnaryResult<super::PlanResponse> {
                        Box::pin(async move { svc.plan(request).await })
                    },
                ),
                "/hemmer.provider.v1.Provider/Create" => route(
                    inner,
                    req,
                    |svc: Arc<T>, request: tonic::Request<super::CreateRequest>| -> UnaryResult<super::CreateResponse> {
                        Box::pin(async move { svc.create(request).await })
                    },
                ),
                "/hemmer.provider.v1.Provider/Read" => route(
                    inner,
                    req,
                    |svc: Arc<T>, request: tonic::Request<super::ReadRequest>| -> UnaryResult<super::ReadResponse> {
                        Box::pin(async move { svc.read(request).await })
                    },
                ),
                "/hemmer.provider.v1.Provider/Update" => route(
                    inner,
                    req,
                    |svc: Arc<T>, request: tonic::Request<super::UpdateRequest>| -> UnaryResult<super::UpdateResponse> {
                        Box::pin(async move { svc.update(request).await })
                    },
                ),
                "/hemmer.provider.v1.Provider/Delete" => route(
                    inner,
                    req,
                    |svc: Arc<T>, request: tonic::Request<super::DeleteRequest>| -> UnaryResult<super::DeleteResponse> {
                        Box::pin(async move { svc.delete(request).await })
                    },
                ),
                "/hemmer.provider.v1.Provider/ImportResourceState" => route(
                    inner,
                    req,
                    |svc: Arc<T>, request: tonic::Request<super::ImportResourceStateRequest>| -> UnaryResult<super::ImportResourceStateResponse> {
                        Box::pin(async move { svc.import_resource_state(request).await })
                    },
                ),
                "/hemmer.provider.v1.Provider/ValidateDataSourceConfig" => route(
                    inner,
                    req,
                    |svc: Arc<T>, request: tonic::Request<super::ValidateDataSourceConfigRequest>| -> UnaryResult<super::ValidateDataSourceConfigResponse> {
                        Box::pin(async move { svc.validate_data_source_config(request).await })
                    },
                ),
                "/hemmer.provider.v1.Provider/ReadDataSource" => route(
                    inner,
                    req,
                    |svc: Arc<T>, request: tonic::Request<super::ReadDataSourceRequest>| -> UnaryResult<super::ReadDataSourceResponse> {
                        Box::pin(async move { svc.read_data_source(request).await })
                    },
                ),
                _ => Box::pin(async move { Ok(tonic::Status::unimplemented("").into_http()) }),
            }
        }
    }

    pub const SERVICE_NAME: &str = "hemmer.provider.v1.Provider";

    impl<T> tonic::server::NamedService for ProviderServer<T> {
        const NAME: &'static str = SERVICE_NAME;
    }
}
