pub mod alias;
pub mod composer;
pub mod config;
pub mod error;
pub mod federation_gateway;
pub mod operation;
pub mod plan;
pub mod plan_cache;
pub mod query_executor;
pub mod query_planner;
pub mod response;
pub mod schema;
pub mod service_registry;

pub use composer::compose;
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use federation_gateway::{FederationGateway, GatewayObserver, RequestContext};
pub use query_executor::QueryExecutor;
pub use query_planner::build_query_plan;
pub use response::ExecutionResponse;
pub use schema::{ServiceDefinition, UnifiedSchema};
pub use service_registry::{ServiceHandle, StaticServiceList, SupergraphFileLoader};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a GraphQL-over-HTTP request.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default)]
    pub operation_name: Option<String>,
}
