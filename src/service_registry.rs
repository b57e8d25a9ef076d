use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::{collections::HashMap, path::PathBuf, sync::Arc};

use crate::config::GatewayConfig;
use crate::error::{FetchError, GatewayError};
use crate::response::GraphQLError;
use crate::schema::{ServiceDefinition, UnifiedSchema};

/// Request-capable handles by service name, read-only during execution.
pub type ServiceMap = HashMap<String, Arc<dyn ServiceHandle>>;

#[derive(Clone, Debug, Default, Serialize)]
pub struct SubgraphRequest {
    pub query: String,
    pub variables: Map<String, Value>,
    #[serde(skip)]
    pub headers: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SubgraphResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<GraphQLError>,
}

/// A backend service able to answer a GraphQL sub-query.
#[async_trait]
pub trait ServiceHandle: Send + Sync {
    async fn send(&self, request: SubgraphRequest) -> Result<SubgraphResponse, FetchError>;
}

/// Sends sub-queries as JSON over HTTP POST.
pub struct HttpServiceHandle {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpServiceHandle {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        HttpServiceHandle {
            name: name.into(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl ServiceHandle for HttpServiceHandle {
    async fn send(&self, request: SubgraphRequest) -> Result<SubgraphResponse, FetchError> {
        let request_body = json!({
            "query": request.query,
            "variables": request.variables,
        });

        let mut builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder
            .json(&request_body)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                service: self.name.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| FetchError::Transport {
            service: self.name.clone(),
            reason: e.to_string(),
        })?;

        serde_json::from_slice::<SubgraphResponse>(&body).map_err(|e| {
            if status.is_success() {
                FetchError::InvalidResponse {
                    service: self.name.clone(),
                    reason: e.to_string(),
                }
            } else {
                FetchError::Transport {
                    service: self.name.clone(),
                    reason: format!("HTTP status {status}"),
                }
            }
        })
    }
}

/// Builds the handle of every composed service, preferring `overrides`.
pub fn build_service_map(
    schema: &UnifiedSchema,
    overrides: &HashMap<String, Arc<dyn ServiceHandle>>,
    client: &reqwest::Client,
) -> ServiceMap {
    schema
        .services
        .iter()
        .map(|service| {
            let handle = overrides.get(&service.name).cloned().unwrap_or_else(|| {
                Arc::new(HttpServiceHandle::new(&service.name, &service.url, client.clone())) as Arc<dyn ServiceHandle>
            });
            (service.name.clone(), handle)
        })
        .collect()
}

/// Produces the list of services to compose.
#[async_trait]
pub trait ServiceListLoader: Send + Sync {
    async fn load(&self) -> Result<Vec<ServiceDefinition>, GatewayError>;
}

pub struct StaticServiceList(pub Vec<ServiceDefinition>);

#[async_trait]
impl ServiceListLoader for StaticServiceList {
    async fn load(&self) -> Result<Vec<ServiceDefinition>, GatewayError> {
        Ok(self.0.clone())
    }
}

/// Reads `subgraphs` from a supergraph config file on every load.
pub struct SupergraphFileLoader {
    config_path: PathBuf,
}

impl SupergraphFileLoader {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        SupergraphFileLoader {
            config_path: config_path.into(),
        }
    }
}

#[async_trait]
impl ServiceListLoader for SupergraphFileLoader {
    async fn load(&self) -> Result<Vec<ServiceDefinition>, GatewayError> {
        let config = GatewayConfig::load(&self.config_path).await?;
        config.service_definitions(&self.config_path).await
    }
}
