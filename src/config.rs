use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::GatewayError;
use crate::plan_cache::DEFAULT_MAX_BYTES;
use crate::schema::ServiceDefinition;

/// Gateway settings, read from a `supergraph.yaml` file.
///
/// ```yaml
/// debug: false
/// production: false
/// entity_batch_size: 100
/// query_plan_cache:
///   max_bytes: 31457280
/// subgraphs:
///   products:
///     routing_url: http://localhost:4001/graphql
///     schema:
///       file: products.graphql
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Verbose logging.
    pub debug: bool,
    pub production: bool,
    /// Allows `extensions.queryPlan`; defaults to `!production`.
    pub expose_query_plan: Option<bool>,
    pub query_plan_cache: QueryPlanCacheConfig,
    pub entity_batch_size: Option<usize>,
    pub subgraphs: IndexMap<String, SubgraphConfig>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueryPlanCacheConfig {
    pub max_bytes: u64,
}

impl Default for QueryPlanCacheConfig {
    fn default() -> Self {
        QueryPlanCacheConfig {
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SubgraphConfig {
    pub routing_url: String,
    pub schema: SchemaConfig,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SchemaConfig {
    /// SDL file, relative to the config file.
    pub file: String,
}

impl GatewayConfig {
    pub fn parse(contents: &str) -> Result<Self, GatewayError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        tracing::debug!("reading config file {}", path.display());
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| GatewayError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::parse(&contents)
    }

    pub fn expose_query_plan(&self) -> bool {
        self.expose_query_plan.unwrap_or(!self.production)
    }

    /// Reads the SDL of every subgraph, resolving schema files next to `config_path`.
    pub async fn service_definitions(&self, config_path: &Path) -> Result<Vec<ServiceDefinition>, GatewayError> {
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new(""));
        let mut services = Vec::with_capacity(self.subgraphs.len());
        for (name, subgraph) in &self.subgraphs {
            let schema = read_schema_file(config_dir, &subgraph.schema.file).await?;
            services.push(ServiceDefinition {
                name: name.clone(),
                url: subgraph.routing_url.clone(),
                schema,
            });
        }
        Ok(services)
    }
}

async fn read_schema_file(base_dir: &Path, file_path: &str) -> Result<String, GatewayError> {
    let full_path = base_dir.join(file_path);
    tracing::debug!("reading schema file {}", full_path.display());
    tokio::fs::read_to_string(&full_path)
        .await
        .map_err(|source| GatewayError::Io {
            path: full_path.display().to_string(),
            source,
        })
}
