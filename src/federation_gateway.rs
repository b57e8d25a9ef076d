use serde_json::{Map, Value, json};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

use graphql_parser::query::Document;

use crate::{
    GraphQLRequest,
    composer::compose,
    config::GatewayConfig,
    error::{CompositionErrors, GatewayError, PlanningError},
    operation::OperationContext,
    plan::QueryPlan,
    plan_cache::{PlanCache, cache_key, document_hash},
    query_executor::QueryExecutor,
    query_planner::build_query_plan,
    response::{ExecutionResponse, GraphQLError},
    schema::{ServiceDefinition, UnifiedSchema},
    service_registry::{ServiceHandle, ServiceListLoader, ServiceMap, build_service_map},
};

/// Hooks fired by the gateway. Every hook defaults to doing nothing.
pub trait GatewayObserver: Send + Sync {
    fn on_composition_failure(&self, _errors: &CompositionErrors) {}

    fn on_schema_update(&self, _schema: &UnifiedSchema, _previous: Option<&UnifiedSchema>) {}

    fn on_service_list_update(&self, _services: &[ServiceDefinition], _previous: Option<&[ServiceDefinition]>) {}

    fn on_query_plan(&self, _plan: &QueryPlan) {}
}

/// Everything a request needs from one successful composition.
///
/// Requests hold their snapshot for their whole lifetime, so a schema swap never
/// changes the schema under an in-flight request.
pub struct GatewaySnapshot {
    pub schema: Arc<UnifiedSchema>,
    pub services: ServiceMap,
    pub plan_cache: PlanCache,
}

/// Request-scoped data supplied by the transport layer.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    /// Headers forwarded to every backend request.
    pub headers: HashMap<String, String>,
    /// Set when the request carried `Apollo-Query-Plan-Experimental`.
    pub query_plan_requested: bool,
}

/// A parsed operation document and the hash identifying it.
#[derive(Debug)]
pub struct ParsedOperation {
    pub document: Document<'static, String>,
    pub operation_name: Option<String>,
    pub variables: Map<String, Value>,
    pub document_hash: String,
}

impl ParsedOperation {
    pub fn parse(
        query: &str,
        operation_name: Option<String>,
        variables: Map<String, Value>,
    ) -> Result<Self, PlanningError> {
        let document = graphql_parser::parse_query::<String>(query)
            .map_err(|e| PlanningError::InvalidQuery(e.to_string()))?
            .into_static();
        let document_hash = document_hash(query, operation_name.as_deref());
        Ok(ParsedOperation {
            document,
            operation_name,
            variables,
            document_hash,
        })
    }
}

pub struct FederationGateway {
    config: GatewayConfig,
    loader: Box<dyn ServiceListLoader>,
    service_overrides: HashMap<String, Arc<dyn ServiceHandle>>,
    observers: Vec<Arc<dyn GatewayObserver>>,
    client: reqwest::Client,
    executor: QueryExecutor,
    snapshot: RwLock<Option<Arc<GatewaySnapshot>>>,
}

impl FederationGateway {
    pub fn new(config: GatewayConfig, loader: Box<dyn ServiceListLoader>) -> Self {
        let executor = QueryExecutor::new(config.entity_batch_size);
        FederationGateway {
            config,
            loader,
            service_overrides: HashMap::new(),
            observers: Vec::new(),
            client: reqwest::Client::new(),
            executor,
            snapshot: RwLock::new(None),
        }
    }

    /// Routes requests for `service` through `handle` instead of HTTP.
    pub fn with_service_handle(mut self, service: impl Into<String>, handle: Arc<dyn ServiceHandle>) -> Self {
        self.service_overrides.insert(service.into(), handle);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn GatewayObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub async fn snapshot(&self) -> Option<Arc<GatewaySnapshot>> {
        self.snapshot.read().await.clone()
    }

    /// Loads the service list and composes it into a new active schema.
    ///
    /// On failure the previous schema stays active and the error is returned.
    pub async fn load(&self) -> Result<Arc<UnifiedSchema>, GatewayError> {
        let services = self.loader.load().await?;
        let previous = self.snapshot().await;

        let previous_services = previous.as_ref().map(|snapshot| snapshot.schema.services.as_slice());
        for observer in &self.observers {
            observer.on_service_list_update(&services, previous_services);
        }

        let schema = match compose(&services) {
            Ok(schema) => Arc::new(schema),
            Err(errors) => {
                tracing::warn!("schema composition failed, keeping the previous schema: {errors}");
                for observer in &self.observers {
                    observer.on_composition_failure(&errors);
                }
                return Err(errors.into());
            }
        };

        // Plans only depend on the composed schema, so they survive a reload that
        // just moves services to new URLs.
        let unchanged = previous
            .as_ref()
            .filter(|previous| previous.schema.version == schema.version);
        let plan_cache = match unchanged {
            Some(previous) => previous.plan_cache.clone(),
            None => PlanCache::new(self.config.query_plan_cache.max_bytes),
        };

        let snapshot = Arc::new(GatewaySnapshot {
            services: build_service_map(&schema, &self.service_overrides, &self.client),
            plan_cache,
            schema: schema.clone(),
        });
        *self.snapshot.write().await = Some(snapshot);

        if unchanged.is_some() {
            tracing::debug!("schema unchanged at version {}, service endpoints refreshed", schema.version);
            return Ok(schema);
        }

        if let Some(previous) = &previous {
            previous.plan_cache.invalidate_all();
        }
        tracing::info!(
            "schema updated to version {} with {} services",
            schema.version,
            schema.services.len()
        );
        for observer in &self.observers {
            observer.on_schema_update(&schema, previous.as_ref().map(|snapshot| snapshot.schema.as_ref()));
        }
        Ok(schema)
    }

    /// Runs a raw GraphQL request. Every failure is reported inside the response.
    pub async fn process_request(&self, request: GraphQLRequest, context: RequestContext) -> ExecutionResponse {
        tracing::debug!(operation_name = ?request.operation_name, "processing request");

        let variables = match request.variables {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(variables)) => variables,
            Some(_) => {
                return ExecutionResponse::from_errors(vec![GraphQLError::new("Variables must be a JSON object")]);
            }
        };

        let operation = match ParsedOperation::parse(&request.query, request.operation_name, variables) {
            Ok(operation) => operation,
            Err(e) => return ExecutionResponse::from_errors(vec![GraphQLError::new(e.to_string())]),
        };

        match self.execute_operation(operation, &context).await {
            Ok(response) => response,
            Err(e) => ExecutionResponse::from_errors(vec![GraphQLError::new(e.to_string())]),
        }
    }

    pub async fn execute_operation(
        &self,
        operation: ParsedOperation,
        context: &RequestContext,
    ) -> Result<ExecutionResponse, GatewayError> {
        let snapshot = self.snapshot().await.ok_or(GatewayError::NotReady)?;
        let operation_context = OperationContext::new(
            snapshot.schema.clone(),
            &operation.document,
            operation.operation_name.as_deref(),
        )?;

        let key = cache_key(&snapshot.schema.version, &operation.document_hash);
        let plan = match snapshot.plan_cache.get(&key) {
            Some(plan) => {
                tracing::trace!("query plan cache hit");
                plan
            }
            None => {
                let plan = Arc::new(build_query_plan(&operation_context)?);
                snapshot.plan_cache.insert_detached(key, plan.clone());
                plan
            }
        };
        for observer in &self.observers {
            observer.on_query_plan(&plan);
        }

        let mut response = self
            .executor
            .execute(
                &plan,
                &snapshot.services,
                &operation_context,
                operation.variables,
                &context.headers,
            )
            .await;

        if context.query_plan_requested && self.config.expose_query_plan() {
            if let Ok(object) = serde_json::to_value(plan.as_ref()) {
                response.extensions.insert(
                    "queryPlan".to_string(),
                    json!({ "object": object, "text": plan.to_string() }),
                );
            }
        }
        Ok(response)
    }
}
