use std::collections::{HashMap, HashSet};

use futures::future::{BoxFuture, FutureExt, join_all};
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::FetchError;
use crate::operation::{OperationContext, TYPENAME};
use crate::plan::{FetchNode, PathElement, PlanNode, QueryPlan, Representation, ResponsePath};
use crate::query_planner::{ENTITIES, REPRESENTATIONS_VAR};
use crate::response::{ExecutionResponse, GraphQLError, PathSegment, deep_merge, format_response, insert_at};
use crate::schema::{FieldSet, FieldSetItem, UnifiedSchema};
use crate::service_registry::{ServiceMap, SubgraphRequest, SubgraphResponse};

const DOWNSTREAM_SERVICE_ERROR: &str = "DOWNSTREAM_SERVICE_ERROR";

/// Data produced by a plan node, merged by the caller, and the errors it raised.
type NodeResult = (Value, Vec<GraphQLError>);

/// Runs query plans against backend services.
///
/// Backend failures never abort execution: the affected fields stay `null`
/// and the response carries an error for each of them.
#[derive(Clone, Debug, Default)]
pub struct QueryExecutor {
    /// Maximum number of representations per `_entities` request.
    entity_batch_size: Option<usize>,
}

struct ExecutionScope<'a> {
    services: &'a ServiceMap,
    schema: &'a UnifiedSchema,
    variables: &'a Map<String, Value>,
    headers: &'a HashMap<String, String>,
}

impl ExecutionScope<'_> {
    async fn send(&self, service: &str, request: SubgraphRequest) -> Result<SubgraphResponse, FetchError> {
        let handle = self
            .services
            .get(service)
            .ok_or_else(|| FetchError::UnknownService(service.to_string()))?;
        handle.send(request).await
    }

    fn request(&self, fetch: &FetchNode) -> SubgraphRequest {
        let variables = fetch
            .variable_usages
            .iter()
            .filter_map(|name| self.variables.get(name).map(|value| (name.clone(), value.clone())))
            .collect();
        SubgraphRequest {
            query: fetch.operation.clone(),
            variables,
            headers: self.headers.clone(),
        }
    }
}

impl QueryExecutor {
    pub fn new(entity_batch_size: Option<usize>) -> Self {
        QueryExecutor {
            entity_batch_size: entity_batch_size.filter(|size| *size > 0),
        }
    }

    pub async fn execute(
        &self,
        plan: &QueryPlan,
        services: &ServiceMap,
        context: &OperationContext,
        variables: Map<String, Value>,
        headers: &HashMap<String, String>,
    ) -> ExecutionResponse {
        let scope = ExecutionScope {
            services,
            schema: &context.schema,
            variables: &variables,
            headers,
        };

        let mut data = Value::Object(Map::new());
        let mut errors = Vec::new();
        if let Some(node) = &plan.node {
            let (delta, node_errors) = self.execute_node(node, None, &data, &scope).await;
            deep_merge(&mut data, delta);
            errors = node_errors;
        }

        ExecutionResponse {
            data: Some(format_response(context, &data, &variables)),
            errors,
            extensions: Map::new(),
        }
    }

    fn execute_node<'a>(
        &'a self,
        node: &'a PlanNode,
        path: Option<&'a ResponsePath>,
        data: &'a Value,
        scope: &'a ExecutionScope<'a>,
    ) -> BoxFuture<'a, NodeResult> {
        match node {
            PlanNode::Sequence { nodes } => async move {
                // Each step sees everything merged by the steps before it.
                let mut current = data.clone();
                let mut delta = Value::Null;
                let mut errors = Vec::new();
                for child in nodes {
                    let (child_delta, child_errors) = self.execute_node(child, None, &current, scope).await;
                    deep_merge(&mut current, child_delta.clone());
                    merge_delta(&mut delta, child_delta);
                    errors.extend(child_errors);
                }
                (delta, errors)
            }
            .boxed(),
            PlanNode::Parallel { nodes } => async move {
                let results = join_all(nodes.iter().map(|child| self.execute_node(child, None, data, scope))).await;
                let mut delta = Value::Null;
                let mut errors = Vec::new();
                for (child_delta, child_errors) in results {
                    merge_delta(&mut delta, child_delta);
                    errors.extend(child_errors);
                }
                (delta, errors)
            }
            .boxed(),
            PlanNode::Flatten(flatten) => self.execute_node(&flatten.node, Some(&flatten.path), data, scope),
            PlanNode::Fetch(fetch) => match &fetch.requires {
                None => self.fetch_root(fetch, scope).boxed(),
                Some(representation) => {
                    let root = ResponsePath::default();
                    async move {
                        self.fetch_entities(fetch, representation, path.unwrap_or(&root), data, scope)
                            .await
                    }
                    .boxed()
                }
            },
        }
    }

    async fn fetch_root(&self, fetch: &FetchNode, scope: &ExecutionScope<'_>) -> NodeResult {
        tracing::debug!(service = %fetch.service_name, operation = %fetch.operation, "fetching root fields");

        match scope.send(&fetch.service_name, scope.request(fetch)).await {
            Ok(response) => {
                let errors = response
                    .errors
                    .into_iter()
                    .map(|error| error.with_extension("serviceName", fetch.service_name.as_str()))
                    .collect();
                (response.data.unwrap_or(Value::Null), errors)
            }
            Err(e) => {
                tracing::warn!("root fetch failed: {e}");
                let errors = fetch
                    .response_keys
                    .iter()
                    .map(|key| downstream_error(&e).with_path(vec![PathSegment::from(key.as_str())]))
                    .collect();
                (Value::Null, errors)
            }
        }
    }

    async fn fetch_entities(
        &self,
        fetch: &FetchNode,
        representation: &Representation,
        path: &ResponsePath,
        data: &Value,
        scope: &ExecutionScope<'_>,
    ) -> NodeResult {
        let mut objects = Vec::new();
        collect_targets(data, &path.0, &mut Vec::new(), &mut objects);

        // Identical representations are sent once; every target keeps the slot of its
        // representation so results land at each place the entity occurs.
        let mut representations: Vec<Value> = Vec::new();
        let mut slots_by_text: HashMap<String, usize> = HashMap::new();
        let mut targets: Vec<(Vec<PathSegment>, usize)> = Vec::new();
        for (target_path, object) in objects {
            let typename = object
                .get(representation.response_key(TYPENAME))
                .and_then(Value::as_str)
                .unwrap_or(&representation.type_name);
            if !scope.schema.type_matches(typename, &representation.type_name) {
                continue;
            }
            let Some(entity) = build_representation(typename, object, representation) else {
                continue;
            };
            let slot = *slots_by_text.entry(entity.to_string()).or_insert_with(|| {
                representations.push(entity);
                representations.len() - 1
            });
            targets.push((target_path, slot));
        }

        if representations.is_empty() {
            return (Value::Null, Vec::new());
        }

        tracing::debug!(
            service = %fetch.service_name,
            path = %path,
            entities = representations.len(),
            "fetching entities"
        );

        let batch_size = self.entity_batch_size.unwrap_or(representations.len());
        let batches = representations.chunks(batch_size).enumerate().map(|(i, chunk)| {
            let mut request = scope.request(fetch);
            request
                .variables
                .insert(REPRESENTATIONS_VAR.to_string(), Value::Array(chunk.to_vec()));
            async move { (i * batch_size, chunk, scope.send(&fetch.service_name, request).await) }
        });
        let results = join_all(batches).await;

        let mut origins: Vec<Option<&[PathSegment]>> = vec![None; representations.len()];
        for (target_path, slot) in &targets {
            origins[*slot].get_or_insert(target_path.as_slice());
        }

        let mut resolved: Vec<Option<Value>> = vec![None; representations.len()];
        let mut errors = Vec::new();
        for (offset, chunk, result) in results {
            match result {
                Ok(response) => {
                    let returned = match response.data {
                        Some(Value::Object(mut data)) => match data.remove(ENTITIES) {
                            Some(Value::Array(entities)) => entities,
                            _ => Vec::new(),
                        },
                        _ => Vec::new(),
                    };
                    let reported: HashSet<usize> = response.errors.iter().filter_map(entity_index).collect();
                    let matched = match_entities(chunk, &returned, &representation.key, &representation.aliases);
                    for (i, entity) in matched.into_iter().enumerate() {
                        // A non-null entity that fits no representation is lost data, not a miss.
                        let unmatched = entity.is_none()
                            && !reported.contains(&i)
                            && returned.get(i).is_some_and(|entity| !entity.is_null());
                        if unmatched {
                            tracing::warn!(
                                service = %fetch.service_name,
                                representation = %chunk[i],
                                "returned entity does not match its representation"
                            );
                            errors.extend(
                                targets
                                    .iter()
                                    .filter(|(_, slot)| *slot == offset + i)
                                    .map(|(target_path, _)| mismatch_error(&fetch.service_name, target_path.clone())),
                            );
                        }
                        resolved[offset + i] = entity;
                    }
                    errors.extend(response.errors.into_iter().map(|error| {
                        rewrite_entity_error(error, offset, &origins)
                            .with_extension("serviceName", fetch.service_name.as_str())
                    }));
                }
                Err(e) => {
                    tracing::warn!("entity fetch failed: {e}");
                    errors.extend(
                        targets
                            .iter()
                            .filter(|(_, slot)| (offset..offset + chunk.len()).contains(slot))
                            .map(|(target_path, _)| downstream_error(&e).with_path(target_path.clone())),
                    );
                }
            }
        }

        let mut delta = Value::Null;
        for (target_path, slot) in &targets {
            if let Some(entity) = &resolved[*slot] {
                insert_at(&mut delta, target_path, entity.clone());
            }
        }
        (delta, errors)
    }
}

fn merge_delta(delta: &mut Value, child: Value) {
    if delta.is_null() {
        *delta = child;
    } else {
        deep_merge(delta, child);
    }
}

fn mismatch_error(service: &str, path: Vec<PathSegment>) -> GraphQLError {
    GraphQLError::new(format!(
        "Entity returned by {service} does not match the representation it was requested with"
    ))
    .with_path(path)
    .with_extension("serviceName", service)
    .with_extension("code", DOWNSTREAM_SERVICE_ERROR)
}

fn downstream_error(error: &FetchError) -> GraphQLError {
    GraphQLError::new(error.to_string())
        .with_extension("serviceName", error.service())
        .with_extension("code", DOWNSTREAM_SERVICE_ERROR)
}

/// Finds the objects at `elements`, descending into every list on the way.
fn collect_targets<'v>(
    value: &'v Value,
    elements: &[PathElement],
    current: &mut Vec<PathSegment>,
    out: &mut Vec<(Vec<PathSegment>, &'v Map<String, Value>)>,
) {
    match value {
        Value::Array(items) => {
            let rest = match elements.split_first() {
                Some((PathElement::Flatten, rest)) => rest,
                _ => elements,
            };
            for (i, item) in items.iter().enumerate() {
                current.push(PathSegment::Index(i));
                collect_targets(item, rest, current, out);
                current.pop();
            }
        }
        Value::Object(object) => match elements.split_first() {
            None => out.push((current.clone(), object)),
            Some((PathElement::Key(key), rest)) => {
                if let Some(child) = object.get(key) {
                    current.push(PathSegment::Key(key.clone()));
                    collect_targets(child, rest, current, out);
                    current.pop();
                }
            }
            Some((PathElement::Flatten, rest)) => collect_targets(value, rest, current, out),
        },
        _ => {}
    }
}

/// Builds the representation of `object`, reading every field under the
/// response key it was fetched with and sending it under its field name.
fn build_representation(typename: &str, object: &Map<String, Value>, representation: &Representation) -> Option<Value> {
    let mut entity = Map::new();
    entity.insert(TYPENAME.to_string(), Value::String(typename.to_string()));
    entity.extend(project_field_set(object, &representation.key, &representation.aliases)?);
    for item in &representation.requires.0 {
        if !entity.contains_key(&item.name) {
            let value = object
                .get(representation.response_key(&item.name))
                .and_then(|value| project_value(value, &item.selections))
                .unwrap_or(Value::Null);
            entity.insert(item.name.clone(), value);
        }
    }
    Some(Value::Object(entity))
}

/// Copies the fields of `field_set` out of `object`; `None` when one is missing.
///
/// Top-level fields are read under their entry in `aliases`, if any.
fn project_field_set(
    object: &Map<String, Value>,
    field_set: &FieldSet,
    aliases: &IndexMap<String, String>,
) -> Option<Map<String, Value>> {
    field_set
        .0
        .iter()
        .map(|item| {
            let response_key = aliases.get(&item.name).unwrap_or(&item.name);
            let value = object.get(response_key).filter(|value| !value.is_null())?;
            Some((item.name.clone(), project_value(value, &item.selections)?))
        })
        .collect()
}

fn project_items(object: &Map<String, Value>, items: &[FieldSetItem]) -> Option<Map<String, Value>> {
    items
        .iter()
        .map(|item| {
            let value = object.get(&item.name).filter(|value| !value.is_null())?;
            Some((item.name.clone(), project_value(value, &item.selections)?))
        })
        .collect()
}

fn project_value(value: &Value, selections: &[FieldSetItem]) -> Option<Value> {
    if selections.is_empty() {
        return Some(value.clone());
    }
    match value {
        Value::Object(object) => project_items(object, selections).map(Value::Object),
        Value::Array(items) => items
            .iter()
            .map(|item| project_value(item, selections))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        other => Some(other.clone()),
    }
}

fn entity_key(value: &Value, key: &FieldSet, aliases: &IndexMap<String, String>) -> Option<String> {
    let object = value.as_object()?;
    project_field_set(object, key, aliases).map(|fields| Value::Object(fields).to_string())
}

/// Index into `_entities` an error is reported at.
fn entity_index(error: &GraphQLError) -> Option<usize> {
    match error.path.as_deref() {
        Some([PathSegment::Key(root), PathSegment::Index(i), ..]) if root == ENTITIES => Some(*i),
        _ => None,
    }
}

/// Pairs each sent representation with its returned entity.
///
/// Entities carrying their key fields, under the response keys in `aliases`, are
/// matched by key, so backends may answer in any order. Entities without key
/// fields are taken by position.
fn match_entities(
    sent: &[Value],
    returned: &[Value],
    key: &FieldSet,
    aliases: &IndexMap<String, String>,
) -> Vec<Option<Value>> {
    let mut by_key: HashMap<String, usize> = HashMap::new();
    for (i, entity) in returned.iter().enumerate() {
        if let Some(text) = entity_key(entity, key, aliases) {
            by_key.entry(text).or_insert(i);
        }
    }

    let unaliased = IndexMap::new();
    sent.iter()
        .enumerate()
        .map(|(i, representation)| {
            let matched = entity_key(representation, key, &unaliased).and_then(|text| by_key.get(&text).copied());
            let entity = match matched {
                Some(index) => returned.get(index),
                None => returned.get(i).filter(|entity| entity_key(entity, key, aliases).is_none()),
            };
            entity.filter(|entity| !entity.is_null()).cloned()
        })
        .collect()
}

/// Rewrites `_entities.<i>.rest` error paths to the path the entity came from.
fn rewrite_entity_error(mut error: GraphQLError, offset: usize, origins: &[Option<&[PathSegment]>]) -> GraphQLError {
    let rewritten = match error.path.as_deref() {
        Some([PathSegment::Key(root), PathSegment::Index(i), rest @ ..]) if root == ENTITIES => origins
            .get(offset + i)
            .copied()
            .flatten()
            .map(|origin| origin.iter().chain(rest).cloned().collect::<Vec<_>>()),
        _ => None,
    };
    if let Some(path) = rewritten {
        error.path = Some(path);
    }
    error
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use graphql_parser::parse_query;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::composer::compose;
    use crate::query_planner::build_query_plan;
    use crate::schema::ServiceDefinition;
    use crate::service_registry::ServiceHandle;

    type Responder = Box<dyn Fn(&SubgraphRequest) -> Result<SubgraphResponse, FetchError> + Send + Sync>;

    struct Recording {
        respond: Responder,
        requests: Mutex<Vec<SubgraphRequest>>,
    }

    #[async_trait]
    impl ServiceHandle for Recording {
        async fn send(&self, request: SubgraphRequest) -> Result<SubgraphResponse, FetchError> {
            let response = (self.respond)(&request);
            self.requests.lock().unwrap().push(request);
            response
        }
    }

    fn recording(respond: Responder) -> Arc<Recording> {
        Arc::new(Recording {
            respond,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn data(value: Value) -> Result<SubgraphResponse, FetchError> {
        Ok(serde_json::from_value(value).unwrap())
    }

    fn context(query: &str) -> OperationContext {
        let products = ServiceDefinition {
            name: "products".to_string(),
            url: "http://products/graphql".to_string(),
            schema: r#"
                type Query { products: [Product] }
                type Product @key(fields: "id") { id: ID! name: String }
            "#
            .to_string(),
        };
        let pricing = ServiceDefinition {
            name: "pricing".to_string(),
            url: "http://pricing/graphql".to_string(),
            schema: r#"
                extend type Product @key(fields: "id") { id: ID! @external price: Float }
            "#
            .to_string(),
        };
        let schema = Arc::new(compose(&[products, pricing]).unwrap());
        let document = parse_query::<String>(query).unwrap().into_static();
        OperationContext::new(schema, &document, None).unwrap()
    }

    fn services(products: Arc<Recording>, pricing: Arc<Recording>) -> ServiceMap {
        let products: Arc<dyn ServiceHandle> = products;
        let pricing: Arc<dyn ServiceHandle> = pricing;
        HashMap::from([("products".to_string(), products), ("pricing".to_string(), pricing)])
    }

    fn price_of(representation: &Value) -> Value {
        let id = representation["id"].as_str().unwrap();
        json!({ "__typename": "Product", "id": id, "price": id.parse::<f64>().unwrap() * 10.0 })
    }

    #[test]
    fn collects_entities_under_lists() {
        let data = json!({ "products": [{ "id": "1" }, null, { "id": "3" }] });
        let path = ResponsePath(vec![PathElement::Key("products".to_string()), PathElement::Flatten]);
        let mut out = Vec::new();
        collect_targets(&data, &path.0, &mut Vec::new(), &mut out);
        let paths: Vec<_> = out.into_iter().map(|(path, _)| path).collect();
        assert_eq!(
            paths,
            vec![
                vec![PathSegment::from("products"), PathSegment::Index(0)],
                vec![PathSegment::from("products"), PathSegment::Index(2)],
            ]
        );
    }

    #[test]
    fn matches_entities_by_key_then_position() {
        let key = FieldSet::parse("id").unwrap();
        let sent = vec![json!({ "__typename": "T", "id": "1" }), json!({ "__typename": "T", "id": "2" })];

        let reversed = vec![json!({ "id": "2", "v": 2 }), json!({ "id": "1", "v": 1 })];
        let matched = match_entities(&sent, &reversed, &key, &IndexMap::new());
        assert_eq!(matched, vec![Some(json!({ "id": "1", "v": 1 })), Some(json!({ "id": "2", "v": 2 }))]);

        let keyless = vec![json!({ "v": 1 }), Value::Null];
        let matched = match_entities(&sent, &keyless, &key, &IndexMap::new());
        assert_eq!(matched, vec![Some(json!({ "v": 1 })), None]);

        let aliased = vec![json!({ "__key_id": "2", "id": "b" }), json!({ "__key_id": "1", "id": "a" })];
        let aliases = IndexMap::from([("id".to_string(), "__key_id".to_string())]);
        let matched = match_entities(&sent, &aliased, &key, &aliases);
        assert_eq!(matched[0], Some(json!({ "__key_id": "1", "id": "a" })));
    }

    #[test]
    fn rewrites_entity_error_paths() {
        let origin = vec![PathSegment::from("products"), PathSegment::Index(4)];
        let origins = vec![None, Some(origin.as_slice())];
        let error = GraphQLError::new("bad price").with_path(vec![
            PathSegment::from(ENTITIES),
            PathSegment::Index(0),
            PathSegment::from("price"),
        ]);
        let rewritten = rewrite_entity_error(error, 1, &origins);
        assert_eq!(
            rewritten.path,
            Some(vec![PathSegment::from("products"), PathSegment::Index(4), PathSegment::from("price")])
        );
    }

    #[tokio::test]
    async fn deduplicates_and_batches_representations() {
        let context = context("{ products { name price } }");
        let plan = build_query_plan(&context).unwrap();

        let products = recording(Box::new(|_| {
            data(json!({ "data": { "products": [
                { "__typename": "Product", "id": "1", "name": "a" },
                { "__typename": "Product", "id": "2", "name": "b" },
                { "__typename": "Product", "id": "1", "name": "a" },
                { "__typename": "Product", "id": "3", "name": "c" }
            ] } }))
        }));
        let pricing = recording(Box::new(|request| {
            let representations = request.variables["representations"].as_array().unwrap();
            let entities: Vec<Value> = representations.iter().rev().map(price_of).collect();
            data(json!({ "data": { "_entities": entities } }))
        }));

        let executor = QueryExecutor::new(Some(2));
        let response = executor
            .execute(
                &plan,
                &services(products, pricing.clone()),
                &context,
                Map::new(),
                &HashMap::new(),
            )
            .await;

        assert_eq!(response.errors, Vec::new());
        assert_eq!(
            response.data,
            Some(json!({ "products": [
                { "name": "a", "price": 10.0 },
                { "name": "b", "price": 20.0 },
                { "name": "a", "price": 10.0 },
                { "name": "c", "price": 30.0 }
            ] }))
        );

        let requests = pricing.requests.lock().unwrap();
        let sizes: Vec<_> = requests
            .iter()
            .map(|request| request.variables["representations"].as_array().unwrap().len())
            .collect();
        assert_eq!(sizes.iter().sum::<usize>(), 3);
        assert!(sizes.iter().all(|size| *size <= 2));
    }

    #[tokio::test]
    async fn failed_entity_fetches_leave_partial_data() {
        let context = context("{ products { name price } }");
        let plan = build_query_plan(&context).unwrap();

        let products = recording(Box::new(|_| {
            data(json!({ "data": { "products": [{ "__typename": "Product", "id": "1", "name": "a" }] } }))
        }));
        let pricing = recording(Box::new(|_| {
            Err(FetchError::Transport {
                service: "pricing".to_string(),
                reason: "connection refused".to_string(),
            })
        }));

        let response = QueryExecutor::default()
            .execute(&plan, &services(products, pricing), &context, Map::new(), &HashMap::new())
            .await;

        assert_eq!(response.data, Some(json!({ "products": [{ "name": "a", "price": null }] })));
        assert_eq!(response.errors.len(), 1);
        let error = &response.errors[0];
        assert_eq!(error.path, Some(vec![PathSegment::from("products"), PathSegment::Index(0)]));
        let extensions = error.extensions.as_ref().unwrap();
        assert_eq!(extensions["serviceName"], "pricing");
        assert_eq!(extensions["code"], DOWNSTREAM_SERVICE_ERROR);
    }

    #[tokio::test]
    async fn entities_with_a_mismatched_key_are_reported() {
        let context = context("{ products { name price } }");
        let plan = build_query_plan(&context).unwrap();

        let products = recording(Box::new(|_| {
            data(json!({ "data": { "products": [{ "__typename": "Product", "id": "1", "name": "a" }] } }))
        }));
        // Numeric id where the representation carried a string.
        let pricing = recording(Box::new(|_| {
            data(json!({ "data": { "_entities": [{ "__typename": "Product", "id": 1, "price": 10.0 }] } }))
        }));

        let response = QueryExecutor::default()
            .execute(&plan, &services(products, pricing), &context, Map::new(), &HashMap::new())
            .await;

        assert_eq!(response.data, Some(json!({ "products": [{ "name": "a", "price": null }] })));
        assert_eq!(response.errors.len(), 1);
        let error = &response.errors[0];
        assert_eq!(error.path, Some(vec![PathSegment::from("products"), PathSegment::Index(0)]));
        assert_eq!(error.extensions.as_ref().unwrap()["serviceName"], "pricing");
    }

    #[tokio::test]
    async fn failed_root_fetches_report_each_field() {
        let context = context("{ products { name } }");
        let plan = build_query_plan(&context).unwrap();

        let products = recording(Box::new(|_| {
            Err(FetchError::InvalidResponse {
                service: "products".to_string(),
                reason: "expected value".to_string(),
            })
        }));
        let pricing = recording(Box::new(|_| data(json!({}))));

        let response = QueryExecutor::default()
            .execute(&plan, &services(products, pricing), &context, Map::new(), &HashMap::new())
            .await;

        assert_eq!(response.data, Some(json!({ "products": null })));
        assert_eq!(response.errors[0].path, Some(vec![PathSegment::from("products")]));
    }
}
