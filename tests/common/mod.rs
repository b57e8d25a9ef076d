#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use federated_gateway::{
    FederationGateway, GatewayConfig, ServiceDefinition, StaticServiceList,
    error::FetchError,
    service_registry::{ServiceHandle, SubgraphRequest, SubgraphResponse},
};
use serde_json::{Value, json};

pub type Responder = Box<dyn Fn(&SubgraphRequest) -> Result<SubgraphResponse, FetchError> + Send + Sync>;

/// In-process backend answering from a closure and recording every request.
pub struct MockService {
    respond: Responder,
    pub requests: Mutex<Vec<SubgraphRequest>>,
}

impl MockService {
    pub fn new(respond: impl Fn(&SubgraphRequest) -> Result<SubgraphResponse, FetchError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(MockService {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn unreachable(name: &'static str) -> Arc<Self> {
        MockService::new(move |_| {
            Err(FetchError::Transport {
                service: name.to_string(),
                reason: "connection refused".to_string(),
            })
        })
    }

    pub fn requests(&self) -> Vec<SubgraphRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceHandle for MockService {
    async fn send(&self, request: SubgraphRequest) -> Result<SubgraphResponse, FetchError> {
        let response = (self.respond)(&request);
        self.requests.lock().unwrap().push(request);
        response
    }
}

pub fn ok(value: Value) -> Result<SubgraphResponse, FetchError> {
    Ok(serde_json::from_value(value).unwrap())
}

pub fn service(name: &str, schema: &str) -> ServiceDefinition {
    ServiceDefinition {
        name: name.to_string(),
        url: format!("http://{name}.invalid/graphql"),
        schema: schema.to_string(),
    }
}

pub const PRODUCTS_SDL: &str = r#"
    type Query {
      products: [Product!]!
      topProduct: Product
    }
    type Mutation { createProduct(name: String!): Product }
    type Product @key(fields: "id") {
      id: ID!
      name: String
    }
"#;

pub const PRICING_SDL: &str = r#"
    type Query { currencies: [String] }
    type Mutation { setDiscount(percent: Int!): Int }
    extend type Product @key(fields: "id") {
      id: ID! @external
      price: Float
    }
"#;

pub const REVIEWS_SDL: &str = r#"
    extend type Query { latestReviews: [Review] }
    type Review { body: String }
    extend type Product @key(fields: "id") {
      id: ID! @external
      reviews: [Review]
    }
"#;

pub fn services() -> Vec<ServiceDefinition> {
    vec![
        service("products", PRODUCTS_SDL),
        service("pricing", PRICING_SDL),
        service("reviews", REVIEWS_SDL),
    ]
}

/// Answers `_entities` with a price of ten times the product id, in request order.
pub fn price_entities(request: &SubgraphRequest) -> Vec<Value> {
    request.variables["representations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|representation| {
            let id = representation["id"].as_str().unwrap();
            json!({
                "__typename": "Product",
                "id": id,
                "price": id.parse::<f64>().unwrap() * 10.0,
            })
        })
        .collect()
}

pub fn product_list(ids: &[&str]) -> Value {
    let products: Vec<Value> = ids
        .iter()
        .map(|id| json!({ "__typename": "Product", "id": id, "name": format!("product {id}") }))
        .collect();
    json!({ "data": { "products": products } })
}

pub struct Backends {
    pub products: Arc<MockService>,
    pub pricing: Arc<MockService>,
    pub reviews: Arc<MockService>,
}

impl Backends {
    pub fn healthy() -> Self {
        Backends {
            products: MockService::new(|_| ok(product_list(&["1", "2"]))),
            pricing: MockService::new(|request| {
                if request.query.contains("_entities") {
                    ok(json!({ "data": { "_entities": price_entities(request) } }))
                } else {
                    ok(json!({ "data": { "currencies": ["EUR", "USD"] } }))
                }
            }),
            reviews: MockService::new(|_| ok(json!({ "data": { "latestReviews": [{ "body": "great" }] } }))),
        }
    }

    pub fn gateway(&self, config: GatewayConfig) -> FederationGateway {
        FederationGateway::new(config, Box::new(StaticServiceList(services())))
            .with_service_handle("products", self.products.clone())
            .with_service_handle("pricing", self.pricing.clone())
            .with_service_handle("reviews", self.reviews.clone())
    }
}
