use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use federated_gateway::{
    FederationGateway, GatewayConfig, GraphQLRequest, RequestContext, SupergraphFileLoader,
    response::{ExecutionResponse, GraphQLError},
};
use http::header::HeaderMap;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

const QUERY_PLAN_HEADER: &str = "apollo-query-plan-experimental";
const FORWARDED_HEADERS: [&str; 3] = ["authorization", "x-api-key", "x-token"];

/// Federated GraphQL gateway.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Supergraph config listing the subgraphs to compose.
    #[arg(long, default_value = "./schemas/supergraph.yaml")]
    config: PathBuf,
    #[arg(long, default_value = "0.0.0.0:3000")]
    listen: SocketAddr,
    /// Log filter, e.g. `info` or `federated_gateway=debug`. Falls back to RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,
}

fn full<T: Into<Bytes>>(value: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(value.into()).map_err(|never| match never {}).boxed()
}

fn internal_server_error() -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

fn json_response(response: &ExecutionResponse) -> Response<BoxBody<Bytes, hyper::Error>> {
    let body = match serde_json::to_vec(response) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("failed to serialize response: {e}");
            return internal_server_error();
        }
    };
    Response::builder()
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(full(body))
        .unwrap_or_else(|_| internal_server_error())
}

async fn handle_request(
    req: Request<Incoming>,
    gateway: Arc<FederationGateway>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Infallible> {
    let context = request_context(req.headers());

    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, "/graphql") => {
            let body = match req.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    tracing::debug!("failed to read request body: {e}");
                    return Ok(Response::builder()
                        .status(StatusCode::BAD_REQUEST)
                        .header("Access-Control-Allow-Origin", "*")
                        .body(full("Failed to read request body"))
                        .unwrap_or_else(|_| internal_server_error()));
                }
            };

            match serde_json::from_slice::<GraphQLRequest>(&body) {
                Ok(request) => json_response(&gateway.process_request(request, context).await),
                Err(e) => json_response(&ExecutionResponse::from_errors(vec![GraphQLError::new(format!(
                    "Invalid JSON request: {e}"
                ))])),
            }
        }

        (&Method::OPTIONS, _) => Response::builder()
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "POST, OPTIONS")
            .header(
                "Access-Control-Allow-Headers",
                "Content-Type, Authorization, X-Api-Key, X-Token, Apollo-Query-Plan-Experimental",
            )
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("Access-Control-Allow-Origin", "*")
            .body(full("Not Found"))
            .unwrap_or_else(|_| internal_server_error()),
    };

    Ok(response)
}

/// Collects the headers forwarded to subgraphs and the query plan flag.
fn request_context(headers: &HeaderMap) -> RequestContext {
    let forwarded: HashMap<String, String> = FORWARDED_HEADERS
        .iter()
        .filter_map(|name| {
            let value = headers.get(*name)?.to_str().ok()?;
            Some((name.to_string(), value.to_string()))
        })
        .collect();

    RequestContext {
        headers: forwarded,
        query_plan_requested: headers.contains_key(QUERY_PLAN_HEADER),
    }
}

fn init_tracing(args: &Args, config: &GatewayConfig) {
    let filter = match &args.log_level {
        Some(level) => EnvFilter::new(level),
        None if config.debug => EnvFilter::new("debug"),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = GatewayConfig::load(&args.config).await?;
    init_tracing(&args, &config);

    let gateway = FederationGateway::new(config, Box::new(SupergraphFileLoader::new(&args.config)));
    if let Err(e) = gateway.load().await {
        tracing::error!("failed to load schemas: {e}");
        return Err(e.into());
    }
    let gateway = Arc::new(gateway);

    let listener = TcpListener::bind(args.listen).await?;
    tracing::info!("GraphQL federation gateway listening on http://{}/graphql", args.listen);

    loop {
        let (stream, remote) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let gateway = Arc::clone(&gateway);

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, gateway.clone()));

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                tracing::debug!("error serving connection from {remote}: {e}");
            }
        });
    }
}
