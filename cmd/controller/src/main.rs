use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use nodepool_k8s_util::client::new_client_with_metrics;
use nodepool_operator::controller::{ScaleDownConfig, State};
use nodepool_operator::nodeclass::StaticNodeClassCatalog;
use nodepool_operator::scaledown;
use nodepool_operator::telemetry;

use std::sync::Arc;

use anyhow::Context;
use clap::{crate_authors, crate_description, crate_version, Parser};
use kube::Config;
use prometheus_client::registry::Registry;

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    match c.metrics() {
        Ok(metrics) => HttpResponse::Ok()
            .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
            .body(metrics),
        Err(e) => {
            tracing::error!("Failed to get metrics: {:?}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[derive(Parser, Debug)]
#[command(
    name="nodepool-controller",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Listen on given port
    #[arg(short, long, default_value_t = 8080, env)]
    port: u32,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`. Example: "info,kube=debug,nodepool_operator=debug"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// URL for the OpenTelemetry tracing endpoint.
    ///
    /// If not provided, tracing will be disabled.
    #[arg(short, long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    /// Sampling ratio for tracing, `1.0` samples everything.
    #[arg(short, long, default_value_t = 0.1, env)]
    sample_ratio: f64,

    /// Upper bound on pools reconciled in parallel
    #[arg(long, default_value_t = 10, env)]
    max_concurrent_reconciles: u16,

    /// Heartbeat after a successful reconcile (humantime, e.g. "1m")
    #[arg(long, default_value = "1m", env)]
    requeue_interval: String,

    /// Node classes owned by this deployment, as group/Kind pairs
    #[arg(
        long = "node-class",
        default_value = "scaling.example.com/StaticNodeClass",
        env = "NODE_CLASSES",
        value_delimiter = ','
    )]
    node_classes: Vec<String>,
}

fn parse_node_classes(raw: &[String]) -> anyhow::Result<StaticNodeClassCatalog> {
    let mut catalog = StaticNodeClassCatalog::default();
    for entry in raw {
        let (group, kind) = entry
            .split_once('/')
            .with_context(|| format!("node class {entry:?} is not a group/Kind pair"))?;
        catalog.register(group, kind);
    }
    Ok(catalog)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();

    telemetry::init(
        &args.log_filter,
        args.log_format,
        args.tracing_url.as_deref(),
        args.sample_ratio,
    )
    .await?;

    let catalog = parse_node_classes(&args.node_classes)?;
    let requeue_interval = humantime::parse_duration(&args.requeue_interval)
        .context("requeue interval is not a valid duration")?;
    let config = ScaleDownConfig {
        max_concurrent_reconciles: args.max_concurrent_reconciles,
        requeue_interval,
        ..ScaleDownConfig::default()
    };

    let mut registry = Registry::with_prefix("nodepool_operator");
    let kube_config = Config::infer().await?;
    let client = new_client_with_metrics(kube_config, &mut registry).await?;
    let controllers = [scaledown::controller::CONTROLLER_ID];
    let state = State::new(registry, &controllers);

    let controller = scaledown::controller::run(state.clone(), client, Arc::new(catalog), config);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health)
            .service(metrics)
    })
    .bind(format!("0.0.0.0:{}", args.port))?
    .shutdown_timeout(5);

    // Both runtimes implements graceful shutdown, so poll until both are done
    tokio::join!(controller, server.run()).1?;
    Ok(())
}
