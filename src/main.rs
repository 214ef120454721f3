use axum::{
    extract::{ConnectInfo, Path, Query, Request, State},
    http::header,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use domain_sentinel::{
    config::Config,
    errors::SentinelError,
    metrics,
    models::{DnsInfo, Domain, DomainPage, DomainStats, HealthRecord, SimilarityData, WhoisInfo},
    ratelimit::RateLimiter,
    Sentinel,
};

const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    sentinel: Arc<Sentinel>,
    limiter: Arc<RateLimiter>,
    config: Arc<Config>,
}

// Unparseable numbers fall back to 0 and are clamped by the dataset
#[derive(Deserialize)]
struct DomainsQuery {
    page: Option<String>,
    limit: Option<String>,
    search: Option<String>,
}

#[derive(Deserialize)]
struct DomainQuery {
    domain: Option<String>,
}

impl DomainQuery {
    fn required(self) -> Result<String, SentinelError> {
        match self.domain {
            Some(domain) if !domain.trim().is_empty() => Ok(domain),
            _ => Err(SentinelError::InvalidDomain(
                "domain parameter is required".to_string(),
            )),
        }
    }
}

#[derive(Serialize)]
struct SimilarityResponse {
    data: Vec<SimilarityData>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    domains: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "domain_sentinel=info,tower_http=debug".into()),
        )
        .init();

    let config = Arc::new(Config::load()?);
    info!(
        "Configuration loaded ({} workers, queue capacity {}, feed every {}s, health every {}s)",
        config.workers,
        config.queue_capacity(),
        config.feed_refresh_seconds,
        config.health_refresh_seconds
    );

    metrics::init_metrics();

    let sentinel = Arc::new(Sentinel::new(config.clone())?);
    sentinel.start();

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_per_second,
        config.rate_limit_burst,
    ));
    let pruner = {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RATE_LIMIT_PRUNE_INTERVAL);
            loop {
                ticker.tick().await;
                limiter.prune();
            }
        })
    };

    let state = AppState {
        sentinel: sentinel.clone(),
        limiter,
        config: config.clone(),
    };

    let api = Router::new()
        .route("/domains", get(list_domains))
        .route("/domains/new", get(new_domains))
        .route("/domains/stats", get(domain_stats))
        .route("/domains/health", get(domain_health))
        .route("/tlds", get(list_tlds))
        .route("/tlds/:tld", get(tld_domains))
        .route("/lookup/whois", get(whois_lookup))
        .route("/lookup/dns", get(dns_lookup))
        .route("/similarity/:threshold", get(similarity_report));

    let app = Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Domain sentinel listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Metrics: http://{}/metrics", addr);

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Received shutdown signal, gracefully shutting down...");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    pruner.abort();
    sentinel.shutdown().await;
    Ok(())
}

async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, SentinelError> {
    state.limiter.check(addr.ip())?;
    Ok(next.run(request).await)
}

async fn list_domains(
    Query(params): Query<DomainsQuery>,
    State(state): State<AppState>,
) -> Json<DomainPage> {
    let number = |value: Option<String>| value.and_then(|v| v.parse::<usize>().ok()).unwrap_or(0);
    let page = number(params.page);
    let limit = number(params.limit);

    Json(
        state
            .sentinel
            .domains(params.search.as_deref(), page, limit)
            .await,
    )
}

async fn new_domains(State(state): State<AppState>) -> Json<Vec<Domain>> {
    Json(state.sentinel.new_domains().await)
}

async fn domain_stats(State(state): State<AppState>) -> Json<DomainStats> {
    Json(state.sentinel.stats().await)
}

async fn domain_health(
    Query(params): Query<DomainQuery>,
    State(state): State<AppState>,
) -> Result<Json<HealthRecord>, SentinelError> {
    let domain = params.required()?;
    Ok(Json(state.sentinel.check_health(&domain).await?))
}

async fn list_tlds(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.sentinel.tlds().await)
}

async fn tld_domains(Path(tld): Path<String>, State(state): State<AppState>) -> Json<Vec<Domain>> {
    Json(state.sentinel.tld_domains(&tld).await)
}

async fn whois_lookup(
    Query(params): Query<DomainQuery>,
    State(state): State<AppState>,
) -> Result<Response, SentinelError> {
    let domain = params.required()?;
    let (info, hit): (WhoisInfo, bool) = state.sentinel.whois(&domain).await?;
    Ok(([("x-cache", cache_header(hit))], Json(info)).into_response())
}

async fn dns_lookup(
    Query(params): Query<DomainQuery>,
    State(state): State<AppState>,
) -> Result<Response, SentinelError> {
    let domain = params.required()?;
    let (info, hit): (DnsInfo, bool) = state.sentinel.dns(&domain).await?;
    Ok(([("x-cache", cache_header(hit))], Json(info)).into_response())
}

async fn similarity_report(
    Path(threshold): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, SentinelError> {
    info!("Fetching similarity data for threshold: {}", threshold);
    let report = state.sentinel.similarity(&threshold).await?;
    let body = SimilarityResponse {
        data: report.as_ref().clone(),
    };
    Ok((
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(body),
    )
        .into_response())
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.config.start_time.elapsed().as_secs(),
        domains: state.sentinel.stats().await.total_domains,
    })
}

fn cache_header(hit: bool) -> &'static str {
    if hit {
        "HIT"
    } else {
        "MISS"
    }
}
