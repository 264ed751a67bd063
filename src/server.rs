use std::{net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Context};
use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json,
};
use tower_http::cors::CorsLayer;
use utoipa::{IntoParams, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth,
    conf::{self, Conf},
    jwt,
    data::SqliteKv,
    docs::ApiDoc,
    quota::QuotaTracker,
    store::{cache::CacheStore, remote::RemoteStore, Fallback, UsageStore},
    tier::Tier,
    trending::{Period, PopularityAggregator},
    types::{KeywordFrequency, LimitCheck, Usage, UsageRecord},
};

/// Upper bound on `limit` for `/trending`.
const MAX_TRENDING: usize = 50;

#[derive(Debug)]
pub struct ApiError(StatusCode, Json<ErrorResponse>);

impl ApiError {
    fn new(status: StatusCode, details: impl Into<String>) -> Self {
        ApiError(
            status,
            Json(ErrorResponse {
                error: status
                    .canonical_reason()
                    .unwrap_or("Unknown error")
                    .to_string(),
                details: Some(details.into()),
            }),
        )
    }
}

impl From<StatusCode> for ApiError {
    fn from(status: StatusCode) -> Self {
        ApiError(
            status,
            Json(ErrorResponse {
                error: status
                    .canonical_reason()
                    .unwrap_or("Unknown error")
                    .to_string(),
                details: None,
            }),
        )
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError(status, body) = self;
        (status, body).into_response()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    error: String,
    details: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub conf: Arc<Conf>,
    pub jwt: jwt::Codec,
    pub tracker: QuotaTracker,
    pub aggregator: PopularityAggregator,
}

impl AppState {
    /// The remote store backed by the local sqlite cache.
    pub async fn connect(conf: Arc<Conf>) -> anyhow::Result<Self> {
        let remote = RemoteStore::new(&conf.remote)?;
        let kv = SqliteKv::connect()
            .await
            .context("Failed to open local cache")?;
        let cache = CacheStore::new(Arc::new(kv));
        let store: Arc<dyn UsageStore> = Arc::new(Fallback::new(remote, cache));
        Ok(Self::new(store, conf))
    }

    pub fn new(store: Arc<dyn UsageStore>, conf: Arc<Conf>) -> Self {
        Self {
            jwt: jwt::Codec::new(&conf.jwt),
            tracker: QuotaTracker::new(store.clone(), conf.quota),
            aggregator: PopularityAggregator::new(store, conf.trending.clone()),
            conf,
        }
    }
}

pub fn router(state: AppState) -> anyhow::Result<axum::Router> {
    let cors = CorsLayer::new()
        .allow_origin(cors_origins(&state.conf)?)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::ORIGIN,
        ])
        .allow_credentials(true)
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_LENGTH]);
    let api = axum::Router::new()
        .route("/usage", get(usage_handler))
        .route("/usage/check", get(check_handler))
        .route("/usage/record", post(record_handler))
        .route("/trending", get(trending_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_layer));
    let routes = axum::Router::new()
        .route("/health", get(health_check))
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .merge(api)
        .layer(cors)
        .route_layer(middleware::from_fn({
            |req, next: Next| REQ_ID.scope(ReqId::new(), next.run(req))
        }))
        .with_state(state);
    Ok(routes)
}

fn cors_origins(conf: &Conf) -> anyhow::Result<Vec<HeaderValue>> {
    [
        "http://localhost:3000".to_string(),
        "https://localhost:3000".to_string(),
        format!("http://{}:{}", conf.addr, conf.port),
        format!("https://{}:{}", conf.addr, conf.port),
    ]
    .iter()
    .map(|origin| {
        origin
            .parse()
            .context(format!("Invalid CORS origin: {origin:?}"))
    })
    .collect()
}

#[tracing::instrument(name = "server", skip_all)]
pub async fn run() -> anyhow::Result<()> {
    let conf = conf::global();
    let dir = std::env::current_dir()?;
    tracing::info!(?dir, ?conf, "Starting.");
    let addr = SocketAddr::from((conf.addr, conf.port));

    let state = AppState::connect(conf.clone()).await?;
    let service = router(state)?
        .into_make_service_with_connect_info::<SocketAddr>();

    match &conf.tls {
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::warn!(?addr, "Listening unencrypted.");
            axum::serve(listener, service).await?;
        }
        Some(conf::Tls {
            cert_file,
            key_file,
        }) => {
            // XXX One MUST do this manual init of rustls provider when using
            //     more than a single dep which itself depends on rustls.
            //     Here we using 2:
            //     - axum_server
            //     - reqwest
            rustls::crypto::aws_lc_rs::default_provider()
                .install_default()
                .map_err(|crypto_provider| {
                    anyhow!(
                        "Failed to install default crypto provider: \
                        {crypto_provider:?}"
                    )
                })?;

            let config =
                axum_server::tls_rustls::RustlsConfig::from_pem_file(
                    cert_file, key_file,
                )
                .await
                .context(format!(
                    "Failed to construct RustlsConfig. \
                    cert_file={cert_file:?}, key_file={key_file:?}"
                ))?;

            tracing::info!(
                ?addr,
                ?cert_file,
                ?key_file,
                "Listening with TLS."
            );
            axum_server::bind_rustls(addr, config)
                .serve(service)
                .await?;
        }
    }

    Ok(())
}

#[tracing::instrument(
    skip_all,
    fields(req_id = REQ_ID.get().req_id, uid = USER.get().uid)
)]
#[utoipa::path(
    get,
    path = "/usage",
    responses(
        (status = 200, description = "Searches used this period", body = Usage),
        (status = 401, description = "Missing or invalid JWT token"),
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn usage_handler(
    State(state): State<AppState>,
    ConnectInfo(from): ConnectInfo<SocketAddr>,
) -> Json<Usage> {
    let user: User = USER.get();
    tracing::info!(?from, "Handling usage request.");
    Json(state.tracker.get_usage(&user.uid).await)
}

#[derive(Debug, serde::Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CheckParams {
    /// free, standard or pro. Defaults to the stored tier, then the
    /// token's.
    tier: Option<String>,
}

#[tracing::instrument(
    skip_all,
    fields(req_id = REQ_ID.get().req_id, uid = USER.get().uid)
)]
#[utoipa::path(
    get,
    path = "/usage/check",
    params(CheckParams),
    responses(
        (status = 200, description = "Whether the search ceiling is reached", body = LimitCheck),
        (status = 401, description = "Missing or invalid JWT token"),
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn check_handler(
    State(state): State<AppState>,
    ConnectInfo(from): ConnectInfo<SocketAddr>,
    Query(params): Query<CheckParams>,
) -> Json<LimitCheck> {
    let user: User = USER.get();
    tracing::info!(?from, ?params, "Handling limit check.");
    let check = match params.tier.as_deref() {
        Some(tier) => {
            let tier: Tier = tier.parse().unwrap_or_default();
            state.tracker.check_limit(&user.uid, tier).await
        }
        None => {
            let record = state.tracker.current_record(&user.uid).await;
            let tier = record.tier().or(user.tier).unwrap_or_default();
            state.tracker.check_record(&record, tier)
        }
    };
    Json(check)
}

#[tracing::instrument(
    skip_all,
    fields(req_id = REQ_ID.get().req_id, uid = USER.get().uid)
)]
#[utoipa::path(
    post,
    path = "/usage/record",
    responses(
        (status = 200, description = "Search recorded", body = UsageRecord),
        (status = 401, description = "Missing or invalid JWT token"),
        (status = 503, description = "Neither the remote store nor the local cache accepted the write"),
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn record_handler(
    State(state): State<AppState>,
    ConnectInfo(from): ConnectInfo<SocketAddr>,
) -> Result<Json<UsageRecord>, ApiError> {
    let user: User = USER.get();
    tracing::info!(?from, "Handling search record.");
    let record = state
        .tracker
        .record_search(&user.uid, user.tier)
        .await
        .map_err(|error| {
            ApiError::new(StatusCode::SERVICE_UNAVAILABLE, format!("{error:#}"))
        })?;
    Ok(Json(record))
}

#[derive(Debug, serde::Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TrendingParams {
    /// all, day, week or month.
    period: Option<String>,
    /// How many keywords. Defaults to the configured count.
    limit: Option<usize>,
}

#[tracing::instrument(
    skip_all,
    fields(req_id = REQ_ID.get().req_id, uid = USER.get().uid)
)]
#[utoipa::path(
    get,
    path = "/trending",
    params(TrendingParams),
    responses(
        (status = 200, description = "Most searched keywords, most frequent first", body = Vec<KeywordFrequency>),
        (status = 400, description = "Unknown period"),
        (status = 401, description = "Missing or invalid JWT token"),
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn trending_handler(
    State(state): State<AppState>,
    ConnectInfo(from): ConnectInfo<SocketAddr>,
    Query(params): Query<TrendingParams>,
) -> Result<Json<Vec<KeywordFrequency>>, ApiError> {
    tracing::info!(?from, ?params, "Handling trending request.");
    let conf = &state.conf;
    let period = match params.period.as_deref() {
        None => Period::All,
        Some(s) => s.parse().map_err(|error| {
            ApiError::new(StatusCode::BAD_REQUEST, format!("{error}"))
        })?,
    };
    let top_n = params
        .limit
        .unwrap_or(conf.trending.top_n)
        .min(MAX_TRENDING);
    let keywords = state
        .aggregator
        .top_keywords(conf.trending.window_size, top_n, period)
        .await;
    Ok(Json(keywords))
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Clone)]
struct User {
    pub uid: String,
    pub tier: Option<Tier>,
}

#[derive(Debug, Clone)]
struct ReqId {
    pub req_id: String,
}

impl ReqId {
    fn new() -> Self {
        let req_id = cuid2::create_id();
        Self { req_id }
    }
}

tokio::task_local! {
    static USER: User;
    static REQ_ID: ReqId;
}

async fn auth_layer(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_token = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| {
            tracing::warn!("Missing Authorization header");
            StatusCode::UNAUTHORIZED
        })?
        .to_str()
        .map_err(|e| {
            tracing::warn!(error = ?e, "Invalid Authorization header encoding");
            StatusCode::UNAUTHORIZED
        })?
        .strip_prefix("Bearer ")
        .ok_or_else(|| {
            tracing::warn!("Authorization header missing 'Bearer ' prefix");
            StatusCode::UNAUTHORIZED
        })?;

    match authorize(auth_token, &state.jwt) {
        Some(user) => {
            tracing::debug!(uid = ?user.uid, tier = ?user.tier, "Authenticated.");
            Ok(USER.scope(user, next.run(req)).await)
        }
        None => Err(StatusCode::UNAUTHORIZED.into()),
    }
}

fn authorize(auth_token: &str, codec: &jwt::Codec) -> Option<User> {
    auth::Claims::from_str(auth_token, codec)
        .inspect_err(|error| {
            tracing::warn!(
                ?error,
                token_prefix = ?auth_token.get(..10).unwrap_or(""),
                "JWT validation failed"
            );
        })
        .ok()
        .map(|claims| User {
            uid: claims.sub,
            tier: claims.tier,
        })
}

#[cfg(test)]
mod tests;
