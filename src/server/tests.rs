use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::bail;
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::connect_info::MockConnectInfo,
    http::{self, Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use crate::{
    auth::Claims,
    conf::Conf,
    jwt,
    reset,
    store::{
        cache::{CacheStore, KvStore},
        memory::MemoryStore,
        Fallback, UsageStore,
    },
    tier::Tier,
    types::UsageRecord,
};

use super::{router, AppState, MAX_TRENDING};

const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Every operation fails, as a full disk or locked database would.
struct BrokenKv;

#[async_trait]
impl KvStore for BrokenKv {
    async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
        bail!("cache unavailable")
    }

    async fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
        bail!("cache unavailable")
    }

    async fn remove(&self, _key: &str) -> anyhow::Result<()> {
        bail!("cache unavailable")
    }
}

fn app(store: Arc<dyn UsageStore>) -> (Router, Arc<Conf>) {
    let conf = Arc::new(Conf::default());
    let state = AppState::new(store, conf.clone());
    let app = router(state)
        .unwrap()
        .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4321))));
    (app, conf)
}

fn token(conf: &Conf, uid: &str, tier: Option<Tier>) -> String {
    let codec = jwt::Codec::new(&conf.jwt);
    Claims::new(uid, tier, Duration::from_secs(300), &conf.jwt)
        .unwrap()
        .to_str(&codec)
        .unwrap()
}

async fn call(
    app: Router,
    method: http::Method,
    uri: &str,
    token: &str,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), MAX_BODY_SIZE).await.unwrap();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

async fn seed(store: &MemoryStore, count: u64, tier: Option<Tier>) {
    let record = UsageRecord {
        user_id: "u1".to_string(),
        search_count: count,
        last_reset_date: Some(reset::format_timestamp(Utc::now())),
        tier: tier.map(|t| t.to_string()),
    };
    store.save_usage(&record).await.unwrap();
}

#[tokio::test]
async fn check_prefers_stored_tier_over_token() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 30, Some(Tier::Free)).await;
    let (app, conf) = app(store);
    let token = token(&conf, "u1", Some(Tier::Pro));

    let (status, usage) =
        call(app.clone(), http::Method::GET, "/usage", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(usage, json!({"count": 30, "limit": 25, "tier": "free"}));

    let (status, check) =
        call(app, http::Method::GET, "/usage/check", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        check,
        json!({"reached": true, "current_count": 30, "limit": 25})
    );
}

#[tokio::test]
async fn check_falls_back_to_token_tier() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 30, None).await;
    let (app, conf) = app(store);
    let token = token(&conf, "u1", Some(Tier::Pro));
    let (status, check) =
        call(app, http::Method::GET, "/usage/check", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        check,
        json!({"reached": false, "current_count": 30, "limit": null})
    );
}

#[tokio::test]
async fn check_defaults_to_free() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 30, None).await;
    let (app, conf) = app(store);
    let token = token(&conf, "u1", None);
    let (_, check) = call(app, http::Method::GET, "/usage/check", &token).await;
    assert_eq!(check["limit"], json!(25));
    assert_eq!(check["reached"], json!(true));
}

#[tokio::test]
async fn check_tier_param_wins() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 30, Some(Tier::Free)).await;
    let (app, conf) = app(store);
    let token = token(&conf, "u1", None);
    let (_, check) =
        call(app, http::Method::GET, "/usage/check?tier=pro", &token).await;
    assert_eq!(check["limit"], Value::Null);
    assert_eq!(check["reached"], json!(false));
}

#[tokio::test]
async fn record_counts_with_token_tier() {
    let store = Arc::new(MemoryStore::new());
    let (app, conf) = app(store.clone());
    let token = token(&conf, "u1", Some(Tier::Standard));
    let (status, record) =
        call(app, http::Method::POST, "/usage/record", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["search_count"], json!(1));
    assert_eq!(record["tier"], json!("standard"));
    let stored = store.fetch_usage("u1").await.unwrap().unwrap();
    assert_eq!(stored.search_count, 1);
}

#[tokio::test]
async fn record_is_unavailable_when_nothing_accepts_the_write() {
    let remote = Arc::new(MemoryStore::new());
    remote.set_reachable(false);
    let cache = CacheStore::new(Arc::new(BrokenKv));
    let (app, conf) = app(Arc::new(Fallback::new(remote, cache)));
    let token = token(&conf, "u1", None);
    let (status, body) =
        call(app, http::Method::POST, "/usage/record", &token).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], json!("Service Unavailable"));
}

#[tokio::test]
async fn trending_limit_is_capped() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    for i in 0..(MAX_TRENDING + 10) {
        store.push_search(&format!("keyword {i}"), now).await;
    }
    let (app, conf) = app(store);
    let token = token(&conf, "u1", None);

    let (status, keywords) =
        call(app.clone(), http::Method::GET, "/trending?limit=500", &token)
            .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(keywords.as_array().unwrap().len(), MAX_TRENDING);

    let (_, keywords) =
        call(app, http::Method::GET, "/trending?limit=3", &token).await;
    assert_eq!(keywords.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn unknown_period_is_a_bad_request() {
    let (app, conf) = app(Arc::new(MemoryStore::new()));
    let token = token(&conf, "u1", None);
    let (status, _) =
        call(app, http::Method::GET, "/trending?period=decade", &token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bad_token_is_unauthorized() {
    let (app, _) = app(Arc::new(MemoryStore::new()));
    let (status, _) =
        call(app, http::Method::GET, "/usage", "not-a-token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
