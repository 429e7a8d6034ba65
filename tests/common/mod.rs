//! Shared fixtures: a mock JSONPlaceholder API and test configuration.

#![allow(dead_code)]

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rest_etl::config::Config;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// In-memory API contents plus injected failures.
#[derive(Default)]
pub struct MockApi {
    /// Response body per collection name.
    pub collections: HashMap<String, Value>,
    /// HTTP statuses returned, in order, before the collection is served.
    pub failures: HashMap<String, VecDeque<u16>>,
    /// Requests seen per collection.
    pub hits: HashMap<String, u32>,
}

pub type SharedApi = Arc<Mutex<MockApi>>;

impl MockApi {
    pub fn with_fixtures() -> SharedApi {
        let mut api = MockApi::default();
        api.collections.insert("users".into(), Value::Array(users()));
        api.collections.insert("posts".into(), Value::Array(posts()));
        api.collections
            .insert("comments".into(), Value::Array(comments()));
        Arc::new(Mutex::new(api))
    }
}

pub fn fail_times(api: &SharedApi, kind: &str, status: u16, times: usize) {
    let mut api = api.lock().unwrap();
    api.failures
        .entry(kind.to_string())
        .or_default()
        .extend(std::iter::repeat(status).take(times));
}

pub fn hits(api: &SharedApi, kind: &str) -> u32 {
    api.lock().unwrap().hits.get(kind).copied().unwrap_or(0)
}

pub fn set_collection(api: &SharedApi, kind: &str, body: Value) {
    api.lock()
        .unwrap()
        .collections
        .insert(kind.to_string(), body);
}

async fn serve_collection(
    State(api): State<SharedApi>,
    Path(kind): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut api = api.lock().unwrap();
    *api.hits.entry(kind.clone()).or_default() += 1;

    if let Some(status) = api.failures.get_mut(&kind).and_then(|f| f.pop_front()) {
        return (StatusCode::from_u16(status).unwrap(), "injected failure").into_response();
    }

    let Some(body) = api.collections.get(&kind) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let page = params.get("_page").and_then(|p| p.parse::<usize>().ok());
    let limit = params.get("_limit").and_then(|l| l.parse::<usize>().ok());
    match (page, limit, body) {
        (Some(page), Some(limit), Value::Array(records)) => {
            let slice: Vec<Value> = records
                .iter()
                .skip((page - 1) * limit)
                .take(limit)
                .cloned()
                .collect();
            Json(Value::Array(slice)).into_response()
        }
        _ => Json(body.clone()).into_response(),
    }
}

/// Serves `api` on an ephemeral port and returns its base URL.
pub async fn spawn_mock_api(api: SharedApi) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/{kind}", get(serve_collection))
        .with_state(api);
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

pub fn test_config(tmp: &TempDir, base_url: &str, port: u16) -> Config {
    let root = tmp.path().display();
    let config_content = format!(
        r#"[db]
path = "{root}/data/etl.sqlite"

[api]
base_url = "{base_url}"
timeout_secs = 5
retries = 3
backoff_ms = 10

[storage]
data_dir = "{root}/data"
reports_dir = "{root}/reports"

[server]
bind = "127.0.0.1:{port}"

[schedule]
interval_secs = 1
flow_retries = 2
retry_delay_secs = 0
"#
    );
    toml::from_str(&config_content).unwrap()
}

pub fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

// ─── Fixtures ───────────────────────────────────────────────────────
//
// Users 1 and 2 have two posts each, user 3 none. Posts 1 and 2 have two
// comments each, post 3 one, post 4 none. Post 99 references a missing
// user and comment 500 references post 99; comment 501 has no postId.

pub fn users() -> Vec<Value> {
    vec![
        json!({
            "id": 1,
            "name": "Leanne Graham",
            "username": "Bret",
            "email": "Sincere@april.biz",
            "address": {
                "street": "Kulas Light",
                "suite": "Apt. 556",
                "city": "Gwenborough",
                "zipcode": "92998-3874",
                "geo": { "lat": "-37.3159", "lng": "81.1496" }
            },
            "phone": "1-770-736-8031 x56442",
            "website": "hildegard.org",
            "company": {
                "name": "Romaguera-Crona",
                "catchPhrase": "Multi-layered client-server neural-net",
                "bs": "harness real-time e-markets"
            }
        }),
        json!({
            "id": 2,
            "name": "Ervin Howell",
            "username": "Antonette",
            "email": "Shanna@melissa.tv",
            "address": {
                "street": "Victor Plains",
                "suite": "Suite 879",
                "city": "Wisokyburgh",
                "zipcode": "90566-7771",
                "geo": { "lat": "-43.9509", "lng": "-34.4618" }
            },
            "phone": "010-692-6593 x09125",
            "website": "anastasia.net",
            "company": {
                "name": "Deckow-Crist",
                "catchPhrase": "Proactive didactic contingency",
                "bs": "synergize scalable supply-chains"
            }
        }),
        json!({
            "id": 3,
            "name": "Clementine Bauch",
            "username": "Samantha",
            "email": "Nathan@yesenia.net",
            "phone": "1-463-123-4447",
            "website": "ramiro.info"
        }),
    ]
}

pub fn posts() -> Vec<Value> {
    vec![
        json!({ "userId": 1, "id": 1, "title": "sunt aut facere", "body": "quia et suscipit\nsuscipit recusandae" }),
        json!({ "userId": 1, "id": 2, "title": "qui est esse", "body": "est rerum tempore" }),
        json!({ "userId": 2, "id": 3, "title": "ea molestias quasi", "body": "et iusto sed quo iure" }),
        json!({ "userId": 2, "id": 4, "title": "eum et est occaecati", "body": "ullam et saepe" }),
        json!({ "userId": 42, "id": 99, "title": "orphan", "body": "no such user" }),
    ]
}

pub fn comments() -> Vec<Value> {
    vec![
        json!({ "postId": 1, "id": 1, "name": "id labore ex et quam laborum", "email": "Eliseo@gardner.biz", "body": "laudantium enim" }),
        json!({ "postId": 1, "id": 2, "name": "quo vero reiciendis", "email": "Jayne_Kuhic@sydney.com", "body": "est natus enim" }),
        json!({ "postId": 2, "id": 3, "name": "odio adipisci rerum", "email": "Nikita@garfield.biz", "body": "quia molestiae" }),
        json!({ "postId": 2, "id": 4, "name": "alias odio sit", "email": "Lew@alysha.tv", "body": "non et atque" }),
        json!({ "postId": 3, "id": 5, "name": "vero eaque aliquid", "email": "Hayden@althea.biz", "body": "harum non quasi" }),
        json!({ "postId": 99, "id": 500, "name": "orphan", "email": "x@y.z", "body": "parent rejected" }),
        json!({ "id": 501, "name": "no parent", "email": "x@y.z", "body": "missing postId" }),
    ]
}
