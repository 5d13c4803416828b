#![allow(dead_code)]

use assess_db::{create_pool, DbRuntimeSettings};
use assess_server::config::{AccessConfig, ProviderConfig};
use assess_server::middleware::RateLimiter;
use assess_server::provider::GenAiClient;
use assess_server::{app, AppState};
use assess_types::Question;
use axum::body::Body;
use axum::extract::{ConnectInfo, Path};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine;
use serde_json::{json, Value};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const ALLOWED_DOMAIN: &str = "example.edu";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    _dir: TempDir,
}

pub fn questions() -> Vec<Question> {
    vec![
        Question::new("q1", "¿Qué sabes de IA?"),
        Question::new("q2", "¿La usas en tu trabajo?"),
    ]
}

pub fn access() -> AccessConfig {
    AccessConfig {
        allowed_domains: vec![ALLOWED_DOMAIN.to_string()],
        ..AccessConfig::default()
    }
}

pub fn test_app() -> TestApp {
    test_app_with(access(), ProviderConfig::default())
}

pub fn test_app_with(access: AccessConfig, provider: ProviderConfig) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("assess.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    {
        let conn = pool.get().unwrap();
        assess_db::run_migrations(&conn).unwrap();
        assess_db::questions::seed_questions(&conn, &questions()).unwrap();
    }

    let state = AppState {
        pool,
        rate_limiter: RateLimiter::new(),
        access: Arc::new(access),
        provider: Arc::new(GenAiClient::new(provider).unwrap()),
    };
    TestApp {
        router: app(state.clone()),
        state,
        _dir: dir,
    }
}

pub fn client_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 40_000)
}

/// Builds a request as the given user (or anonymously), with connect info
/// injected as the real listener would.
pub fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("Authorization", format!("Bearer {}", user));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let mut request = builder.body(body).unwrap();
    request.extensions_mut().insert(ConnectInfo(client_addr()));
    request
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

/// What the mock provider saw: model call path segment, API key, payload.
pub type ProviderCalls = Arc<Mutex<Vec<(String, Option<String>, Value)>>>;

/// PCM samples the mock provider returns for speech.
pub const MOCK_PCM: [i16; 4] = [0, 1200, -1200, 300];

/// Spawns a loopback stand-in for the generative-AI provider.
///
/// Speech requests get base64 PCM back, requests carrying inline audio get a
/// transcription, everything else gets a short generated line. With
/// `status` set, every call fails with that status instead.
pub async fn spawn_provider(status: Option<StatusCode>) -> (ProviderConfig, ProviderCalls) {
    let calls: ProviderCalls = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&calls);
    let router = Router::new().route(
        "/v1beta/models/{call}",
        post(
            move |Path(call): Path<String>, headers: HeaderMap, Json(body): Json<Value>| {
                let seen = Arc::clone(&seen);
                async move {
                    let key = headers
                        .get("x-goog-api-key")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let is_speech = body["generationConfig"]["responseModalities"][0] == "AUDIO";
                    let has_audio = body["contents"][0]["parts"][1]["inlineData"]["data"].is_string();
                    seen.lock().unwrap().push((call, key, body));

                    if let Some(status) = status {
                        return (status, Json(json!({ "error": { "message": "boom" } })));
                    }
                    let part = if is_speech {
                        let pcm: Vec<u8> = MOCK_PCM.iter().flat_map(|s| s.to_le_bytes()).collect();
                        json!({ "inlineData": {
                            "mimeType": "audio/L16;rate=24000",
                            "data": base64::engine::general_purpose::STANDARD.encode(pcm)
                        }})
                    } else if has_audio {
                        json!({ "text": " hola mundo " })
                    } else {
                        json!({ "text": "¡Hola! Empecemos." })
                    };
                    (
                        StatusCode::OK,
                        Json(json!({ "candidates": [{ "content": { "parts": [part] } }] })),
                    )
                }
            },
        ),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let config = ProviderConfig {
        base_url: format!("http://{}", addr),
        api_key: Some("test-key".to_string()),
        ..ProviderConfig::default()
    };
    (config, calls)
}
