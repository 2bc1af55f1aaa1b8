//! Adventure Forge - generates branching "choose your own adventure" stories
//! with an LLM and serves them as node graphs.

mod assembler;
mod builder;
mod config;
mod error;
mod generator;
mod jobs;
mod openrouter;
mod schema;
mod store;
mod validate;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use config::Settings;
use error::StoryError;
use generator::StoryModel;
use openrouter::OpenRouterClient;
use schema::{CompleteStoryView, GenerationJob};
use std::sync::Arc;
use store::Database;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const SESSION_COOKIE: &str = "session_id";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    db: Database,
    model: Arc<dyn StoryModel>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "adventure_forge=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    let db = Database::open(&settings.database_path)
        .with_context(|| format!("Failed to open database {:?}", settings.database_path))?;

    let openrouter = OpenRouterClient::from_settings(&settings);
    info!("OpenRouter client initialized (model: {})", openrouter.model());

    let state = AppState {
        db,
        model: Arc::new(openrouter),
    };
    let app = app(state, &settings);

    let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the full router: welcome + health at the root, stories and jobs under the API prefix.
fn app(state: AppState, settings: &Settings) -> Router {
    let api = Router::new()
        .route("/stories/create", post(create_story))
        .route("/stories/:story_id/complete", get(get_complete_story))
        .route("/jobs/:job_id", get(get_job));

    let router = Router::new()
        .route("/", get(welcome))
        .route("/health", get(health));
    let router = if settings.api_prefix.is_empty() {
        router.merge(api)
    } else {
        router.nest(&settings.api_prefix, api)
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&settings.allowed_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

// ============================================================================
// Handlers
// ============================================================================

async fn welcome() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Welcome to the Choose your own Adventure Game API!"
    }))
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[derive(serde::Deserialize)]
struct CreateStoryRequest {
    theme: String,
}

/// Queue a story generation and return the pending job.
async fn create_story(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateStoryRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let theme = request.theme.trim();
    if theme.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Theme must not be empty".to_string()));
    }

    let session_id = session_id(&headers).unwrap_or_else(|| Uuid::new_v4().to_string());
    let cookie = format!("{}={}; HttpOnly; Path=/; SameSite=Lax", SESSION_COOKIE, session_id);

    let job = jobs::create_job(&state.db, &session_id, theme)
        .await
        .map_err(error_response)?;

    jobs::spawn_generation(state.db.clone(), state.model.clone(), job.job_id.clone());

    Ok(([(header::SET_COOKIE, cookie)], Json(job)))
}

/// Poll a generation job.
async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<GenerationJob>, (StatusCode, String)> {
    jobs::get_job(&state.db, &job_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Get a story with every node, addressed by id.
async fn get_complete_story(
    State(state): State<AppState>,
    Path(story_id): Path<i64>,
) -> Result<Json<CompleteStoryView>, (StatusCode, String)> {
    assembler::load_complete_story(&state.db, story_id)
        .await
        .map(Json)
        .map_err(error_response)
}

// ============================================================================
// Helper functions
// ============================================================================

/// Session id from the `session_id` cookie, if the client sent one.
fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn error_response(err: StoryError) -> (StatusCode, String) {
    let status = err.status_code();
    if status.is_server_error() {
        error!("Request failed: {}", err.job_message());
    }
    (status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::tests::{sample_story, ScriptedModel};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_settings() -> Settings {
        Settings::from_lookup(|key| match key {
            "OPENROUTER_API_KEY" => Some("test".to_string()),
            _ => None,
        })
        .unwrap()
    }

    fn test_app(db: &Database) -> Router {
        let state = AppState {
            db: db.clone(),
            model: Arc::new(ScriptedModel::replying(sample_story().to_string())),
        };
        app(state, &test_settings())
    }

    fn create_request(theme: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::post("/api/stories/create").header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder
            .body(Body::from(serde_json::json!({"theme": theme}).to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn get(app: &Router, uri: &str) -> axum::response::Response {
        app.clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[test]
    fn test_session_cookie_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_id(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; session_id=abc-123"));
        assert_eq!(session_id(&headers).as_deref(), Some("abc-123"));

        headers.insert(header::COOKIE, HeaderValue::from_static("session_id="));
        assert_eq!(session_id(&headers), None);
    }

    #[tokio::test]
    async fn test_create_sets_session_cookie() {
        let (_dir, db) = store::tests::temp_db();
        let app = test_app(&db);

        let response = app.clone().oneshot(create_request("jungle", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("session_id="));
        assert!(cookie.contains("HttpOnly"));

        let job = body_json(response).await;
        assert_eq!(job["status"], "PENDING");
        assert_eq!(job["theme"], "jungle");
        assert!(job["completed_at"].is_null());
        assert!(job["error"].is_null());
        assert!(job["story_id"].is_null());
        assert!(cookie.contains(job["session_id"].as_str().unwrap()));
    }

    #[tokio::test]
    async fn test_create_reuses_session_cookie() {
        let (_dir, db) = store::tests::temp_db();
        let app = test_app(&db);

        let response = app
            .clone()
            .oneshot(create_request("jungle", Some("session_id=returning-player")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let job = body_json(response).await;
        assert_eq!(job["session_id"], "returning-player");
    }

    #[tokio::test]
    async fn test_create_rejects_blank_theme() {
        let (_dir, db) = store::tests::temp_db();
        let app = test_app(&db);
        let response = app.oneshot(create_request("   ", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let (_dir, db) = store::tests::temp_db();
        let app = test_app(&db);

        assert_eq!(get(&app, "/api/stories/999/complete").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(get(&app, "/api/jobs/nope").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(get(&app, "/api/stories/abc/complete").await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generate_poll_and_fetch() {
        let (_dir, db) = store::tests::temp_db();
        let app = test_app(&db);

        let response = app.clone().oneshot(create_request("pirates", None)).await.unwrap();
        let job_id = body_json(response).await["job_id"].as_str().unwrap().to_string();

        let mut job = Value::Null;
        for _ in 0..200 {
            job = body_json(get(&app, &format!("/api/jobs/{}", job_id)).await).await;
            if job["status"] == "COMPLETED" || job["status"] == "FAILED" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(job["status"], "COMPLETED", "job: {}", job);
        let story_id = job["story_id"].as_i64().unwrap();

        let response = get(&app, &format!("/api/stories/{}/complete", story_id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let story = body_json(response).await;

        assert_eq!(story["title"], "The Fork");
        assert_eq!(story["root_nodes"].as_array().unwrap().len(), 1);
        let all_nodes = story["all_nodes"].as_object().unwrap();
        assert_eq!(all_nodes.len(), 3);

        let root = &story["root_nodes"][0];
        assert_eq!(root["content"], "Start");
        for option in root["options"].as_array().unwrap() {
            let child_id = option["node_id"].as_i64().unwrap().to_string();
            assert_eq!(all_nodes[&child_id]["is_ending"], true);
        }
    }

    #[tokio::test]
    async fn test_welcome_and_health() {
        let (_dir, db) = store::tests::temp_db();
        let app = test_app(&db);

        let welcome = body_json(get(&app, "/").await).await;
        assert!(welcome["message"].as_str().unwrap().contains("Adventure"));
        assert_eq!(get(&app, "/health").await.status(), StatusCode::OK);
    }
}
