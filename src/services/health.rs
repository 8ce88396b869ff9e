use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::browser::sessions::BrowserSessionManager;
use crate::database::connection::DatabaseManager;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub database: DatabaseHealth,
    pub browser: BrowserHealth,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub status: String,
    pub connection_pool_size: u32,
    pub response_time_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BrowserHealth {
    /// Users with a booking browser open or being opened
    pub open_sessions: usize,
    /// Launch permits held, booking and scan browsers together
    pub browsers_in_use: usize,
    pub capacity: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseManager>,
    pub sessions: Arc<BrowserSessionManager>,
    pub start_time: DateTime<Utc>,
}

pub struct HealthService {
    pub router: Router,
}

impl HealthService {
    pub fn new(db: Arc<DatabaseManager>, sessions: Arc<BrowserSessionManager>) -> Self {
        let state = AppState {
            db,
            sessions,
            start_time: Utc::now(),
        };

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/health/ready", get(readiness_check))
            .route("/health/live", get(liveness_check))
            .with_state(state);

        Self { router }
    }
}

async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, StatusCode> {
    let start = std::time::Instant::now();
    let db_healthy = state.db.ping().await.is_ok();
    let response_time_ms = start.elapsed().as_millis() as u64;

    let uptime = Utc::now()
        .signed_duration_since(state.start_time)
        .num_seconds()
        .max(0) as u64;
    let pool = state.sessions.pool();

    let health_response = HealthResponse {
        status: if db_healthy { "healthy" } else { "unhealthy" }.to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: DatabaseHealth {
            status: if db_healthy { "healthy" } else { "unhealthy" }.to_string(),
            connection_pool_size: state.db.pool.size(),
            response_time_ms,
        },
        browser: BrowserHealth {
            open_sessions: state.sessions.open_sessions(),
            browsers_in_use: pool.in_use(),
            capacity: pool.capacity(),
        },
        uptime_seconds: uptime,
    };

    if db_healthy {
        Ok(Json(health_response))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

async fn readiness_check(State(state): State<AppState>) -> Result<Json<&'static str>, StatusCode> {
    match state.db.ping().await {
        Ok(()) => Ok(Json("ready")),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

async fn liveness_check() -> Json<&'static str> {
    Json("alive")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserError, BrowserLauncher, BrowserPage, BrowserPool, BrowserResult};
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use tempfile::TempDir;

    struct OfflineLauncher;

    #[async_trait]
    impl BrowserLauncher for OfflineLauncher {
        async fn launch(&self) -> BrowserResult<Box<dyn BrowserPage>> {
            Err(BrowserError::Launch("no browser in tests".into()))
        }
    }

    async fn create_test_health_service() -> (HealthService, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test.db");
        let db_url = format!("sqlite://{}", db_path.display());

        let db = Arc::new(
            DatabaseManager::new(&db_url)
                .await
                .expect("Failed to create test database"),
        );
        sqlx::migrate!("./migrations")
            .run(&db.pool)
            .await
            .expect("Failed to run migrations");

        let sessions = Arc::new(BrowserSessionManager::new(BrowserPool::new(
            Arc::new(OfflineLauncher),
            3,
        )));
        (HealthService::new(db, sessions), temp_dir)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (health_service, _temp_dir) = create_test_health_service().await;
        let server = TestServer::new(health_service.router).expect("Failed to create test server");

        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let health_response: HealthResponse = response.json();
        assert_eq!(health_response.status, "healthy");
        assert_eq!(health_response.database.status, "healthy");
        assert_eq!(health_response.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(health_response.browser.open_sessions, 0);
        assert_eq!(health_response.browser.browsers_in_use, 0);
        assert_eq!(health_response.browser.capacity, 3);
    }

    #[tokio::test]
    async fn test_readiness_endpoint() {
        let (health_service, _temp_dir) = create_test_health_service().await;
        let server = TestServer::new(health_service.router).expect("Failed to create test server");

        let response = server.get("/health/ready").await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let ready_response: String = response.json();
        assert_eq!(ready_response, "ready");
    }

    #[tokio::test]
    async fn test_liveness_endpoint() {
        let (health_service, _temp_dir) = create_test_health_service().await;
        let server = TestServer::new(health_service.router).expect("Failed to create test server");

        let response = server.get("/health/live").await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let alive_response: String = response.json();
        assert_eq!(alive_response, "alive");
    }
}
