use std::sync::{Arc, OnceLock};

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use time::macros::datetime;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{config::Settings, state::AppState, time::ManualClock};
use crate::store::memory::MemoryStore;

pub(crate) const TEST_NOW: OffsetDateTime = datetime!(2025-04-01 10:00:00 UTC);
pub(crate) const TEST_REPORTING_TOKEN: &str = "test-reporting-token";

/// Knobs that individual tests override; cleared so defaults apply.
const OVERRIDABLE_VARS: &[&str] = &[
    "DATABASE_URL",
    "TG_TOKEN",
    "TELEGRAM_API_BASE",
    "WEBHOOK_BATCH_SIZE",
    "NOTIFICATION_BATCH_SIZE",
    "WEBHOOK_PROCESSING_INTERVAL",
    "DEADLINE_CHECK_INTERVAL_MINUTES",
    "NOTIFICATION_SEND_INTERVAL",
    "REMINDER_TRIGGER_HOUR",
    "REMINDER_ENABLED",
    "REMINDER_ANALYSIS_DAYS_BACK",
    "DEADLINE_WARNING_HOURS",
    "DISPLAY_UTC_OFFSET_HOURS",
    "PLATFORM_BASE_URL",
    "SEND_PAUSE_MS",
    "NOTIFICATION_MAX_RETRIES",
    "NOTIFICATION_RETRY_BASE_DELAY",
    "NOTIFICATION_RETRY_MAX_DELAY",
    "MAX_RETRIES",
    "RETRY_BASE_DELAY",
    "RETRY_MAX_DELAY",
    "CIRCUIT_FAILURE_THRESHOLD",
    "CIRCUIT_RECOVERY_TIMEOUT_SECONDS",
    "SERVER_ENV",
    "API_V1_STR",
];

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) app: Router,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("MENTOR_NOTIFY_ENV", "test");
    std::env::set_var("MENTOR_NOTIFY_STRICT_CONFIG", "0");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::set_var("REPORTING_API_TOKEN", TEST_REPORTING_TOKEN);
    for name in OVERRIDABLE_VARS {
        std::env::remove_var(name);
    }
}

/// State over an empty in-memory store and a clock frozen at [`TEST_NOW`].
/// Callers hold [`env_lock`] and have applied [`set_test_env`].
pub(crate) fn memory_state() -> (AppState, Arc<MemoryStore>) {
    let settings = Settings::load().expect("settings");
    let store = MemoryStore::new();
    let state = AppState::new(settings, store.clone(), ManualClock::new(TEST_NOW));
    (state, store)
}

pub(crate) async fn setup_test_context() -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let (state, store) = memory_state();
    let app = api::router::router(state.clone());

    TestContext { state, store, app, _guard: guard }
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
