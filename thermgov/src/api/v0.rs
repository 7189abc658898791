//! API v0 endpoints.
//!
//! Version 0 signals an unstable API -- breaking changes are expected
//! until the governor reaches 1.0.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tokio::time::Instant;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::server::SharedState;
use crate::api_client::types::{
    ConfigFieldValue, ConfigValue, ConfigValueRequest, GovernorPatchRequest, GovernorState,
};
use crate::thermal::{
    ConfigError, ConfigField, ConfigPatch, DwellTimes, GovernorSnapshot, HandleError,
    ThermalConfig,
};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the v0 API routes with OpenAPI metadata.
pub fn routes() -> OpenApiRouter<SharedState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(get_governor, patch_governor))
        .routes(routes!(get_config, patch_config))
        .routes(routes!(get_config_field, put_config_field))
        .routes(routes!(get_stats))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = OK, description = "Server is running", body = String),
    ),
)]
async fn health() -> &'static str {
    "OK"
}

/// Return the current governor state.
#[utoipa::path(
    get,
    path = "/governor",
    tag = "governor",
    responses(
        (status = OK, description = "Current governor state", body = GovernorState),
    ),
)]
async fn get_governor(State(state): State<SharedState>) -> Json<GovernorState> {
    Json(governor_state(&state.snapshot()))
}

/// Enable, disable, suspend or resume the governor, or report an external
/// ceiling change.
#[utoipa::path(
    patch,
    path = "/governor",
    tag = "governor",
    request_body = GovernorPatchRequest,
    responses(
        (status = OK, description = "Updated governor state", body = GovernorState),
        (status = INTERNAL_SERVER_ERROR, description = "Governor not running"),
    ),
)]
async fn patch_governor(
    State(state): State<SharedState>,
    Json(req): Json<GovernorPatchRequest>,
) -> Result<Json<GovernorState>, StatusCode> {
    if let Some(enabled) = req.enabled {
        call(state.governor.set_enabled(enabled)).await?;
    }
    if let Some(suspended) = req.suspended {
        call(state.governor.set_suspended(suspended)).await?;
    }
    if req.ceiling_changed == Some(true) {
        call(state.governor.mark_external_change()).await?;
    }

    Ok(Json(governor_state(&state.snapshot())))
}

/// Return the full configuration.
#[utoipa::path(
    get,
    path = "/config",
    tag = "config",
    responses(
        (status = OK, description = "Configuration in effect", body = ThermalConfig),
    ),
)]
async fn get_config(State(state): State<SharedState>) -> Json<ThermalConfig> {
    Json(state.snapshot().config)
}

/// Change several fields at once. Either every change applies or none.
#[utoipa::path(
    patch,
    path = "/config",
    tag = "config",
    request_body = BTreeMap<String, ConfigValue>,
    responses(
        (status = OK, description = "Updated configuration", body = ThermalConfig),
        (status = BAD_REQUEST, description = "Invalid value or inconsistent result"),
        (status = NOT_FOUND, description = "Unknown field"),
        (status = INTERNAL_SERVER_ERROR, description = "Governor not running"),
    ),
)]
async fn patch_config(
    State(state): State<SharedState>,
    Json(req): Json<BTreeMap<String, ConfigValue>>,
) -> Result<Json<ThermalConfig>, StatusCode> {
    let patch = req
        .iter()
        .map(|(name, value)| ConfigField::parse_name(name).map(|field| (field, value.to_raw())))
        .collect::<Result<ConfigPatch, ConfigError>>()
        .map_err(|e| config_status(&e))?;

    if patch.is_empty() {
        return Ok(Json(state.snapshot().config));
    }

    call(state.governor.update_config(patch)).await.map(Json)
}

/// Return one configuration field.
#[utoipa::path(
    get,
    path = "/config/{field}",
    tag = "config",
    params(
        ("field" = String, Path, description = "Field name, e.g. `low_engage_c`"),
    ),
    responses(
        (status = OK, description = "Field value", body = ConfigFieldValue),
        (status = NOT_FOUND, description = "Unknown field"),
    ),
)]
async fn get_config_field(
    State(state): State<SharedState>,
    Path(field): Path<String>,
) -> Result<Json<ConfigFieldValue>, StatusCode> {
    let field = ConfigField::parse_name(&field).map_err(|e| config_status(&e))?;
    Ok(Json(field_value(&state.snapshot().config, field)))
}

/// Set one configuration field.
#[utoipa::path(
    put,
    path = "/config/{field}",
    tag = "config",
    params(
        ("field" = String, Path, description = "Field name, e.g. `low_engage_c`"),
    ),
    request_body = ConfigValueRequest,
    responses(
        (status = OK, description = "Updated field value", body = ConfigFieldValue),
        (status = BAD_REQUEST, description = "Invalid value or inconsistent result"),
        (status = NOT_FOUND, description = "Unknown field"),
        (status = INTERNAL_SERVER_ERROR, description = "Governor not running"),
    ),
)]
async fn put_config_field(
    State(state): State<SharedState>,
    Path(field): Path<String>,
    Json(req): Json<ConfigValueRequest>,
) -> Result<Json<ConfigFieldValue>, StatusCode> {
    let field = ConfigField::parse_name(&field).map_err(|e| config_status(&e))?;
    let patch = ConfigPatch::new().with(field, req.value.to_raw());
    let config = call(state.governor.update_config(patch)).await?;
    Ok(Json(field_value(&config, field)))
}

/// Return time spent at each throttle level.
#[utoipa::path(
    get,
    path = "/stats",
    tag = "stats",
    responses(
        (status = OK, description = "Dwell times in milliseconds", body = DwellTimes),
    ),
)]
async fn get_stats(State(state): State<SharedState>) -> Json<DwellTimes> {
    Json(state.snapshot().dwell_times(Instant::now()))
}

fn governor_state(snapshot: &GovernorSnapshot) -> GovernorState {
    GovernorState {
        enabled: snapshot.mode.enabled,
        suspended: snapshot.mode.suspended,
        level: snapshot.level,
        temperature_c: snapshot.temperature_c,
        pre_throttle_khz: snapshot.pre_throttle_khz,
        ceiling_changed_externally: snapshot.ownership.external_change_pending(),
        profile: snapshot.config.profile,
        dwell: snapshot.dwell_times(Instant::now()),
    }
}

fn field_value(config: &ThermalConfig, field: ConfigField) -> ConfigFieldValue {
    ConfigFieldValue {
        field: field.to_string(),
        value: config.get(field),
    }
}

/// Await a governor command, bounded by [`COMMAND_TIMEOUT`].
async fn call<T>(
    request: impl Future<Output = Result<T, HandleError>>,
) -> Result<T, StatusCode> {
    // Result layers: timeout / handle error.
    match tokio::time::timeout(COMMAND_TIMEOUT, request).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(HandleError::Config(e))) => Err(config_status(&e)),
        Ok(Err(HandleError::Stopped)) | Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

fn config_status(error: &ConfigError) -> StatusCode {
    match error {
        ConfigError::UnknownField(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        body::Body,
        http::{Method, Request},
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::api::router;
    use crate::backend::sim::SimHandle;
    use crate::thermal::{Governor, Poller};

    fn app() -> (Router, SimHandle) {
        let sim = SimHandle::new(2);
        sim.set_temperature(20);
        let governor = Governor::new(ThermalConfig::default(), sim.backend()).unwrap();
        let (poller, handle) = Poller::new(governor);
        tokio::spawn(poller.run(Default::default()));
        (router(SharedState::new(handle)), sim)
    }

    async fn request(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test(start_paused = true)]
    async fn should_answer_health_check() {
        let (app, _sim) = app();
        let response = app
            .oneshot(Request::get("/api/v0/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test(start_paused = true)]
    async fn should_report_governor_state() {
        let (app, _sim) = app();
        let (status, body) = request(&app, Method::GET, "/api/v0/governor", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], true);
        assert_eq!(body["suspended"], false);
        assert_eq!(body["level"], "none");
        assert_eq!(body["profile"]["low"]["engage_c"], 56);
    }

    #[tokio::test(start_paused = true)]
    async fn should_toggle_mode() {
        let (app, _sim) = app();

        let (status, body) = request(
            &app,
            Method::PATCH,
            "/api/v0/governor",
            Some(json!({ "enabled": false, "suspended": true })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], false);
        assert_eq!(body["suspended"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn should_accept_external_change_notice() {
        let (app, _sim) = app();

        let (status, body) = request(
            &app,
            Method::PATCH,
            "/api/v0/governor",
            Some(json!({ "ceiling_changed": true })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ceiling_changed_externally"], true);
        assert_eq!(body["enabled"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn should_read_and_write_single_field() {
        let (app, _sim) = app();

        let (status, body) = request(&app, Method::GET, "/api/v0/config/poll_ms", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "field": "poll_ms", "value": "250" }));

        let (status, body) = request(
            &app,
            Method::PUT,
            "/api/v0/config/poll_ms",
            Some(json!({ "value": 1000 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], "1000");

        let (_, body) = request(&app, Method::GET, "/api/v0/config", None).await;
        assert_eq!(body["poll_ms"], 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn should_map_config_errors_to_status_codes() {
        let (app, _sim) = app();

        let (status, _) = request(&app, Method::GET, "/api/v0/config/fan_speed", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = request(
            &app,
            Method::PUT,
            "/api/v0/config/poll_ms",
            Some(json!({ "value": "often" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Low engage above mid engage.
        let (status, _) = request(
            &app,
            Method::PUT,
            "/api/v0/config/low_engage_c",
            Some(json!({ "value": 70 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn should_patch_related_fields_together() {
        let (app, _sim) = app();

        // Raising low engage alone would overtake mid; together it is valid.
        let (status, body) = request(
            &app,
            Method::PATCH,
            "/api/v0/config",
            Some(json!({ "low_engage_c": 60, "mid_engage_c": 62, "max_engage_c": 70 })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["profile"]["low"]["engage_c"], 60);
        assert_eq!(body["profile"]["mid"]["engage_c"], 62);
    }

    #[tokio::test(start_paused = true)]
    async fn should_leave_config_untouched_on_rejected_patch() {
        let (app, _sim) = app();

        let (status, _) = request(
            &app,
            Method::PATCH,
            "/api/v0/config",
            Some(json!({ "poll_ms": 500, "max_clear_c": 90 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = request(&app, Method::GET, "/api/v0/config", None).await;
        assert_eq!(body["poll_ms"], 250);
    }

    #[tokio::test(start_paused = true)]
    async fn should_report_dwell_times() {
        let (app, _sim) = app();
        let (status, body) = request(&app, Method::GET, "/api/v0/stats", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "low_ms": 0, "mid_ms": 0, "max_ms": 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn should_fail_when_governor_is_gone() {
        let sim = SimHandle::new(1);
        let governor = Governor::new(ThermalConfig::default(), sim.backend()).unwrap();
        let (poller, handle) = Poller::new(governor);
        drop(poller);
        let app = router(SharedState::new(handle));

        let (status, _) = request(
            &app,
            Method::PATCH,
            "/api/v0/governor",
            Some(json!({ "enabled": false })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
