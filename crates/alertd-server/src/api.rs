pub mod alerts;
pub mod machines;

use crate::state::AppState;
use alertd_storage::{MachineLookupError, StorageError};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// API 错误响应
#[derive(Serialize, ToSchema)]
pub struct ApiError {
    /// 错误信息
    pub error: String,
    /// 错误码
    pub err_code: i32,
    /// 链路追踪 ID
    pub trace_id: String,
}

/// API 成功响应包裹
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// 业务数据
    pub data: T,
}

pub fn success_response<T>(status: StatusCode, data: T) -> Response
where
    T: Serialize,
{
    (status, Json(ApiResponse { data })).into_response()
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "conflict" => 1005,
        "payload_too_large" => 1006,
        "machine_not_found" => 1201,
        "storage_error" => 1501,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiError {
            error: msg.to_string(),
            err_code: to_custom_error_code(code),
            trace_id: trace_id.to_string(),
        }),
    )
        .into_response()
}

/// Map a storage failure onto the error envelope.
///
/// Server-side failures are logged with the underlying error; the client
/// only sees a short message.
pub fn storage_error_response(trace_id: &str, err: &StorageError, context: &str) -> Response {
    match err {
        StorageError::InvalidRequest(e) => {
            error_response(StatusCode::BAD_REQUEST, trace_id, "bad_request", &e.to_string())
        }
        StorageError::OwnerResolutionFailed(MachineLookupError::NotFound { .. }) => error_response(
            StatusCode::BAD_REQUEST,
            trace_id,
            "machine_not_found",
            &err.to_string(),
        ),
        StorageError::Conflict { .. } => {
            error_response(StatusCode::CONFLICT, trace_id, "conflict", &err.to_string())
        }
        StorageError::OwnerResolutionFailed(MachineLookupError::Unavailable(_))
        | StorageError::Persistence { .. }
        | StorageError::Query(_) => {
            tracing::error!(trace_id = %trace_id, error = %err, "{context}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

/// 健康检查响应
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    /// 服务版本号
    version: String,
    /// 运行时长（秒）
    uptime_secs: i64,
}

/// 获取服务健康状态。
#[utoipa::path(
    get,
    path = "/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "服务健康状态", body = HealthResponse)
    )
)]
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = (Utc::now() - state.start_time).num_seconds();
    success_response(
        StatusCode::OK,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: uptime,
        },
    )
}

pub fn public_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(health))
}

pub fn api_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .merge(alerts::alert_routes())
        .merge(machines::machine_routes())
}
