use crate::api::{error_response, storage_error_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;
use alertd_storage::{MachineRow, NewMachine};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// 注册 Machine 请求
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMachineRequest {
    /// Machine 外部名称（唯一）
    pub machine_id: String,
    pub ip_address: Option<String>,
    pub version: Option<String>,
}

/// Machine 信息
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineResponse {
    /// 十进制字符串形式的 ID，提交 Alert 时作为 `machineId`
    pub id: String,
    pub machine_id: String,
    pub ip_address: Option<String>,
    pub version: Option<String>,
    pub is_validated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MachineRow> for MachineResponse {
    fn from(row: MachineRow) -> Self {
        Self {
            id: row.id.to_string(),
            machine_id: row.machine_id,
            ip_address: row.ip_address,
            version: row.version,
            is_validated: row.is_validated,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 注册提交 Alert 的 Machine。名称重复返回 409。
#[utoipa::path(
    post,
    path = "/v1/machines",
    tag = "Machines",
    request_body = RegisterMachineRequest,
    responses(
        (status = 200, description = "注册成功", body = MachineResponse),
        (status = 400, description = "请求无效", body = crate::api::ApiError),
        (status = 409, description = "名称已存在", body = crate::api::ApiError)
    )
)]
async fn register_machine(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    body: Result<Json<RegisterMachineRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "bad_request",
                &rejection.body_text(),
            );
        }
    };

    if req.machine_id.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "machineId must not be empty",
        );
    }

    let new = NewMachine {
        machine_id: req.machine_id,
        ip_address: req.ip_address,
        version: req.version,
        is_validated: true,
    };

    match state.store.register_machine(&new).await {
        Ok(row) => success_response(StatusCode::OK, MachineResponse::from(row)),
        Err(e) => storage_error_response(&trace_id, &e, "Failed to register machine"),
    }
}

pub fn machine_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(register_machine))
}
