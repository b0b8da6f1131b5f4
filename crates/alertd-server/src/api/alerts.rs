use crate::api::{error_response, storage_error_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;
use alertd_common::types::CreateAlertRequest;
use alertd_storage::{AlertFilter, AlertRow, AlertWithChildren, DecisionRow, EventRow, MetaRow};
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Alert 信息（不含子集合）
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertResponse {
    /// 十进制字符串形式的 ID（超出 JavaScript 安全整数范围）
    pub id: String,
    /// 场景标识
    pub scenario: String,
    pub bucket_id: String,
    pub message: String,
    pub event_count: i32,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub source_scope: String,
    pub source_value: String,
    pub source_ip: String,
    pub source_range: String,
    pub source_as_number: String,
    pub source_as_name: String,
    pub source_country: String,
    pub source_latitude: f32,
    pub source_longitude: f32,
    pub capacity: i32,
    pub leak_speed: i32,
    pub reprocess: bool,
    /// 所属 Machine 的 ID
    pub machine_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct EventResponse {
    pub id: String,
    pub time: DateTime<Utc>,
    /// 原始事件内容
    pub serialized: String,
}

#[derive(Serialize, ToSchema)]
pub struct MetaResponse {
    pub id: String,
    pub key: String,
    pub value: String,
}

/// 处置决定
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResponse {
    pub id: String,
    /// 有效期截止时间
    pub until: DateTime<Utc>,
    pub scenario: String,
    pub decision_type: String,
    /// 目标 IP 区间起点（含）
    pub source_ip_start: i64,
    /// 目标 IP 区间终点（含）
    pub source_ip_end: i64,
    pub source_value: String,
    pub source_scope: String,
}

/// Alert 详情（含 events / metas / decisions）
#[derive(Serialize, ToSchema)]
pub struct AlertDetailResponse {
    #[serde(flatten)]
    pub alert: AlertResponse,
    pub events: Vec<EventResponse>,
    pub metas: Vec<MetaResponse>,
    pub decisions: Vec<DecisionResponse>,
}

impl From<AlertRow> for AlertResponse {
    fn from(row: AlertRow) -> Self {
        Self {
            id: row.id.to_string(),
            scenario: row.scenario,
            bucket_id: row.bucket_id,
            message: row.message,
            event_count: row.events_count,
            started_at: row.started_at,
            stopped_at: row.stopped_at,
            source_scope: row.source_scope,
            source_value: row.source_value,
            source_ip: row.source_ip,
            source_range: row.source_range,
            source_as_number: row.source_as_number,
            source_as_name: row.source_as_name,
            source_country: row.source_country,
            source_latitude: row.source_latitude,
            source_longitude: row.source_longitude,
            capacity: row.capacity,
            leak_speed: row.leak_speed,
            reprocess: row.reprocess,
            machine_id: row.machine_id.to_string(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<EventRow> for EventResponse {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id.to_string(),
            time: row.time,
            serialized: row.serialized,
        }
    }
}

impl From<MetaRow> for MetaResponse {
    fn from(row: MetaRow) -> Self {
        Self {
            id: row.id.to_string(),
            key: row.key,
            value: row.value,
        }
    }
}

impl From<DecisionRow> for DecisionResponse {
    fn from(row: DecisionRow) -> Self {
        Self {
            id: row.id.to_string(),
            until: row.until,
            scenario: row.scenario,
            decision_type: row.decision_type,
            source_ip_start: row.source_ip_start,
            source_ip_end: row.source_ip_end,
            source_value: row.source_value,
            source_scope: row.source_scope,
        }
    }
}

impl From<AlertWithChildren> for AlertDetailResponse {
    fn from(view: AlertWithChildren) -> Self {
        Self {
            alert: view.alert.into(),
            events: view.events.into_iter().map(Into::into).collect(),
            metas: view.metas.into_iter().map(Into::into).collect(),
            decisions: view.decisions.into_iter().map(Into::into).collect(),
        }
    }
}

/// Alert 查询参数。三个条件均为子串匹配，缺省为空串（匹配全部）。
#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase")]
struct FindAlertsParams {
    /// 场景子串
    #[param(required = false)]
    #[serde(default)]
    scenario: String,
    /// 来源 scope 子串
    #[param(required = false)]
    #[serde(default)]
    source_scope: String,
    /// 来源 value 子串
    #[param(required = false)]
    #[serde(default)]
    source_value: String,
}

/// 删除结果
#[derive(Serialize, ToSchema)]
struct DeletedAlert {
    id: String,
}

/// 提交一条 Alert 及其 events / metas / decisions。
/// 全部写入在同一事务中完成，任一失败则整体回滚。
#[utoipa::path(
    post,
    path = "/v1/alerts",
    tag = "Alerts",
    request_body = CreateAlertRequest,
    responses(
        (status = 200, description = "创建成功的 Alert", body = AlertResponse),
        (status = 400, description = "请求无效或 Machine 不存在", body = crate::api::ApiError),
        (status = 500, description = "存储失败", body = crate::api::ApiError)
    )
)]
async fn create_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    body: Result<Json<CreateAlertRequest>, JsonRejection>,
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

    match state.store.create_alert(req).await {
        Ok(row) => success_response(StatusCode::OK, AlertResponse::from(row)),
        Err(e) => storage_error_response(&trace_id, &e, "Failed to create alert"),
    }
}

/// 按 scenario / sourceScope / sourceValue 子串过滤 Alert，条件之间为 AND。
/// 按 ID 升序返回全部匹配项，不分页。
#[utoipa::path(
    get,
    path = "/v1/alerts",
    tag = "Alerts",
    params(FindAlertsParams),
    responses(
        (status = 200, description = "匹配的 Alert 列表", body = Vec<AlertDetailResponse>),
        (status = 500, description = "查询失败", body = crate::api::ApiError)
    )
)]
async fn find_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<FindAlertsParams>,
) -> impl IntoResponse {
    let filter = AlertFilter {
        scenario: params.scenario,
        source_scope: params.source_scope,
        source_value: params.source_value,
    };

    match state.store.find_alerts(&filter).await {
        Ok(views) => {
            let items: Vec<AlertDetailResponse> = views.into_iter().map(Into::into).collect();
            success_response(StatusCode::OK, items)
        }
        Err(e) => storage_error_response(&trace_id, &e, "Failed to find alerts"),
    }
}

/// 获取单条 Alert 详情。
#[utoipa::path(
    get,
    path = "/v1/alerts/{id}",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert ID（十进制）")),
    responses(
        (status = 200, description = "Alert 详情", body = AlertDetailResponse),
        (status = 400, description = "ID 格式错误", body = crate::api::ApiError),
        (status = 404, description = "Alert 不存在", body = crate::api::ApiError)
    )
)]
async fn get_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> impl IntoResponse {
    let Path(id) = match id {
        Ok(p) => p,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "bad_request",
                &rejection.body_text(),
            );
        }
    };

    match state.store.get_alert(id).await {
        Ok(Some(view)) => success_response(StatusCode::OK, AlertDetailResponse::from(view)),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            "alert not found",
        ),
        Err(e) => storage_error_response(&trace_id, &e, "Failed to get alert"),
    }
}

/// 删除 Alert 及其全部子记录。
#[utoipa::path(
    delete,
    path = "/v1/alerts/{id}",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert ID（十进制）")),
    responses(
        (status = 200, description = "删除成功", body = DeletedAlert),
        (status = 400, description = "ID 格式错误", body = crate::api::ApiError),
        (status = 404, description = "Alert 不存在", body = crate::api::ApiError)
    )
)]
async fn delete_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> impl IntoResponse {
    let Path(id) = match id {
        Ok(p) => p,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "bad_request",
                &rejection.body_text(),
            );
        }
    };

    match state.store.delete_alert(id).await {
        Ok(true) => success_response(
            StatusCode::OK,
            DeletedAlert { id: id.to_string() },
        ),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            "alert not found",
        ),
        Err(e) => storage_error_response(&trace_id, &e, "Failed to delete alert"),
    }
}

pub fn alert_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(create_alert, find_alerts))
        .routes(routes!(get_alert, delete_alert))
}
