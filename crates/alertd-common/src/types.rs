//! Request contract for alert submission.
//!
//! Incoming JSON is first decoded into [`CreateAlertRequest`], where every
//! field is optional, and then checked by [`CreateAlertRequest::validate`],
//! which produces a fully-typed [`NewAlert`] or a [`ValidationError`]
//! listing every offending field path.

use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

/// Alert 提交请求（未校验）
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlertRequest {
    /// 提交方 Machine 的 ID。接受十进制字符串或 JSON 数字；
    /// ID 超出 2^53，JavaScript 客户端应使用字符串形式。
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    #[schema(value_type = Option<String>, example = "7251861629612359680")]
    pub machine_id: Option<i64>,
    /// 触发的场景标识
    pub scenario: Option<String>,
    /// 漏桶标识
    pub bucket_id: Option<String>,
    pub message: Option<String>,
    pub event_count: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// 漏桶容量
    pub capacity: Option<i32>,
    /// 漏桶泄漏速度
    pub leak_speed: Option<i32>,
    #[serde(default)]
    pub reprocess: bool,
    pub source: Option<SourceInput>,
    pub events: Option<Vec<EventInput>>,
    pub metas: Option<Vec<MetaInput>>,
    pub decisions: Option<Vec<DecisionInput>>,
}

/// 来源信息。`scope` 与 `value` 必填，其余字段缺省为空串或 0。
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SourceInput {
    pub scope: Option<String>,
    pub value: Option<String>,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub range: String,
    #[serde(default)]
    pub as_number: String,
    #[serde(default)]
    pub as_name: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub latitude: f32,
    #[serde(default)]
    pub longitude: f32,
}

/// 原始事件，`serialized` 由上游定义格式，此处不解析
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct EventInput {
    pub time: Option<DateTime<Utc>>,
    pub serialized: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct MetaInput {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// 处置决定，字段独立于所属 Alert 的 scenario / source
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DecisionInput {
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub decision_type: String,
    #[serde(default)]
    pub source_ip_start: i64,
    #[serde(default)]
    pub source_ip_end: i64,
    #[serde(default)]
    pub source_value: String,
    #[serde(default)]
    pub source_scope: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdInput {
    Number(i64),
    Text(String),
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<IdInput>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IdInput::Number(n)) => Ok(Some(n)),
        Some(IdInput::Text(text)) => text
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(DeError::custom),
    }
}

/// Validation failure: the request shape was violated.
///
/// # Examples
///
/// ```
/// use alertd_common::types::CreateAlertRequest;
///
/// let err = CreateAlertRequest::default().validate().unwrap_err();
/// assert!(err.fields.contains(&"scenario".to_string()));
/// assert!(err.to_string().contains("events"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid request, missing or invalid field(s): {}", .fields.join(", "))]
pub struct ValidationError {
    pub fields: Vec<String>,
}

/// 校验通过的 Alert
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub machine_id: i64,
    pub scenario: String,
    pub bucket_id: String,
    pub message: String,
    pub event_count: i32,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub capacity: i32,
    pub leak_speed: i32,
    pub reprocess: bool,
    pub source: Source,
    pub events: Vec<NewEvent>,
    pub metas: Vec<NewMeta>,
    pub decisions: Vec<NewDecision>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub scope: String,
    pub value: String,
    pub ip: String,
    pub range: String,
    pub as_number: String,
    pub as_name: String,
    pub country: String,
    pub latitude: f32,
    pub longitude: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub time: DateTime<Utc>,
    pub serialized: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMeta {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDecision {
    pub until: DateTime<Utc>,
    pub scenario: String,
    pub decision_type: String,
    pub source_ip_start: i64,
    pub source_ip_end: i64,
    pub source_value: String,
    pub source_scope: String,
}

fn require_text(value: Option<String>, field: &str, invalid: &mut Vec<String>) -> Option<String> {
    match value {
        Some(v) if !v.is_empty() => Some(v),
        _ => {
            invalid.push(field.to_string());
            None
        }
    }
}

fn require_non_zero<T>(value: Option<T>, field: &str, invalid: &mut Vec<String>) -> Option<T>
where
    T: Default + PartialEq,
{
    match value {
        Some(v) if v != T::default() => Some(v),
        _ => {
            invalid.push(field.to_string());
            None
        }
    }
}

fn require<T>(value: Option<T>, field: &str, invalid: &mut Vec<String>) -> Option<T> {
    if value.is_none() {
        invalid.push(field.to_string());
    }
    value
}

impl SourceInput {
    fn validate(self, invalid: &mut Vec<String>) -> Option<Source> {
        let scope = require_text(self.scope, "source.scope", invalid);
        let value = require_text(self.value, "source.value", invalid);
        let (Some(scope), Some(value)) = (scope, value) else {
            return None;
        };
        Some(Source {
            scope,
            value,
            ip: self.ip,
            range: self.range,
            as_number: self.as_number,
            as_name: self.as_name,
            country: self.country,
            latitude: self.latitude,
            longitude: self.longitude,
        })
    }
}

impl EventInput {
    fn validate(self, index: usize, invalid: &mut Vec<String>) -> Option<NewEvent> {
        let time = require(self.time, &format!("events[{index}].time"), invalid);
        let serialized = require_text(
            self.serialized,
            &format!("events[{index}].serialized"),
            invalid,
        );
        let (Some(time), Some(serialized)) = (time, serialized) else {
            return None;
        };
        Some(NewEvent { time, serialized })
    }
}

impl DecisionInput {
    fn validate(self, index: usize, invalid: &mut Vec<String>) -> Option<NewDecision> {
        let until = require(self.until, &format!("decisions[{index}].until"), invalid);
        if self.source_ip_start > self.source_ip_end {
            invalid.push(format!("decisions[{index}].sourceIpEnd"));
            return None;
        }
        Some(NewDecision {
            until: until?,
            scenario: self.scenario,
            decision_type: self.decision_type,
            source_ip_start: self.source_ip_start,
            source_ip_end: self.source_ip_end,
            source_value: self.source_value,
            source_scope: self.source_scope,
        })
    }
}

impl CreateAlertRequest {
    /// 校验请求并转换为 [`NewAlert`]，一次性收集全部不合法字段。
    pub fn validate(self) -> Result<NewAlert, ValidationError> {
        let mut invalid = Vec::new();

        let machine_id = require_non_zero(self.machine_id, "machineId", &mut invalid);
        let scenario = require_text(self.scenario, "scenario", &mut invalid);
        let bucket_id = require_text(self.bucket_id, "bucketId", &mut invalid);
        let message = require_text(self.message, "message", &mut invalid);
        let event_count = require_non_zero(self.event_count, "eventCount", &mut invalid);
        let started_at = require(self.started_at, "startedAt", &mut invalid);
        let stopped_at = require(self.stopped_at, "stoppedAt", &mut invalid);
        let capacity = require_non_zero(self.capacity, "capacity", &mut invalid);
        let leak_speed = require_non_zero(self.leak_speed, "leakSpeed", &mut invalid);

        let source = match self.source {
            Some(source) => source.validate(&mut invalid),
            None => {
                invalid.push("source".to_string());
                None
            }
        };

        let events = match self.events {
            Some(events) => events
                .into_iter()
                .enumerate()
                .filter_map(|(i, e)| e.validate(i, &mut invalid))
                .collect(),
            None => {
                invalid.push("events".to_string());
                Vec::new()
            }
        };

        let metas = self
            .metas
            .unwrap_or_default()
            .into_iter()
            .map(|m| NewMeta {
                key: m.key,
                value: m.value,
            })
            .collect();

        let decisions = self
            .decisions
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .filter_map(|(i, d)| d.validate(i, &mut invalid))
            .collect();

        if !invalid.is_empty() {
            return Err(ValidationError { fields: invalid });
        }

        let (
            Some(machine_id),
            Some(scenario),
            Some(bucket_id),
            Some(message),
            Some(event_count),
            Some(started_at),
            Some(stopped_at),
            Some(capacity),
            Some(leak_speed),
            Some(source),
        ) = (
            machine_id,
            scenario,
            bucket_id,
            message,
            event_count,
            started_at,
            stopped_at,
            capacity,
            leak_speed,
            source,
        )
        else {
            return Err(ValidationError { fields: invalid });
        };

        Ok(NewAlert {
            machine_id,
            scenario,
            bucket_id,
            message,
            event_count,
            started_at,
            stopped_at,
            capacity,
            leak_speed,
            reprocess: self.reprocess,
            source,
            events,
            metas,
            decisions,
        })
    }
}
