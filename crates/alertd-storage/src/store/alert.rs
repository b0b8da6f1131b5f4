use alertd_common::id::next_id;
use alertd_common::types::{CreateAlertRequest, NewAlert, NewDecision, NewEvent, NewMeta};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Alias, Expr, Func, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entities::alert::{self, Column as AlertCol, Entity as AlertEntity};
use crate::entities::decision::{self, Column as DecisionCol, Entity as DecisionEntity};
use crate::entities::event::{self, Column as EventCol, Entity as EventEntity};
use crate::entities::meta::{self, Column as MetaCol, Entity as MetaEntity};
use crate::error::{Result, StorageError};
use crate::store::AlertStore;

/// Alert 数据行（来自 alerts 表，不含子集合）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRow {
    pub id: i64,
    pub scenario: String,
    pub bucket_id: String,
    pub message: String,
    pub events_count: i32,
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
    pub machine_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRow {
    pub id: i64,
    pub alert_id: i64,
    pub time: DateTime<Utc>,
    pub serialized: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRow {
    pub id: i64,
    pub alert_id: i64,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRow {
    pub id: i64,
    pub alert_id: i64,
    pub until: DateTime<Utc>,
    pub scenario: String,
    pub decision_type: String,
    pub source_ip_start: i64,
    pub source_ip_end: i64,
    pub source_value: String,
    pub source_scope: String,
}

/// 已加载全部子集合的 Alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertWithChildren {
    pub alert: AlertRow,
    pub events: Vec<EventRow>,
    pub metas: Vec<MetaRow>,
    pub decisions: Vec<DecisionRow>,
}

/// Alert 查询过滤器。
///
/// 三个字段都是区分大小写的子串匹配（contains），彼此为 AND 关系；空串匹配所有记录。
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub scenario: String,
    pub source_scope: String,
    pub source_value: String,
}

fn to_alert_row(m: alert::Model) -> AlertRow {
    AlertRow {
        id: m.id,
        scenario: m.scenario,
        bucket_id: m.bucket_id,
        message: m.message,
        events_count: m.events_count,
        started_at: m.started_at.with_timezone(&Utc),
        stopped_at: m.stopped_at.with_timezone(&Utc),
        source_scope: m.source_scope,
        source_value: m.source_value,
        source_ip: m.source_ip,
        source_range: m.source_range,
        source_as_number: m.source_as_number,
        source_as_name: m.source_as_name,
        source_country: m.source_country,
        source_latitude: m.source_latitude,
        source_longitude: m.source_longitude,
        capacity: m.capacity,
        leak_speed: m.leak_speed,
        reprocess: m.reprocess,
        machine_id: m.machine_id,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

fn to_event_row(m: event::Model) -> EventRow {
    EventRow {
        id: m.id,
        alert_id: m.alert_id,
        time: m.time.with_timezone(&Utc),
        serialized: m.serialized,
    }
}

fn to_meta_row(m: meta::Model) -> MetaRow {
    MetaRow {
        id: m.id,
        alert_id: m.alert_id,
        key: m.key,
        value: m.value,
    }
}

fn to_decision_row(m: decision::Model) -> DecisionRow {
    DecisionRow {
        id: m.id,
        alert_id: m.alert_id,
        until: m.until.with_timezone(&Utc),
        scenario: m.scenario,
        decision_type: m.decision_type,
        source_ip_start: m.source_ip_start,
        source_ip_end: m.source_ip_end,
        source_value: m.source_value,
        source_scope: m.source_scope,
    }
}

/// 区分大小写的子串匹配：`instr(col, needle) > 0`。
///
/// 空串总是命中，因此空过滤条件不排除任何记录；`%`、`_` 按字面匹配。
fn contains_filter(col: AlertCol, needle: &str) -> SimpleExpr {
    Expr::expr(
        Func::cust(Alias::new("instr"))
            .arg(Expr::col((AlertEntity, col)))
            .arg(needle),
    )
    .gt(0)
}

/// 子集合按父 ID 分批加载的批大小
const CHILD_LOAD_CHUNK: usize = 10_000;

async fn insert_alert(
    txn: &DatabaseTransaction,
    new: &NewAlert,
    owner_id: i64,
) -> Result<alert::Model> {
    let now = Utc::now().fixed_offset();
    let am = alert::ActiveModel {
        id: Set(next_id()),
        scenario: Set(new.scenario.clone()),
        bucket_id: Set(new.bucket_id.clone()),
        message: Set(new.message.clone()),
        events_count: Set(new.event_count),
        started_at: Set(new.started_at.fixed_offset()),
        stopped_at: Set(new.stopped_at.fixed_offset()),
        source_scope: Set(new.source.scope.clone()),
        source_value: Set(new.source.value.clone()),
        source_ip: Set(new.source.ip.clone()),
        source_range: Set(new.source.range.clone()),
        source_as_number: Set(new.source.as_number.clone()),
        source_as_name: Set(new.source.as_name.clone()),
        source_country: Set(new.source.country.clone()),
        source_latitude: Set(new.source.latitude),
        source_longitude: Set(new.source.longitude),
        capacity: Set(new.capacity),
        leak_speed: Set(new.leak_speed),
        reprocess: Set(new.reprocess),
        machine_id: Set(owner_id),
        created_at: Set(now),
        updated_at: Set(now),
    };
    am.insert(txn)
        .await
        .map_err(StorageError::persistence("alert"))
}

async fn insert_event(txn: &DatabaseTransaction, alert_id: i64, ev: &NewEvent) -> Result<()> {
    let am = event::ActiveModel {
        id: Set(next_id()),
        alert_id: Set(alert_id),
        time: Set(ev.time.fixed_offset()),
        serialized: Set(ev.serialized.clone()),
        created_at: Set(Utc::now().fixed_offset()),
    };
    am.insert(txn)
        .await
        .map_err(StorageError::persistence("event"))?;
    Ok(())
}

async fn insert_meta(txn: &DatabaseTransaction, alert_id: i64, m: &NewMeta) -> Result<()> {
    let am = meta::ActiveModel {
        id: Set(next_id()),
        alert_id: Set(alert_id),
        key: Set(m.key.clone()),
        value: Set(m.value.clone()),
        created_at: Set(Utc::now().fixed_offset()),
    };
    am.insert(txn)
        .await
        .map_err(StorageError::persistence("meta"))?;
    Ok(())
}

async fn insert_decision(
    txn: &DatabaseTransaction,
    alert_id: i64,
    d: &NewDecision,
) -> Result<()> {
    let am = decision::ActiveModel {
        id: Set(next_id()),
        alert_id: Set(alert_id),
        until: Set(d.until.fixed_offset()),
        scenario: Set(d.scenario.clone()),
        decision_type: Set(d.decision_type.clone()),
        source_ip_start: Set(d.source_ip_start),
        source_ip_end: Set(d.source_ip_end),
        source_value: Set(d.source_value.clone()),
        source_scope: Set(d.source_scope.clone()),
        created_at: Set(Utc::now().fixed_offset()),
    };
    am.insert(txn)
        .await
        .map_err(StorageError::persistence("decision"))?;
    Ok(())
}

/// 在同一事务内写入 Alert 及其全部子行。子行依赖 Alert 的 ID，因此顺序执行。
async fn write_alert_rows(
    txn: &DatabaseTransaction,
    new: &NewAlert,
    owner_id: i64,
) -> Result<alert::Model> {
    let alert = insert_alert(txn, new, owner_id).await?;
    for ev in &new.events {
        insert_event(txn, alert.id, ev).await?;
    }
    for m in &new.metas {
        insert_meta(txn, alert.id, m).await?;
    }
    for d in &new.decisions {
        insert_decision(txn, alert.id, d).await?;
    }
    Ok(alert)
}

impl AlertStore {
    /// 校验并写入一条 Alert 及其 events / metas / decisions。
    ///
    /// 写入全部发生在一个事务中：任一行失败则整体回滚，不会留下没有子行的 Alert
    /// 或没有父 Alert 的子行。如果 future 在提交前被丢弃，未提交的事务同样回滚。
    pub async fn create_alert(&self, req: CreateAlertRequest) -> Result<AlertRow> {
        let new = req.validate()?;
        let owner = self.resolve_machine(new.machine_id).await?;

        let txn = self
            .db()
            .begin()
            .await
            .map_err(StorageError::persistence("alert"))?;

        let alert = match write_alert_rows(&txn, &new, owner.id).await {
            Ok(alert) => alert,
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    tracing::error!(error = %rollback_err, "Failed to roll back alert transaction");
                }
                return Err(e);
            }
        };

        txn.commit()
            .await
            .map_err(StorageError::persistence("alert"))?;

        tracing::info!(
            alert_id = alert.id,
            machine_id = owner.id,
            scenario = %alert.scenario,
            events = new.events.len(),
            metas = new.metas.len(),
            decisions = new.decisions.len(),
            "Alert created"
        );
        Ok(to_alert_row(alert))
    }

    /// 按过滤条件查询 Alert，并加载三个子集合。
    ///
    /// 结果按 ID 升序（即插入顺序）返回；子集合同样按 ID 升序。
    /// 主查询与子集合查询在同一个只读事务内执行，读到同一快照。
    pub async fn find_alerts(&self, filter: &AlertFilter) -> Result<Vec<AlertWithChildren>> {
        let txn = self.db().begin().await.map_err(StorageError::Query)?;
        let alerts = AlertEntity::find()
            .filter(contains_filter(AlertCol::Scenario, &filter.scenario))
            .filter(contains_filter(AlertCol::SourceScope, &filter.source_scope))
            .filter(contains_filter(AlertCol::SourceValue, &filter.source_value))
            .order_by_asc(AlertCol::Id)
            .all(&txn)
            .await
            .map_err(StorageError::Query)?;
        let views = hydrate(&txn, alerts).await?;
        txn.commit().await.map_err(StorageError::Query)?;
        Ok(views)
    }

    pub async fn get_alert(&self, id: i64) -> Result<Option<AlertWithChildren>> {
        let txn = self.db().begin().await.map_err(StorageError::Query)?;
        let model = AlertEntity::find_by_id(id)
            .one(&txn)
            .await
            .map_err(StorageError::Query)?;
        let view = match model {
            Some(m) => hydrate(&txn, vec![m]).await?.pop(),
            None => None,
        };
        txn.commit().await.map_err(StorageError::Query)?;
        Ok(view)
    }

    /// 删除 Alert 及其全部子行。返回 Alert 是否存在。
    pub async fn delete_alert(&self, id: i64) -> Result<bool> {
        let txn = self
            .db()
            .begin()
            .await
            .map_err(StorageError::persistence("alert"))?;

        let exists = AlertEntity::find_by_id(id)
            .one(&txn)
            .await
            .map_err(StorageError::Query)?
            .is_some();
        if !exists {
            return Ok(false);
        }

        EventEntity::delete_many()
            .filter(EventCol::AlertId.eq(id))
            .exec(&txn)
            .await
            .map_err(StorageError::persistence("event"))?;
        MetaEntity::delete_many()
            .filter(MetaCol::AlertId.eq(id))
            .exec(&txn)
            .await
            .map_err(StorageError::persistence("meta"))?;
        DecisionEntity::delete_many()
            .filter(DecisionCol::AlertId.eq(id))
            .exec(&txn)
            .await
            .map_err(StorageError::persistence("decision"))?;
        AlertEntity::delete_by_id(id)
            .exec(&txn)
            .await
            .map_err(StorageError::persistence("alert"))?;

        txn.commit()
            .await
            .map_err(StorageError::persistence("alert"))?;
        tracing::info!(alert_id = id, "Alert deleted");
        Ok(true)
    }
}

/// 按父 ID 分批加载子集合。每批 ID 作为绑定参数进入 `IN (...)`，
/// 批大小须低于 SQLite 的参数上限（32766）。
async fn hydrate<C>(conn: &C, alerts: Vec<alert::Model>) -> Result<Vec<AlertWithChildren>>
where
    C: ConnectionTrait,
{
    let ids: Vec<i64> = alerts.iter().map(|a| a.id).collect();
    let mut events: HashMap<i64, Vec<EventRow>> = HashMap::new();
    let mut metas: HashMap<i64, Vec<MetaRow>> = HashMap::new();
    let mut decisions: HashMap<i64, Vec<DecisionRow>> = HashMap::new();

    for chunk in ids.chunks(CHILD_LOAD_CHUNK) {
        let batch = EventEntity::find()
            .filter(EventCol::AlertId.is_in(chunk.iter().copied()))
            .order_by_asc(EventCol::Id)
            .all(conn)
            .await
            .map_err(StorageError::Query)?;
        for m in batch {
            events.entry(m.alert_id).or_default().push(to_event_row(m));
        }

        let batch = MetaEntity::find()
            .filter(MetaCol::AlertId.is_in(chunk.iter().copied()))
            .order_by_asc(MetaCol::Id)
            .all(conn)
            .await
            .map_err(StorageError::Query)?;
        for m in batch {
            metas.entry(m.alert_id).or_default().push(to_meta_row(m));
        }

        let batch = DecisionEntity::find()
            .filter(DecisionCol::AlertId.is_in(chunk.iter().copied()))
            .order_by_asc(DecisionCol::Id)
            .all(conn)
            .await
            .map_err(StorageError::Query)?;
        for m in batch {
            decisions.entry(m.alert_id).or_default().push(to_decision_row(m));
        }
    }

    // 每个 alert 只落在一个批次里，批内已按 ID 排序
    Ok(alerts
        .into_iter()
        .map(|a| AlertWithChildren {
            events: events.remove(&a.id).unwrap_or_default(),
            metas: metas.remove(&a.id).unwrap_or_default(),
            decisions: decisions.remove(&a.id).unwrap_or_default(),
            alert: to_alert_row(a),
        })
        .collect())
}
