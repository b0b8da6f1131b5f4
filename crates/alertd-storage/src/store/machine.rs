use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, SqlErr,
};
use serde::{Deserialize, Serialize};

use crate::entities::machine::{self, Column, Entity};
use crate::error::{MachineLookupError, Result, StorageError};
use crate::store::AlertStore;

/// Machine 数据行（来自 machines 表）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineRow {
    pub id: i64,
    pub machine_id: String,
    pub ip_address: Option<String>,
    pub version: Option<String>,
    pub is_validated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 注册 Machine 的参数
#[derive(Debug, Clone, Default)]
pub struct NewMachine {
    pub machine_id: String,
    pub ip_address: Option<String>,
    pub version: Option<String>,
    pub is_validated: bool,
}

fn to_row(m: machine::Model) -> MachineRow {
    MachineRow {
        id: m.id,
        machine_id: m.machine_id,
        ip_address: m.ip_address,
        version: m.version,
        is_validated: m.is_validated,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl AlertStore {
    /// 按数字 ID 解析提交 Alert 的 Machine。
    ///
    /// 找不到与查询失败分开返回，调用方据此区分客户端错误和服务端错误。
    pub async fn resolve_machine(
        &self,
        machine_id: i64,
    ) -> std::result::Result<MachineRow, MachineLookupError> {
        Entity::find_by_id(machine_id)
            .one(self.db())
            .await
            .map_err(MachineLookupError::Unavailable)?
            .map(to_row)
            .ok_or(MachineLookupError::NotFound { machine_id })
    }

    pub async fn get_machine_by_name(&self, machine_id: &str) -> Result<Option<MachineRow>> {
        let model = Entity::find()
            .filter(Column::MachineId.eq(machine_id))
            .one(self.db())
            .await
            .map_err(StorageError::Query)?;
        Ok(model.map(to_row))
    }

    pub async fn register_machine(&self, new: &NewMachine) -> Result<MachineRow> {
        if self.get_machine_by_name(&new.machine_id).await?.is_some() {
            return Err(StorageError::Conflict {
                entity: "machine",
                key: new.machine_id.clone(),
            });
        }

        let now = Utc::now().fixed_offset();
        let am = machine::ActiveModel {
            id: Set(alertd_common::id::next_id()),
            machine_id: Set(new.machine_id.clone()),
            ip_address: Set(new.ip_address.clone()),
            version: Set(new.version.clone()),
            is_validated: Set(new.is_validated),
            created_at: Set(now),
            updated_at: Set(now),
        };
        // 并发注册同名 machine 时，后到者在这里撞上 UNIQUE 约束
        let model = am.insert(self.db()).await.map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => StorageError::Conflict {
                entity: "machine",
                key: new.machine_id.clone(),
            },
            _ => StorageError::Persistence {
                entity: "machine",
                source: e,
            },
        })?;
        tracing::info!(id = model.id, machine_id = %model.machine_id, "Machine registered");
        Ok(to_row(model))
    }
}
