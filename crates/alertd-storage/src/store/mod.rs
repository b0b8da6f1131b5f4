use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use std::path::Path;

pub mod alert;
pub mod machine;

// ---- 公开 Row 类型（从各子模块重新导出）----
pub use alert::{AlertFilter, AlertRow, AlertWithChildren, DecisionRow, EventRow, MetaRow};
pub use machine::{MachineRow, NewMachine};

/// Alert 数据库的统一访问层。
///
/// 所有方法均为 `async fn`，底层使用 SeaORM。`DatabaseConnection` 内部是连接池，
/// 可以被多个并发请求共享。
pub struct AlertStore {
    pub(crate) db: DatabaseConnection,
}

impl AlertStore {
    /// 连接并初始化数据库。
    ///
    /// - `db_url`：完整的数据库连接 URL，由调用方（服务器配置）提供。
    ///   SQLite 示例：`sqlite:///data/alertd.db?mode=rwc`
    /// - `data_dir`：本地数据目录，SQLite 文件所在目录。
    ///
    /// 自动运行 `sea-orm-migration` 迁移，确保 Schema 最新。
    pub async fn new(db_url: &str, data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db = Database::connect(db_url).await?;

        // WAL 模式仅对 SQLite 有效
        if db_url.starts_with("sqlite:") {
            db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        }

        Migrator::up(&db, None).await?;

        tracing::info!(db_url = %db_url, "Initialized alert store (SeaORM)");

        Ok(Self { db })
    }

    /// 根据数据目录拼出默认 SQLite 连接 URL。
    pub fn sqlite_url(data_dir: &Path) -> String {
        format!(
            "sqlite://{}?mode=rwc",
            data_dir.join("alertd.db").to_string_lossy()
        )
    }

    /// 返回底层数据库连接引用（供子模块使用）。
    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}
