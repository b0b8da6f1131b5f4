use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // machines 先建，alerts 引用 machines，子表引用 alerts
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

const UP_SQL: &str = "
CREATE TABLE IF NOT EXISTS machines (
    id INTEGER PRIMARY KEY NOT NULL,
    machine_id TEXT NOT NULL UNIQUE,
    ip_address TEXT,
    version TEXT,
    is_validated INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY NOT NULL,
    scenario TEXT NOT NULL,
    bucket_id TEXT NOT NULL,
    message TEXT NOT NULL,
    events_count INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    stopped_at TEXT NOT NULL,
    source_scope TEXT NOT NULL,
    source_value TEXT NOT NULL,
    source_ip TEXT NOT NULL DEFAULT '',
    source_range TEXT NOT NULL DEFAULT '',
    source_as_number TEXT NOT NULL DEFAULT '',
    source_as_name TEXT NOT NULL DEFAULT '',
    source_country TEXT NOT NULL DEFAULT '',
    source_latitude REAL NOT NULL DEFAULT 0,
    source_longitude REAL NOT NULL DEFAULT 0,
    capacity INTEGER NOT NULL,
    leak_speed INTEGER NOT NULL,
    reprocess INTEGER NOT NULL DEFAULT 0,
    machine_id INTEGER NOT NULL REFERENCES machines(id) ON DELETE RESTRICT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_scenario ON alerts(scenario);
CREATE INDEX IF NOT EXISTS idx_alerts_source ON alerts(source_scope, source_value);
CREATE INDEX IF NOT EXISTS idx_alerts_machine_id ON alerts(machine_id);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY NOT NULL,
    alert_id INTEGER NOT NULL REFERENCES alerts(id) ON DELETE CASCADE,
    time TEXT NOT NULL,
    serialized TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_alert_id ON events(alert_id);

CREATE TABLE IF NOT EXISTS metas (
    id INTEGER PRIMARY KEY NOT NULL,
    alert_id INTEGER NOT NULL REFERENCES alerts(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_metas_alert_id ON metas(alert_id);

CREATE TABLE IF NOT EXISTS decisions (
    id INTEGER PRIMARY KEY NOT NULL,
    alert_id INTEGER NOT NULL REFERENCES alerts(id) ON DELETE CASCADE,
    until TEXT NOT NULL,
    scenario TEXT NOT NULL,
    decision_type TEXT NOT NULL,
    source_ip_start INTEGER NOT NULL,
    source_ip_end INTEGER NOT NULL,
    source_value TEXT NOT NULL,
    source_scope TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_decisions_alert_id ON decisions(alert_id);
CREATE INDEX IF NOT EXISTS idx_decisions_ip_range ON decisions(source_ip_start, source_ip_end);
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS decisions;
DROP TABLE IF EXISTS metas;
DROP TABLE IF EXISTS events;
DROP TABLE IF EXISTS alerts;
DROP TABLE IF EXISTS machines;
";
