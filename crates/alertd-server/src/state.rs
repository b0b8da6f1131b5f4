use crate::config::ServerConfig;
use alertd_storage::AlertStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// 请求间共享的状态。`AlertStore` 内部是连接池，可并发使用，无需额外加锁。
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AlertStore>,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}
