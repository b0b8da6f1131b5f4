use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// CORS 允许的 origins 列表，为空时允许所有来源（开发模式）
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,

    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub id: IdConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 完整连接 URL；为空时使用 `data_dir` 下的 SQLite 文件
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            data_dir: default_data_dir(),
        }
    }
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> String {
        if self.url.is_empty() {
            alertd_storage::AlertStore::sqlite_url(Path::new(&self.data_dir))
        } else {
            self.url.clone()
        }
    }
}

/// Snowflake 生成器参数，多实例部署时每个实例需不同
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdConfig {
    #[serde(default = "default_id_part")]
    pub machine_id: i32,
    #[serde(default = "default_id_part")]
    pub node_id: i32,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            machine_id: default_id_part(),
            node_id: default_id_part(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            bind_addr: default_bind_addr(),
            cors_allowed_origins: Vec::new(),
            database: DatabaseConfig::default(),
            id: IdConfig::default(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_id_part() -> i32 {
    1
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config '{path}': {e}"))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config '{path}': {e}"))?;
        Ok(config)
    }
}
