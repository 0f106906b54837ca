/// 配置管理

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub ws_path: String,
    pub static_file_dir: Option<String>,
    pub max_clients: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> anyhow::Result<Self> {
        let server_host = std::env::var("SERVER_HOST")
            .unwrap_or_else(|_| "0.0.0.0".to_string());

        let server_port = std::env::var("SERVER_PORT")
            .unwrap_or_else(|_| "7777".to_string())
            .parse()?;

        let mut ws_path = std::env::var("UNIJ_WS_PATH")
            .unwrap_or_else(|_| "/unij".to_string());
        if !ws_path.starts_with('/') {
            ws_path.insert(0, '/');
        }

        // 未设置时不提供静态文件服务
        let static_file_dir = std::env::var("STATIC_FILE_DIR")
            .ok()
            .filter(|dir| !dir.is_empty());

        let max_clients = match std::env::var("MAX_CLIENTS") {
            Ok(value) if !value.is_empty() => Some(value.parse()?),
            _ => None,
        };

        let log_level = std::env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "debug".to_string());

        Ok(Self {
            server_host,
            server_port,
            ws_path,
            static_file_dir,
            max_clients,
            log_level,
        })
    }
}
