/// 配置管理

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server_ws_url: String,
    pub client_name: String,
    pub log_level: String,
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> anyhow::Result<Self> {
        let server_ws_url = std::env::var("SERVER_WS_URL")
            .unwrap_or_else(|_| "ws://localhost:7777/unij".to_string());

        // 希望使用的名称，连接后向服务端提议
        let client_name = std::env::var("CLIENT_NAME")
            .unwrap_or_else(|_| hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()));

        let log_level = std::env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "debug".to_string());

        Ok(Self {
            server_ws_url,
            client_name,
            log_level,
        })
    }
}
