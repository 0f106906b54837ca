/// 应用全局状态

use crate::ws::ClientHub;

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    /// 客户端连接池
    pub client_hub: ClientHub,
}

impl AppState {
    pub fn new(client_hub: ClientHub) -> Self {
        Self { client_hub }
    }

    /// 获取客户端连接池
    pub fn client_hub(&self) -> ClientHub {
        self.client_hub.clone()
    }
}
