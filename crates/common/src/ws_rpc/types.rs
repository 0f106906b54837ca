/// WebSocket RPC 数据类型定义
///
/// 内置过程名、连接状态以及参数容器

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::RpcError;

// ============================================================================
// 内置过程
// ============================================================================

/// 由对端设置客户端名称（客户端侧），或提议修改名称（服务端侧）
pub const SET_CLIENT_NAME: &str = "setClientName";

/// 对端确认握手完成，只触发一次
pub const CLIENT_IS_READY_NOW: &str = "clientIsReadyNow";

/// 远程日志转发
pub const REMOTE_LOG: &str = "unijLog";

/// 对端分配名称之前的占位名称
pub const NO_NAME_YET: &str = "no-name-yet";

/// 传输层没有给出原因时使用的关闭原因
pub const DEFAULT_CLOSE_REASON: &str = "unexpected closing";

/// 关闭原因为空时替换为默认值
pub fn close_reason_or_default(reason: Option<&str>) -> String {
    match reason {
        Some(reason) if !reason.is_empty() => reason.to_string(),
        _ => DEFAULT_CLOSE_REASON.to_string(),
    }
}

/// 关闭帧原因的最大字节数（控制帧负载 125 字节减去 2 字节状态码）
pub const MAX_CLOSE_REASON_BYTES: usize = 123;

/// 把关闭原因截断到关闭帧允许的长度，不会切断 UTF-8 字符
pub fn truncate_close_reason(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON_BYTES {
        let mut end = MAX_CLOSE_REASON_BYTES;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

// ============================================================================
// 连接状态
// ============================================================================

/// 通道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// 传输已创建，尚未确认打开
    Connecting,
    /// 传输已打开，内置过程已安装，等待对端确认就绪
    Open,
    /// 对端已调用 clientIsReadyNow
    Ready,
    /// 传输已关闭（终态）
    Closed,
}

impl ChannelState {
    /// 是否允许发送协议内部消息
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open | Self::Ready)
    }
}

/// 交给传输层的出站帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// 文本帧（已序列化的 RpcMessage）
    Text(String),
    /// 主动关闭连接，附带原因
    Close(String),
}

// ============================================================================
// 参数
// ============================================================================

/// 远程调用的有序参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(Vec<Value>);

impl Arguments {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }

    /// 按位置取出参数并反序列化
    ///
    /// 缺失的参数按 `null` 处理，因此 `Option<T>` 可以表示可选参数。
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, RpcError> {
        let value = self.0.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            RpcError::invalid_params(format!("第 {} 个参数无效: {}", index, e))
        })
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}
