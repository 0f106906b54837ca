/// WebSocket RPC 错误定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// RPC 错误码
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RpcErrorCode {
    // 协议错误
    InvalidRequest,
    ProcedureNotFound,
    InvalidParams,
    SerializationError,

    // 连接状态错误
    NotConnected,
    NotReady,
    ConnectionClosed,

    // 客户端池错误
    ClientNotFound,
    ClientNameTaken,
    ClientLimitReached,
}

impl RpcErrorCode {
    /// 转换为字符串码
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::ProcedureNotFound => "PROCEDURE_NOT_FOUND",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::SerializationError => "SERIALIZATION_ERROR",

            Self::NotConnected => "NOT_CONNECTED",
            Self::NotReady => "NOT_READY",
            Self::ConnectionClosed => "CONNECTION_CLOSED",

            Self::ClientNotFound => "CLIENT_NOT_FOUND",
            Self::ClientNameTaken => "CLIENT_NAME_TAKEN",
            Self::ClientLimitReached => "CLIENT_LIMIT_REACHED",
        }
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// RPC 错误
#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: RpcErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl RpcError {
    /// 创建新的 RPC 错误
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// 创建带详情的 RPC 错误
    pub fn with_details(
        code: RpcErrorCode,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    /// 无效请求错误
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InvalidRequest, message)
    }

    /// 过程不存在错误
    pub fn procedure_not_found(procedure: impl Into<String>) -> Self {
        let procedure = procedure.into();
        Self::with_details(
            RpcErrorCode::ProcedureNotFound,
            format!("过程不存在: {}", procedure),
            serde_json::Value::String(procedure),
        )
    }

    /// 参数错误
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InvalidParams, message)
    }

    /// 序列化错误
    pub fn serialization_error(err: impl fmt::Display) -> Self {
        Self::new(
            RpcErrorCode::SerializationError,
            format!("序列化错误: {}", err),
        )
    }

    /// 连接尚未建立
    pub fn not_connected() -> Self {
        Self::new(RpcErrorCode::NotConnected, "连接尚未建立")
    }

    /// 连接已建立但对端尚未确认就绪
    pub fn not_ready() -> Self {
        Self::new(RpcErrorCode::NotReady, "对端尚未确认就绪")
    }

    /// 连接关闭错误
    pub fn connection_closed() -> Self {
        Self::new(RpcErrorCode::ConnectionClosed, "连接已关闭")
    }

    /// 客户端不存在
    pub fn client_not_found(name: impl Into<String>) -> Self {
        Self::new(
            RpcErrorCode::ClientNotFound,
            format!("客户端不存在: {}", name.into()),
        )
    }

    /// 客户端名称已被占用
    pub fn client_name_taken(name: impl Into<String>) -> Self {
        Self::new(
            RpcErrorCode::ClientNameTaken,
            format!("客户端名称已被占用: {}", name.into()),
        )
    }

    /// 客户端数量已达上限
    pub fn client_limit_reached(limit: usize) -> Self {
        Self::new(
            RpcErrorCode::ClientLimitReached,
            format!("客户端数量已达上限: {}", limit),
        )
    }

    /// 是否是"过程不存在"信号
    pub fn is_procedure_not_found(&self) -> bool {
        self.code == RpcErrorCode::ProcedureNotFound
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_error(err)
    }
}

impl From<RpcError> for crate::Error {
    fn from(err: RpcError) -> Self {
        crate::Error::Rpc(err.to_string())
    }
}
