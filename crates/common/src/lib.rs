/// UniJ - 公共库
/// 
/// 提供客户端与服务端共享的协议核心：消息编解码、过程注册表、通道状态机和错误处理

pub mod errors;
pub mod utils;
pub mod ws_rpc;

// 重新导出常用类型
pub use errors::{Error, Result};
pub use serde_json::Value;
pub use ws_rpc::{Arguments, Channel, ChannelState, ProcedureRegistry, RpcError, RpcErrorCode, RpcMessage};
