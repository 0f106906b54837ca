/// WebSocket RPC 模块
/// 
/// 提供基于 WebSocket 的对称双向过程调用：任意一端都可以按名称调用另一端注册的过程

pub mod message;
pub mod error;
pub mod types;
pub mod registry;
pub mod channel;
pub mod client;

pub use message::RpcMessage;
pub use error::{RpcError, RpcErrorCode};
pub use registry::{Procedure, ProcedureHandler, ProcedureRegistry};
pub use channel::{Channel, ReadyCallback};
pub use types::*;
