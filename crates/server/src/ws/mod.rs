/// WebSocket 模块
/// 
/// 管理客户端的 WebSocket 连接，并作为客户端名称与就绪握手的权威一端

pub mod client_hub;
pub mod handler;

pub use client_hub::{ClientConnection, ClientContext, ClientHub};
pub use handler::handle_client_websocket;
