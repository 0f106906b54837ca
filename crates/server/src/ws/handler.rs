/// WebSocket 连接处理器
///
/// 处理客户端的 WebSocket 连接：握手、逐帧分发和断开清理

use super::ClientHub;
use axum::extract::ws::{close_code, CloseFrame, Message as AxumWsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use unij_common::ws_rpc::{truncate_close_reason, Outbound};

/// WebSocket 升级处理器
pub async fn handle_client_websocket(
    ws: WebSocketUpgrade,
    State(state): State<crate::app_state::AppState>,
) -> impl IntoResponse {
    let hub = state.client_hub();
    ws.on_upgrade(move |socket| handle_client_connection(socket, hub))
}

/// 处理客户端 WebSocket 连接
async fn handle_client_connection(socket: WebSocket, hub: ClientHub) {
    info!("新的客户端 WebSocket 连接");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // 创建消息发送通道
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    // 注册到连接池（会先把握手消息放进发送通道）
    let connection = match hub.accept(tx) {
        Ok(connection) => connection,
        Err(e) => {
            warn!("拒绝客户端连接: {}", e);
            let _ = ws_sender.send(encode(Outbound::Close(e.message))).await;
            return;
        }
    };

    // 创建消息发送任务
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let is_close = matches!(frame, Outbound::Close(_));
            if let Err(e) = ws_sender.send(encode(frame)).await {
                error!("发送消息失败: {}", e);
                break;
            }
            if is_close {
                break;
            }
        }
        debug!("消息发送任务结束");
    });

    // 接收循环：同一连接的消息按顺序同步处理
    let mut close_reason: Option<String> = None;
    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(msg)) => match decode(msg) {
                        Inbound::Text(text) => hub.handle_frame(&connection, &text),
                        Inbound::Close(reason) => {
                            close_reason = reason;
                            break;
                        }
                        Inbound::Invalid(e) => warn!("解码消息失败: {}", e),
                        Inbound::Ignored => {}
                    },
                    Some(Err(e)) => {
                        error!("接收消息错误: {}", e);
                        close_reason = Some(e.to_string());
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut send_task => {
                debug!("发送任务已结束");
                break;
            }
        }
    }

    send_task.abort();

    // 清理：从连接池中注销
    hub.disconnect(&connection, close_reason.as_deref());
}

/// 解码后的入站帧
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    Text(String),
    Close(Option<String>),
    Invalid(String),
    Ignored,
}

fn encode(frame: Outbound) -> AxumWsMessage {
    match frame {
        Outbound::Text(text) => AxumWsMessage::Text(text),
        Outbound::Close(reason) => AxumWsMessage::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: truncate_close_reason(reason).into(),
        })),
    }
}

fn decode(msg: AxumWsMessage) -> Inbound {
    match msg {
        AxumWsMessage::Text(text) => Inbound::Text(text),
        AxumWsMessage::Binary(data) => match String::from_utf8(data) {
            Ok(text) => Inbound::Text(text),
            Err(e) => Inbound::Invalid(e.to_string()),
        },
        AxumWsMessage::Close(frame) => Inbound::Close(frame.map(|f| f.reason.into_owned())),
        _ => Inbound::Ignored,
    }
}
