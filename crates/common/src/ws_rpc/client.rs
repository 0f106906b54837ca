/// WebSocket RPC 客户端传输
///
/// 基于 tokio-tungstenite 驱动 `Channel`：连接成功后触发打开事件，
/// 入站帧逐条同步分发，出站帧由独立的发送任务写入 socket。

use super::{Channel, Outbound};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

/// 连接到对端并驱动通道，直到连接关闭
///
/// 返回最终的关闭原因。连接失败时通道直接进入 Closed 状态。
pub async fn run(
    address: &str,
    channel: Channel,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) -> crate::Result<String> {
    info!("尝试连接到对端: {}", address);

    let ws_stream = match connect_async(address).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            error!("连接失败: {}", e);
            channel.handle_close(Some(e.to_string().as_str()));
            return Err(e.into());
        }
    };
    info!("✅ WebSocket 连接成功");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    channel.handle_open();

    // 启动发送任务
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let is_close = matches!(frame, Outbound::Close(_));
            if let Err(e) = ws_sender.send(codec::encode(frame)).await {
                error!("发送消息失败: {}", e);
                break;
            }
            if is_close {
                break;
            }
        }
        debug!("发送任务结束");
    });

    // 接收循环：一次只处理一帧
    let mut close_reason: Option<String> = None;
    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(msg)) => match codec::decode(msg) {
                        Ok(codec::Inbound::Text(text)) => channel.handle_frame(&text),
                        Ok(codec::Inbound::Close(reason)) => {
                            close_reason = reason;
                            break;
                        }
                        Ok(codec::Inbound::Ignored) => {}
                        Err(e) => warn!("解码消息失败: {}", e),
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

    channel.handle_close(close_reason.as_deref());
    send_task.abort();

    Ok(channel.closed().await)
}

/// 在后台任务中运行 `run`
pub fn spawn(
    address: impl Into<String>,
    channel: Channel,
    outbound: mpsc::UnboundedReceiver<Outbound>,
) -> JoinHandle<crate::Result<String>> {
    let address = address.into();
    tokio::spawn(async move { run(&address, channel, outbound).await })
}


/// 消息编解码辅助函数
pub mod codec {
    use super::Outbound;
    use crate::ws_rpc::{truncate_close_reason, RpcError};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    /// 解码后的入站帧
    #[derive(Debug, PartialEq, Eq)]
    pub enum Inbound {
        /// 文本负载
        Text(String),
        /// 对端关闭连接，附带原因
        Close(Option<String>),
        /// ping/pong 等无需处理的帧
        Ignored,
    }

    /// 编码出站帧为 WebSocket 消息
    pub fn encode(frame: Outbound) -> WsMessage {
        match frame {
            Outbound::Text(text) => WsMessage::Text(text),
            Outbound::Close(reason) => WsMessage::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: truncate_close_reason(reason).into(),
            })),
        }
    }

    /// 解码 WebSocket 消息
    pub fn decode(ws_msg: WsMessage) -> Result<Inbound, RpcError> {
        match ws_msg {
            WsMessage::Text(text) => Ok(Inbound::Text(text)),
            WsMessage::Binary(data) => String::from_utf8(data)
                .map(Inbound::Text)
                .map_err(RpcError::serialization_error),
            WsMessage::Close(frame) => Ok(Inbound::Close(frame.map(|f| f.reason.into_owned()))),
            _ => Ok(Inbound::Ignored),
        }
    }

}
