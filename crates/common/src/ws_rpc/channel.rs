/// 双向 RPC 通道
///
/// 一个通道绑定一个传输连接和一个过程注册表。传输层（或测试）通过
/// `handle_open` / `handle_frame` / `handle_close` 驱动状态机，
/// 出站帧通过 `Channel::new` 返回的接收端交给传输层发送。
///
/// 状态流转：Connecting -> Open -> Ready -> Closed，任何状态都可以直接进入 Closed。

use super::types::{
    close_reason_or_default, Arguments, ChannelState, Outbound, CLIENT_IS_READY_NOW,
    NO_NAME_YET, REMOTE_LOG, SET_CLIENT_NAME,
};
use super::{ProcedureRegistry, RpcError, RpcMessage};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// 就绪回调
pub type ReadyCallback = Box<dyn FnOnce(&Channel) + Send>;

/// RPC 通道
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    /// 本地过程注册表
    registry: ProcedureRegistry<Channel>,

    /// 由对端分配的名称缓存
    client_name: RwLock<String>,

    /// 当前状态
    state: watch::Sender<ChannelState>,

    /// 出站帧发送端，关闭后为 None
    sender: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,

    /// 用户的就绪回调
    on_ready: Mutex<Option<ReadyCallback>>,

    /// 关闭原因
    close_reason: Mutex<Option<String>>,
}

impl Channel {
    /// 创建新的通道，返回通道和出站帧接收端
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ChannelState::Connecting);

        let channel = Self {
            inner: Arc::new(ChannelInner {
                registry: ProcedureRegistry::new(),
                client_name: RwLock::new(NO_NAME_YET.to_string()),
                state,
                sender: Mutex::new(Some(tx)),
                on_ready: Mutex::new(None),
                close_reason: Mutex::new(None),
            }),
        };

        (channel, rx)
    }

    // ========================================================================
    // 对外接口
    // ========================================================================

    /// 设置就绪回调
    ///
    /// 对端确认就绪时调用一次；如果通道已经就绪则立即调用。
    pub fn on_ready<F>(&self, callback: F)
    where
        F: FnOnce(&Channel) + Send + 'static,
    {
        let mut slot = lock(&self.inner.on_ready);
        if self.state() != ChannelState::Ready {
            *slot = Some(Box::new(callback));
            return;
        }
        drop(slot);
        callback(self);
    }

    /// 添加可被对端调用的过程
    pub fn add_procedure<F>(&self, name: impl Into<String>, handler: F, disposable: bool)
    where
        F: Fn(&Channel, Arguments) -> Result<(), RpcError> + Send + Sync + 'static,
    {
        self.inner.registry.register(name, handler, disposable);
    }

    /// 移除过程
    pub fn remove_procedure(&self, name: &str) -> bool {
        self.inner.registry.unregister(name)
    }

    /// 是否注册了指定过程
    pub fn has_procedure(&self, name: &str) -> bool {
        self.inner.registry.contains(name)
    }

    /// 执行对端的过程（只发送，不等待结果）
    ///
    /// 只有在就绪之后才允许调用。
    pub fn execute(&self, procedure: impl Into<String>, arguments: Vec<Value>) -> Result<(), RpcError> {
        self.ensure_ready()?;
        self.send(RpcMessage::new(procedure, arguments))
    }

    /// 以可序列化的元组/数组作为参数执行对端的过程
    pub fn execute_with<A: serde::Serialize>(
        &self,
        procedure: impl Into<String>,
        arguments: &A,
    ) -> Result<(), RpcError> {
        self.ensure_ready()?;
        self.send(RpcMessage::from_serializable(procedure, arguments)?)
    }

    /// 向对端提议修改名称
    ///
    /// 本地名称不会立即改变，只有对端回调 setClientName 后才会更新。
    pub fn set_client_name(&self, new_name: impl Into<String>) -> Result<(), RpcError> {
        let current = self.client_name();
        self.execute(
            SET_CLIENT_NAME,
            vec![Value::String(current), Value::String(new_name.into())],
        )
    }

    /// 获取当前名称缓存
    pub fn client_name(&self) -> String {
        self.inner
            .client_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 获取当前状态
    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    /// 关闭原因（仅在 Closed 状态下有值）
    pub fn close_reason(&self) -> Option<String> {
        lock(&self.inner.close_reason).clone()
    }

    /// 等待通道就绪
    ///
    /// 通道在就绪前关闭时返回 `ConnectionClosed`。
    pub async fn wait_ready(&self) -> Result<(), RpcError> {
        let mut rx = self.inner.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ChannelState::Ready => return Ok(()),
                ChannelState::Closed => return Err(RpcError::connection_closed()),
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(RpcError::connection_closed());
            }
        }
    }

    /// 等待通道关闭，返回关闭原因
    pub async fn closed(&self) -> String {
        let mut rx = self.inner.state.subscribe();
        while *rx.borrow_and_update() != ChannelState::Closed {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.close_reason()
            .unwrap_or_else(|| close_reason_or_default(None))
    }

    /// 主动关闭通道
    pub fn close(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if let Some(sender) = lock(&self.inner.sender).as_ref() {
            let _ = sender.send(Outbound::Close(reason.clone()));
        }
        self.handle_close(Some(&reason));
    }

    // ========================================================================
    // 传输事件
    // ========================================================================

    /// 传输已打开：安装内置过程并等待对端确认就绪
    pub fn handle_open(&self) {
        if self.state() != ChannelState::Connecting {
            warn!("通道状态为 {:?}，忽略重复的打开事件", self.state());
            return;
        }

        self.install_default_procedures();
        self.inner.state.send_replace(ChannelState::Open);
        debug!("传输已打开，等待对端确认就绪");
    }

    /// 处理对端发来的一帧文本
    ///
    /// 处理器在返回前同步执行完毕，所以同一通道的入站消息不会交错。
    pub fn handle_frame(&self, text: &str) {
        if !self.state().is_open() {
            warn!("通道状态为 {:?}，丢弃入站消息", self.state());
            return;
        }

        let msg = match RpcMessage::from_json(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("解析入站消息失败: {}", e);
                return;
            }
        };

        debug!("收到调用: procedure={}, arguments={}", msg.procedure, msg.arguments.len());

        let procedure = msg.procedure;
        match self
            .inner
            .registry
            .dispatch(self, &procedure, Arguments::new(msg.arguments))
        {
            Ok(()) => {}
            Err(e) if e.is_procedure_not_found() => {
                self.log_to_peer(format!("I don't know procedure with name \"{}\"", procedure));
            }
            Err(e) => {
                warn!("过程 \"{}\" 执行失败: {}", procedure, e);
            }
        }
    }

    /// 传输已关闭
    ///
    /// 空的关闭原因会替换为默认原因。重复调用无效果。
    pub fn handle_close(&self, reason: Option<&str>) {
        if self.state() == ChannelState::Closed {
            return;
        }

        let reason = close_reason_or_default(reason);
        *lock(&self.inner.close_reason) = Some(reason.clone());
        lock(&self.inner.sender).take();
        lock(&self.inner.on_ready).take();
        self.inner.state.send_replace(ChannelState::Closed);

        warn!("{}", self.build_log(&format!("Lost connection from server because of {}", reason)));
    }

    // ========================================================================
    // 内部实现
    // ========================================================================

    fn install_default_procedures(&self) {
        // 对端分配名称
        self.add_procedure(
            SET_CLIENT_NAME,
            |channel, args| {
                let name: String = args.get(0)?;
                channel.assign_name(name);
                Ok(())
            },
            false,
        );

        // 对端确认就绪，只触发一次
        self.add_procedure(
            CLIENT_IS_READY_NOW,
            |channel, _| {
                channel.mark_ready();
                Ok(())
            },
            true,
        );

        // 对端的日志输出到本地
        self.add_procedure(
            REMOTE_LOG,
            |_, args| {
                match args.get::<Value>(0)? {
                    Value::String(message) => info!("{}", message),
                    other => info!("{}", other),
                }
                Ok(())
            },
            false,
        );
    }

    fn assign_name(&self, name: String) {
        debug!("对端分配名称: {}", name);
        *self
            .inner
            .client_name
            .write()
            .unwrap_or_else(PoisonError::into_inner) = name;
    }

    fn mark_ready(&self) {
        if self.state() != ChannelState::Open {
            warn!("通道状态为 {:?}，忽略就绪信号", self.state());
            return;
        }

        self.inner.state.send_replace(ChannelState::Ready);
        info!("{}", self.build_log("Connected to server!"));

        let callback = lock(&self.inner.on_ready).take();
        if let Some(callback) = callback {
            callback(self);
        }
    }

    fn ensure_ready(&self) -> Result<(), RpcError> {
        match self.state() {
            ChannelState::Connecting => Err(RpcError::not_connected()),
            ChannelState::Open => Err(RpcError::not_ready()),
            ChannelState::Ready => Ok(()),
            ChannelState::Closed => Err(RpcError::connection_closed()),
        }
    }

    fn send(&self, msg: RpcMessage) -> Result<(), RpcError> {
        let state = self.state();
        if !state.is_open() {
            return Err(match state {
                ChannelState::Connecting => RpcError::not_connected(),
                _ => RpcError::connection_closed(),
            });
        }

        let json = msg.to_json()?;
        let sender = lock(&self.inner.sender);
        let sender = sender.as_ref().ok_or_else(RpcError::connection_closed)?;
        sender
            .send(Outbound::Text(json))
            .map_err(|_| RpcError::connection_closed())
    }

    /// 把诊断信息通过远程日志过程发给对端
    fn log_to_peer(&self, message: String) {
        let log = self.build_log(&message);
        warn!("{}", log);
        if let Err(e) = self.send(RpcMessage::new(REMOTE_LOG, vec![Value::String(log)])) {
            warn!("向对端发送日志失败: {}", e);
        }
    }

    fn build_log(&self, message: &str) -> String {
        format!("UniJ Client \"{}\" | {}", self.client_name(), message)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws_rpc::RpcErrorCode;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn open_channel() -> (Channel, mpsc::UnboundedReceiver<Outbound>) {
        let (channel, rx) = Channel::new();
        channel.handle_open();
        (channel, rx)
    }

    fn ready_channel() -> (Channel, mpsc::UnboundedReceiver<Outbound>) {
        let (channel, rx) = open_channel();
        channel.handle_frame(r#"{"clientIsReadyNow":[]}"#);
        assert_eq!(channel.state(), ChannelState::Ready);
        (channel, rx)
    }

    fn next_text(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Value {
        match rx.try_recv().expect("expected an outbound frame") {
            Outbound::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_initial_state() {
        let (channel, _rx) = Channel::new();
        assert_eq!(channel.state(), ChannelState::Connecting);
        assert_eq!(channel.client_name(), "no-name-yet");
        assert!(!channel.has_procedure("clientIsReadyNow"));
    }

    #[test]
    fn test_open_installs_default_procedures() {
        let (channel, _rx) = open_channel();
        assert_eq!(channel.state(), ChannelState::Open);
        assert!(channel.has_procedure("setClientName"));
        assert!(channel.has_procedure("clientIsReadyNow"));
        assert!(channel.has_procedure("unijLog"));
    }

    #[test]
    fn test_ready_fires_once() {
        let (channel, mut rx) = open_channel();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        channel.on_ready(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        channel.handle_frame(r#"{"clientIsReadyNow":[]}"#);
        assert_eq!(channel.state(), ChannelState::Ready);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // 第二次就绪信号已无对应过程，会作为未知过程上报给对端
        channel.handle_frame(r#"{"clientIsReadyNow":[]}"#);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let report = next_text(&mut rx);
        let text = report["unijLog"][0].as_str().unwrap();
        assert!(text.contains("clientIsReadyNow"));
    }

    #[test]
    fn test_on_ready_after_ready_runs_immediately() {
        let (channel, _rx) = ready_channel();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        channel.on_ready(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ready_callback_can_execute() {
        let (channel, mut rx) = open_channel();
        channel.on_ready(|channel| {
            channel
                .execute("printToConsole", vec![json!("Hello there!")])
                .unwrap();
        });

        channel.handle_frame(r#"{"clientIsReadyNow":[]}"#);

        assert_eq!(next_text(&mut rx), json!({"printToConsole": ["Hello there!"]}));
    }

    #[test]
    fn test_server_assigns_name() {
        let (channel, _rx) = open_channel();
        channel.handle_frame(r#"{"setClientName":["Alice"]}"#);
        assert_eq!(channel.client_name(), "Alice");
    }

    #[test]
    fn test_set_client_name_is_only_a_proposal() {
        let (channel, mut rx) = ready_channel();
        channel.handle_frame(r#"{"setClientName":["abc"]}"#);

        channel.set_client_name("because I can").unwrap();

        assert_eq!(channel.client_name(), "abc");
        assert_eq!(
            next_text(&mut rx),
            json!({"setClientName": ["abc", "because I can"]})
        );

        channel.handle_frame(r#"{"setClientName":["because I can"]}"#);
        assert_eq!(channel.client_name(), "because I can");
    }

    #[test]
    fn test_execute_before_open_fails() {
        let (channel, mut rx) = Channel::new();
        let err = channel.execute("foo", vec![json!(1)]).unwrap_err();
        assert_eq!(err.code, RpcErrorCode::NotConnected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_execute_before_ready_fails() {
        let (channel, mut rx) = open_channel();
        let err = channel.execute("foo", vec![]).unwrap_err();
        assert_eq!(err.code, RpcErrorCode::NotReady);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_execute_wire_format() {
        let (channel, mut rx) = ready_channel();
        channel.execute("foo", vec![json!(1), json!("a")]).unwrap();
        channel.execute_with("bar", &(true, json!(null))).unwrap();

        match rx.try_recv().unwrap() {
            Outbound::Text(text) => assert_eq!(text, r#"{"foo":[1,"a"]}"#),
            other => panic!("unexpected frame: {:?}", other),
        }
        assert_eq!(next_text(&mut rx), json!({"bar": [true, null]}));
    }

    #[test]
    fn test_user_procedure_dispatch() {
        let (channel, _rx) = ready_channel();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        channel.add_procedure(
            "showThemApples",
            move |_, args| {
                sink.lock().unwrap().push(args.get::<Value>(0)?);
                Ok(())
            },
            false,
        );

        channel.handle_frame(r#"{"showThemApples":[{"name":"apples"}]}"#);
        channel.handle_frame(r#"{"pro":"showThemApples","par":["them apples"]}"#);

        assert_eq!(
            *received.lock().unwrap(),
            vec![json!({"name": "apples"}), json!("them apples")]
        );
        assert!(channel.remove_procedure("showThemApples"));
        assert!(!channel.remove_procedure("showThemApples"));
    }

    #[test]
    fn test_unknown_procedure_reported_to_peer() {
        let (channel, mut rx) = ready_channel();
        channel.handle_frame(r#"{"setClientName":["abc"]}"#);
        channel.handle_frame(r#"{"iDontExist":[404]}"#);

        let report = next_text(&mut rx);
        assert_eq!(
            report,
            json!({"unijLog": ["UniJ Client \"abc\" | I don't know procedure with name \"iDontExist\""]})
        );
        assert_eq!(channel.state(), ChannelState::Ready);
    }

    #[test]
    fn test_malformed_frame_is_ignored() {
        let (channel, mut rx) = ready_channel();
        channel.handle_frame("not json");
        channel.handle_frame(r#"{"a":[],"b":[]}"#);
        assert!(rx.try_recv().is_err());
        assert_eq!(channel.state(), ChannelState::Ready);
    }

    #[test]
    fn test_close_with_empty_reason_uses_default() {
        let (channel, _rx) = ready_channel();
        channel.handle_close(Some(""));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.close_reason().as_deref(), Some("unexpected closing"));

        let err = channel.execute("foo", vec![]).unwrap_err();
        assert_eq!(err.code, RpcErrorCode::ConnectionClosed);
    }

    #[test]
    fn test_close_keeps_first_reason() {
        let (channel, _rx) = ready_channel();
        channel.handle_close(Some("server shutdown"));
        channel.handle_close(None);
        assert_eq!(channel.close_reason().as_deref(), Some("server shutdown"));
    }

    #[test]
    fn test_local_close_sends_close_frame() {
        let (channel, mut rx) = ready_channel();
        channel.close("bye");
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close("bye".to_string()));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_frames_after_close_are_dropped() {
        let (channel, _rx) = open_channel();
        channel.handle_close(None);
        channel.handle_frame(r#"{"clientIsReadyNow":[]}"#);
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_wait_ready() {
        let (channel, _rx) = open_channel();
        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.wait_ready().await })
        };

        channel.handle_frame(r#"{"clientIsReadyNow":[]}"#);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_wait_ready_fails_on_close() {
        let (channel, _rx) = open_channel();
        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.wait_ready().await })
        };

        channel.handle_close(Some("gone"));
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.code, RpcErrorCode::ConnectionClosed);
        assert_eq!(channel.closed().await, "gone");
    }
}
