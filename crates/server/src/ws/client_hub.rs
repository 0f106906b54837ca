/// 客户端连接池
///
/// 负责管理所有客户端的 WebSocket 连接、分配名称，并调度客户端发起的过程调用。
/// 服务端是客户端名称的唯一权威：客户端只能提议改名，由这里决定是否接受。

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use unij_common::utils::{generate_client_name, truncate_for_log};
use unij_common::ws_rpc::{
    close_reason_or_default, Arguments, Outbound, ProcedureRegistry, RpcError, RpcErrorCode,
    RpcMessage, CLIENT_IS_READY_NOW, REMOTE_LOG, SET_CLIENT_NAME,
};
use unij_common::Value;

/// 日志中显示的入站消息最大长度
const LOG_FRAME_MAX_CHARS: usize = 200;

/// 客户端连接信息
pub struct ClientConnection {
    /// 当前名称（改名后会变化）
    name: RwLock<String>,

    /// 发送消息的通道
    sender: mpsc::UnboundedSender<Outbound>,

    /// 连接时间
    pub connected_at: chrono::DateTime<chrono::Utc>,
}

impl ClientConnection {
    /// 获取当前名称
    pub fn name(&self) -> String {
        self.name.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_name(&self, name: &str) {
        *self.name.write().unwrap_or_else(PoisonError::into_inner) = name.to_string();
    }

    /// 发送调用消息
    pub fn send(&self, msg: &RpcMessage) -> Result<(), RpcError> {
        let json = msg.to_json()?;
        self.send_raw(json)
    }

    fn send_raw(&self, json: String) -> Result<(), RpcError> {
        self.sender
            .send(Outbound::Text(json))
            .map_err(|_| RpcError::connection_closed())
    }

    /// 请求传输层关闭连接
    pub fn close(&self, reason: impl Into<String>) {
        let _ = self.sender.send(Outbound::Close(reason.into()));
    }
}

/// 服务端过程的调用上下文
pub struct ClientContext {
    hub: ClientHub,
    connection: Arc<ClientConnection>,
}

impl ClientContext {
    /// 发起调用的客户端当前名称
    pub fn client_name(&self) -> String {
        self.connection.name()
    }

    /// 客户端连接池
    pub fn hub(&self) -> &ClientHub {
        &self.hub
    }

    /// 调用发起者的过程
    pub fn reply(&self, procedure: impl Into<String>, arguments: Vec<Value>) -> Result<(), RpcError> {
        self.connection.send(&RpcMessage::new(procedure, arguments))
    }

    /// 在发起者的控制台输出日志
    pub fn log_to_client(&self, message: impl AsRef<str>) -> Result<(), RpcError> {
        self.reply(REMOTE_LOG, vec![Value::String(server_log(message.as_ref()))])
    }
}

/// 客户端连接池
#[derive(Clone)]
pub struct ClientHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    /// 所有连接的映射：client_name -> ClientConnection
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,

    /// 可被客户端调用的过程
    procedures: ProcedureRegistry<ClientContext>,

    /// 最大客户端数量，None 表示不限制
    max_clients: Option<usize>,

    /// 当前连接数，用于等待第一个客户端
    client_count: watch::Sender<usize>,
}

impl ClientHub {
    /// 创建新的连接池并安装内置过程
    pub fn new(max_clients: Option<usize>) -> Self {
        let (client_count, _) = watch::channel(0);
        let hub = Self {
            inner: Arc::new(HubInner {
                connections: RwLock::new(HashMap::new()),
                procedures: ProcedureRegistry::new(),
                max_clients,
                client_count,
            }),
        };
        hub.install_default_procedures();
        hub
    }

    // ========================================================================
    // 连接生命周期
    // ========================================================================

    /// 接受新连接：分配名称并完成握手
    ///
    /// 达到客户端上限时返回错误，调用者应关闭该连接。
    pub fn accept(
        &self,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> Result<Arc<ClientConnection>, RpcError> {
        let connection = {
            let mut connections = self.write();

            if let Some(limit) = self.inner.max_clients {
                if connections.len() >= limit {
                    return Err(RpcError::client_limit_reached(limit));
                }
            }

            let mut name = generate_client_name();
            while connections.contains_key(&name) {
                name = generate_client_name();
            }

            let connection = Arc::new(ClientConnection {
                name: RwLock::new(name.clone()),
                sender,
                connected_at: chrono::Utc::now(),
            });
            connections.insert(name, connection.clone());
            self.inner.client_count.send_replace(connections.len());
            connection
        };

        let name = connection.name();
        connection.send(&RpcMessage::new(SET_CLIENT_NAME, vec![Value::String(name.clone())]))?;
        connection.send(&RpcMessage::without_arguments(CLIENT_IS_READY_NOW))?;

        info!("客户端 \"{}\" 已连接", name);
        Ok(connection)
    }

    /// 处理客户端发来的一帧文本
    pub fn handle_frame(&self, connection: &Arc<ClientConnection>, text: &str) {
        let msg = match RpcMessage::from_json(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(
                    "解析客户端 \"{}\" 的消息失败: {}, 原始内容: {}",
                    connection.name(),
                    e,
                    truncate_for_log(text, LOG_FRAME_MAX_CHARS)
                );
                return;
            }
        };

        debug!(
            "📨 [收到调用] client={}, procedure={}",
            connection.name(),
            msg.procedure
        );

        let context = ClientContext {
            hub: self.clone(),
            connection: connection.clone(),
        };
        let procedure = msg.procedure;
        let arguments = Value::Array(msg.arguments.clone());

        match self
            .inner
            .procedures
            .dispatch(&context, &procedure, Arguments::new(msg.arguments))
        {
            Ok(()) => {}
            Err(e) if e.is_procedure_not_found() => {
                warn!("客户端 \"{}\" 调用了不存在的过程: {}", connection.name(), procedure);
                let _ = context.log_to_client(format!(
                    "Remote procedure with name \"{}\" does not exist",
                    procedure
                ));
            }
            Err(e) if e.code == RpcErrorCode::InvalidParams => {
                warn!(
                    "过程 \"{}\" 存在，但参数无效导致执行失败: {}, 参数: {}",
                    procedure, e, arguments
                );
            }
            Err(e) => {
                warn!("❌ [过程执行失败] procedure={}, error={}", procedure, e);
            }
        }
    }

    /// 连接已关闭：从池中移除
    pub fn disconnect(&self, connection: &Arc<ClientConnection>, reason: Option<&str>) {
        let name = connection.name();
        {
            let mut connections = self.write();
            let same = connections
                .get(&name)
                .map(|current| Arc::ptr_eq(current, connection))
                .unwrap_or(false);
            if same {
                connections.remove(&name);
            }
            self.inner.client_count.send_replace(connections.len());
        }

        let online = chrono::Utc::now() - connection.connected_at;
        info!(
            "客户端 \"{}\" 已断开（在线 {} 秒），原因: {}",
            name,
            online.num_seconds(),
            close_reason_or_default(reason)
        );
    }

    // ========================================================================
    // 名称管理
    // ========================================================================

    /// 修改客户端名称
    ///
    /// 成功后通知客户端新名称（客户端只在收到这条消息时才更新本地名称）。
    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<(), RpcError> {
        let connection = {
            let mut connections = self.write();
            if !connections.contains_key(old_name) {
                return Err(RpcError::client_not_found(old_name));
            }
            if old_name == new_name {
                return Ok(());
            }
            if connections.contains_key(new_name) {
                return Err(RpcError::client_name_taken(new_name));
            }
            let Some(connection) = connections.remove(old_name) else {
                return Err(RpcError::client_not_found(old_name));
            };
            connection.set_name(new_name);
            connections.insert(new_name.to_string(), connection.clone());
            connection
        };

        info!("客户端 \"{}\" 已改名为 \"{}\"", old_name, new_name);

        connection.send(&RpcMessage::new(
            SET_CLIENT_NAME,
            vec![Value::String(new_name.to_string())],
        ))?;
        self.log_to_client(new_name, format!("You changed your name to \"{}\"", new_name))
    }

    // ========================================================================
    // 过程管理
    // ========================================================================

    /// 添加可被客户端调用的过程
    pub fn add_procedure<F>(&self, name: impl Into<String>, handler: F, disposable: bool)
    where
        F: Fn(&ClientContext, Arguments) -> Result<(), RpcError> + Send + Sync + 'static,
    {
        self.inner.procedures.register(name, handler, disposable);
    }

    /// 添加有返回值的过程
    ///
    /// 处理器返回 `Some(value)` 时，以同名过程把结果回传给调用者。
    pub fn add_returning_procedure<F>(&self, name: impl Into<String>, handler: F, disposable: bool)
    where
        F: Fn(&ClientContext, Arguments) -> Result<Option<Value>, RpcError> + Send + Sync + 'static,
    {
        let name = name.into();
        let procedure = name.clone();
        self.add_procedure(
            name,
            move |ctx, args| match handler(ctx, args)? {
                Some(result) => {
                    debug!("过程 \"{}\" 返回结果给客户端 {}", procedure, ctx.client_name());
                    ctx.reply(procedure.as_str(), vec![result])
                }
                None => Ok(()),
            },
            disposable,
        );
    }

    /// 移除过程
    pub fn remove_procedure(&self, name: &str) -> bool {
        self.inner.procedures.unregister(name)
    }

    /// 获取已注册的过程名列表
    pub fn list_procedures(&self) -> Vec<String> {
        self.inner.procedures.list()
    }

    // ========================================================================
    // 远程调用
    // ========================================================================

    /// 执行指定客户端的过程
    pub fn execute(
        &self,
        client_name: &str,
        procedure: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Result<(), RpcError> {
        let procedure = procedure.into();
        let Some(connection) = self.get(client_name) else {
            warn!(
                "无法执行客户端 \"{}\" 的过程 \"{}\"，因为该客户端不存在",
                client_name, procedure
            );
            return Err(RpcError::client_not_found(client_name));
        };

        info!("📤 [Server -> Client] client={}, procedure={}", client_name, procedure);
        connection.send(&RpcMessage::new(procedure, arguments))
    }

    /// 执行所有客户端的过程，返回成功发送的客户端数量
    pub fn execute_all(&self, procedure: impl Into<String>, arguments: Vec<Value>) -> usize {
        let procedure = procedure.into();
        let connections: Vec<Arc<ClientConnection>> = self.read().values().cloned().collect();

        if connections.is_empty() {
            warn!("无法执行过程 \"{}\"，因为没有已连接的客户端", procedure);
            return 0;
        }

        let json = match RpcMessage::new(procedure.as_str(), arguments).to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("无法执行过程 \"{}\"，因为参数无效: {}", procedure, e);
                return 0;
            }
        };

        let mut count = 0;
        for connection in connections {
            if let Err(e) = connection.send_raw(json.clone()) {
                warn!("向客户端 {} 广播失败: {}", connection.name(), e);
            } else {
                count += 1;
            }
        }

        debug!("过程 \"{}\" 已广播到 {} 个客户端", procedure, count);
        count
    }

    /// 在指定客户端的控制台输出日志
    pub fn log_to_client(&self, client_name: &str, message: impl AsRef<str>) -> Result<(), RpcError> {
        self.execute(
            client_name,
            REMOTE_LOG,
            vec![Value::String(server_log(message.as_ref()))],
        )
    }

    // ========================================================================
    // 查询
    // ========================================================================

    /// 主动移除客户端并关闭其连接
    pub fn remove_client(&self, client_name: &str) -> bool {
        let removed = {
            let mut connections = self.write();
            let removed = connections.remove(client_name);
            self.inner.client_count.send_replace(connections.len());
            removed
        };

        match removed {
            Some(connection) => {
                connection.close("removed by server");
                info!("客户端已移除: {}", client_name);
                true
            }
            None => {
                warn!("没有可移除的客户端 \"{}\"", client_name);
                false
            }
        }
    }

    /// 获取指定名称的连接
    pub fn get(&self, client_name: &str) -> Option<Arc<ClientConnection>> {
        self.read().get(client_name).cloned()
    }

    /// 是否在线
    pub fn is_connected(&self, client_name: &str) -> bool {
        self.read().contains_key(client_name)
    }

    /// 获取所有在线客户端名称
    pub fn client_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// 在线客户端数量
    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// 等待第一个客户端连接
    pub async fn wait_for_first_client(&self) {
        let mut rx = self.inner.client_count.subscribe();
        let _ = rx.wait_for(|count| *count > 0).await;
    }

    // ========================================================================
    // 内部实现
    // ========================================================================

    fn install_default_procedures(&self) {
        // 客户端的日志输出到服务端
        self.add_procedure(
            REMOTE_LOG,
            |ctx, args| {
                match args.get::<Value>(0)? {
                    Value::String(message) => warn!("UniJ: {}", message),
                    other => warn!("UniJ: {}", other),
                }
                debug!("日志来自客户端: {}", ctx.client_name());
                Ok(())
            },
            false,
        );

        // 客户端提议改名
        self.add_procedure(
            SET_CLIENT_NAME,
            |ctx, args| {
                let old_name: String = args.get(0)?;
                let new_name: String = args.get(1)?;

                // 只能修改自己的名称
                let caller = ctx.client_name();
                if old_name != caller {
                    warn!(
                        "客户端 \"{}\" 试图以 \"{}\" 的名义改名，已拒绝",
                        caller, old_name
                    );
                    return ctx.log_to_client(format!(
                        "Could not change your name to \"{}\", because I don't know you...",
                        new_name
                    ));
                }
                if new_name == caller {
                    return ctx.log_to_client(format!("Your name already is \"{}\"", new_name));
                }

                match ctx.hub().rename(&old_name, &new_name) {
                    Ok(()) => Ok(()),
                    Err(e) if e.code == RpcErrorCode::ClientNotFound => {
                        warn!("客户端 \"{}\" 改名失败，因为它不存在", old_name);
                        ctx.log_to_client(format!(
                            "Could not change your name to \"{}\", because I don't know you...",
                            new_name
                        ))
                    }
                    Err(e) if e.code == RpcErrorCode::ClientNameTaken => {
                        warn!(
                            "客户端 \"{}\" 改名为 \"{}\" 失败，因为该名称已被占用",
                            old_name, new_name
                        );
                        ctx.log_to_client(format!(
                            "Could not change your name to \"{}\", because someone else already has it",
                            new_name
                        ))
                    }
                    Err(e) => Err(e),
                }
            },
            false,
        );
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ClientConnection>>> {
        self.inner
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ClientConnection>>> {
        self.inner
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ClientHub {
    fn default() -> Self {
        Self::new(None)
    }
}

fn server_log(message: &str) -> String {
    format!("UniJ Server : {}", message)
}
