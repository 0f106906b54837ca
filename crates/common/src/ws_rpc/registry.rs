/// 过程注册表
///
/// 按名称保存本地暴露给对端调用的过程。每个过程可以标记为一次性（disposable），
/// 一次性过程在被调用一次后自动从注册表移除。

use super::{Arguments, RpcError};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// 过程处理器类型
///
/// `C` 是调用上下文：客户端侧为 `Channel`，服务端侧为发起调用的客户端。
pub type ProcedureHandler<C> =
    Arc<dyn Fn(&C, Arguments) -> Result<(), RpcError> + Send + Sync>;

/// 已注册的过程
pub struct Procedure<C> {
    handler: ProcedureHandler<C>,
    disposable: bool,
}

impl<C> Procedure<C> {
    /// 是否为一次性过程
    pub fn is_disposable(&self) -> bool {
        self.disposable
    }
}

impl<C> Clone for Procedure<C> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            disposable: self.disposable,
        }
    }
}

/// 过程注册表
pub struct ProcedureRegistry<C> {
    procedures: RwLock<HashMap<String, Procedure<C>>>,
}

impl<C> ProcedureRegistry<C> {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            procedures: RwLock::new(HashMap::new()),
        }
    }

    /// 注册过程，已存在的同名过程会被覆盖并记录警告
    pub fn register<F>(&self, name: impl Into<String>, handler: F, disposable: bool)
    where
        F: Fn(&C, Arguments) -> Result<(), RpcError> + Send + Sync + 'static,
    {
        let name = name.into();
        let procedure = Procedure {
            handler: Arc::new(handler),
            disposable,
        };

        let mut procedures = self.write();
        if procedures.insert(name.clone(), procedure).is_some() {
            warn!("过程 \"{}\" 已被覆盖", name);
        } else {
            debug!("已注册过程: {} (disposable={})", name, disposable);
        }
    }

    /// 移除过程；不存在时只记录警告
    ///
    /// 返回是否真的移除了过程。
    pub fn unregister(&self, name: &str) -> bool {
        let mut procedures = self.write();
        if procedures.remove(name).is_some() {
            debug!("已移除过程: {}", name);
            true
        } else {
            warn!("移除过程 \"{}\" 是多余的，因为它并不存在", name);
            false
        }
    }

    /// 按名称调度过程
    ///
    /// 过程不存在时返回 `ProcedureNotFound` 错误，由调用者决定如何上报。
    /// 一次性过程在调用前就从映射中取出，所以同名的并发调度最多只有一次命中；
    /// 处理器在执行期间重新注册的同名过程会被保留。
    pub fn dispatch(&self, context: &C, name: &str, arguments: Arguments) -> Result<(), RpcError> {
        let procedure = {
            let mut procedures = self.write();
            let disposable = match procedures.get(name) {
                None => return Err(RpcError::procedure_not_found(name)),
                Some(procedure) => procedure.disposable,
            };
            if disposable {
                procedures.remove(name)
            } else {
                procedures.get(name).cloned()
            }
        };

        let Some(procedure) = procedure else {
            return Err(RpcError::procedure_not_found(name));
        };

        // 锁已释放，处理器可以安全地修改注册表
        (procedure.handler)(context, arguments)
    }

    /// 是否已注册
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// 查询过程是否为一次性过程
    pub fn is_disposable(&self, name: &str) -> Option<bool> {
        self.read().get(name).map(Procedure::is_disposable)
    }

    /// 获取已注册的过程名列表
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// 已注册过程数量
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Procedure<C>>> {
        self.procedures.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Procedure<C>>> {
        self.procedures.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C> Default for ProcedureRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
