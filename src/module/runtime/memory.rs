//! 内存模块运行时
//!
//! 用于测试和演示的 [`ModuleRuntime`] 实现。每次调用在返回前按固定顺序
//! 把生命周期通知同步投递给所有订阅者，并提供按需加载、启动失败注入、
//! 外部卸载/停止等模拟入口。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{ModuleRuntime, RuntimeEvent, RuntimeEventKind, RuntimeListener};
use crate::dependency::{ActivationPolicy, ProjectMetadata};
use crate::module::state::State;
use crate::module::unit::{ModuleId, ProjectId};
use crate::utils::{generate_id, CoreError, Result};

/// 解析否决钩子：返回 `true` 时运行时拒绝解析该项目的模块
pub type ResolverVeto = Arc<dyn Fn(&ProjectId) -> bool + Send + Sync>;

/// 运行时调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCall {
    pub operation: &'static str,
    pub project: ProjectId,
}

/// 运行时内部的模块记录
#[derive(Debug, Clone)]
struct ModuleRecord {
    project: ProjectId,
    state: State,
}

/// 内存模块运行时
pub struct InMemoryRuntime {
    metadata: Arc<dyn ProjectMetadata>,
    modules: RwLock<IndexMap<ModuleId, ModuleRecord>>,
    listeners: RwLock<Vec<Arc<dyn RuntimeListener>>>,
    veto: RwLock<Option<ResolverVeto>>,
    failing_starts: Mutex<HashSet<ProjectId>>,
    calls: Mutex<Vec<RuntimeCall>>,
}

impl InMemoryRuntime {
    pub fn new(metadata: Arc<dyn ProjectMetadata>) -> Self {
        Self {
            metadata,
            modules: RwLock::new(IndexMap::new()),
            listeners: RwLock::new(Vec::new()),
            veto: RwLock::new(None),
            failing_starts: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 订阅生命周期通知
    pub async fn subscribe(&self, listener: Arc<dyn RuntimeListener>) {
        self.listeners.write().await.push(listener);
    }

    /// 设置解析否决钩子
    pub async fn set_resolver_veto(&self, veto: ResolverVeto) {
        *self.veto.write().await = Some(veto);
    }

    pub async fn clear_resolver_veto(&self) {
        *self.veto.write().await = None;
    }

    /// 让该项目模块的下一次启动失败（启动代码抛出异常）
    pub async fn fail_next_start(&self, project: &ProjectId) {
        self.failing_starts.lock().await.insert(project.clone());
    }

    /// 已发生的调用（按调用顺序）
    pub async fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().await.clone()
    }

    /// 某类调用涉及的项目（按调用顺序）
    pub async fn calls_of(&self, operation: &str) -> Vec<ProjectId> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.operation == operation)
            .map(|c| c.project.clone())
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    /// 运行时眼中的模块状态
    pub async fn module_state(&self, module: &ModuleId) -> Option<State> {
        self.modules.read().await.get(module).map(|r| r.state)
    }

    /// 项目当前安装的模块
    pub async fn module_of(&self, project: &ProjectId) -> Option<ModuleId> {
        self.modules
            .read()
            .await
            .iter()
            .find(|(_, r)| &r.project == project)
            .map(|(id, _)| id.clone())
    }

    // ==================== 模拟入口 ====================

    /// 按需加载懒加载模块（例如首次类加载）
    pub async fn demand_load(&self, module: &ModuleId) -> Result<()> {
        self.expect_state(module, &[State::Starting]).await?;
        self.set_state(module, State::Active).await;
        self.emit_all(
            module,
            &[RuntimeEventKind::Starting, RuntimeEventKind::Started],
        )
        .await;
        Ok(())
    }

    /// 非内核发起的卸载
    pub async fn external_uninstall(&self, module: &ModuleId) -> Result<()> {
        let record = self.record(module).await?;
        self.modules.write().await.shift_remove(module);
        info!(module_id = %module, project = %record.project, "模块被外部卸载");
        self.emit(module, RuntimeEventKind::Uninstalled).await;
        Ok(())
    }

    /// 非内核发起的停止
    pub async fn external_stop(&self, module: &ModuleId) -> Result<()> {
        self.expect_state(module, &[State::Active, State::Starting])
            .await?;
        self.set_state(module, State::Resolved).await;
        self.emit_all(
            module,
            &[RuntimeEventKind::Stopping, RuntimeEventKind::Stopped],
        )
        .await;
        Ok(())
    }

    // ==================== 内部辅助 ====================

    async fn record_call(&self, operation: &'static str, project: &ProjectId) {
        self.calls.lock().await.push(RuntimeCall {
            operation,
            project: project.clone(),
        });
    }

    async fn record(&self, module: &ModuleId) -> Result<ModuleRecord> {
        self.modules
            .read()
            .await
            .get(module)
            .cloned()
            .ok_or_else(|| CoreError::Runtime {
                module: module.clone(),
                reason: "运行时中不存在该模块".to_string(),
            })
    }

    async fn expect_state(&self, module: &ModuleId, accepted: &[State]) -> Result<ModuleRecord> {
        let record = self.record(module).await?;
        if !accepted.contains(&record.state) {
            return Err(CoreError::Runtime {
                module: module.clone(),
                reason: format!("模块处于 {:?} 状态，无法执行该操作", record.state),
            });
        }
        Ok(record)
    }

    async fn set_state(&self, module: &ModuleId, state: State) {
        if let Some(record) = self.modules.write().await.get_mut(module) {
            record.state = state;
        }
    }

    async fn vetoed(&self, project: &ProjectId) -> bool {
        match self.veto.read().await.as_ref() {
            Some(veto) => veto(project),
            None => false,
        }
    }

    async fn dispatch(&self, event: RuntimeEvent) {
        let listeners = self.listeners.read().await.clone();
        debug!(
            event_kind = ?event.kind,
            module_id = %event.subject,
            listeners = listeners.len(),
            "投递运行时通知"
        );
        for listener in listeners {
            listener.on_runtime_event(event.clone()).await;
        }
    }

    async fn emit(&self, module: &ModuleId, kind: RuntimeEventKind) {
        self.dispatch(RuntimeEvent::new(kind, module.clone())).await;
    }

    async fn emit_all(&self, module: &ModuleId, kinds: &[RuntimeEventKind]) {
        for kind in kinds {
            self.emit(module, *kind).await;
        }
    }
}

#[async_trait]
impl ModuleRuntime for InMemoryRuntime {
    async fn install(&self, project: &ProjectId) -> Result<ModuleId> {
        self.record_call("install", project).await;
        if let Some(existing) = self.module_of(project).await {
            return Err(CoreError::Runtime {
                module: existing,
                reason: format!("项目 '{}' 的模块已安装", project),
            });
        }

        let module = ModuleId::new(generate_id());
        self.modules.write().await.insert(
            module.clone(),
            ModuleRecord {
                project: project.clone(),
                state: State::Installed,
            },
        );
        debug!(project = %project, module_id = %module, "模块已安装");

        let event = RuntimeEvent::new(RuntimeEventKind::Installed, module.clone())
            .with_origin(project.clone());
        self.dispatch(event).await;
        Ok(module)
    }

    async fn uninstall(&self, module: &ModuleId) -> Result<()> {
        let record = self
            .expect_state(module, &[State::Installed, State::Resolved])
            .await?;
        self.record_call("uninstall", &record.project).await;
        self.modules.write().await.shift_remove(module);

        if record.state == State::Resolved {
            self.emit(module, RuntimeEventKind::Unresolved).await;
        }
        self.emit(module, RuntimeEventKind::Uninstalled).await;
        Ok(())
    }

    async fn resolve(&self, module: &ModuleId) -> Result<()> {
        let record = self.expect_state(module, &[State::Installed]).await?;
        self.record_call("resolve", &record.project).await;
        if self.vetoed(&record.project).await {
            return Err(CoreError::Runtime {
                module: module.clone(),
                reason: "解析被拒绝".to_string(),
            });
        }
        match self.metadata.activation_policy(&record.project) {
            // 懒加载模块解析后直接进入等待按需加载
            ActivationPolicy::Lazy => {
                self.set_state(module, State::Starting).await;
                self.emit_all(
                    module,
                    &[RuntimeEventKind::Resolved, RuntimeEventKind::LazyActivation],
                )
                .await;
            }
            ActivationPolicy::Eager => {
                self.set_state(module, State::Resolved).await;
                self.emit(module, RuntimeEventKind::Resolved).await;
            }
        }
        Ok(())
    }

    async fn start(&self, module: &ModuleId) -> Result<()> {
        let record = self
            .expect_state(module, &[State::Resolved, State::Starting, State::Active])
            .await?;
        self.record_call("start", &record.project).await;
        if record.state != State::Resolved {
            return Ok(());
        }

        if self.failing_starts.lock().await.remove(&record.project) {
            warn!(project = %record.project, module_id = %module, "模块启动代码抛出异常");
            self.emit_all(
                module,
                &[
                    RuntimeEventKind::Starting,
                    RuntimeEventKind::Stopping,
                    RuntimeEventKind::Stopped,
                ],
            )
            .await;
            return Err(CoreError::Runtime {
                module: module.clone(),
                reason: "启动失败".to_string(),
            });
        }

        match self.metadata.activation_policy(&record.project) {
            ActivationPolicy::Lazy => {
                self.set_state(module, State::Starting).await;
                self.emit(module, RuntimeEventKind::LazyActivation).await;
            }
            ActivationPolicy::Eager => {
                self.set_state(module, State::Active).await;
                self.emit_all(
                    module,
                    &[RuntimeEventKind::Starting, RuntimeEventKind::Started],
                )
                .await;
            }
        }
        Ok(())
    }

    async fn stop(&self, module: &ModuleId) -> Result<()> {
        let record = self
            .expect_state(module, &[State::Active, State::Starting])
            .await?;
        self.record_call("stop", &record.project).await;
        self.set_state(module, State::Resolved).await;
        self.emit_all(
            module,
            &[RuntimeEventKind::Stopping, RuntimeEventKind::Stopped],
        )
        .await;
        Ok(())
    }

    async fn update(&self, module: &ModuleId) -> Result<()> {
        let record = self
            .expect_state(module, &[State::Installed, State::Resolved])
            .await?;
        self.record_call("update", &record.project).await;
        self.set_state(module, State::Installed).await;
        if record.state == State::Resolved {
            self.emit(module, RuntimeEventKind::Unresolved).await;
        }
        self.emit(module, RuntimeEventKind::Updated).await;
        Ok(())
    }

    async fn refresh(&self, module: &ModuleId) -> Result<()> {
        let record = self
            .expect_state(module, &[State::Installed, State::Resolved])
            .await?;
        self.record_call("refresh", &record.project).await;
        self.set_state(module, State::Installed).await;
        self.emit(module, RuntimeEventKind::Unresolved).await;

        if self.vetoed(&record.project).await {
            debug!(project = %record.project, "刷新后的解析被拒绝");
            return Ok(());
        }
        self.set_state(module, State::Resolved).await;
        self.emit(module, RuntimeEventKind::Resolved).await;
        Ok(())
    }
}
