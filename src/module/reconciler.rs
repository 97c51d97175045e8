//! 事件协调器
//!
//! 消费运行时推送的生命周期通知，把它们与模块单元的内部预期对齐：
//!
//! - 单元有进行中的转换时，通知被视为该转换的一步。中间通知只更新状态，
//!   只有代表终结步骤的通知才提交；启动过程中直接收到 `Stopped` 说明启动失败，
//!   单元回滚并标记 `Incomplete`。
//! - 单元没有进行中的转换，或通知与进行中的转换不符时，合成外部转换。
//!
//! 协调从不返回错误：它只是对已经发生的事情做出反应，结果记录在单元上。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::runtime::{RuntimeEvent, RuntimeEventKind, RuntimeListener};
use super::state::{State, Transition, TransitionError};
use super::unit::{ModuleUnit, ProjectId};
use super::workspace::{UnitTable, WorkspaceModel};
use crate::dependency::ActivationPolicy;

/// 单条通知的协调结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// 中间步骤，转换仍在进行
    Advanced,
    /// 终结步骤，转换已提交
    Committed,
    /// 合成了外部转换
    External,
    /// 进行中的转换未完成，已回滚
    Incomplete,
    /// 提交时发现状态不一致，单元保持进行中
    Inconsistent,
    /// 没有可以关联的单元
    Ignored,
}

/// 协调统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileStats {
    pub total: u64,
    pub advanced: u64,
    pub committed: u64,
    pub external: u64,
    pub incomplete: u64,
    pub inconsistent: u64,
    pub ignored: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl ReconcileStats {
    fn record(&mut self, outcome: ReconcileOutcome) {
        self.total += 1;
        match outcome {
            ReconcileOutcome::Advanced => self.advanced += 1,
            ReconcileOutcome::Committed => self.committed += 1,
            ReconcileOutcome::External => self.external += 1,
            ReconcileOutcome::Incomplete => self.incomplete += 1,
            ReconcileOutcome::Inconsistent => self.inconsistent += 1,
            ReconcileOutcome::Ignored => self.ignored += 1,
        }
        self.last_event_at = Some(Utc::now());
    }
}

/// 事件协调器
pub struct EventReconciler {
    model: Arc<WorkspaceModel>,
    stats: RwLock<ReconcileStats>,
}

impl EventReconciler {
    pub fn new(model: Arc<WorkspaceModel>) -> Self {
        Self {
            model,
            stats: RwLock::new(ReconcileStats::default()),
        }
    }

    pub fn model(&self) -> &Arc<WorkspaceModel> {
        &self.model
    }

    pub async fn stats(&self) -> ReconcileStats {
        self.stats.read().await.clone()
    }

    /// 协调一条通知
    pub async fn reconcile(&self, event: &RuntimeEvent) -> ReconcileOutcome {
        let outcome = {
            let mut table = self.model.table().await;
            self.reconcile_locked(&mut table, event)
        };

        debug!(
            event_kind = ?event.kind,
            module_id = %event.subject,
            outcome = ?outcome,
            "运行时通知已协调"
        );
        self.stats.write().await.record(outcome);
        outcome
    }

    /// 在后台任务中持续消费通知通道
    pub fn listen(self: Arc<Self>, mut events: mpsc::Receiver<RuntimeEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("事件协调器开始监听运行时通知");
            while let Some(event) = events.recv().await {
                self.reconcile(&event).await;
            }
            info!("运行时通知通道已关闭，事件协调器退出");
        })
    }

    fn reconcile_locked(&self, table: &mut UnitTable, event: &RuntimeEvent) -> ReconcileOutcome {
        let Some(project) = self.locate(table, event) else {
            return ReconcileOutcome::Ignored;
        };
        let Some(unit) = table.get_mut(&project) else {
            error!(project = %project, "定位到的模块单元不存在");
            return ReconcileOutcome::Ignored;
        };

        if unit.is_in_flight() {
            if let Some(outcome) = Self::continue_transition(unit, event.kind) {
                if outcome == ReconcileOutcome::Committed && unit.state() == State::Uninstalled {
                    if let Err(e) = table.detach(&project) {
                        error!(project = %project, error = %e, "清除模块句柄失败");
                    }
                }
                return outcome;
            }
            warn!(
                project = %project,
                transition = ?unit.transition(),
                event_kind = ?event.kind,
                "通知与进行中的转换不符，按外部转换处理"
            );
        }

        self.apply_external(table, &project, event.kind)
    }

    /// 找到通知对应的单元，必要时关联句柄或创建新单元
    fn locate(&self, table: &mut UnitTable, event: &RuntimeEvent) -> Option<ProjectId> {
        if let Some(project) = table.project_of(&event.subject) {
            return Some(project.clone());
        }

        if let Some(origin) = &event.origin {
            if table.get(origin).is_some() {
                if let Err(e) = table.attach(origin, event.subject.clone()) {
                    error!(project = %origin, error = %e, "关联模块句柄失败");
                    return None;
                }
                debug!(project = %origin, module_id = %event.subject, "模块句柄已关联");
                return Some(origin.clone());
            }
        }

        if event.kind == RuntimeEventKind::Uninstalled {
            debug!(module_id = %event.subject, "忽略未知模块的卸载通知");
            return None;
        }

        // 运行时中出现了工作区不知道的模块
        let project = event
            .origin
            .clone()
            .unwrap_or_else(|| ProjectId::new(event.subject.as_str()));
        let metadata = self.model.metadata();
        let (policy, activated) = if metadata.projects().contains(&project) {
            (
                metadata.activation_policy(&project),
                metadata.is_enrolled(&project),
            )
        } else {
            (ActivationPolicy::Eager, false)
        };

        let mut unit = ModuleUnit::new(project.clone(), policy, activated);
        unit.attach_module(event.subject.clone());
        table.insert(unit);
        info!(project = %project, module_id = %event.subject, "为外部安装的模块创建单元");
        Some(project)
    }

    /// 把通知作为进行中转换的一步处理；通知不属于该转换时返回 `None`
    fn continue_transition(unit: &mut ModuleUnit, kind: RuntimeEventKind) -> Option<ReconcileOutcome> {
        let transition = unit.transition();
        let settle = unit.settle_state();

        if is_terminal(transition, kind, settle) {
            unit.advance(settle.unwrap_or_else(|| kind.implied_state()));
            return Some(match unit.commit() {
                Ok(()) => {
                    debug!(project = %unit.project(), state = ?unit.state(), "转换已提交");
                    ReconcileOutcome::Committed
                }
                Err(e) => {
                    error!(project = %unit.project(), error = %e, "提交转换失败");
                    ReconcileOutcome::Inconsistent
                }
            });
        }

        if is_intermediate(transition, kind, settle) {
            unit.advance(kind.implied_state());
            return Some(ReconcileOutcome::Advanced);
        }

        if transition == Transition::Start && kind == RuntimeEventKind::Stopped {
            warn!(project = %unit.project(), "启动未完成即停止，回滚转换");
            unit.rollback();
            unit.set_error(TransitionError::Incomplete);
            return Some(ReconcileOutcome::Incomplete);
        }

        None
    }

    /// 合成外部转换
    fn apply_external(
        &self,
        table: &mut UnitTable,
        project: &ProjectId,
        kind: RuntimeEventKind,
    ) -> ReconcileOutcome {
        let Some(unit) = table.get_mut(project) else {
            return ReconcileOutcome::Ignored;
        };

        if kind != RuntimeEventKind::Uninstalled {
            unit.external(kind, None);
            debug!(project = %project, state = ?unit.state(), "外部转换");
            return ReconcileOutcome::External;
        }

        if self.model.is_workspace_active() {
            // 工作区仍需要该模块：保留句柄用于诊断
            unit.external(kind, Some(TransitionError::Uninstall));
            warn!(project = %project, "模块在工作区活动时被外部卸载");
        } else {
            unit.external(kind, None);
            if let Err(e) = table.detach(project) {
                error!(project = %project, error = %e, "清除模块句柄失败");
            }
            debug!(project = %project, "模块已被外部卸载");
        }
        ReconcileOutcome::External
    }
}

/// 通知是否为转换的终结步骤
fn is_terminal(transition: Transition, kind: RuntimeEventKind, settle: Option<State>) -> bool {
    use RuntimeEventKind as K;
    match transition {
        Transition::Install => kind == K::Installed,
        Transition::Uninstall => kind == K::Uninstalled,
        // 懒加载模块的解析经 Resolved 链入 Starting，以 LazyActivation 结束
        Transition::Resolve if settle == Some(State::Starting) => kind == K::LazyActivation,
        Transition::Resolve => kind == K::Resolved,
        Transition::Start => kind == K::Started,
        Transition::Stop => kind == K::Stopped,
        Transition::Update => kind == K::Updated,
        Transition::Refresh => {
            matches!(kind, K::Resolved | K::Unresolved) && settle == Some(kind.implied_state())
        }
        _ => false,
    }
}

/// 通知是否为转换的中间步骤
fn is_intermediate(transition: Transition, kind: RuntimeEventKind, settle: Option<State>) -> bool {
    use RuntimeEventKind as K;
    match transition {
        Transition::Resolve => kind == K::Resolved && settle == Some(State::Starting),
        Transition::Uninstall | Transition::Update | Transition::Refresh => kind == K::Unresolved,
        Transition::Start => matches!(kind, K::Starting | K::LazyActivation | K::Stopping),
        Transition::Stop => kind == K::Stopping,
        _ => false,
    }
}

#[async_trait]
impl RuntimeListener for EventReconciler {
    async fn on_runtime_event(&self, event: RuntimeEvent) {
        self.reconcile(&event).await;
    }
}

/// 把通知转发到通道，由 [`EventReconciler::listen`] 异步消费
pub struct ChannelListener {
    sender: mpsc::Sender<RuntimeEvent>,
}

impl ChannelListener {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<RuntimeEvent>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl RuntimeListener for ChannelListener {
    async fn on_runtime_event(&self, event: RuntimeEvent) {
        if let Err(e) = self.sender.send(event).await {
            warn!(error = %e, "通知通道已关闭，丢弃通知");
        }
    }
}
