//! 模块单元
//!
//! 每个受管项目对应一个 [`ModuleUnit`]，记录当前与上一次稳定的
//! {状态, 转换, 诊断码}、挂起的转换集合以及是否有进行中的转换。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::runtime::RuntimeEventKind;
use super::state::{Command, State, Step, Transition, TransitionError, UnitContext};
use crate::dependency::ActivationPolicy;
use crate::utils::{CoreError, Result};

/// 工作区项目标识（外部不透明键）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ProjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// 运行时模块句柄（安装成功后由运行时分配）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// 模块单元
///
/// 进行中（`in_flight`）时，`prev_*` 描述最近一次稳定配置，`rollback` 可恢复；
/// `commit` 使当前值成为新的稳定配置。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleUnit {
    project: ProjectId,
    module_id: Option<ModuleId>,
    activated: bool,
    policy: ActivationPolicy,
    state: State,
    prev_state: State,
    transition: Transition,
    prev_transition: Transition,
    error: TransitionError,
    prev_error: TransitionError,
    pending: BTreeSet<Transition>,
    in_flight: bool,
    /// 进行中转换的提交状态
    settle: Option<State>,
}

impl ModuleUnit {
    /// 创建无状态单元（项目刚成为受管模块）
    pub fn new(project: ProjectId, policy: ActivationPolicy, activated: bool) -> Self {
        Self {
            project,
            module_id: None,
            activated,
            policy,
            state: State::Stateless,
            prev_state: State::Stateless,
            transition: Transition::NoTransition,
            prev_transition: Transition::NoTransition,
            error: TransitionError::NoError,
            prev_error: TransitionError::NoError,
            pending: BTreeSet::new(),
            in_flight: false,
            settle: None,
        }
    }

    // ==================== 访问器 ====================

    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    pub fn module_id(&self) -> Option<&ModuleId> {
        self.module_id.as_ref()
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    pub fn policy(&self) -> ActivationPolicy {
        self.policy
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn prev_state(&self) -> State {
        self.prev_state
    }

    pub fn transition(&self) -> Transition {
        self.transition
    }

    pub fn prev_transition(&self) -> Transition {
        self.prev_transition
    }

    pub fn error(&self) -> TransitionError {
        self.error
    }

    pub fn prev_error(&self) -> TransitionError {
        self.prev_error
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// 进行中转换将要提交的状态
    pub fn settle_state(&self) -> Option<State> {
        self.settle
    }

    /// 启动已发出、正在等待运行时按需加载
    pub fn is_lazy_waiting(&self) -> bool {
        self.in_flight
            && self.transition == Transition::Start
            && self.state == State::Starting
            && self.settle == Some(State::Active)
    }

    pub fn context(&self) -> UnitContext {
        UnitContext {
            policy: self.policy,
            activated: self.activated,
        }
    }

    // ==================== 属性修改 ====================

    pub fn set_activated(&mut self, activated: bool) {
        self.activated = activated;
    }

    pub fn set_policy(&mut self, policy: ActivationPolicy) {
        self.policy = policy;
    }

    pub fn set_error(&mut self, error: TransitionError) {
        self.error = error;
    }

    pub fn attach_module(&mut self, module_id: ModuleId) {
        self.module_id = Some(module_id);
    }

    pub fn detach_module(&mut self) -> Option<ModuleId> {
        self.module_id.take()
    }

    // ==================== 挂起转换 ====================

    pub fn add_pending(&mut self, transition: Transition) -> bool {
        self.pending.insert(transition)
    }

    pub fn remove_pending(&mut self, transition: Transition) -> bool {
        self.pending.remove(&transition)
    }

    pub fn has_pending(&self, transition: Transition) -> bool {
        self.pending.contains(&transition)
    }

    pub fn pending(&self) -> Vec<Transition> {
        self.pending.iter().copied().collect()
    }

    // ==================== 转换协议 ====================

    /// 开始一次转换
    ///
    /// 当前状态不提供该操作时返回 `InvalidTransition`，单元保持不变。
    /// 启动进行中时再次启动不做任何事，由事件协调器完成真正的转换。
    pub fn begin(&mut self, command: Command) -> Result<Step> {
        let attempted = command.transition();
        if command == Command::Start && self.in_flight && self.transition == Transition::Start {
            return Ok(Step::Unchanged);
        }
        let step = self
            .state
            .plan(command, self.context())
            .ok_or_else(|| self.invalid_transition(attempted))?;

        let (enter, settle) = match step {
            Step::Unchanged => return Ok(step),
            Step::Enter { enter, settle } => (enter, settle),
        };

        // 停止命令取代懒加载等待：等待状态成为稳定配置
        if self.is_lazy_waiting() && command == Command::Stop {
            self.in_flight = false;
            self.settle = None;
        }

        if self.in_flight {
            return Err(CoreError::TransitionInProgress {
                subject: self.project.clone(),
                transition: self.transition,
            });
        }

        self.prev_state = self.state;
        self.prev_transition = self.transition;
        self.prev_error = self.error;
        self.state = enter;
        self.transition = attempted;
        self.error = TransitionError::NoError;
        self.in_flight = true;
        self.settle = Some(settle);
        Ok(step)
    }

    /// 多步命令的中间步骤：只更新状态
    pub fn advance(&mut self, state: State) {
        self.state = state;
    }

    /// 提交进行中的转换
    ///
    /// 校验状态表：当前状态必须可由上一稳定状态经当前转换到达。
    pub fn commit(&mut self) -> Result<()> {
        if !self.in_flight {
            return Err(CoreError::Internal(format!(
                "模块 '{}' 没有进行中的转换可提交",
                self.project
            )));
        }
        if !self.prev_state.permits(self.transition, self.state) {
            return Err(CoreError::InconsistentState {
                subject: self.project.clone(),
                from: self.prev_state,
                transition: self.transition,
                to: self.state,
            });
        }
        self.in_flight = false;
        self.settle = None;
        Ok(())
    }

    /// 回滚到上一稳定配置，没有进行中的转换时不做任何事
    pub fn rollback(&mut self) {
        if !self.in_flight {
            return;
        }
        self.state = self.prev_state;
        self.transition = self.prev_transition;
        self.error = self.prev_error;
        self.in_flight = false;
        self.settle = None;
    }

    /// 外部转换：强制采用通知报告的状态，标记为 External
    ///
    /// 只有携带诊断码时才覆盖单元上已有的错误码。
    pub fn external(&mut self, kind: RuntimeEventKind, diagnostic: Option<TransitionError>) {
        if self.in_flight {
            self.rollback();
        }
        self.prev_state = self.state;
        self.prev_transition = self.transition;
        self.prev_error = self.error;
        self.state = self.state.external(kind);
        self.transition = Transition::External;
        if let Some(error) = diagnostic {
            self.error = error;
        }
    }

    /// 构造包含完整诊断信息的无效转换错误
    pub fn invalid_transition(&self, attempted: Transition) -> CoreError {
        CoreError::InvalidTransition {
            subject: self.project.clone(),
            attempted,
            state: self.state,
            transition: self.transition,
            prev_state: self.prev_state,
            prev_transition: self.prev_transition,
        }
    }
}
