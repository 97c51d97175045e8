//! 模块生命周期状态机
//!
//! 状态是一个封闭的枚举，每个操作对应一个方法，方法内部按当前状态匹配：
//! 当前状态不提供的操作返回 `None`，由调用方统一报告为无效转换。
//!
//! ```text
//! Stateless ─install→ Installed ─resolve→ Resolved ─start→ Active
//!                         ↑                  │  └─start(lazy)→ Starting ─(按需加载)→ Active
//!                         └────refresh───────┘
//! Installed ─resolve(lazy)→ Starting ─start→ Starting ─(按需加载)→ Active
//! Active / Starting ─stop→ Stopping → Resolved
//! Installed / Resolved ─uninstall→ Uninstalled ─install→ Installed
//! ```

use serde::{Deserialize, Serialize};

use crate::dependency::ActivationPolicy;
use crate::module::runtime::RuntimeEventKind;

/// 模块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// 尚无运行时模块（唯一的入口状态）
    #[default]
    Stateless,
    /// 已从运行时卸载
    Uninstalled,
    /// 已安装，未解析
    Installed,
    /// 已解析
    Resolved,
    /// 懒加载等待中（已请求启动，等待运行时按需激活）
    Starting,
    /// 运行中
    Active,
    /// 正在停止
    Stopping,
}

/// 状态转换
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    #[default]
    NoTransition,
    Install,
    Uninstall,
    Resolve,
    Start,
    Stop,
    Update,
    Refresh,
    /// 构建（只作为挂起标记使用）
    Build,
    /// 非本内核发起的转换
    External,
}

/// 记录在单元上的转换诊断码
///
/// 这些不是抛出的错误，而是留给驱动方检查的数据。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionError {
    #[default]
    NoError,
    /// 参与依赖环
    Cycle,
    /// 依赖或被依赖的模块有错误
    Dependency,
    /// 构建失败或构建未完成
    Build,
    /// 与已安装模块的符号名重复
    Duplicate,
    /// 转换未完成（例如启动代码抛出异常）
    Incomplete,
    /// 工作区仍需要时被外部卸载
    Uninstall,
}

impl TransitionError {
    pub fn is_error(self) -> bool {
        self != TransitionError::NoError
    }
}

/// 驱动方向状态机发出的命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Install,
    Uninstall,
    /// 解析；调用方按模块的激活策略选择结果：
    /// 立即策略停在 Resolved，懒加载策略继续进入 Starting
    Resolve(ActivationPolicy),
    Start,
    Stop,
    Update,
    Refresh,
}

impl Command {
    /// 命令对应的转换
    pub fn transition(self) -> Transition {
        match self {
            Command::Install => Transition::Install,
            Command::Uninstall => Transition::Uninstall,
            Command::Resolve(_) => Transition::Resolve,
            Command::Start => Transition::Start,
            Command::Stop => Transition::Stop,
            Command::Update => Transition::Update,
            Command::Refresh => Transition::Refresh,
        }
    }
}

/// 计算转换目标时需要的单元上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitContext {
    pub policy: ActivationPolicy,
    pub activated: bool,
}

/// 一次合法操作的计划
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// 开始转换：`enter` 是开始时写入单元的状态，
    /// `settle` 是终结通知到达后提交的状态
    Enter { enter: State, settle: State },
    /// 合法但无需任何动作
    Unchanged,
}

impl Step {
    fn to(state: State) -> Option<Step> {
        Some(Step::Enter {
            enter: state,
            settle: state,
        })
    }
}

impl State {
    /// 安装：仅 Stateless 与 Uninstalled 接受
    pub fn install(self) -> Option<Step> {
        match self {
            State::Stateless | State::Uninstalled => Step::to(State::Installed),
            _ => None,
        }
    }

    /// 卸载：Resolved 经运行时的 Installed 中间步骤到达 Uninstalled
    pub fn uninstall(self) -> Option<Step> {
        match self {
            State::Installed | State::Resolved => Step::to(State::Uninstalled),
            _ => None,
        }
    }

    pub fn resolve(self, policy: ActivationPolicy) -> Option<Step> {
        match (self, policy) {
            (State::Installed, ActivationPolicy::Eager) => Step::to(State::Resolved),
            (State::Installed, ActivationPolicy::Lazy) => Step::to(State::Starting),
            _ => None,
        }
    }

    /// 启动
    ///
    /// 懒加载模块先进入 Starting，直到运行时按需加载后才提交为 Active。
    /// 已停在 Starting 的模块（懒加载解析的结果）同样等待按需加载。
    pub fn start(self, policy: ActivationPolicy) -> Option<Step> {
        match (self, policy) {
            (State::Resolved, ActivationPolicy::Eager) => Step::to(State::Active),
            (State::Resolved, ActivationPolicy::Lazy) | (State::Starting, _) => {
                Some(Step::Enter {
                    enter: State::Starting,
                    settle: State::Active,
                })
            }
            _ => None,
        }
    }

    /// 停止：一条命令，两条通知（Stopping, Stopped）
    pub fn stop(self) -> Option<Step> {
        match self {
            State::Active | State::Starting => Step::to(State::Resolved),
            _ => None,
        }
    }

    pub fn update(self) -> Option<Step> {
        match self {
            State::Installed | State::Resolved => Step::to(State::Installed),
            _ => None,
        }
    }

    /// 刷新：先回到 Installed 再重新解析；未激活的模块被拒绝解析，停在 Installed
    pub fn refresh(self, activated: bool) -> Option<Step> {
        match self {
            State::Installed | State::Resolved if activated => Step::to(State::Resolved),
            State::Installed | State::Resolved => Step::to(State::Installed),
            _ => None,
        }
    }

    /// 外部转换：强制采用运行时通知所报告的状态
    pub fn external(self, kind: RuntimeEventKind) -> State {
        kind.implied_state()
    }

    /// 按命令分派到对应的状态操作
    pub fn plan(self, command: Command, ctx: UnitContext) -> Option<Step> {
        match command {
            Command::Install => self.install(),
            Command::Uninstall => self.uninstall(),
            Command::Resolve(policy) => self.resolve(policy),
            Command::Start => self.start(ctx.policy),
            Command::Stop => self.stop(),
            Command::Update => self.update(),
            Command::Refresh => self.refresh(ctx.activated),
        }
    }

    /// 当前状态提供的操作
    pub fn legal_transitions(self) -> &'static [Transition] {
        match self {
            State::Stateless | State::Uninstalled => &[Transition::Install],
            State::Installed => &[
                Transition::Uninstall,
                Transition::Resolve,
                Transition::Update,
                Transition::Refresh,
            ],
            State::Resolved => &[
                Transition::Uninstall,
                Transition::Start,
                Transition::Update,
                Transition::Refresh,
            ],
            State::Starting => &[Transition::Start, Transition::Stop],
            State::Active => &[Transition::Stop],
            State::Stopping => &[],
        }
    }

    /// 状态表：`to` 是否可以从 `self` 经 `transition` 到达
    pub fn permits(self, transition: Transition, to: State) -> bool {
        let settles_at = |step: Option<Step>| match step {
            Some(Step::Enter { settle, .. }) => settle == to,
            Some(Step::Unchanged) => self == to,
            None => false,
        };
        let policies = [ActivationPolicy::Eager, ActivationPolicy::Lazy];

        match transition {
            Transition::External => true,
            Transition::NoTransition | Transition::Build => self == to,
            Transition::Install => settles_at(self.install()),
            Transition::Uninstall => settles_at(self.uninstall()),
            Transition::Resolve => policies.iter().any(|p| settles_at(self.resolve(*p))),
            Transition::Start => policies.iter().any(|p| settles_at(self.start(*p))),
            Transition::Stop => settles_at(self.stop()),
            Transition::Update => settles_at(self.update()),
            Transition::Refresh => [true, false].iter().any(|a| settles_at(self.refresh(*a))),
        }
    }

    /// 模块是否处于运行或等待运行中
    pub fn is_started(self) -> bool {
        matches!(self, State::Starting | State::Active)
    }

    /// 运行时中是否存在该模块
    pub fn is_installed(self) -> bool {
        !matches!(self, State::Stateless | State::Uninstalled)
    }
}
