//! 模块生命周期模块
//!
//! 包含模块生命周期管理的核心组件：
//! - 状态机与转换表
//! - 模块单元
//! - 运行时接口与内存运行时
//! - 工作区模型、事件协调器和模块驱动器

pub mod driver;
pub mod reconciler;
pub mod runtime;
pub mod state;
pub mod unit;
pub mod workspace;

// 重导出常用类型
pub use driver::{DriveFailure, DriveReport, ModuleDriver};
pub use reconciler::{ChannelListener, EventReconciler, ReconcileOutcome, ReconcileStats};
pub use runtime::memory::{ResolverVeto, RuntimeCall};
pub use runtime::{InMemoryRuntime, ModuleRuntime, RuntimeEvent, RuntimeEventKind, RuntimeListener};
pub use state::{Command, State, Step, Transition, TransitionError, UnitContext};
pub use unit::{ModuleId, ModuleUnit, ProjectId};
pub use workspace::{ResolutionGate, WorkspaceModel};
