//! API 模块
//!
//! 对外提供的 SDK 接口。
//!
//! - `sdk`: [`WorkspaceKernel`] 主接口，组装工作区模型、事件协调器和模块驱动器

pub mod sdk;

pub use sdk::{KernelState, WorkspaceKernel};
