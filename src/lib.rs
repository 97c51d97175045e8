//! # Chips Workspace - 工作区模块内核
//!
//! 管理工作区项目对应的运行时模块，提供以下核心功能：
//!
//! - **生命周期状态机**: 每个模块单元的状态、转换和诊断码，以及合法转换表
//! - **事件协调**: 把运行时推送的生命周期通知与单元的内部预期对齐
//! - **依赖闭包**: 在项目图或模块图上计算有序闭包，检测依赖环
//! - **闭包策略**: 按操作类别选择闭包类型
//! - **配置管理**: YAML/JSON 配置与工作区清单加载
//! - **日志系统**: 结构化日志记录
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chips_workspace::{
//!     ProjectDescriptor, ProjectId, StaticProjectMetadata, WorkspaceConfig, WorkspaceKernel,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let metadata = StaticProjectMetadata::new(vec![
//!         ProjectDescriptor::new("core"),
//!         ProjectDescriptor::new("app").requires("core", "^1"),
//!     ])?;
//!
//!     // 创建并启动内核
//!     let (mut kernel, _runtime) =
//!         WorkspaceKernel::with_memory_runtime(WorkspaceConfig::default(), Arc::new(metadata)).await?;
//!     kernel.start().await?;
//!
//!     kernel.activate_projects(&[ProjectId::from("app")]).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 状态机、模块单元、运行时接口、协调器与驱动器
//! - `dependency` - 依赖图、闭包排序与闭包策略
//! - `utils` - 工具函数和错误类型
//! - `core` - 工作区配置
//! - `api` - 公共 API 接口

#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod core;
pub mod dependency;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use module::{
    ChannelListener, Command, DriveFailure, DriveReport, EventReconciler, InMemoryRuntime,
    ModuleDriver, ModuleId, ModuleRuntime, ModuleUnit, ProjectId, ReconcileOutcome,
    ReconcileStats, RuntimeEvent, RuntimeEventKind, RuntimeListener, State, Step, Transition,
    TransitionError, WorkspaceModel,
};

pub use dependency::{
    ActivationPolicy, Closure, ClosureKind, ClosurePolicy, ClosureSorter, CycleReport,
    DependencyGraph, Direction, GraphWarning, ModuleGraph, OperationCategory, ProjectDescriptor,
    ProjectGraph, ProjectMetadata, Scope, SortOptions, StaticProjectMetadata, WorkspaceManifest,
};

pub use utils::{error_code, generate_id, generate_uuid, CoreError, Result};
pub use utils::logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

pub use core::config::{ClosureConfig, LogConfig, WorkspaceConfig, WorkspaceConfigBuilder};
pub use api::sdk::{KernelState, WorkspaceKernel};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
