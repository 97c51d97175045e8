//! 核心模块
//!
//! 包含工作区配置。

pub mod config;

pub use config::{ClosureConfig, LogConfig, WorkspaceConfig, WorkspaceConfigBuilder};
