//! 工作区内核错误类型定义
//!
//! 本模块定义了内核中使用的所有错误类型。
//!
//! 注意：单元上记录的 [`TransitionError`](crate::module::TransitionError)
//! 诊断码不属于这里，它们是数据而不是错误。

use thiserror::Error;

use crate::dependency::{ClosureKind, CycleReport, OperationCategory};
use crate::module::{ModuleId, ProjectId, State, Transition};

/// 工作区内核核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 依赖闭包错误 ====================

    /// 循环依赖（携带本次排序中检测到的所有环）
    #[error("检测到循环依赖: {0}")]
    CircularDependency(CycleReport),

    /// 闭包类型对该操作类别不合法
    #[error("闭包类型 {kind:?} 不适用于操作类别 {category:?}")]
    IllegalClosureKind {
        category: OperationCategory,
        kind: ClosureKind,
    },

    // ==================== 状态机错误 ====================

    /// 当前状态不允许该操作
    #[error(
        "无效的状态转换: '{subject}' 尝试 {attempted:?}，当前 {state:?}/{transition:?}，之前 {prev_state:?}/{prev_transition:?}"
    )]
    InvalidTransition {
        subject: ProjectId,
        attempted: Transition,
        state: State,
        transition: Transition,
        prev_state: State,
        prev_transition: Transition,
    },

    /// 单元已有进行中的转换
    #[error("模块 '{subject}' 正在执行 {transition:?}，不能开始新的转换")]
    TransitionInProgress {
        subject: ProjectId,
        transition: Transition,
    },

    /// 内部一致性缺陷：状态不可由前一状态经该转换到达
    #[error("状态不一致: '{subject}' 无法经 {transition:?} 从 {from:?} 到达 {to:?}")]
    InconsistentState {
        subject: ProjectId,
        from: State,
        transition: Transition,
        to: State,
    },

    // ==================== 模块管理错误 ====================

    /// 工作区中没有该项目的模块单元
    #[error("模块单元未找到: '{0}'")]
    UnitNotFound(ProjectId),

    /// 项目元数据中没有该项目
    #[error("项目未找到: '{0}'")]
    ProjectNotFound(ProjectId),

    /// 模块尚未安装到运行时
    #[error("模块未安装: '{0}'")]
    ModuleNotInstalled(ProjectId),

    /// 运行时调用失败
    #[error("运行时操作失败: '{module}' - {reason}")]
    Runtime { module: ModuleId, reason: String },

    /// 无效的项目元数据
    #[error("无效的项目元数据: {0}")]
    InvalidMetadata(String),

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue { key: String, reason: String },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 版本解析错误
    #[error("版本解析错误: {0}")]
    VersionParse(#[from] semver::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 内核操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误码常量
pub mod error_code {
    // 闭包错误 (CLOSURE-xxx)
    pub const CLOSURE_CYCLE: &str = "CLOSURE-001";
    pub const CLOSURE_ILLEGAL_KIND: &str = "CLOSURE-002";

    // 状态机错误 (STATE-xxx)
    pub const STATE_INVALID_TRANSITION: &str = "STATE-001";
    pub const STATE_IN_PROGRESS: &str = "STATE-002";
    pub const STATE_INCONSISTENT: &str = "STATE-003";

    // 模块错误 (MODULE-xxx)
    pub const MODULE_UNIT_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_PROJECT_NOT_FOUND: &str = "MODULE-002";
    pub const MODULE_NOT_INSTALLED: &str = "MODULE-003";
    pub const MODULE_RUNTIME_FAILED: &str = "MODULE-004";
    pub const MODULE_INVALID_METADATA: &str = "MODULE-005";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::CircularDependency(_) => error_code::CLOSURE_CYCLE,
            CoreError::IllegalClosureKind { .. } => error_code::CLOSURE_ILLEGAL_KIND,
            CoreError::InvalidTransition { .. } => error_code::STATE_INVALID_TRANSITION,
            CoreError::TransitionInProgress { .. } => error_code::STATE_IN_PROGRESS,
            CoreError::InconsistentState { .. } => error_code::STATE_INCONSISTENT,
            CoreError::UnitNotFound(_) => error_code::MODULE_UNIT_NOT_FOUND,
            CoreError::ProjectNotFound(_) => error_code::MODULE_PROJECT_NOT_FOUND,
            CoreError::ModuleNotInstalled(_) => error_code::MODULE_NOT_INSTALLED,
            CoreError::Runtime { .. } => error_code::MODULE_RUNTIME_FAILED,
            CoreError::InvalidMetadata(_) => error_code::MODULE_INVALID_METADATA,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            _ => "UNKNOWN",
        }
    }

    /// 是否是协议违规（调用方编程缺陷，不应重试）
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidTransition { .. }
                | CoreError::TransitionInProgress { .. }
                | CoreError::InconsistentState { .. }
        )
    }

    /// 循环依赖时返回环报告
    pub fn cycle_report(&self) -> Option<&CycleReport> {
        match self {
            CoreError::CircularDependency(report) => Some(report),
            _ => None,
        }
    }
}
