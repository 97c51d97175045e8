//! 工作区配置
//!
//! 定义工作区内核的配置结构和加载逻辑：每类操作的依赖闭包偏好、
//! 工作区激活标志以及日志配置。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::dependency::{ClosureKind, OperationCategory};
use crate::utils::{CoreError, Result};

/// 依赖闭包偏好
///
/// 每个操作类别选择一种闭包类型，合法组合见 [`OperationCategory::legal_kinds`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureConfig {
    /// 激活项目
    #[serde(default = "default_activate_project")]
    pub activate_project: ClosureKind,

    /// 停用项目
    #[serde(default = "default_deactivate_project")]
    pub deactivate_project: ClosureKind,

    /// 激活（启动）模块
    #[serde(default = "default_activate_module")]
    pub activate_module: ClosureKind,

    /// 停用（停止）模块
    #[serde(default = "default_deactivate_module")]
    pub deactivate_module: ClosureKind,
}

fn default_activate_project() -> ClosureKind {
    OperationCategory::ActivateProject.default_kind()
}

fn default_deactivate_project() -> ClosureKind {
    OperationCategory::DeactivateProject.default_kind()
}

fn default_activate_module() -> ClosureKind {
    OperationCategory::ActivateModule.default_kind()
}

fn default_deactivate_module() -> ClosureKind {
    OperationCategory::DeactivateModule.default_kind()
}

impl Default for ClosureConfig {
    fn default() -> Self {
        Self {
            activate_project: default_activate_project(),
            deactivate_project: default_deactivate_project(),
            activate_module: default_activate_module(),
            deactivate_module: default_deactivate_module(),
        }
    }
}

impl ClosureConfig {
    /// 获取某类操作选择的闭包类型
    pub fn kind_for(&self, category: OperationCategory) -> ClosureKind {
        match category {
            OperationCategory::ActivateProject => self.activate_project,
            OperationCategory::DeactivateProject => self.deactivate_project,
            OperationCategory::ActivateModule => self.activate_module,
            OperationCategory::DeactivateModule => self.deactivate_module,
        }
    }

    /// 设置某类操作的闭包类型（不做校验，校验见 [`ClosureConfig::validate`]）
    pub fn set_kind(&mut self, category: OperationCategory, kind: ClosureKind) {
        match category {
            OperationCategory::ActivateProject => self.activate_project = kind,
            OperationCategory::DeactivateProject => self.deactivate_project = kind,
            OperationCategory::ActivateModule => self.activate_module = kind,
            OperationCategory::DeactivateModule => self.deactivate_module = kind,
        }
    }

    /// 校验每个类别的选择都合法
    pub fn validate(&self) -> Result<()> {
        for category in OperationCategory::ALL {
            let kind = self.kind_for(category);
            if !category.accepts(kind) {
                return Err(CoreError::IllegalClosureKind { category, kind });
            }
        }
        Ok(())
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 工作区配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 依赖闭包偏好
    #[serde(default)]
    pub closure: ClosureConfig,

    /// 工作区是否处于激活状态
    ///
    /// 激活时，外部卸载受管模块会在单元上记录 UNINSTALL 诊断码。
    #[serde(default = "default_true")]
    pub workspace_active: bool,

    /// 是否容忍自引用（模块满足自己的需求）
    #[serde(default = "default_true")]
    pub allow_self_reference: bool,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,
}

fn default_true() -> bool {
    true
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            closure: ClosureConfig::default(),
            workspace_active: true,
            allow_self_reference: true,
            logging: LogConfig::default(),
        }
    }
}

impl WorkspaceConfig {
    /// 创建配置构建器
    pub fn builder() -> WorkspaceConfigBuilder {
        WorkspaceConfigBuilder::new()
    }

    /// 从文件加载配置（`.json` 按 JSON 解析，其余按 YAML 解析）
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;

        let mut config: WorkspaceConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.validate()?;
        config.config_path = Some(path);
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        self.closure.validate()
    }

    /// 合并另一个配置（只覆盖非默认值）
    pub fn merge(&mut self, other: WorkspaceConfig) {
        let defaults = ClosureConfig::default();
        for category in OperationCategory::ALL {
            let kind = other.closure.kind_for(category);
            if kind != defaults.kind_for(category) {
                self.closure.set_kind(category, kind);
            }
        }
        if !other.workspace_active {
            self.workspace_active = false;
        }
        if !other.allow_self_reference {
            self.allow_self_reference = false;
        }
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct WorkspaceConfigBuilder {
    config: WorkspaceConfig,
}

impl WorkspaceConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: WorkspaceConfig::default(),
        }
    }

    /// 设置某类操作的闭包类型
    pub fn closure(mut self, category: OperationCategory, kind: ClosureKind) -> Self {
        self.config.closure.set_kind(category, kind);
        self
    }

    /// 设置工作区激活标志
    pub fn workspace_active(mut self, active: bool) -> Self {
        self.config.workspace_active = active;
        self
    }

    /// 设置是否容忍自引用
    pub fn allow_self_reference(mut self, allow: bool) -> Self {
        self.config.allow_self_reference = allow;
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 构建配置
    pub fn build(self) -> WorkspaceConfig {
        self.config
    }
}
