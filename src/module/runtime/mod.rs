//! 模块运行时接口
//!
//! 内核不直接执行安装、解析、启动等操作，而是由驱动方调用 [`ModuleRuntime`]；
//! 运行时随后发出生命周期通知，由 [`RuntimeListener`]（即事件协调器）接收。

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::State;
use super::unit::{ModuleId, ProjectId};
use crate::utils::{generate_uuid, Result};

pub use memory::InMemoryRuntime;

/// 运行时通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeEventKind {
    Installed,
    Resolved,
    Unresolved,
    Starting,
    Started,
    Stopping,
    Stopped,
    Updated,
    Uninstalled,
    LazyActivation,
}

impl RuntimeEventKind {
    /// 通知所报告的模块状态
    pub fn implied_state(self) -> State {
        match self {
            RuntimeEventKind::Installed
            | RuntimeEventKind::Unresolved
            | RuntimeEventKind::Updated => State::Installed,
            RuntimeEventKind::Resolved | RuntimeEventKind::Stopped => State::Resolved,
            RuntimeEventKind::Starting | RuntimeEventKind::LazyActivation => State::Starting,
            RuntimeEventKind::Started => State::Active,
            RuntimeEventKind::Stopping => State::Stopping,
            RuntimeEventKind::Uninstalled => State::Uninstalled,
        }
    }
}

/// 运行时生命周期通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeEvent {
    /// 事件唯一标识
    pub event_id: String,
    /// 通知类型
    pub kind: RuntimeEventKind,
    /// 通知主体
    pub subject: ModuleId,
    /// 模块来源项目（安装通知时用于关联尚无句柄的单元）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<ProjectId>,
    /// 事件时间戳
    pub timestamp: DateTime<Utc>,
}

impl RuntimeEvent {
    pub fn new(kind: RuntimeEventKind, subject: ModuleId) -> Self {
        Self {
            event_id: generate_uuid(),
            kind,
            subject,
            origin: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_origin(mut self, origin: ProjectId) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// 模块运行时
///
/// 调用是同步完成的；运行时在调用过程中（在自己的分发线程上）发出通知。
#[async_trait]
pub trait ModuleRuntime: Send + Sync {
    /// 从项目安装模块，返回运行时分配的句柄
    async fn install(&self, project: &ProjectId) -> Result<ModuleId>;

    async fn uninstall(&self, module: &ModuleId) -> Result<()>;

    async fn resolve(&self, module: &ModuleId) -> Result<()>;

    async fn start(&self, module: &ModuleId) -> Result<()>;

    async fn stop(&self, module: &ModuleId) -> Result<()>;

    async fn update(&self, module: &ModuleId) -> Result<()>;

    async fn refresh(&self, module: &ModuleId) -> Result<()>;
}

/// 运行时通知接收者
#[async_trait]
pub trait RuntimeListener: Send + Sync {
    async fn on_runtime_event(&self, event: RuntimeEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implied_state() {
        assert_eq!(RuntimeEventKind::Stopped.implied_state(), State::Resolved);
        assert_eq!(RuntimeEventKind::LazyActivation.implied_state(), State::Starting);
        assert_eq!(RuntimeEventKind::Unresolved.implied_state(), State::Installed);
    }

    #[test]
    fn test_event_serialization() {
        let event = RuntimeEvent::new(RuntimeEventKind::LazyActivation, ModuleId::from("m1"))
            .with_origin(ProjectId::from("app"));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("lazy_activation"));
        let parsed: RuntimeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
