//! 工作区内核 SDK
//!
//! [`WorkspaceKernel`] 把工作区模型、事件协调器和模块驱动器组装在一起，
//! 是对外的主要入口。
//!
//! # 示例
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
//!     let (mut kernel, _runtime) =
//!         WorkspaceKernel::with_memory_runtime(WorkspaceConfig::default(), Arc::new(metadata)).await?;
//!     kernel.start().await?;
//!
//!     let report = kernel.activate_projects(&[ProjectId::from("app")]).await?;
//!     println!("已激活: {:?}", report.processed);
//!
//!     kernel.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::core::WorkspaceConfig;
use crate::dependency::{Closure, OperationCategory, ProjectMetadata, Scope, StaticProjectMetadata};
use crate::module::{
    DriveReport, EventReconciler, InMemoryRuntime, ModuleDriver, ModuleRuntime, ModuleUnit,
    ProjectId, WorkspaceModel,
};
use crate::utils::logger::{LogGuard, Logger, LoggerConfig};
use crate::utils::{CoreError, Result};

/// 内核状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    /// 已创建，尚未启动
    Initialized,
    Running,
    Stopped,
}

impl KernelState {
    pub fn can_start(&self) -> bool {
        matches!(self, KernelState::Initialized | KernelState::Stopped)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, KernelState::Running)
    }
}

/// 工作区内核
///
/// # 生命周期
///
/// 1. `new()` - 组装各组件
/// 2. `start()` - 登记所有项目，工作区进入活动状态
/// 3. `shutdown()` - 停止运行中的模块，工作区退出活动状态
pub struct WorkspaceKernel {
    state: Arc<RwLock<KernelState>>,
    model: Arc<WorkspaceModel>,
    reconciler: Arc<EventReconciler>,
    driver: ModuleDriver,
}

impl WorkspaceKernel {
    /// 使用给定的运行时创建内核
    ///
    /// 调用方负责把 [`reconciler`](Self::reconciler) 订阅到运行时的通知上。
    pub fn new(
        config: WorkspaceConfig,
        metadata: Arc<dyn ProjectMetadata>,
        runtime: Arc<dyn ModuleRuntime>,
    ) -> Result<Self> {
        info!("初始化工作区内核 v{}", crate::VERSION);

        let model = Arc::new(WorkspaceModel::new(config, metadata)?);
        debug!("工作区模型初始化完成");

        let reconciler = Arc::new(EventReconciler::new(model.clone()));
        let driver = ModuleDriver::new(model.clone(), runtime);

        Ok(Self {
            state: Arc::new(RwLock::new(KernelState::Initialized)),
            model,
            reconciler,
            driver,
        })
    }

    /// 使用内存运行时创建内核，协调器和解析闸门已接好
    pub async fn with_memory_runtime(
        config: WorkspaceConfig,
        metadata: Arc<dyn ProjectMetadata>,
    ) -> Result<(Self, Arc<InMemoryRuntime>)> {
        let runtime = Arc::new(InMemoryRuntime::new(metadata.clone()));
        let kernel = Self::new(config, metadata, runtime.clone())?;

        runtime.subscribe(kernel.reconciler.clone()).await;
        let gate = kernel.model.resolution_gate();
        runtime
            .set_resolver_veto(Arc::new(move |project: &ProjectId| !gate.allows(project)))
            .await;

        Ok((kernel, runtime))
    }

    /// 从配置文件和工作区清单创建使用内存运行时的内核
    pub async fn from_files(
        config_path: impl AsRef<Path>,
        manifest_path: impl AsRef<Path>,
    ) -> Result<(Self, Arc<InMemoryRuntime>)> {
        let config = WorkspaceConfig::from_file(config_path.as_ref()).await?;
        let metadata = StaticProjectMetadata::from_file(manifest_path).await?;
        Self::with_memory_runtime(config, Arc::new(metadata)).await
    }

    /// 按工作区配置初始化日志系统
    ///
    /// 返回的守卫需保持存活；重复初始化返回错误。
    pub fn init_logging(config: &WorkspaceConfig) -> Result<LogGuard> {
        Logger::init(LoggerConfig::from_log_config(&config.logging))
    }

    /// 启动内核
    pub async fn start(&mut self) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.can_start() {
            return Err(CoreError::InitFailed(format!(
                "内核当前状态 {:?} 不允许启动",
                *state
            )));
        }

        let projects = self.model.register_all().await?;
        self.model.set_workspace_active(true);
        *state = KernelState::Running;

        info!(projects = projects.len(), "工作区内核已启动");
        Ok(())
    }

    /// 关闭内核：停止所有运行中的模块
    pub async fn shutdown(&mut self) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.is_running() {
            return Ok(());
        }

        self.model.set_workspace_active(false);
        let started: Vec<ProjectId> = self
            .model
            .units()
            .await
            .into_iter()
            .filter(|u| u.state().is_started())
            .map(|u| u.project().clone())
            .collect();
        if !started.is_empty() {
            let report = self.driver.stop_modules(&started).await?;
            debug!(stopped = report.processed.len(), "运行中的模块已停止");
        }

        *state = KernelState::Stopped;
        info!("工作区内核已关闭");
        Ok(())
    }

    pub async fn state(&self) -> KernelState {
        *self.state.read().await
    }

    // ==================== 工作区操作 ====================

    pub async fn activate_projects(&self, projects: &[ProjectId]) -> Result<DriveReport> {
        self.driver.activate_projects(projects).await
    }

    pub async fn deactivate_projects(&self, projects: &[ProjectId]) -> Result<DriveReport> {
        self.driver.deactivate_projects(projects).await
    }

    pub async fn start_modules(&self, projects: &[ProjectId]) -> Result<DriveReport> {
        self.driver.start_modules(projects).await
    }

    pub async fn stop_modules(&self, projects: &[ProjectId]) -> Result<DriveReport> {
        self.driver.stop_modules(projects).await
    }

    pub async fn refresh_projects(&self, projects: &[ProjectId]) -> Result<DriveReport> {
        self.driver.refresh_projects(projects).await
    }

    pub async fn update_projects(&self, projects: &[ProjectId]) -> Result<DriveReport> {
        self.driver.update_projects(projects).await
    }

    /// 计算闭包（不执行任何操作）
    pub async fn compute_closure(
        &self,
        category: OperationCategory,
        seed: &[ProjectId],
        scope: Scope,
    ) -> Result<Closure<ProjectId>> {
        self.model.compute_closure(category, seed, scope).await
    }

    pub async fn unit(&self, project: &ProjectId) -> Option<ModuleUnit> {
        self.model.unit(project).await
    }

    pub async fn units(&self) -> Vec<ModuleUnit> {
        self.model.units().await
    }

    // ==================== 组件访问 ====================

    pub fn model(&self) -> &Arc<WorkspaceModel> {
        &self.model
    }

    pub fn reconciler(&self) -> &Arc<EventReconciler> {
        &self.reconciler
    }

    pub fn driver(&self) -> &ModuleDriver {
        &self.driver
    }
}
