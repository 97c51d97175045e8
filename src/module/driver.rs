//! 模块驱动器
//!
//! 在内核之外驱动工作区操作：向策略请求有序闭包，按顺序对每个单元
//! `begin` 后调用运行时，由事件协调器根据通知完成提交。
//!
//! 状态层面的问题记录在单元上，由后续单元的处理参考（例如跳过依赖了失败模块的模块），
//! 不会中止整个闭包的执行。排序层面的问题（依赖环）中止本次操作。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::runtime::ModuleRuntime;
use super::state::{Command, State, Step, Transition, TransitionError};
use super::unit::{ModuleId, ModuleUnit, ProjectId};
use super::workspace::WorkspaceModel;
use crate::dependency::{Closure, OperationCategory, Scope};
use crate::utils::{CoreError, Result};

/// 失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriveFailure {
    pub project: ProjectId,
    pub reason: String,
}

/// 一次驱动操作的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriveReport {
    /// 已处理的项目（按处理顺序）
    pub processed: Vec<ProjectId>,
    /// 因单元上的错误而跳过的项目
    pub skipped: Vec<ProjectId>,
    /// 运行时调用失败的项目
    pub failed: Vec<DriveFailure>,
}

impl DriveReport {
    pub fn is_success(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }

    fn fail(&mut self, project: &ProjectId, error: &CoreError) {
        self.failed.push(DriveFailure {
            project: project.clone(),
            reason: error.to_string(),
        });
    }
}

/// 模块驱动器
pub struct ModuleDriver {
    model: Arc<WorkspaceModel>,
    runtime: Arc<dyn ModuleRuntime>,
}

impl ModuleDriver {
    pub fn new(model: Arc<WorkspaceModel>, runtime: Arc<dyn ModuleRuntime>) -> Self {
        Self { model, runtime }
    }

    pub fn model(&self) -> &Arc<WorkspaceModel> {
        &self.model
    }

    // ==================== 项目激活 ====================

    /// 激活项目：纳入工作区，并按提供方优先的顺序安装、解析、启动
    #[instrument(skip(self, seed), fields(seed = seed.len()))]
    pub async fn activate_projects(&self, seed: &[ProjectId]) -> Result<DriveReport> {
        for project in seed {
            self.model.register(project).await?;
        }

        let closure = self
            .closure(OperationCategory::ActivateProject, seed, Scope::All)
            .await?;
        for project in closure.iter() {
            self.model.register(project).await?;
            self.model.set_activated(project, true).await?;
        }

        let duplicates = self.duplicates(&closure).await;
        let mut report = DriveReport::default();
        let mut blocked: HashSet<ProjectId> = HashSet::new();

        for project in closure.iter() {
            if let Some(error) = self.blocking_error(project, &blocked, &duplicates).await? {
                self.model.set_error(project, error).await?;
                debug!(project = %project, error = ?error, "跳过项目");
                blocked.insert(project.clone());
                report.skipped.push(project.clone());
                continue;
            }

            match self.bring_up(project).await {
                Ok(()) => report.processed.push(project.clone()),
                Err(e) => {
                    blocked.insert(project.clone());
                    report.fail(project, &e);
                }
            }
        }

        info!(
            processed = report.processed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "项目激活完成"
        );
        Ok(report)
    }

    /// 停用项目：按依赖方优先的顺序停止，移出工作区后刷新（解析被拒绝，停在 Installed）
    #[instrument(skip(self, seed), fields(seed = seed.len()))]
    pub async fn deactivate_projects(&self, seed: &[ProjectId]) -> Result<DriveReport> {
        let closure = self
            .closure(OperationCategory::DeactivateProject, seed, Scope::Activated)
            .await?;

        let mut report = DriveReport::default();
        for project in closure.iter() {
            self.model.set_activated(project, false).await?;
            match self.tear_down(project).await {
                Ok(()) => report.processed.push(project.clone()),
                Err(e) => report.fail(project, &e),
            }
        }

        info!(processed = report.processed.len(), failed = report.failed.len(), "项目停用完成");
        Ok(report)
    }

    /// 卸载项目的模块（依赖方优先）
    pub async fn uninstall_projects(&self, seed: &[ProjectId]) -> Result<DriveReport> {
        let closure = self
            .closure(OperationCategory::DeactivateProject, seed, Scope::All)
            .await?;

        let mut report = DriveReport::default();
        for project in closure.iter() {
            let result = async {
                if self.state(project).await?.is_started() {
                    self.run(project, Command::Stop).await?;
                }
                if self.state(project).await?.is_installed() {
                    self.run(project, Command::Uninstall).await?;
                }
                Ok::<(), CoreError>(())
            }
            .await;
            match result {
                Ok(()) => report.processed.push(project.clone()),
                Err(e) => report.fail(project, &e),
            }
        }
        Ok(report)
    }

    // ==================== 模块启停 ====================

    /// 启动模块及其已激活的提供方
    pub async fn start_modules(&self, seed: &[ProjectId]) -> Result<DriveReport> {
        let closure = self
            .closure(OperationCategory::ActivateModule, seed, Scope::Activated)
            .await?;

        let mut report = DriveReport::default();
        let mut blocked = HashSet::new();
        for project in closure.iter() {
            if let Some(error) = self.blocking_error(project, &blocked, &HashSet::new()).await? {
                self.model.set_error(project, error).await?;
                blocked.insert(project.clone());
                report.skipped.push(project.clone());
                continue;
            }
            match self.bring_up(project).await {
                Ok(()) => report.processed.push(project.clone()),
                Err(e) => {
                    blocked.insert(project.clone());
                    report.fail(project, &e);
                }
            }
        }
        Ok(report)
    }

    /// 停止模块及依赖它们的模块
    pub async fn stop_modules(&self, seed: &[ProjectId]) -> Result<DriveReport> {
        let closure = self
            .closure(OperationCategory::DeactivateModule, seed, Scope::All)
            .await?;

        let mut report = DriveReport::default();
        for project in closure.iter() {
            let result = async {
                if self.state(project).await?.is_started() {
                    self.run(project, Command::Stop).await?;
                }
                Ok::<(), CoreError>(())
            }
            .await;
            match result {
                Ok(()) => report.processed.push(project.clone()),
                Err(e) => report.fail(project, &e),
            }
        }
        Ok(report)
    }

    // ==================== 刷新与更新 ====================

    /// 刷新模块：停止依赖方，按提供方优先刷新，再重启之前运行中的模块
    pub async fn refresh_projects(&self, seed: &[ProjectId]) -> Result<DriveReport> {
        self.rewire(seed, &HashSet::new()).await
    }

    /// 更新模块；有构建在进行中的项目排队等待构建完成
    pub async fn update_projects(&self, seed: &[ProjectId]) -> Result<DriveReport> {
        let mut ready = Vec::new();
        let mut queued = Vec::new();
        for project in seed {
            let unit = self.unit(project).await?;
            if unit.has_pending(Transition::Build) {
                self.model.add_pending(project, Transition::Update).await?;
                debug!(project = %project, "构建进行中，更新已排队");
                queued.push(project.clone());
            } else {
                ready.push(project.clone());
            }
        }

        let updates: HashSet<ProjectId> = ready.iter().cloned().collect();
        let mut report = self.rewire(&ready, &updates).await?;
        report.skipped.extend(queued);
        Ok(report)
    }

    /// 构建开始：登记挂起的构建
    pub async fn build_started(&self, projects: &[ProjectId]) -> Result<()> {
        for project in projects {
            self.model.add_pending(project, Transition::Build).await?;
        }
        Ok(())
    }

    /// 构建结束：失败时记录 Build 错误，成功时执行排队的更新
    pub async fn build_finished(&self, project: &ProjectId, success: bool) -> Result<DriveReport> {
        self.model.take_pending(project, Transition::Build).await?;

        if !success {
            self.model.set_error(project, TransitionError::Build).await?;
            warn!(project = %project, "构建失败");
            return Ok(DriveReport {
                skipped: vec![project.clone()],
                ..Default::default()
            });
        }

        if self.unit(project).await?.error() == TransitionError::Build {
            self.model.set_error(project, TransitionError::NoError).await?;
        }
        if self.model.take_pending(project, Transition::Update).await? {
            return self.update_projects(std::slice::from_ref(project)).await;
        }
        Ok(DriveReport::default())
    }

    /// 停止闭包中运行的模块，按提供方优先更新或刷新，再恢复运行
    async fn rewire(&self, seed: &[ProjectId], updates: &HashSet<ProjectId>) -> Result<DriveReport> {
        let mut report = DriveReport::default();
        if seed.is_empty() {
            return Ok(report);
        }

        // 依赖方优先：先停依赖方
        let closure = self
            .closure(OperationCategory::DeactivateModule, seed, Scope::All)
            .await?;
        let order = closure.to_vec();

        let mut restart = Vec::new();
        for project in &order {
            if self.state(project).await?.is_started() {
                match self.run(project, Command::Stop).await {
                    Ok(()) => restart.push(project.clone()),
                    Err(e) => report.fail(project, &e),
                }
            }
        }

        // 提供方优先：逆序刷新
        for project in order.iter().rev() {
            if report.failed.iter().any(|f| &f.project == project) {
                continue;
            }
            let command = if updates.contains(project) {
                Command::Update
            } else {
                Command::Refresh
            };
            match self.run(project, command).await {
                Ok(()) => report.processed.push(project.clone()),
                Err(e) => report.fail(project, &e),
            }
        }

        // 更新后停在 Installed，已激活的需要重新解析
        for project in order.iter().rev() {
            let unit = self.unit(project).await?;
            if unit.is_activated() && unit.state() == State::Installed && updates.contains(project) {
                if let Err(e) = self.run(project, Command::Resolve(unit.policy())).await {
                    report.fail(project, &e);
                }
            }
        }

        for project in restart.iter().rev() {
            if matches!(self.state(project).await?, State::Resolved | State::Starting) {
                if let Err(e) = self.run(project, Command::Start).await {
                    report.fail(project, &e);
                }
            }
        }

        Ok(report)
    }

    // ==================== 内部辅助 ====================

    /// 计算闭包；依赖环上的单元标记 Cycle
    async fn closure(
        &self,
        category: OperationCategory,
        seed: &[ProjectId],
        scope: Scope,
    ) -> Result<Closure<ProjectId>> {
        match self.model.compute_closure(category, seed, scope).await {
            Ok(closure) => {
                for warning in closure.warnings() {
                    warn!(warning = %warning, "闭包计算产生警告");
                }
                Ok(closure)
            }
            Err(CoreError::CircularDependency(report)) => {
                // 模块类别的环成员是模块句柄
                for member in report.members() {
                    let project = match self.model.find_by_module(&ModuleId::new(member)).await {
                        Some(unit) => unit.project().clone(),
                        None => ProjectId::new(member),
                    };
                    if self.model.unit(&project).await.is_some() {
                        self.model.set_error(&project, TransitionError::Cycle).await?;
                    }
                }
                Err(CoreError::CircularDependency(report))
            }
            Err(e) => Err(e),
        }
    }

    async fn unit(&self, project: &ProjectId) -> Result<ModuleUnit> {
        self.model
            .unit(project)
            .await
            .ok_or_else(|| CoreError::UnitNotFound(project.clone()))
    }

    async fn state(&self, project: &ProjectId) -> Result<State> {
        Ok(self.unit(project).await?.state())
    }

    /// 与已安装模块符号名重复的项目
    async fn duplicates(&self, closure: &Closure<ProjectId>) -> HashSet<ProjectId> {
        let metadata = self.model.metadata();
        let installed: HashMap<String, ProjectId> = self
            .model
            .units()
            .await
            .into_iter()
            .filter(|u| u.state().is_installed())
            .filter_map(|u| Some((metadata.symbolic_name(u.project())?, u.project().clone())))
            .collect();

        closure
            .iter()
            .filter(|project| {
                metadata
                    .symbolic_name(project)
                    .and_then(|name| installed.get(&name))
                    .map(|owner| owner != *project)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// 检查项目是否因自身或提供方的问题不能继续
    async fn blocking_error(
        &self,
        project: &ProjectId,
        blocked: &HashSet<ProjectId>,
        duplicates: &HashSet<ProjectId>,
    ) -> Result<Option<TransitionError>> {
        let unit = self.unit(project).await?;
        if duplicates.contains(project) {
            return Ok(Some(TransitionError::Duplicate));
        }
        if unit.has_pending(Transition::Build) || unit.error() == TransitionError::Build {
            return Ok(Some(TransitionError::Build));
        }
        let providers = self
            .model
            .metadata()
            .direct_providers(project)
            .unwrap_or_default();
        if providers.iter().any(|p| blocked.contains(p)) {
            return Ok(Some(TransitionError::Dependency));
        }
        Ok(None)
    }

    /// 安装、解析并启动
    async fn bring_up(&self, project: &ProjectId) -> Result<()> {
        if !self.state(project).await?.is_installed() {
            self.run(project, Command::Install).await?;
        }
        let unit = self.unit(project).await?;
        if unit.state() == State::Installed {
            // 懒加载模块的解析由运行时链入 Starting
            self.run(project, Command::Resolve(unit.policy())).await?;
        }
        if matches!(self.state(project).await?, State::Resolved | State::Starting) {
            self.run(project, Command::Start).await?;
        }
        Ok(())
    }

    /// 停止并刷新
    async fn tear_down(&self, project: &ProjectId) -> Result<()> {
        if self.state(project).await?.is_started() {
            self.run(project, Command::Stop).await?;
        }
        if matches!(self.state(project).await?, State::Installed | State::Resolved) {
            self.run(project, Command::Refresh).await?;
        }
        Ok(())
    }

    /// 对单个单元执行一条命令
    ///
    /// 运行时调用失败且单元仍在转换中时回滚并标记 Incomplete；
    /// 协调器已经处理过的失败保持原样。
    async fn run(&self, project: &ProjectId, command: Command) -> Result<()> {
        if let Step::Unchanged = self.model.begin(project, command).await? {
            return Ok(());
        }

        if let Err(e) = self.invoke(project, command).await {
            let in_flight = self
                .model
                .unit(project)
                .await
                .map(|u| u.is_in_flight())
                .unwrap_or(false);
            if in_flight {
                self.model.rollback(project).await?;
                self.model
                    .set_error(project, TransitionError::Incomplete)
                    .await?;
            }
            warn!(project = %project, command = ?command, error = %e, "运行时调用失败");
            return Err(e);
        }
        Ok(())
    }

    async fn invoke(&self, project: &ProjectId, command: Command) -> Result<()> {
        if command == Command::Install {
            let module = self.runtime.install(project).await?;
            return self.model.attach_module(project, module).await;
        }

        let module = self
            .unit(project)
            .await?
            .module_id()
            .cloned()
            .ok_or_else(|| CoreError::ModuleNotInstalled(project.clone()))?;

        match command {
            Command::Install => Ok(()),
            Command::Uninstall => self.runtime.uninstall(&module).await,
            Command::Resolve(_) => self.runtime.resolve(&module).await,
            Command::Start => self.runtime.start(&module).await,
            Command::Stop => self.runtime.stop(&module).await,
            Command::Update => self.runtime.update(&module).await,
            Command::Refresh => self.runtime.refresh(&module).await,
        }
    }
}
