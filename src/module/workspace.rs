//! 工作区模型
//!
//! [`WorkspaceModel`] 显式持有模块单元表、配置和闭包策略，
//! 所有操作都通过它进行，不存在全局注册表。
//!
//! 单元表由一把读写锁保护：同一单元的 {状态, 转换, 诊断码, 进行中} 修改是串行的。
//! "是否有单元处于转换中" 这类跨单元查询是单元表上的派生视图。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as SyncRwLock};

use indexmap::IndexMap;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, instrument};

use super::state::{Command, Step, Transition, TransitionError};
use super::unit::{ModuleId, ModuleUnit, ProjectId};
use crate::core::WorkspaceConfig;
use crate::dependency::{
    Closure, ClosurePolicy, ModuleGraph, OperationCategory, ProjectGraph, ProjectMetadata, Scope,
};
use crate::utils::{CoreError, Result};

/// 模块单元表
#[derive(Debug, Default)]
pub(crate) struct UnitTable {
    units: IndexMap<ProjectId, ModuleUnit>,
    by_module: HashMap<ModuleId, ProjectId>,
}

impl UnitTable {
    pub(crate) fn get(&self, project: &ProjectId) -> Option<&ModuleUnit> {
        self.units.get(project)
    }

    pub(crate) fn get_mut(&mut self, project: &ProjectId) -> Option<&mut ModuleUnit> {
        self.units.get_mut(project)
    }

    fn require_mut(&mut self, project: &ProjectId) -> Result<&mut ModuleUnit> {
        self.units
            .get_mut(project)
            .ok_or_else(|| CoreError::UnitNotFound(project.clone()))
    }

    pub(crate) fn project_of(&self, module: &ModuleId) -> Option<&ProjectId> {
        self.by_module.get(module)
    }

    pub(crate) fn insert(&mut self, unit: ModuleUnit) {
        if let Some(module) = unit.module_id() {
            self.by_module.insert(module.clone(), unit.project().clone());
        }
        self.units.insert(unit.project().clone(), unit);
    }

    /// 把模块句柄关联到单元
    pub(crate) fn attach(&mut self, project: &ProjectId, module: ModuleId) -> Result<()> {
        let unit = self.require_mut(project)?;
        if let Some(previous) = unit.module_id().cloned() {
            self.by_module.remove(&previous);
        }
        self.by_module.insert(module.clone(), project.clone());
        self.require_mut(project)?.attach_module(module);
        Ok(())
    }

    /// 清除单元的模块句柄
    pub(crate) fn detach(&mut self, project: &ProjectId) -> Result<Option<ModuleId>> {
        let module = self.require_mut(project)?.detach_module();
        if let Some(ref module) = module {
            self.by_module.remove(module);
        }
        Ok(module)
    }

    fn remove(&mut self, project: &ProjectId) -> Option<ModuleUnit> {
        let unit = self.units.shift_remove(project)?;
        if let Some(module) = unit.module_id() {
            self.by_module.remove(module);
        }
        Some(unit)
    }
}

/// 解析闸门：运行时解析模块前同步查询项目是否仍被激活
///
/// 停用的项目被拒绝解析，刷新后停在 Installed。
#[derive(Debug, Clone, Default)]
pub struct ResolutionGate {
    deactivated: Arc<SyncRwLock<HashSet<ProjectId>>>,
}

impl ResolutionGate {
    pub fn allows(&self, project: &ProjectId) -> bool {
        self.deactivated
            .read()
            .map(|d| !d.contains(project))
            .unwrap_or(true)
    }

    fn set(&self, project: &ProjectId, activated: bool) {
        if let Ok(mut deactivated) = self.deactivated.write() {
            if activated {
                deactivated.remove(project);
            } else {
                deactivated.insert(project.clone());
            }
        }
    }
}

/// 工作区模型
pub struct WorkspaceModel {
    config: WorkspaceConfig,
    policy: ClosurePolicy,
    metadata: Arc<dyn ProjectMetadata>,
    table: RwLock<UnitTable>,
    workspace_active: AtomicBool,
    gate: ResolutionGate,
}

impl WorkspaceModel {
    /// 创建工作区模型，配置非法时立即失败
    pub fn new(config: WorkspaceConfig, metadata: Arc<dyn ProjectMetadata>) -> Result<Self> {
        config.validate()?;
        let policy = ClosurePolicy::from_config(&config)?;
        let workspace_active = AtomicBool::new(config.workspace_active);
        Ok(Self {
            config,
            policy,
            metadata,
            table: RwLock::new(UnitTable::default()),
            workspace_active,
            gate: ResolutionGate::default(),
        })
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn policy(&self) -> &ClosurePolicy {
        &self.policy
    }

    pub fn metadata(&self) -> Arc<dyn ProjectMetadata> {
        self.metadata.clone()
    }

    /// 工作区是否处于活动状态（影响外部卸载的处理）
    pub fn is_workspace_active(&self) -> bool {
        self.workspace_active.load(Ordering::SeqCst)
    }

    pub fn set_workspace_active(&self, active: bool) {
        self.workspace_active.store(active, Ordering::SeqCst);
        info!(active, "工作区活动状态已变更");
    }

    /// 与单元激活标记同步的解析闸门
    pub fn resolution_gate(&self) -> ResolutionGate {
        self.gate.clone()
    }

    pub(crate) async fn table(&self) -> RwLockWriteGuard<'_, UnitTable> {
        self.table.write().await
    }

    // ==================== 单元注册 ====================

    /// 把项目登记为受管模块，已登记时返回现有单元
    #[instrument(skip(self, project), fields(project = %project))]
    pub async fn register(&self, project: &ProjectId) -> Result<ModuleUnit> {
        if !self.metadata.projects().contains(project) {
            return Err(CoreError::ProjectNotFound(project.clone()));
        }

        let mut table = self.table.write().await;
        if let Some(existing) = table.get(project) {
            return Ok(existing.clone());
        }

        let unit = ModuleUnit::new(
            project.clone(),
            self.metadata.activation_policy(project),
            self.metadata.is_enrolled(project),
        );
        table.insert(unit.clone());
        self.gate.set(project, unit.is_activated());
        debug!(activated = unit.is_activated(), "模块单元已登记");
        Ok(unit)
    }

    /// 登记元数据中的所有项目
    pub async fn register_all(&self) -> Result<Vec<ProjectId>> {
        let projects = self.metadata.projects();
        for project in &projects {
            self.register(project).await?;
        }
        info!(count = projects.len(), "所有项目已登记");
        Ok(projects)
    }

    /// 注销项目，丢弃其单元
    pub async fn unregister(&self, project: &ProjectId) -> Result<ModuleUnit> {
        let unit = self
            .table
            .write()
            .await
            .remove(project)
            .ok_or_else(|| CoreError::UnitNotFound(project.clone()))?;
        self.gate.set(project, true);
        info!(project = %project, "模块单元已注销");
        Ok(unit)
    }

    // ==================== 查询 ====================

    pub async fn unit(&self, project: &ProjectId) -> Option<ModuleUnit> {
        self.table.read().await.get(project).cloned()
    }

    /// 所有单元的快照（登记顺序）
    pub async fn units(&self) -> Vec<ModuleUnit> {
        self.table.read().await.units.values().cloned().collect()
    }

    pub async fn find_by_module(&self, module: &ModuleId) -> Option<ModuleUnit> {
        let table = self.table.read().await;
        let project = table.project_of(module)?;
        table.get(project).cloned()
    }

    /// 处于转换中的单元
    pub async fn in_flight(&self) -> Vec<ProjectId> {
        self.table
            .read()
            .await
            .units
            .values()
            .filter(|u| u.is_in_flight())
            .map(|u| u.project().clone())
            .collect()
    }

    pub async fn is_any_in_flight(&self) -> bool {
        self.table
            .read()
            .await
            .units
            .values()
            .any(|u| u.is_in_flight())
    }

    // ==================== 单元修改 ====================

    /// 在锁内修改单个单元
    async fn with_unit<R>(
        &self,
        project: &ProjectId,
        f: impl FnOnce(&mut ModuleUnit) -> Result<R>,
    ) -> Result<R> {
        let mut table = self.table.write().await;
        f(table.require_mut(project)?)
    }

    pub async fn set_activated(&self, project: &ProjectId, activated: bool) -> Result<()> {
        self.with_unit(project, |unit| {
            unit.set_activated(activated);
            Ok(())
        })
        .await?;
        self.gate.set(project, activated);
        Ok(())
    }

    pub async fn set_error(&self, project: &ProjectId, error: TransitionError) -> Result<()> {
        self.with_unit(project, |unit| {
            unit.set_error(error);
            Ok(())
        })
        .await
    }

    pub async fn attach_module(&self, project: &ProjectId, module: ModuleId) -> Result<()> {
        self.table.write().await.attach(project, module)
    }

    pub async fn detach_module(&self, project: &ProjectId) -> Result<Option<ModuleId>> {
        self.table.write().await.detach(project)
    }

    pub async fn begin(&self, project: &ProjectId, command: Command) -> Result<Step> {
        self.with_unit(project, |unit| unit.begin(command)).await
    }

    pub async fn commit(&self, project: &ProjectId) -> Result<()> {
        self.with_unit(project, |unit| unit.commit()).await
    }

    pub async fn rollback(&self, project: &ProjectId) -> Result<()> {
        self.with_unit(project, |unit| {
            unit.rollback();
            Ok(())
        })
        .await
    }

    /// 登记挂起的转换，返回是否新加入
    pub async fn add_pending(&self, project: &ProjectId, transition: Transition) -> Result<bool> {
        self.with_unit(project, |unit| Ok(unit.add_pending(transition)))
            .await
    }

    /// 取出挂起的转换，返回它是否存在
    pub async fn take_pending(&self, project: &ProjectId, transition: Transition) -> Result<bool> {
        self.with_unit(project, |unit| Ok(unit.remove_pending(transition)))
            .await
    }

    // ==================== 闭包 ====================

    /// 项目图快照：纳入标记以单元的激活标记为准
    pub async fn project_graph(&self) -> ProjectGraph {
        let overrides: HashMap<ProjectId, bool> = self
            .table
            .read()
            .await
            .units
            .values()
            .map(|u| (u.project().clone(), u.is_activated()))
            .collect();
        ProjectGraph::with_enrollment(self.metadata.clone(), &overrides)
    }

    /// 模块图快照
    pub async fn module_graph(&self) -> ModuleGraph {
        let table = self.table.read().await;
        ModuleGraph::snapshot(self.metadata.clone(), table.units.values())
    }

    /// 计算项目闭包
    pub async fn project_closure(
        &self,
        category: OperationCategory,
        seed: &[ProjectId],
        scope: Scope,
    ) -> Result<Closure<ProjectId>> {
        let graph = self.project_graph().await;
        self.policy.compute_closure(category, &graph, seed, scope)
    }

    /// 计算模块闭包
    pub async fn module_closure(
        &self,
        category: OperationCategory,
        seed: &[ModuleId],
        scope: Scope,
    ) -> Result<Closure<ModuleId>> {
        let graph = self.module_graph().await;
        self.policy.compute_closure(category, &graph, seed, scope)
    }

    /// 按操作类别计算闭包，结果以项目表示
    ///
    /// 模块类别在模块图上排序，种子项目必须已安装。
    pub async fn compute_closure(
        &self,
        category: OperationCategory,
        seed: &[ProjectId],
        scope: Scope,
    ) -> Result<Closure<ProjectId>> {
        match category {
            OperationCategory::ActivateProject | OperationCategory::DeactivateProject => {
                self.project_closure(category, seed, scope).await
            }
            OperationCategory::ActivateModule | OperationCategory::DeactivateModule => {
                let graph = self.module_graph().await;
                let modules = seed
                    .iter()
                    .map(|project| {
                        graph
                            .module_of(project)
                            .cloned()
                            .ok_or_else(|| CoreError::ModuleNotInstalled(project.clone()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let closure = self.policy.compute_closure(category, &graph, &modules, scope)?;
                Ok(closure.map(|module| {
                    graph
                        .project_of(&module)
                        .cloned()
                        .unwrap_or_else(|| ProjectId::new(module.as_str()))
                }))
            }
        }
    }
}
