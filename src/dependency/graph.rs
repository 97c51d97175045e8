//! 依赖图
//!
//! 排序器只看到 [`DependencyGraph`]：节点集合、直接提供方、直接依赖方和激活标记。
//! [`ProjectGraph`] 以项目为节点，[`ModuleGraph`] 以运行时模块句柄为节点，
//! 两者都在构造时对节点集合和激活标记拍快照。

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use super::metadata::ProjectMetadata;
use crate::module::{ModuleId, ModuleUnit, ProjectId};

/// 邻居查询的软警告：排序继续，该节点视为没有邻居
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum GraphWarning {
    #[error("项目 '{0}' 的元数据不可用")]
    MetadataUnavailable(ProjectId),

    #[error("模块 '{0}' 没有对应的受管项目")]
    UnknownModule(ModuleId),
}

/// 依赖图
///
/// 邻居列表不包含节点自身；自引用通过 [`has_self_reference`](Self::has_self_reference) 单独报告。
pub trait DependencyGraph<N: Clone + Eq + Hash> {
    /// 所有节点（顺序决定排序结果的稳定顺序）
    fn nodes(&self) -> Vec<N>;

    /// 该节点直接依赖的节点
    fn providers_of(&self, node: &N) -> Result<Vec<N>, GraphWarning>;

    /// 直接依赖该节点的节点
    fn requirers_of(&self, node: &N) -> Result<Vec<N>, GraphWarning>;

    fn is_activated(&self, node: &N) -> bool;

    fn has_self_reference(&self, _node: &N) -> bool {
        false
    }
}

// ==================== 项目图 ====================

/// 以项目为节点的依赖图
pub struct ProjectGraph {
    metadata: Arc<dyn ProjectMetadata>,
    nodes: Vec<ProjectId>,
    enrolled: HashSet<ProjectId>,
}

impl ProjectGraph {
    /// 使用元数据中的纳入标记
    pub fn new(metadata: Arc<dyn ProjectMetadata>) -> Self {
        let nodes = metadata.projects();
        let enrolled = nodes
            .iter()
            .filter(|p| metadata.is_enrolled(p))
            .cloned()
            .collect();
        Self {
            metadata,
            nodes,
            enrolled,
        }
    }

    /// 使用调用方给出的纳入标记（覆盖元数据中的值）
    pub fn with_enrollment(
        metadata: Arc<dyn ProjectMetadata>,
        overrides: &HashMap<ProjectId, bool>,
    ) -> Self {
        let mut graph = Self::new(metadata);
        for (project, enrolled) in overrides {
            if *enrolled {
                graph.enrolled.insert(project.clone());
            } else {
                graph.enrolled.remove(project);
            }
        }
        graph
    }
}

impl DependencyGraph<ProjectId> for ProjectGraph {
    fn nodes(&self) -> Vec<ProjectId> {
        self.nodes.clone()
    }

    fn providers_of(&self, node: &ProjectId) -> Result<Vec<ProjectId>, GraphWarning> {
        self.metadata.direct_providers(node)
    }

    fn requirers_of(&self, node: &ProjectId) -> Result<Vec<ProjectId>, GraphWarning> {
        self.metadata.direct_requirers(node)
    }

    fn is_activated(&self, node: &ProjectId) -> bool {
        self.enrolled.contains(node)
    }

    fn has_self_reference(&self, node: &ProjectId) -> bool {
        self.metadata.has_self_reference(node)
    }
}

// ==================== 模块图 ====================

#[derive(Debug, Clone)]
struct ModuleEntry {
    project: ProjectId,
    activated: bool,
}

/// 以模块句柄为节点的依赖图，边通过来源项目的元数据推导
pub struct ModuleGraph {
    metadata: Arc<dyn ProjectMetadata>,
    modules: IndexMap<ModuleId, ModuleEntry>,
    by_project: HashMap<ProjectId, ModuleId>,
}

impl ModuleGraph {
    /// 对已安装模块的单元拍快照
    pub fn snapshot<'a>(
        metadata: Arc<dyn ProjectMetadata>,
        units: impl IntoIterator<Item = &'a ModuleUnit>,
    ) -> Self {
        let mut modules = IndexMap::new();
        let mut by_project = HashMap::new();
        // 外部卸载后保留的诊断句柄不算已安装
        for unit in units.into_iter().filter(|u| u.state().is_installed()) {
            if let Some(module) = unit.module_id() {
                modules.insert(
                    module.clone(),
                    ModuleEntry {
                        project: unit.project().clone(),
                        activated: unit.is_activated(),
                    },
                );
                by_project.insert(unit.project().clone(), module.clone());
            }
        }
        Self {
            metadata,
            modules,
            by_project,
        }
    }

    pub fn project_of(&self, module: &ModuleId) -> Option<&ProjectId> {
        self.modules.get(module).map(|e| &e.project)
    }

    /// 项目当前安装的模块
    pub fn module_of(&self, project: &ProjectId) -> Option<&ModuleId> {
        self.by_project.get(project)
    }

    fn project(&self, module: &ModuleId) -> Result<&ProjectId, GraphWarning> {
        self.project_of(module)
            .ok_or_else(|| GraphWarning::UnknownModule(module.clone()))
    }

    /// 把项目邻居映射为已安装的模块，未安装的项目被跳过
    fn to_modules(&self, projects: Vec<ProjectId>) -> Vec<ModuleId> {
        projects
            .iter()
            .filter_map(|p| self.by_project.get(p).cloned())
            .collect()
    }
}

impl DependencyGraph<ModuleId> for ModuleGraph {
    fn nodes(&self) -> Vec<ModuleId> {
        self.modules.keys().cloned().collect()
    }

    fn providers_of(&self, node: &ModuleId) -> Result<Vec<ModuleId>, GraphWarning> {
        let project = self.project(node)?;
        Ok(self.to_modules(self.metadata.direct_providers(project)?))
    }

    fn requirers_of(&self, node: &ModuleId) -> Result<Vec<ModuleId>, GraphWarning> {
        let project = self.project(node)?;
        Ok(self.to_modules(self.metadata.direct_requirers(project)?))
    }

    fn is_activated(&self, node: &ModuleId) -> bool {
        self.modules.get(node).map(|e| e.activated).unwrap_or(false)
    }

    fn has_self_reference(&self, node: &ModuleId) -> bool {
        self.project_of(node)
            .map(|p| self.metadata.has_self_reference(p))
            .unwrap_or(false)
    }
}
