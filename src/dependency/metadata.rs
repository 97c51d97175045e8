//! 项目元数据
//!
//! [`ProjectMetadata`] 是内核消费的外部协作者：给定项目，返回它的直接依赖方和
//! 直接提供方、激活策略以及是否已纳入工作区。
//!
//! [`StaticProjectMetadata`] 是基于项目描述（可从 YAML/JSON 清单加载）的内存实现：
//! 当 B 的某条需求的名称等于 A 的符号名、且版本要求匹配 A 的版本时，A 提供 B。

use std::path::Path;

use indexmap::IndexMap;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::graph::GraphWarning;
use crate::module::ProjectId;
use crate::utils::{CoreError, Result};

/// 模块激活策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActivationPolicy {
    /// 解析后直接启动为 Active
    #[default]
    Eager,
    /// 先进入等待状态，由运行时按需激活
    Lazy,
}

/// 邻居查询结果：`Err` 表示元数据不可用（软警告）
pub type Neighbors = std::result::Result<Vec<ProjectId>, GraphWarning>;

/// 项目元数据提供者
pub trait ProjectMetadata: Send + Sync {
    /// 所有项目（枚举顺序决定排序结果的稳定顺序）
    fn projects(&self) -> Vec<ProjectId>;

    /// 直接依赖该项目的项目（不含自身）
    fn direct_requirers(&self, project: &ProjectId) -> Neighbors;

    /// 该项目直接依赖的项目（不含自身）
    fn direct_providers(&self, project: &ProjectId) -> Neighbors;

    fn activation_policy(&self, project: &ProjectId) -> ActivationPolicy;

    /// 项目是否已纳入受管工作区
    fn is_enrolled(&self, project: &ProjectId) -> bool;

    /// 符号名（用于重复检测）
    fn symbolic_name(&self, _project: &ProjectId) -> Option<String> {
        None
    }

    /// 项目是否满足自己的某条需求
    fn has_self_reference(&self, _project: &ProjectId) -> bool {
        false
    }
}

/// 需求声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// 需要的符号名
    pub name: String,

    /// 版本要求（semver 格式）
    #[serde(default = "default_requirement_version")]
    pub version: String,
}

fn default_requirement_version() -> String {
    "*".to_string()
}

/// 项目描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    /// 项目标识
    pub id: ProjectId,

    /// 符号名（缺省为项目标识）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbolic_name: Option<String>,

    /// 版本（semver 格式）
    #[serde(default = "default_version")]
    pub version: String,

    /// 需求列表
    #[serde(default)]
    pub requires: Vec<Requirement>,

    /// 激活策略
    #[serde(default)]
    pub activation: ActivationPolicy,

    /// 是否已纳入工作区
    #[serde(default = "default_true")]
    pub enrolled: bool,

    /// 项目是否打开（关闭的项目元数据不可用）
    #[serde(default = "default_true")]
    pub open: bool,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_true() -> bool {
    true
}

impl ProjectDescriptor {
    pub fn new(id: impl Into<ProjectId>) -> Self {
        Self {
            id: id.into(),
            symbolic_name: None,
            version: default_version(),
            requires: vec![],
            activation: ActivationPolicy::Eager,
            enrolled: true,
            open: true,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn symbolic_name(mut self, name: impl Into<String>) -> Self {
        self.symbolic_name = Some(name.into());
        self
    }

    /// 添加需求
    pub fn requires(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.requires.push(Requirement {
            name: name.into(),
            version: version.into(),
        });
        self
    }

    pub fn lazy(mut self) -> Self {
        self.activation = ActivationPolicy::Lazy;
        self
    }

    pub fn enrolled(mut self, enrolled: bool) -> Self {
        self.enrolled = enrolled;
        self
    }

    /// 标记为已关闭
    pub fn closed(mut self) -> Self {
        self.open = false;
        self
    }

    fn name(&self) -> &str {
        self.symbolic_name.as_deref().unwrap_or(self.id.as_str())
    }
}

/// 工作区清单文件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceManifest {
    #[serde(default)]
    pub projects: Vec<ProjectDescriptor>,
}

/// 解析后的项目条目
#[derive(Debug, Clone)]
struct ProjectEntry {
    descriptor: ProjectDescriptor,
    version: Version,
    requires: Vec<(String, VersionReq)>,
}

/// 基于项目描述的内存元数据提供者
#[derive(Debug, Clone, Default)]
pub struct StaticProjectMetadata {
    entries: IndexMap<ProjectId, ProjectEntry>,
}

impl StaticProjectMetadata {
    /// 从项目描述构建，校验版本号、版本要求和项目标识唯一性
    pub fn new(descriptors: impl IntoIterator<Item = ProjectDescriptor>) -> Result<Self> {
        let mut entries = IndexMap::new();
        for descriptor in descriptors {
            let version = Version::parse(&descriptor.version)?;
            let requires = descriptor
                .requires
                .iter()
                .map(|r| Ok((r.name.clone(), VersionReq::parse(&r.version)?)))
                .collect::<Result<Vec<_>>>()?;

            let id = descriptor.id.clone();
            let entry = ProjectEntry {
                descriptor,
                version,
                requires,
            };
            if entries.insert(id.clone(), entry).is_some() {
                return Err(CoreError::InvalidMetadata(format!("项目标识重复: '{}'", id)));
            }
        }
        debug!(count = entries.len(), "项目元数据已构建");
        Ok(Self { entries })
    }

    /// 从清单内容（YAML，JSON 也是合法的 YAML）构建
    pub fn from_manifest_str(content: &str) -> Result<Self> {
        let manifest: WorkspaceManifest = serde_yaml::from_str(content)?;
        Self::new(manifest.projects)
    }

    /// 从清单文件构建
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_manifest_str(&content)
    }

    pub fn descriptor(&self, project: &ProjectId) -> Option<&ProjectDescriptor> {
        self.entries.get(project).map(|e| &e.descriptor)
    }

    /// 修改项目的纳入状态
    pub fn set_enrolled(&mut self, project: &ProjectId, enrolled: bool) -> Result<()> {
        let entry = self
            .entries
            .get_mut(project)
            .ok_or_else(|| CoreError::ProjectNotFound(project.clone()))?;
        entry.descriptor.enrolled = enrolled;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `provider` 是否满足 `requirer` 的某条需求
    fn provides(provider: &ProjectEntry, requirer: &ProjectEntry) -> bool {
        let name = provider.descriptor.name();
        requirer
            .requires
            .iter()
            .any(|(req_name, req)| req_name == name && req.matches(&provider.version))
    }

    fn open_entry(&self, project: &ProjectId) -> std::result::Result<&ProjectEntry, GraphWarning> {
        match self.entries.get(project) {
            Some(entry) if entry.descriptor.open => Ok(entry),
            _ => Err(GraphWarning::MetadataUnavailable(project.clone())),
        }
    }

    /// 按枚举顺序筛选出与 `project` 满足关系的其他打开项目
    fn neighbours(
        &self,
        project: &ProjectId,
        related: impl Fn(&ProjectEntry, &ProjectEntry) -> bool,
    ) -> Neighbors {
        let entry = self.open_entry(project)?;
        Ok(self
            .entries
            .iter()
            .filter(|(id, other)| *id != project && other.descriptor.open && related(entry, other))
            .map(|(id, _)| id.clone())
            .collect())
    }
}

impl ProjectMetadata for StaticProjectMetadata {
    fn projects(&self) -> Vec<ProjectId> {
        self.entries.keys().cloned().collect()
    }

    fn direct_requirers(&self, project: &ProjectId) -> Neighbors {
        self.neighbours(project, |me, other| Self::provides(me, other))
    }

    fn direct_providers(&self, project: &ProjectId) -> Neighbors {
        self.neighbours(project, |me, other| Self::provides(other, me))
    }

    fn activation_policy(&self, project: &ProjectId) -> ActivationPolicy {
        self.entries
            .get(project)
            .map(|e| e.descriptor.activation)
            .unwrap_or_default()
    }

    fn is_enrolled(&self, project: &ProjectId) -> bool {
        self.entries
            .get(project)
            .map(|e| e.descriptor.enrolled)
            .unwrap_or(false)
    }

    fn symbolic_name(&self, project: &ProjectId) -> Option<String> {
        self.entries.get(project).map(|e| e.descriptor.name().to_string())
    }

    fn has_self_reference(&self, project: &ProjectId) -> bool {
        self.entries
            .get(project)
            .map(|e| Self::provides(e, e))
            .unwrap_or(false)
    }
}
