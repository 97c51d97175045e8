//! 闭包策略
//!
//! 按 {操作类别 × 闭包类型} 选择排序器的调用序列。
//! 类型对类别不合法属于配置错误，立即报告，不会降级处理。

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::graph::DependencyGraph;
use super::sorter::{Closure, ClosureNode, ClosureSorter, Direction, Scope, SortOptions};
use crate::core::{ClosureConfig, WorkspaceConfig};
use crate::utils::{CoreError, Result};

/// 操作类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    ActivateProject,
    DeactivateProject,
    ActivateModule,
    DeactivateModule,
}

/// 闭包类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureKind {
    /// 只扩展提供方
    Providing,
    /// 只扩展依赖方
    Requiring,
    /// 先扩展依赖方，再扩展提供方
    RequiringAndProviding,
    /// 先扩展提供方，再扩展依赖方
    ProvidingAndRequiring,
    /// 不动点闭包
    PartialGraph,
    /// 不扩展，只对种子集合排序
    Single,
}

impl OperationCategory {
    pub const ALL: [OperationCategory; 4] = [
        OperationCategory::ActivateProject,
        OperationCategory::DeactivateProject,
        OperationCategory::ActivateModule,
        OperationCategory::DeactivateModule,
    ];

    /// 该类别合法的闭包类型
    pub fn legal_kinds(self) -> &'static [ClosureKind] {
        use ClosureKind::*;
        match self {
            OperationCategory::ActivateProject => &[Providing, RequiringAndProviding, PartialGraph],
            OperationCategory::DeactivateProject => {
                &[Requiring, ProvidingAndRequiring, PartialGraph]
            }
            OperationCategory::ActivateModule => &[
                Providing,
                Requiring,
                RequiringAndProviding,
                PartialGraph,
                Single,
            ],
            OperationCategory::DeactivateModule => &[
                Requiring,
                Providing,
                ProvidingAndRequiring,
                PartialGraph,
                Single,
            ],
        }
    }

    pub fn default_kind(self) -> ClosureKind {
        match self {
            OperationCategory::ActivateProject | OperationCategory::ActivateModule => {
                ClosureKind::Providing
            }
            OperationCategory::DeactivateProject | OperationCategory::DeactivateModule => {
                ClosureKind::Requiring
            }
        }
    }

    pub fn accepts(self, kind: ClosureKind) -> bool {
        self.legal_kinds().contains(&kind)
    }

    pub fn is_activation(self) -> bool {
        matches!(
            self,
            OperationCategory::ActivateProject | OperationCategory::ActivateModule
        )
    }

    /// 停用必须容忍已有的依赖环
    pub fn allows_cycles(self) -> bool {
        !self.is_activation()
    }
}

/// 闭包策略
#[derive(Debug, Clone)]
pub struct ClosurePolicy {
    config: ClosureConfig,
    allow_self_reference: bool,
}

impl ClosurePolicy {
    /// 创建策略，配置中的非法组合立即报错
    pub fn new(config: ClosureConfig, allow_self_reference: bool) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            allow_self_reference,
        })
    }

    pub fn from_config(config: &WorkspaceConfig) -> Result<Self> {
        Self::new(config.closure, config.allow_self_reference)
    }

    /// 类别当前配置的闭包类型
    pub fn kind(&self, category: OperationCategory) -> ClosureKind {
        self.config.kind_for(category)
    }

    /// 该类别使用的排序器
    pub fn sorter(&self, category: OperationCategory) -> ClosureSorter {
        ClosureSorter::new(SortOptions {
            allow_cycles: category.allows_cycles(),
            allow_self_reference: self.allow_self_reference,
        })
    }

    /// 按配置的闭包类型计算闭包
    pub fn compute_closure<N, G>(
        &self,
        category: OperationCategory,
        graph: &G,
        seed: &[N],
        scope: Scope,
    ) -> Result<Closure<N>>
    where
        N: ClosureNode,
        G: DependencyGraph<N> + ?Sized,
    {
        self.compute_with(category, self.kind(category), graph, seed, scope)
    }

    /// 使用指定的闭包类型计算闭包
    #[instrument(skip(self, graph, seed), fields(seed = seed.len()))]
    pub fn compute_with<N, G>(
        &self,
        category: OperationCategory,
        kind: ClosureKind,
        graph: &G,
        seed: &[N],
        scope: Scope,
    ) -> Result<Closure<N>>
    where
        N: ClosureNode,
        G: DependencyGraph<N> + ?Sized,
    {
        if !category.accepts(kind) {
            return Err(CoreError::IllegalClosureKind { category, kind });
        }
        if seed.is_empty() {
            return Ok(Closure::empty());
        }

        let sorter = self.sorter(category);
        let closure = match kind {
            ClosureKind::Providing => sorter.sort_providing(graph, seed, scope)?,
            ClosureKind::Requiring => sorter.sort_requiring(graph, seed, scope)?,
            ClosureKind::RequiringAndProviding => {
                let requiring = sorter.sort_requiring(graph, seed, scope)?;
                let providing = sorter.sort_providing(graph, &requiring.to_vec(), scope)?;
                Self::chain(requiring, providing)
            }
            ClosureKind::ProvidingAndRequiring => {
                let providing = sorter.sort_providing(graph, seed, scope)?;
                let requiring = sorter.sort_requiring(graph, &providing.to_vec(), scope)?;
                Self::chain(providing, requiring)
            }
            ClosureKind::PartialGraph => {
                sorter.partial_graph(graph, seed, scope, category.is_activation())?
            }
            ClosureKind::Single => {
                let direction = if category.is_activation() {
                    Direction::Providing
                } else {
                    Direction::Requiring
                };
                sorter.sort_within(graph, seed, direction)?
            }
        };

        debug!(
            category = ?category,
            closure_kind = ?kind,
            size = closure.len(),
            warnings = closure.warnings().len(),
            "闭包计算完成"
        );
        Ok(closure)
    }

    /// 第二次排序的结果为准，保留第一次排序的警告
    fn chain<N: ClosureNode>(first: Closure<N>, mut second: Closure<N>) -> Closure<N> {
        second.merge_warnings(&first);
        second
    }
}
