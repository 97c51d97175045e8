//! 依赖闭包排序器
//!
//! 基于显式栈的深度优先拓扑排序：
//!
//! - **依赖方优先**（requiring）：节点在其所有依赖方之后追加，适合按顺序拆除
//! - **提供方优先**（providing）：节点在其所有提供方之后追加，适合按顺序启动
//!
//! 遍历维护 `on_stack`（当前路径）和 `finished`（子树已完成）两个集合，
//! 邻居在 `on_stack` 中即为依赖环。不允许环时，收集完所有种子上的环后统一失败。

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::cycle::CycleReport;
use super::graph::{DependencyGraph, GraphWarning};
use crate::utils::{CoreError, Result};

/// 排序节点需要满足的约束
pub trait ClosureNode: Clone + Eq + Hash + fmt::Display {}

impl<T: Clone + Eq + Hash + fmt::Display> ClosureNode for T {}

/// 遍历范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// 只遍历已激活的邻居
    Activated,
    /// 只遍历未激活的邻居
    Deactivated,
    /// 不限制
    #[default]
    All,
}

/// 遍历方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// 先访问依赖方
    Requiring,
    /// 先访问提供方
    Providing,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Requiring => Direction::Providing,
            Direction::Providing => Direction::Requiring,
        }
    }
}

/// 排序选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOptions {
    /// 容忍依赖环（不再下降，继续处理）
    pub allow_cycles: bool,
    /// 容忍自引用
    pub allow_self_reference: bool,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            allow_cycles: false,
            allow_self_reference: true,
        }
    }
}

/// 有序闭包：插入顺序即依赖顺序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closure<N: ClosureNode> {
    order: IndexSet<N>,
    warnings: Vec<GraphWarning>,
}

impl<N: ClosureNode> Closure<N> {
    pub fn empty() -> Self {
        Self {
            order: IndexSet::new(),
            warnings: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, node: &N) -> bool {
        self.order.contains(node)
    }

    /// 节点在闭包中的位置
    pub fn position(&self, node: &N) -> Option<usize> {
        self.order.get_index_of(node)
    }

    pub fn iter(&self) -> impl Iterator<Item = &N> {
        self.order.iter()
    }

    pub fn to_vec(&self) -> Vec<N> {
        self.order.iter().cloned().collect()
    }

    pub fn into_vec(self) -> Vec<N> {
        self.order.into_iter().collect()
    }

    /// 排序过程中产生的软警告
    pub fn warnings(&self) -> &[GraphWarning] {
        &self.warnings
    }

    /// 逐个映射节点，保持顺序和警告
    pub fn map<M: ClosureNode>(self, f: impl Fn(N) -> M) -> Closure<M> {
        Closure {
            order: self.order.into_iter().map(f).collect(),
            warnings: self.warnings,
        }
    }

    /// 合并另一个闭包的警告
    pub(crate) fn merge_warnings(&mut self, other: &Closure<N>) {
        self.absorb_warnings(other.warnings.clone());
    }

    fn absorb_warnings(&mut self, warnings: Vec<GraphWarning>) {
        for warning in warnings {
            if !self.warnings.contains(&warning) {
                self.warnings.push(warning);
            }
        }
    }
}

impl<N: ClosureNode> IntoIterator for Closure<N> {
    type Item = N;
    type IntoIter = indexmap::set::IntoIter<N>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.into_iter()
    }
}

/// 排序开始时拍下的可遍历节点集合
enum Admit<N: ClosureNode> {
    All,
    Only(HashSet<N>),
}

impl<N: ClosureNode> Admit<N> {
    fn contains(&self, node: &N) -> bool {
        match self {
            Admit::All => true,
            Admit::Only(nodes) => nodes.contains(node),
        }
    }
}

/// DFS 栈帧
struct Frame<N> {
    node: N,
    neighbors: Vec<N>,
    next: usize,
}

/// 单次遍历的状态，由遍历独占
struct Traversal<N: ClosureNode> {
    order: IndexSet<N>,
    finished: HashSet<N>,
    on_stack: IndexSet<N>,
    cycles: CycleReport,
    warnings: Vec<GraphWarning>,
}

impl<N: ClosureNode> Traversal<N> {
    fn new() -> Self {
        Self {
            order: IndexSet::new(),
            finished: HashSet::new(),
            on_stack: IndexSet::new(),
            cycles: CycleReport::new(),
            warnings: Vec::new(),
        }
    }
}

/// 闭包排序器（无状态，可并发使用）
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosureSorter {
    options: SortOptions,
}

impl ClosureSorter {
    pub fn new(options: SortOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> SortOptions {
        self.options
    }

    /// 依赖方优先排序
    pub fn sort_requiring<N, G>(&self, graph: &G, seed: &[N], scope: Scope) -> Result<Closure<N>>
    where
        N: ClosureNode,
        G: DependencyGraph<N> + ?Sized,
    {
        let admit = Self::admit(graph, scope);
        self.sort(graph, seed, Direction::Requiring, &admit)
    }

    /// 提供方优先排序
    pub fn sort_providing<N, G>(&self, graph: &G, seed: &[N], scope: Scope) -> Result<Closure<N>>
    where
        N: ClosureNode,
        G: DependencyGraph<N> + ?Sized,
    {
        let admit = Self::admit(graph, scope);
        self.sort(graph, seed, Direction::Providing, &admit)
    }

    /// 只在种子集合内部排序，不向外扩展
    pub fn sort_within<N, G>(&self, graph: &G, seed: &[N], direction: Direction) -> Result<Closure<N>>
    where
        N: ClosureNode,
        G: DependencyGraph<N> + ?Sized,
    {
        let admit = Admit::Only(seed.iter().cloned().collect());
        self.sort(graph, seed, direction, &admit)
    }

    /// 不动点闭包：交替执行两个方向的排序，直到结果不再增长
    pub fn partial_graph<N, G>(
        &self,
        graph: &G,
        seed: &[N],
        scope: Scope,
        requiring_first: bool,
    ) -> Result<Closure<N>>
    where
        N: ClosureNode,
        G: DependencyGraph<N> + ?Sized,
    {
        let first = if requiring_first {
            Direction::Requiring
        } else {
            Direction::Providing
        };
        let admit = Self::admit(graph, scope);

        let mut current: Vec<N> = seed.to_vec();
        let mut size = current.iter().collect::<HashSet<_>>().len();
        let mut warnings = Vec::new();
        let mut pass = 0usize;
        loop {
            pass += 1;
            let expanded = self.sort(graph, &current, first, &admit)?;
            warnings.extend(expanded.warnings.iter().cloned());
            let mut result = self.sort(graph, &expanded.to_vec(), first.reverse(), &admit)?;
            trace!(pass, size = result.len(), "不动点闭包迭代");

            if result.len() == size {
                result.absorb_warnings(warnings);
                debug!(passes = pass, size = result.len(), "不动点闭包已收敛");
                return Ok(result);
            }
            size = result.len();
            current = result.into_vec();
        }
    }

    fn admit<N, G>(graph: &G, scope: Scope) -> Admit<N>
    where
        N: ClosureNode,
        G: DependencyGraph<N> + ?Sized,
    {
        match scope {
            Scope::All => Admit::All,
            Scope::Activated => Admit::Only(
                graph
                    .nodes()
                    .into_iter()
                    .filter(|n| graph.is_activated(n))
                    .collect(),
            ),
            Scope::Deactivated => Admit::Only(
                graph
                    .nodes()
                    .into_iter()
                    .filter(|n| !graph.is_activated(n))
                    .collect(),
            ),
        }
    }

    fn sort<N, G>(
        &self,
        graph: &G,
        seed: &[N],
        direction: Direction,
        admit: &Admit<N>,
    ) -> Result<Closure<N>>
    where
        N: ClosureNode,
        G: DependencyGraph<N> + ?Sized,
    {
        let seed: Vec<N> = seed.to_vec();
        let mut t = Traversal::new();

        for root in seed {
            if t.finished.contains(&root) {
                continue;
            }
            let mut stack = vec![self.open(graph, root, direction, &mut t)];

            while let Some(frame) = stack.last_mut() {
                let next = frame.neighbors.get(frame.next).cloned();
                frame.next += 1;

                match next {
                    Some(neighbor) => {
                        if t.finished.contains(&neighbor) || !admit.contains(&neighbor) {
                            continue;
                        }
                        if let Some(start) = t.on_stack.get_index_of(&neighbor) {
                            if !self.options.allow_cycles {
                                let path: Vec<N> =
                                    t.on_stack.iter().skip(start).cloned().collect();
                                warn!(cycle = %path.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(" -> "), "检测到依赖环");
                                t.cycles.record(&path);
                            }
                            continue;
                        }
                        let frame = self.open(graph, neighbor, direction, &mut t);
                        stack.push(frame);
                    }
                    None => {
                        if let Some(done) = stack.pop() {
                            t.on_stack.pop();
                            t.finished.insert(done.node.clone());
                            t.order.insert(done.node);
                        }
                    }
                }
            }
        }

        if !t.cycles.is_empty() {
            return Err(CoreError::CircularDependency(t.cycles));
        }
        Ok(Closure {
            order: t.order,
            warnings: t.warnings,
        })
    }

    /// 把节点压入当前路径并取出其邻居
    fn open<N, G>(&self, graph: &G, node: N, direction: Direction, t: &mut Traversal<N>) -> Frame<N>
    where
        N: ClosureNode,
        G: DependencyGraph<N> + ?Sized,
    {
        t.on_stack.insert(node.clone());

        let lookup = match direction {
            Direction::Requiring => graph.requirers_of(&node),
            Direction::Providing => graph.providers_of(&node),
        };
        let mut self_reference = graph.has_self_reference(&node);
        let neighbors = match lookup {
            Ok(neighbors) => neighbors
                .into_iter()
                .filter(|n| {
                    let is_self = n == &node;
                    self_reference |= is_self;
                    !is_self
                })
                .collect(),
            Err(warning) => {
                warn!(node = %node, warning = %warning, "邻居查询失败，按无邻居处理");
                if !t.warnings.contains(&warning) {
                    t.warnings.push(warning);
                }
                Vec::new()
            }
        };

        if self_reference && !self.options.allow_self_reference && !self.options.allow_cycles {
            warn!(node = %node, "检测到自引用");
            t.cycles.record(std::slice::from_ref(&node));
        }

        Frame {
            node,
            neighbors,
            next: 0,
        }
    }
}
