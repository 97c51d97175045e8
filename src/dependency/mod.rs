//! 依赖闭包引擎
//!
//! - [`metadata`]：项目元数据接口与基于清单的实现
//! - [`graph`]：项目图与模块图
//! - [`sorter`]：拓扑排序、环检测与不动点闭包
//! - [`policy`]：按操作类别选择闭包类型

pub mod cycle;
pub mod graph;
pub mod metadata;
pub mod policy;
pub mod sorter;

pub use cycle::CycleReport;
pub use graph::{DependencyGraph, GraphWarning, ModuleGraph, ProjectGraph};
pub use metadata::{
    ActivationPolicy, ProjectDescriptor, ProjectMetadata, Requirement, StaticProjectMetadata,
    WorkspaceManifest,
};
pub use policy::{ClosureKind, ClosurePolicy, OperationCategory};
pub use sorter::{Closure, ClosureNode, ClosureSorter, Direction, Scope, SortOptions};
