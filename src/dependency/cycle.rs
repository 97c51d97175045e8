//! 依赖环报告

use std::fmt;

use indexmap::IndexSet;

/// 一次排序中检测到的所有依赖环
///
/// 报告是可累加的：每个环追加一条描述，成员取并集。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    members: IndexSet<String>,
    descriptions: Vec<String>,
}

impl CycleReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个环，`path` 从重复出现的节点开始到栈顶结束
    pub fn record<N: fmt::Display>(&mut self, path: &[N]) {
        let names: Vec<String> = path.iter().map(|n| n.to_string()).collect();
        let Some(first) = names.first().cloned() else {
            return;
        };
        let description = format!("{} -> {}", names.join(" -> "), first);
        if self.descriptions.contains(&description) {
            return;
        }
        self.members.extend(names);
        self.descriptions.push(description);
    }

    /// 合并另一份报告
    pub fn merge(&mut self, other: CycleReport) {
        self.members.extend(other.members);
        for description in other.descriptions {
            if !self.descriptions.contains(&description) {
                self.descriptions.push(description);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    /// 检测到的环数量
    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn contains(&self, member: &str) -> bool {
        self.members.contains(member)
    }

    /// 参与环的所有节点
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    pub fn descriptions(&self) -> &[String] {
        &self.descriptions
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.descriptions.join("; "))
    }
}
