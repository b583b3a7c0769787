//! 扫描选项与统计信息（模块）
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 整包匹配策略
/// - PathBackedOnly：只有来自文件路径的顶层容器做整包匹配（与原工具一致，默认）
/// - AllContainers：内嵌（内存中）容器也做整包匹配，命中同样归入 `apk` 作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WholeContainerPolicy {
    #[default]
    PathBackedOnly,
    AllContainers,
}

/// 扫描选项
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// 线程数：None 表示自动（等于 CPU 核数）；Some(1) 走串行
    pub threads: Option<usize>,
    /// 最多打开的容器数（含顶层）
    pub max_containers: usize,
    /// 最大嵌套深度；顶层容器深度为 0
    pub max_depth: usize,
    /// 单个条目解压后的最大字节数；超过则跳过
    pub max_entry_size: u64,
    /// 单次匹配超时
    pub match_timeout: Duration,
    pub whole_container: WholeContainerPolicy,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            threads: None,
            max_containers: 64,
            max_depth: 8,
            max_entry_size: 256 * 1024 * 1024,
            match_timeout: Duration::from_secs(60),
            whole_container: WholeContainerPolicy::PathBackedOnly,
        }
    }
}

impl ScanOptions {
    pub(crate) fn worker_threads(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get).max(1)
    }
}

/// 被跳过的容器（打开失败）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedContainer {
    pub label: String,
    pub reason: String,
}

/// 扫描统计信息（便于 CLI 打印）
#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanStats {
    pub containers_visited: usize,
    pub entries_matched: usize,
    pub match_failures: usize,
    pub skipped: Vec<SkippedContainer>,
    /// 触发遍历上限的描述；为空表示未截断
    pub limit_hits: Vec<String>,
}
