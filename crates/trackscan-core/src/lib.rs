//! 核心扫描库
//!
//! 设计要点：
//! - 以 APK（ZIP）为容器做广度优先展开，内嵌 APK 入队，DEX/ELF 条目交给匹配器；
//! - 匹配能力由 yara-x 提供，规则库为 YARA 文本，由 `generator` 从 tracker 数据源生成；
//! - 命中按 scope → rule → role 聚合为集合，`finalize()` 后全量排序，保证输出可复现；
//! - 单个容器/条目的失败只记录并跳过，规则库编译失败才是致命错误。

mod config;
mod error;
mod feed;
mod findings;
mod format;
mod generator;
mod matcher;
mod options;
mod rules;
mod scan;
mod walker;

pub use config::{Config, GeneratorSection, ScanSection, DEFAULT_CONFIG_FILE};
pub use error::{ContainerError, FeedError, GenerateError, MatchError, ScanError};
pub use feed::{parse_feed, FileFeed, HttpFeed, TrackerDescriptor, TrackerFeed, DEFAULT_FEED_URL};
pub use findings::{decode_permissive, MatchRecord, ResultAggregator, Scope, SortedRules, SortedScanResult};
pub use format::{classify, FileKind};
pub use generator::{
    append_to_corpus, default_overrides, generate, write_corpus, DedupMode, Generation, GeneratorOptions,
    SignatureOverride,
};
pub use matcher::{compile_corpus, sanitize_role, RawMatch, SignatureMatcher, YaraMatcher};
pub use options::{ScanOptions, ScanStats, SkippedContainer, WholeContainerPolicy};
pub use rules::{rule_id, SignatureRule};
pub use scan::{scan_apk, write_json, ScanEngine, ScanReport};
pub use walker::{ContainerEntry, ContainerSource, ContainerWalker, OpenedContainer, Visit, WholeTarget};
