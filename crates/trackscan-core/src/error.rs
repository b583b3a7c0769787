//! 错误类型（扫描 / 生成两条链路）
use std::path::PathBuf;
use thiserror::Error;

/// 扫描阶段的致命错误：任何一个出现都不产出部分结果
#[derive(Debug, Error)]
pub enum ScanError {
    /// 规则库语法错误
    #[error("failed to compile rule corpus {path}: {message}")]
    CorpusCompile { path: PathBuf, message: String },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 容器无法打开（损坏/截断/非 ZIP）；可恢复，仅记录并跳过该队列项
#[derive(Debug, Error)]
#[error("cannot open container {label}: {message}")]
pub struct ContainerError {
    pub label: String,
    pub message: String,
}

/// 单个条目匹配失败（超时、读文件失败等）；可恢复
#[derive(Debug, Error)]
#[error("match failed: {0}")]
pub struct MatchError(pub String);

/// 拉取/解析 tracker 数据源失败
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("http request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed tracker feed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("cannot read feed file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 规则生成阶段的错误
#[derive(Debug, Error)]
pub enum GenerateError {
    /// 目标规则文件已存在：拒绝生成，不做任何写入
    #[error("rule corpus {0} already exists, refusing to regenerate")]
    CorpusExists(PathBuf),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
