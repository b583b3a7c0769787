//! tracker 数据源（Exodus Privacy API 或本地 JSON 转储）
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::FeedError;

pub const DEFAULT_FEED_URL: &str = "https://reports.exodus-privacy.eu.org/api/trackers";

/// 数据源中的单个 tracker 描述
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TrackerDescriptor {
    pub name: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub code_signature: Option<String>,
    #[serde(default)]
    pub network_signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedDocument {
    trackers: BTreeMap<String, TrackerDescriptor>,
}

/// 解析数据源文档；按 tracker 数字 id 升序返回，保证生成顺序稳定
pub fn parse_feed(text: &str) -> Result<Vec<TrackerDescriptor>, FeedError> {
    let doc: FeedDocument = serde_json::from_str(text)?;
    let mut items: Vec<(String, TrackerDescriptor)> = doc.trackers.into_iter().collect();
    items.sort_by(|(a, _), (b, _)| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    });
    Ok(items.into_iter().map(|(_, d)| d).collect())
}

/// 数据源抽象
pub trait TrackerFeed {
    fn fetch(&self) -> Result<Vec<TrackerDescriptor>, FeedError>;
}

/// 远程 HTTP 数据源
pub struct HttpFeed {
    pub url: String,
    pub timeout: Duration,
}

impl HttpFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), timeout: Duration::from_secs(30) }
    }
}

impl TrackerFeed for HttpFeed {
    fn fetch(&self) -> Result<Vec<TrackerDescriptor>, FeedError> {
        let http = |source| FeedError::Http { url: self.url.clone(), source };
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("trackscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(http)?;
        info!(url = %self.url, "fetching tracker feed");
        let body = client
            .get(&self.url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .map_err(http)?;
        parse_feed(&body)
    }
}

/// 本地 JSON 文件数据源（离线使用）
pub struct FileFeed {
    pub path: PathBuf,
}

impl TrackerFeed for FileFeed {
    fn fetch(&self) -> Result<Vec<TrackerDescriptor>, FeedError> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|source| FeedError::Io { path: self.path.clone(), source })?;
        parse_feed(&text)
    }
}
