//! 配置文件加载（TOML）
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::feed::DEFAULT_FEED_URL;
use crate::generator::{default_overrides, DedupMode, GeneratorOptions, SignatureOverride};
use crate::options::{ScanOptions, WholeContainerPolicy};

/// 未显式指定时，在当前目录下查找的配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "trackscan.toml";

/// `[scan]` 段；缺省项沿用 `ScanOptions::default()`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanSection {
    pub threads: Option<usize>,
    pub max_containers: Option<usize>,
    pub max_depth: Option<usize>,
    pub max_entry_size: Option<u64>,
    pub match_timeout_secs: Option<u64>,
    pub whole_container: Option<WholeContainerPolicy>,
}

/// `[generator]` 段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorSection {
    pub feed_url: Option<String>,
    pub author: Option<String>,
    pub dedup: Option<DedupMode>,
    pub validate: Option<bool>,
    /// 追加到内置覆盖表之后
    #[serde(default)]
    pub overrides: Vec<SignatureOverride>,
    /// 为 true 时不使用内置覆盖表
    #[serde(default)]
    pub replace_default_overrides: bool,
}

/// 顶层配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanSection,
    #[serde(default)]
    pub generator: GeneratorSection,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let txt = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::parse(&txt).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn parse(txt: &str) -> Result<Self> {
        Ok(toml::from_str(txt)?)
    }

    /// 显式路径必须存在；否则尝试当前目录下的默认文件，没有则用默认配置
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(p) => Self::load(p),
            None => {
                let p = PathBuf::from(DEFAULT_CONFIG_FILE);
                if p.is_file() {
                    Self::load(&p)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        let d = ScanOptions::default();
        let s = &self.scan;
        ScanOptions {
            threads: s.threads.or(d.threads),
            max_containers: s.max_containers.unwrap_or(d.max_containers),
            max_depth: s.max_depth.unwrap_or(d.max_depth),
            max_entry_size: s.max_entry_size.unwrap_or(d.max_entry_size),
            match_timeout: s.match_timeout_secs.map(Duration::from_secs).unwrap_or(d.match_timeout),
            whole_container: s.whole_container.unwrap_or(d.whole_container),
        }
    }

    pub fn generator_options(&self) -> GeneratorOptions {
        let d = GeneratorOptions::default();
        let g = &self.generator;
        let mut overrides = if g.replace_default_overrides { Vec::new() } else { default_overrides() };
        overrides.extend(g.overrides.iter().cloned());
        GeneratorOptions {
            author: g.author.clone().unwrap_or(d.author),
            dedup: g.dedup.unwrap_or(d.dedup),
            validate: g.validate.unwrap_or(d.validate),
            overrides,
        }
    }

    pub fn feed_url(&self) -> &str {
        self.generator.feed_url.as_deref().unwrap_or(DEFAULT_FEED_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = Config::parse("").unwrap();
        let opts = cfg.scan_options();
        assert_eq!(opts.max_containers, 64);
        assert_eq!(opts.whole_container, WholeContainerPolicy::PathBackedOnly);
        assert_eq!(cfg.generator_options().overrides, default_overrides());
        assert_eq!(cfg.feed_url(), DEFAULT_FEED_URL);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = Config::parse(
            r#"
[scan]
threads = 2
max_depth = 3
match_timeout_secs = 5
whole_container = "all-containers"

[generator]
author = "me"
dedup = "identifier"

[[generator.overrides]]
name = "Some SDK"
clear_network = true
"#,
        )
        .unwrap();
        let scan = cfg.scan_options();
        assert_eq!(scan.threads, Some(2));
        assert_eq!(scan.max_depth, 3);
        assert_eq!(scan.match_timeout, Duration::from_secs(5));
        assert_eq!(scan.whole_container, WholeContainerPolicy::AllContainers);
        let gen = cfg.generator_options();
        assert_eq!(gen.author, "me");
        assert_eq!(gen.dedup, DedupMode::Identifier);
        assert_eq!(gen.overrides.len(), default_overrides().len() + 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::parse("[scan]\nmax_dept = 3\n").is_err());
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        assert!(Config::discover(Some(Path::new("/nonexistent/trackscan.toml"))).is_err());
    }
}
