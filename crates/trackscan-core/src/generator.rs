//! 规则库生成：tracker 描述 → 去重后的规则块（只追加）
//!
//! 规则库文件假定只有一个写入者；同一路径上并发运行生成器不受支持。
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::GenerateError;
use crate::feed::{TrackerDescriptor, TrackerFeed};
use crate::rules::{
    code_path_variant, corpus_rule_ids, escape_code_signature, escape_network_signature,
    pattern_is_renderable, rule_id, shorten_description, SignatureRule,
};

/// 已有规则的判重方式
/// - Substring：在规则库原文中做子串查找（沿用的行为，id 为其他 id 子串时会误判重复）
/// - Identifier：先解析出规则 id 集合再比较
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupMode {
    #[default]
    Substring,
    Identifier,
}

/// 签名覆盖表中的一项：条件全部满足时执行动作
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignatureOverride {
    /// 条件：tracker 名称完全相等
    #[serde(default)]
    pub name: Option<String>,
    /// 条件：network_signature 完全相等
    #[serde(default)]
    pub network_signature: Option<String>,
    #[serde(default)]
    pub clear_code: bool,
    #[serde(default)]
    pub clear_network: bool,
    #[serde(default)]
    pub set_code_signature: Option<String>,
    #[serde(default)]
    pub set_network_signature: Option<String>,
}

impl SignatureOverride {
    fn matches(&self, d: &TrackerDescriptor) -> bool {
        if self.name.is_none() && self.network_signature.is_none() {
            return false;
        }
        let name_ok = self.name.as_ref().map_or(true, |n| *n == d.name);
        let net_ok = self
            .network_signature
            .as_ref()
            .map_or(true, |n| d.network_signature.as_ref() == Some(n));
        name_ok && net_ok
    }

    fn apply(&self, d: &mut TrackerDescriptor) {
        if self.clear_code {
            d.code_signature = None;
        }
        if self.clear_network {
            d.network_signature = None;
        }
        if let Some(c) = &self.set_code_signature {
            d.code_signature = Some(c.clone());
        }
        if let Some(n) = &self.set_network_signature {
            d.network_signature = Some(n.clone());
        }
    }
}

/// 内置覆盖表
pub fn default_overrides() -> Vec<SignatureOverride> {
    vec![
        // 会命中几乎所有集成了 Facebook SDK 的应用
        SignatureOverride {
            network_signature: Some(r"\.facebook\.com".to_string()),
            clear_network: true,
            ..Default::default()
        },
        SignatureOverride {
            name: Some("Google Ads".to_string()),
            clear_network: true,
            set_code_signature: Some("com.google.android.gms.ads.identifier".to_string()),
            ..Default::default()
        },
    ]
}

/// 生成选项
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub author: String,
    pub dedup: DedupMode,
    /// 每个规则块单独编译校验，不通过的丢弃
    pub validate: bool,
    pub overrides: Vec<SignatureOverride>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            author: "Exodus API".to_string(),
            dedup: DedupMode::Substring,
            validate: true,
            overrides: default_overrides(),
        }
    }
}

/// 一次生成的结果
#[derive(Debug, Default, Clone)]
pub struct Generation {
    pub rules: Vec<SignatureRule>,
    /// 待追加的规则文本（各规则块按顺序拼接）
    pub text: String,
    pub skipped_empty: usize,
    pub duplicates: Vec<String>,
    /// (tracker 名称, 原因)
    pub rejected: Vec<(String, String)>,
}

/// 由 tracker 描述生成新规则块；`existing` 为已有规则库文本
pub fn generate(descriptors: &[TrackerDescriptor], existing: &str, opts: &GeneratorOptions) -> Generation {
    let mut out = Generation::default();
    let mut corpus = existing.to_string();
    let mut known: HashSet<String> = match opts.dedup {
        DedupMode::Identifier => corpus_rule_ids(existing),
        DedupMode::Substring => HashSet::new(),
    };

    for original in descriptors {
        let mut d = original.clone();
        for o in opts.overrides.iter().filter(|o| o.matches(original)) {
            debug!(tracker = %d.name, "applying signature override");
            o.apply(&mut d);
        }

        let code = d.code_signature.as_deref().unwrap_or_default();
        let network = d.network_signature.as_deref().unwrap_or_default();
        if code.is_empty() && network.is_empty() {
            out.skipped_empty += 1;
            continue;
        }

        let Some(id) = rule_id(&d.name) else {
            out.rejected.push((d.name.clone(), "name has no alphabetic characters".to_string()));
            continue;
        };

        let duplicate = match opts.dedup {
            DedupMode::Substring => corpus.contains(&id),
            DedupMode::Identifier => known.contains(&id),
        };
        if duplicate {
            info!(rule = %id, "duplicate rule name found, skipping");
            out.duplicates.push(id);
            continue;
        }

        let escaped_code = escape_code_signature(code);
        let rule = SignatureRule {
            description: shorten_description(d.name.trim()),
            author: opts.author.clone(),
            url: d.website.clone().unwrap_or_default(),
            code_signature: non_empty(escaped_code.clone()),
            code_signature_path: non_empty(code_path_variant(&escaped_code)),
            network_signature: non_empty(escape_network_signature(network)),
            id: id.clone(),
        };

        if let Some((name, _)) = rule.patterns().into_iter().find(|(_, p)| !pattern_is_renderable(p)) {
            warn!(rule = %id, pattern = name, "pattern contains control characters, rejecting");
            out.rejected.push((d.name.clone(), format!("unrenderable {name}")));
            continue;
        }

        let block = rule.render();
        if opts.validate {
            if let Err(e) = yara_x::compile(block.as_str()) {
                warn!(rule = %id, error = %e, "generated rule does not compile, rejecting");
                out.rejected.push((d.name.clone(), e.to_string()));
                continue;
            }
        }

        corpus.push_str(&block);
        out.text.push_str(&block);
        known.insert(id);
        out.rules.push(rule);
    }

    info!(
        generated = out.rules.len(),
        duplicates = out.duplicates.len(),
        rejected = out.rejected.len(),
        empty = out.skipped_empty,
        "rule generation finished"
    );
    out
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// 读取已有规则库（可不存在）并追加新规则块
pub fn append_to_corpus(
    path: &Path,
    descriptors: &[TrackerDescriptor],
    opts: &GeneratorOptions,
) -> Result<Generation, GenerateError> {
    let io = |source| GenerateError::Io { path: path.to_path_buf(), source };
    let existing = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(io(e)),
    };
    let generation = generate(descriptors, &existing, opts);
    if !generation.text.is_empty() {
        let mut f = OpenOptions::new().create(true).append(true).open(path).map_err(io)?;
        f.write_all(generation.text.as_bytes()).map_err(io)?;
    }
    Ok(generation)
}

/// 生成全新的规则库：目标已存在则拒绝；数据源失败时不产生任何写入
pub fn write_corpus(
    path: &Path,
    feed: &dyn TrackerFeed,
    opts: &GeneratorOptions,
) -> Result<Generation, GenerateError> {
    if path.exists() {
        return Err(GenerateError::CorpusExists(path.to_path_buf()));
    }
    let descriptors = feed.fetch()?;
    append_to_corpus(path, &descriptors, opts)
}
