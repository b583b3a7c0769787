//! 命中聚合与确定性排序视图
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// 命中所在的作用域
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// 顶层容器整包
    Apk,
    Dex(String),
    Elf(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Apk => f.write_str("apk"),
            Scope::Dex(p) => write!(f, "dex:{p}"),
            Scope::Elf(p) => write!(f, "elf:{p}"),
        }
    }
}

/// 单条命中记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    pub scope: Scope,
    pub rule_id: String,
    pub role: String,
    pub matched: String,
}

/// rule → role → 命中字符串集合
type RuleSets = HashMap<String, HashMap<String, HashSet<String>>>;

/// rule → role → 有序字符串列表
pub type SortedRules = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// 排序后的结果；控制台渲染与 JSON 导出共用
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortedScanResult {
    pub apk: SortedRules,
    pub dex: BTreeMap<String, SortedRules>,
    pub elf: BTreeMap<String, SortedRules>,
}

impl SortedScanResult {
    pub fn is_empty(&self) -> bool {
        self.apk.is_empty() && self.dex.is_empty() && self.elf.is_empty()
    }

    /// 展开为记录列表（按 scope、rule、role、字符串有序）
    pub fn records(&self) -> Vec<MatchRecord> {
        let mut out = Vec::new();
        let mut push = |scope: Scope, rules: &SortedRules| {
            for (rule_id, roles) in rules {
                for (role, strings) in roles {
                    for s in strings {
                        out.push(MatchRecord {
                            scope: scope.clone(),
                            rule_id: rule_id.clone(),
                            role: role.clone(),
                            matched: s.clone(),
                        });
                    }
                }
            }
        };
        push(Scope::Apk, &self.apk);
        for (path, rules) in &self.dex {
            push(Scope::Dex(path.clone()), rules);
        }
        for (path, rules) in &self.elf {
            push(Scope::Elf(path.clone()), rules);
        }
        out
    }
}

/// 命中累加器：集合语义，重复插入无副作用
#[derive(Debug, Default)]
pub struct ResultAggregator {
    apk: RuleSets,
    dex: HashMap<String, RuleSets>,
    elf: HashMap<String, RuleSets>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, scope: &Scope, rule_id: &str, role: &str, matched: String) {
        let rules = match scope {
            Scope::Apk => &mut self.apk,
            Scope::Dex(p) => self.dex.entry(p.clone()).or_default(),
            Scope::Elf(p) => self.elf.entry(p.clone()).or_default(),
        };
        rules
            .entry(rule_id.to_string())
            .or_default()
            .entry(role.to_string())
            .or_default()
            .insert(matched);
    }

    pub fn finalize(self) -> SortedScanResult {
        SortedScanResult {
            apk: sort_rules(self.apk),
            dex: self.dex.into_iter().map(|(k, v)| (k, sort_rules(v))).collect(),
            elf: self.elf.into_iter().map(|(k, v)| (k, sort_rules(v))).collect(),
        }
    }
}

fn sort_rules(rules: RuleSets) -> SortedRules {
    rules
        .into_iter()
        .map(|(rule, roles)| {
            let roles = roles
                .into_iter()
                .map(|(role, set)| {
                    let mut v: Vec<String> = set.into_iter().collect();
                    v.sort();
                    (role, v)
                })
                .collect();
            (rule, roles)
        })
        .collect()
}

/// 宽松解码：非法 UTF-8 字节直接丢弃（不替换为 U+FFFD）
pub fn decode_permissive(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_records_collapse() {
        let mut agg = ResultAggregator::new();
        let scope = Scope::Dex("classes.dex".into());
        agg.record(&scope, "adjust", "code_signature", "com.adjust.sdk".into());
        agg.record(&scope, "adjust", "code_signature", "com.adjust.sdk".into());
        let out = agg.finalize();
        assert_eq!(out.dex["classes.dex"]["adjust"]["code_signature"], vec!["com.adjust.sdk"]);
        assert_eq!(out.records().len(), 1);
    }

    #[test]
    fn finalize_sorts_every_level() {
        let mut agg = ResultAggregator::new();
        for s in ["zeta", "alpha", "mid"] {
            agg.record(&Scope::Apk, "r", "network_signature", s.to_string());
        }
        agg.record(&Scope::Elf("lib/x86/libb.so".into()), "b", "code_signature", "x".into());
        agg.record(&Scope::Elf("lib/arm/liba.so".into()), "a", "code_signature", "y".into());
        let out = agg.finalize();
        assert_eq!(out.apk["r"]["network_signature"], vec!["alpha", "mid", "zeta"]);
        let keys: Vec<_> = out.elf.keys().cloned().collect();
        assert_eq!(keys, vec!["lib/arm/liba.so", "lib/x86/libb.so"]);
        assert!(out.dex.is_empty());
    }

    #[test]
    fn records_carry_scope_addresses() {
        let mut agg = ResultAggregator::new();
        agg.record(&Scope::Dex("classes2.dex".into()), "r", "code_signature", "m".into());
        let recs = agg.finalize().records();
        assert_eq!(recs[0].scope.to_string(), "dex:classes2.dex");
    }

    #[test]
    fn permissive_decode_drops_invalid_bytes() {
        assert_eq!(decode_permissive(b"com.\xff\xfeadjust"), "com.adjust");
        assert_eq!(decode_permissive("héllo".as_bytes()), "héllo");
        assert_eq!(decode_permissive(b"\xc3"), "");
    }
}
