//! 签名匹配器：规则库编译与匹配（基于 yara-x）
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{MatchError, ScanError};

/// 一次原始命中：规则 id、模式名（已去掉 `$`）、命中的字节片段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMatch {
    pub rule_id: String,
    pub role: String,
    pub span: Vec<u8>,
}

/// 匹配能力的抽象；实现需可跨线程共享
pub trait SignatureMatcher: Send + Sync {
    fn match_bytes(&self, data: &[u8]) -> Result<Vec<RawMatch>, MatchError>;

    /// 直接按路径匹配整个文件
    fn match_path(&self, path: &Path) -> Result<Vec<RawMatch>, MatchError>;
}

/// 已编译的 YARA 规则库
pub struct YaraMatcher {
    rules: yara_x::Rules,
    timeout: Duration,
}

impl YaraMatcher {
    /// 从规则文本编译；`origin` 仅用于错误信息
    pub fn from_source(source: &str, origin: &Path) -> Result<Self, ScanError> {
        let mut compiler = yara_x::Compiler::new();
        compiler.add_source(source).map_err(|e| ScanError::CorpusCompile {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self { rules: compiler.build(), timeout: Duration::from_secs(60) })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn scanner(&self) -> yara_x::Scanner<'_> {
        let mut scanner = yara_x::Scanner::new(&self.rules);
        scanner.set_timeout(self.timeout);
        scanner
    }
}

/// 读取并编译规则库文件；语法错误为致命错误
pub fn compile_corpus(path: &Path) -> Result<YaraMatcher, ScanError> {
    let source = std::fs::read_to_string(path)
        .map_err(|source| ScanError::Io { path: path.to_path_buf(), source })?;
    let matcher = YaraMatcher::from_source(&source, path)?;
    info!(corpus = %path.display(), "compiled rule corpus");
    Ok(matcher)
}

impl SignatureMatcher for YaraMatcher {
    fn match_bytes(&self, data: &[u8]) -> Result<Vec<RawMatch>, MatchError> {
        let mut scanner = self.scanner();
        let results = scanner.scan(data).map_err(|e| MatchError(e.to_string()))?;
        Ok(collect_matches(&results))
    }

    fn match_path(&self, path: &Path) -> Result<Vec<RawMatch>, MatchError> {
        let mut scanner = self.scanner();
        let results = scanner
            .scan_file(path)
            .map_err(|e| MatchError(format!("{}: {e}", path.display())))?;
        Ok(collect_matches(&results))
    }
}

fn collect_matches(results: &yara_x::ScanResults) -> Vec<RawMatch> {
    let mut out = Vec::new();
    for rule in results.matching_rules() {
        for pattern in rule.patterns() {
            let role = sanitize_role(pattern.identifier());
            for m in pattern.matches() {
                out.push(RawMatch {
                    rule_id: rule.identifier().to_string(),
                    role: role.clone(),
                    span: m.data().to_vec(),
                });
            }
        }
    }
    debug!(hits = out.len(), "collected matches");
    out
}

/// 去掉匹配器的模式前缀标记（`$name` → `name`）
pub fn sanitize_role(identifier: &str) -> String {
    identifier.trim_start_matches('$').to_string()
}
