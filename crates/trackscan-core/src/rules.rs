//! 签名规则的结构化表示与渲染（YARA 文本）
use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// 一条 tracker 签名规则
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRule {
    pub id: String,
    pub description: String,
    pub author: String,
    pub url: String,
    pub code_signature: Option<String>,
    pub network_signature: Option<String>,
    /// code_signature 的路径形式（`.` → `/`），用于匹配 DEX 中的类型描述符
    pub code_signature_path: Option<String>,
}

impl SignatureRule {
    /// 已填充的模式，按渲染顺序：(模式名, 正则体)
    pub fn patterns(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        if let Some(p) = self.code_signature.as_deref() {
            out.push(("code_signature", p));
        }
        if let Some(p) = self.network_signature.as_deref() {
            out.push(("network_signature", p));
        }
        if let Some(p) = self.code_signature_path.as_deref() {
            out.push(("code_signature2", p));
        }
        out
    }

    /// 渲染为独立的规则块；元数据中的 `\` 与 `"` 会被转义，控制字符被丢弃
    pub fn render(&self) -> String {
        let strings: String = self
            .patterns()
            .into_iter()
            .map(|(name, body)| format!("        ${name:<17} = /{body}/\n"))
            .collect();
        format!(
            "\nrule {id} : tracker\n{{\n    meta:\n        description = \"{description}\"\n        author      = \"{author}\"\n        url         = \"{url}\"\n\n    strings:\n{strings}\n    condition:\n        any of them\n}}\n",
            id = self.id,
            description = escape_meta(&self.description),
            author = escape_meta(&self.author),
            url = escape_meta(&self.url),
        )
    }
}

fn escape_meta(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// 模式体能否安全放进 `/.../`：非空且不含控制字符
pub(crate) fn pattern_is_renderable(p: &str) -> bool {
    !p.is_empty() && !p.chars().any(char::is_control)
}

/// 由名称派生规则 id：非字母字符折叠为单个 `_`，去掉首尾 `_`，转小写
pub fn rule_id(name: &str) -> Option<String> {
    let mut id = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphabetic() {
            id.push(c.to_ascii_lowercase());
        } else if !id.ends_with('_') {
            id.push('_');
        }
    }
    let id = id.trim_matches('_');
    (!id.is_empty()).then(|| id.to_string())
}

/// code_signature 转为字面匹配：`.` → `\.`，`/` → `\\`
///
/// `/` 被替换为两个反斜杠（匹配一个字面 `\`），这是沿用下来的既有转换，
/// 生成的规则库依赖这一行为，不要改成 `\/`。
pub fn escape_code_signature(sig: &str) -> String {
    sig.replace('.', "\\.").replace('/', "\\\\")
}

/// network_signature 本身已是正则，仅替换 `/`（同上）
pub fn escape_network_signature(sig: &str) -> String {
    sig.replace('/', "\\\\")
}

/// 由已转义的 code_signature 派生路径形式（`\.` → `\/`）
pub fn code_path_variant(escaped: &str) -> String {
    escaped.replace('.', "/")
}

/// 缩写描述中的常见长词
pub fn shorten_description(name: &str) -> String {
    name.replace("Google", "G.")
        .replace("Facebook", "FB.")
        .replace("Notifications", "Notifs")
}

/// 从规则库文本中解析已声明的规则 id
pub fn corpus_rule_ids(text: &str) -> HashSet<String> {
    static RULE_HEADER: OnceLock<Regex> = OnceLock::new();
    let re = RULE_HEADER.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:(?:private|global)\s+)*rule\s+([A-Za-z_][A-Za-z0-9_]*)")
            .expect("static rule header regex")
    });
    re.captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}
