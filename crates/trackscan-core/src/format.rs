//! 基于魔数的内容分类

pub const APK_MAGIC: &[u8] = b"PK\x03\x04";
/// 只比较 `dex\n` 前缀，版本号字节不参与判定
pub const DEX_MAGIC: &[u8] = b"dex\n";
pub const ELF_MAGIC: &[u8] = b"\x7fELF";
/// 分类所需的最少前缀字节数
pub const MAGIC_LEN: usize = 4;

/// 条目的结构类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Apk,
    Dex,
    Elf,
    Unknown,
}

/// 仅检查前 4 字节；无法识别时返回 `Unknown`，从不报错
pub fn classify(bytes: &[u8]) -> FileKind {
    if bytes.starts_with(APK_MAGIC) {
        FileKind::Apk
    } else if bytes.starts_with(DEX_MAGIC) {
        FileKind::Dex
    } else if bytes.starts_with(ELF_MAGIC) {
        FileKind::Elf
    } else {
        FileKind::Unknown
    }
}
