//! 容器遍历：对 ZIP 容器及其内嵌容器做广度优先展开
//!
//! - 队列为 FIFO，初始项为调用方给出的路径或内存缓冲；
//! - 打开失败的队列项只记录并跳过，不影响其余队列项；
//! - 遍历受 `max_containers` / `max_depth` 约束，触发上限时显式上报。
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::error::ContainerError;
use crate::format::{classify, FileKind, MAGIC_LEN};
use crate::options::{ScanOptions, WholeContainerPolicy};

/// 待遍历的容器来源
#[derive(Debug, Clone)]
pub enum ContainerSource {
    /// 文件系统路径（支持整包匹配）
    Path(PathBuf),
    /// 从上层容器解出的内存缓冲
    Buffer { label: String, bytes: Vec<u8> },
}

impl ContainerSource {
    pub fn label(&self) -> String {
        match self {
            ContainerSource::Path(p) => p.display().to_string(),
            ContainerSource::Buffer { label, .. } => label.clone(),
        }
    }
}

/// 容器内的 DEX/ELF 条目
#[derive(Debug, Clone)]
pub struct ContainerEntry {
    /// 条目在其直接所属容器内的路径（不带上层前缀）
    pub path: String,
    pub bytes: Vec<u8>,
    pub kind: FileKind,
}

/// 整包匹配目标
#[derive(Debug, Clone)]
pub enum WholeTarget {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// 成功打开的一个容器
#[derive(Debug)]
pub struct OpenedContainer {
    pub label: String,
    pub depth: usize,
    pub whole: Option<WholeTarget>,
    pub entries: Vec<ContainerEntry>,
    /// 因超过最大深度而未入队的内嵌容器
    pub depth_limited: Vec<String>,
    /// 超过 `max_entry_size` 而未读取的 DEX/ELF/APK 条目
    pub oversized: Vec<String>,
}

/// 遍历中的一步
#[derive(Debug)]
pub enum Visit {
    Opened(OpenedContainer),
    Skipped(ContainerError),
    /// 容器数上限已到，`dropped` 为被丢弃的剩余队列项数
    LimitReached { dropped: usize },
}

pub struct ContainerWalker {
    queue: VecDeque<(ContainerSource, usize)>,
    max_containers: usize,
    max_depth: usize,
    max_entry_size: u64,
    policy: WholeContainerPolicy,
    visited: usize,
    done: bool,
}

impl ContainerWalker {
    pub fn new(source: ContainerSource, opts: &ScanOptions) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back((source, 0));
        Self {
            queue,
            max_containers: opts.max_containers,
            max_depth: opts.max_depth,
            max_entry_size: opts.max_entry_size,
            policy: opts.whole_container,
            visited: 0,
            done: false,
        }
    }

    pub fn visited(&self) -> usize {
        self.visited
    }

    fn open(&mut self, source: ContainerSource, depth: usize) -> Visit {
        let label = source.label();
        let raw = match &source {
            ContainerSource::Path(path) => match File::open(path) {
                Ok(f) => read_entries(BufReader::new(f), &label, self.max_entry_size),
                Err(e) => Err(ContainerError { label: label.clone(), message: e.to_string() }),
            },
            ContainerSource::Buffer { bytes, .. } => {
                read_entries(Cursor::new(bytes.as_slice()), &label, self.max_entry_size)
            }
        };
        let raw = match raw {
            Ok(r) => r,
            Err(e) => {
                warn!(container = %e.label, error = %e.message, "failed to open container, skipping");
                return Visit::Skipped(e);
            }
        };

        let whole = match (source, self.policy) {
            (ContainerSource::Path(p), _) => Some(WholeTarget::Path(p)),
            (ContainerSource::Buffer { bytes, .. }, WholeContainerPolicy::AllContainers) => {
                Some(WholeTarget::Bytes(bytes))
            }
            (ContainerSource::Buffer { .. }, WholeContainerPolicy::PathBackedOnly) => None,
        };

        let oversized = raw.oversized.into_iter().map(|name| format!("{label}!{name}")).collect();
        let mut entries = Vec::new();
        let mut depth_limited = Vec::new();
        for (name, kind, bytes) in raw.kept {
            match kind {
                FileKind::Dex | FileKind::Elf => {
                    debug!(container = %label, entry = %name, ?kind, "classified entry");
                    entries.push(ContainerEntry { path: name, bytes, kind });
                }
                FileKind::Apk => {
                    let nested = format!("{label}!{name}");
                    if depth + 1 > self.max_depth {
                        warn!(container = %nested, max_depth = self.max_depth, "embedded container exceeds nesting limit");
                        depth_limited.push(nested);
                    } else {
                        info!(container = %nested, "found embedded container");
                        self.queue.push_back((ContainerSource::Buffer { label: nested, bytes }, depth + 1));
                    }
                }
                FileKind::Unknown => {}
            }
        }

        Visit::Opened(OpenedContainer { label, depth, whole, entries, depth_limited, oversized })
    }
}

impl Iterator for ContainerWalker {
    type Item = Visit;

    fn next(&mut self) -> Option<Visit> {
        if self.done {
            return None;
        }
        let (source, depth) = self.queue.pop_front()?;
        if self.visited >= self.max_containers {
            // 剩余队列项（含当前这一项）全部丢弃
            let dropped = self.queue.len() + 1;
            self.queue.clear();
            self.done = true;
            warn!(max_containers = self.max_containers, dropped, "container budget exhausted");
            return Some(Visit::LimitReached { dropped });
        }
        self.visited += 1;
        Some(self.open(source, depth))
    }
}

/// `read_entries` 的产物
#[derive(Debug, Default)]
struct ReadEntries {
    /// 只含 DEX/ELF/APK 条目，其余条目读完前缀即丢弃
    kept: Vec<(String, FileKind, Vec<u8>)>,
    /// 超过大小上限的 DEX/ELF/APK 条目名
    oversized: Vec<String>,
}

/// 逐个读取 ZIP 条目（目录跳过）：先读前缀分类，只有 DEX/ELF/APK 才读全文；
/// 单条读取失败只跳过该条目
fn read_entries<R: Read + Seek>(
    reader: R,
    label: &str,
    max_entry_size: u64,
) -> Result<ReadEntries, ContainerError> {
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| ContainerError { label: label.to_string(), message: e.to_string() })?;
    debug!(container = %label, entries = archive.len(), "opened container");

    let mut out = ReadEntries::default();
    for i in 0..archive.len() {
        let mut file = match archive.by_index(i) {
            Ok(f) => f,
            Err(e) => {
                warn!(container = %label, index = i, error = %e, "unreadable entry");
                continue;
            }
        };
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();

        let mut buf = Vec::with_capacity(MAGIC_LEN);
        if let Err(e) = (&mut file).take(MAGIC_LEN as u64).read_to_end(&mut buf) {
            warn!(container = %label, entry = %name, error = %e, "failed to read entry");
            continue;
        }
        let kind = classify(&buf);
        if kind == FileKind::Unknown {
            continue;
        }
        if file.size() > max_entry_size {
            warn!(container = %label, entry = %name, size = file.size(), "entry exceeds size limit, skipping");
            out.oversized.push(name);
            continue;
        }
        // 声明大小不可信，读取时再限一次
        let remaining = max_entry_size.saturating_add(1).saturating_sub(buf.len() as u64);
        match (&mut file).take(remaining).read_to_end(&mut buf) {
            Ok(_) if buf.len() as u64 > max_entry_size => {
                warn!(container = %label, entry = %name, "entry expands past size limit, skipping");
                out.oversized.push(name);
            }
            Ok(_) => out.kept.push((name, kind, buf)),
            Err(e) => warn!(container = %label, entry = %name, error = %e, "failed to read entry"),
        }
    }
    Ok(out)
}
