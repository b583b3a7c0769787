//! 扫描主流程与并行调度
use std::io::Write;
use std::path::Path;

use crossbeam_channel as channel;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{MatchError, ScanError};
use crate::findings::{decode_permissive, ResultAggregator, Scope, SortedScanResult};
use crate::format::FileKind;
use crate::matcher::{compile_corpus, RawMatch, SignatureMatcher};
use crate::options::{ScanOptions, ScanStats, SkippedContainer};
use crate::walker::{ContainerEntry, ContainerSource, ContainerWalker, OpenedContainer, Visit, WholeTarget};

/// 一次扫描的产物
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub result: SortedScanResult,
    pub stats: ScanStats,
}

/// 单个匹配任务（整包或条目）
enum Job<'c> {
    WholePath(&'c Path),
    WholeBytes(&'c [u8]),
    Entry(&'c ContainerEntry),
}

type Msg = (Scope, Result<Vec<RawMatch>, MatchError>);

/// 遍历 + 匹配 + 聚合
pub struct ScanEngine<'m> {
    matcher: &'m dyn SignatureMatcher,
    opts: ScanOptions,
}

impl<'m> ScanEngine<'m> {
    pub fn new(matcher: &'m dyn SignatureMatcher, opts: ScanOptions) -> Self {
        Self { matcher, opts }
    }

    /// 扫描一个容器及其全部内嵌容器；单个容器/条目的失败只计入统计
    pub fn scan(&self, source: ContainerSource) -> ScanReport {
        let mut agg = ResultAggregator::new();
        let mut stats = ScanStats::default();

        let threads = self.opts.worker_threads();
        let pool = if threads > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(error = %e, "failed to build worker pool, matching serially");
                    None
                }
            }
        } else {
            None
        };

        let mut walker = ContainerWalker::new(source, &self.opts);
        for visit in walker.by_ref() {
            match visit {
                Visit::Opened(container) => {
                    info!(container = %container.label, depth = container.depth, entries = container.entries.len(), "scanning container");
                    for nested in &container.depth_limited {
                        stats.limit_hits.push(format!(
                            "nesting depth {} exceeded at {nested}",
                            self.opts.max_depth
                        ));
                    }
                    for entry in &container.oversized {
                        stats.limit_hits.push(format!(
                            "entry size limit {} exceeded at {entry}",
                            self.opts.max_entry_size
                        ));
                    }
                    self.match_container(&container, pool.as_ref(), &mut agg, &mut stats);
                }
                Visit::Skipped(e) => {
                    stats.skipped.push(SkippedContainer { label: e.label, reason: e.message });
                }
                Visit::LimitReached { dropped } => {
                    stats.limit_hits.push(format!(
                        "container limit {} reached, {dropped} container(s) not scanned",
                        self.opts.max_containers
                    ));
                }
            }
        }
        stats.containers_visited = walker.visited();

        info!(
            containers = stats.containers_visited,
            skipped = stats.skipped.len(),
            matched = stats.entries_matched,
            failures = stats.match_failures,
            "scan finished"
        );
        ScanReport { result: agg.finalize(), stats }
    }

    fn match_container(
        &self,
        container: &OpenedContainer,
        pool: Option<&rayon::ThreadPool>,
        agg: &mut ResultAggregator,
        stats: &mut ScanStats,
    ) {
        let mut jobs: Vec<Job<'_>> = Vec::with_capacity(container.entries.len() + 1);
        match &container.whole {
            Some(WholeTarget::Path(p)) => jobs.push(Job::WholePath(p)),
            Some(WholeTarget::Bytes(b)) => jobs.push(Job::WholeBytes(b)),
            None => {}
        }
        jobs.extend(container.entries.iter().map(Job::Entry));

        let matcher = self.matcher;
        match pool {
            Some(pool) if jobs.len() > 1 => {
                // worker → 当前线程：聚合器只在当前线程上修改
                let (tx, rx) = channel::bounded::<Msg>(256);
                std::thread::scope(|s| {
                    s.spawn(move || {
                        pool.install(|| {
                            jobs.par_iter().for_each_with(tx, |tx, job| {
                                let _ = tx.send(run_job(matcher, job));
                            });
                        });
                    });
                    for msg in rx.iter() {
                        absorb(msg, agg, stats);
                    }
                });
            }
            _ => {
                for job in &jobs {
                    absorb(run_job(matcher, job), agg, stats);
                }
            }
        }
    }
}

fn run_job(matcher: &dyn SignatureMatcher, job: &Job<'_>) -> Msg {
    match job {
        Job::WholePath(path) => (Scope::Apk, matcher.match_path(path)),
        Job::WholeBytes(bytes) => (Scope::Apk, matcher.match_bytes(bytes)),
        Job::Entry(entry) => {
            debug!(entry = %entry.path, "scanning entry");
            let scope = match entry.kind {
                FileKind::Elf => Scope::Elf(entry.path.clone()),
                _ => Scope::Dex(entry.path.clone()),
            };
            (scope, matcher.match_bytes(&entry.bytes))
        }
    }
}

fn absorb((scope, res): Msg, agg: &mut ResultAggregator, stats: &mut ScanStats) {
    match res {
        Ok(matches) => {
            stats.entries_matched += 1;
            for m in matches {
                agg.record(&scope, &m.rule_id, &m.role, decode_permissive(&m.span));
            }
        }
        Err(e) => {
            stats.match_failures += 1;
            warn!(%scope, error = %e, "matching failed, continuing");
        }
    }
}

/// 编译规则库并扫描文件系统上的 APK
pub fn scan_apk(apk: &Path, corpus: &Path, opts: &ScanOptions) -> Result<ScanReport, ScanError> {
    let matcher = compile_corpus(corpus)?.with_timeout(opts.match_timeout);
    let engine = ScanEngine::new(&matcher, opts.clone());
    Ok(engine.scan(ContainerSource::Path(apk.to_path_buf())))
}

/// 以缩进 JSON 写出排序后的结果；相同输入得到逐字节相同的输出
pub fn write_json(result: &SortedScanResult, out: &mut dyn Write) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, result)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::tests::ZipBuilder;

    /// 按字面量查找的测试匹配器
    struct Literal(Vec<(&'static str, &'static str, &'static [u8])>);

    impl SignatureMatcher for Literal {
        fn match_bytes(&self, data: &[u8]) -> Result<Vec<RawMatch>, MatchError> {
            if data.windows(7).any(|w| w == b"TIMEOUT") {
                return Err(MatchError("timed out".into()));
            }
            Ok(self
                .0
                .iter()
                .filter(|(_, _, needle)| data.windows(needle.len()).any(|w| w == *needle))
                .map(|(rule, role, needle)| RawMatch {
                    rule_id: rule.to_string(),
                    role: role.to_string(),
                    span: needle.to_vec(),
                })
                .collect())
        }

        fn match_path(&self, path: &Path) -> Result<Vec<RawMatch>, MatchError> {
            let data = std::fs::read(path).map_err(|e| MatchError(e.to_string()))?;
            self.match_bytes(&data)
        }
    }

    fn literal() -> Literal {
        Literal(vec![
            ("facebook", "code_signature", &b"com.facebook.ads"[..]),
            ("unity", "code_signature", &b"com.unity3d.ads"[..]),
        ])
    }

    fn buffer(bytes: Vec<u8>) -> ContainerSource {
        ContainerSource::Buffer { label: "mem.apk".into(), bytes }
    }

    #[test]
    fn entry_failures_do_not_abort_siblings() {
        let apk = ZipBuilder::new()
            .file("classes.dex", b"dex\n035\0TIMEOUT")
            .file("classes2.dex", b"dex\n035\0com.facebook.ads.AdView")
            .build();
        for threads in [1, 4] {
            let opts = ScanOptions { threads: Some(threads), ..ScanOptions::default() };
            let report = ScanEngine::new(&literal(), opts).scan(buffer(apk.clone()));
            assert_eq!(report.stats.match_failures, 1);
            assert_eq!(report.stats.entries_matched, 1);
            assert_eq!(
                report.result.dex["classes2.dex"]["facebook"]["code_signature"],
                vec!["com.facebook.ads"]
            );
        }
    }

    #[test]
    fn serial_and_parallel_runs_agree() {
        let inner = ZipBuilder::new()
            .file("lib/arm64-v8a/libunity.so", b"\x7fELF com.unity3d.ads")
            .build();
        let apk = ZipBuilder::new()
            .file("classes.dex", b"dex\n035\0com.facebook.ads")
            .file("classes2.dex", b"dex\n035\0com.unity3d.ads")
            .file("assets/plugin.apk", &inner)
            .build();
        let serial = ScanEngine::new(&literal(), ScanOptions { threads: Some(1), ..Default::default() })
            .scan(buffer(apk.clone()));
        let parallel = ScanEngine::new(&literal(), ScanOptions { threads: Some(8), ..Default::default() })
            .scan(buffer(apk));
        assert_eq!(serial.result, parallel.result);
        assert!(serial.result.apk.is_empty());
        assert_eq!(serial.result.elf["lib/arm64-v8a/libunity.so"]["unity"]["code_signature"], vec!["com.unity3d.ads"]);
        assert_eq!(serial.stats.containers_visited, 2);
    }

    #[test]
    fn limit_hits_are_reported() {
        let inner = ZipBuilder::new().file("classes.dex", b"dex\n035\0com.facebook.ads").build();
        let apk = ZipBuilder::new().file("a.apk", &inner).build();
        let opts = ScanOptions { max_depth: 0, ..ScanOptions::default() };
        let report = ScanEngine::new(&literal(), opts).scan(buffer(apk));
        assert!(report.result.is_empty());
        assert_eq!(report.stats.limit_hits.len(), 1);
        assert!(report.stats.limit_hits[0].contains("mem.apk!a.apk"));
    }

    #[test]
    fn oversized_entries_are_reported_as_limit_hits() {
        let apk = ZipBuilder::new()
            .file("classes.dex", b"dex\n035\0com.facebook.ads")
            .file("assets/big.txt", b"not a dex, not reported")
            .build();
        let opts = ScanOptions { max_entry_size: 8, ..ScanOptions::default() };
        let report = ScanEngine::new(&literal(), opts).scan(buffer(apk));
        assert!(report.result.is_empty());
        assert_eq!(report.stats.entries_matched, 0);
        assert_eq!(report.stats.limit_hits, vec!["entry size limit 8 exceeded at mem.apk!classes.dex"]);
    }

    #[test]
    fn json_is_sorted_and_stable() {
        let apk = ZipBuilder::new()
            .file("classes2.dex", b"dex\n035\0com.unity3d.ads")
            .file("classes.dex", b"dex\n035\0com.facebook.ads")
            .build();
        let report = ScanEngine::new(&literal(), ScanOptions::default()).scan(buffer(apk));
        let mut a = Vec::new();
        write_json(&report.result, &mut a).unwrap();
        let text = String::from_utf8(a).unwrap();
        let first = text.find("\"classes.dex\"").unwrap();
        let second = text.find("\"classes2.dex\"").unwrap();
        assert!(first < second);
        assert!(text.starts_with("{\n  \"apk\": {}"));
    }
}
