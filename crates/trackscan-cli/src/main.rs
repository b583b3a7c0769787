use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use trackscan_core::{
    scan_apk, write_corpus, write_json, Config, FileFeed, GenerateError, HttpFeed, TrackerFeed,
};
use tracing::{info, warn};

mod output;

/// 命令行入口（基于 clap）
#[derive(Parser, Debug)]
#[command(name = "trackscan", version, about = "Detect tracker SDKs inside Android packages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 扫描 APK（含内嵌 APK）中的 DEX/ELF 与整包内容
    Scan {
        /// APK 文件路径
        apk: PathBuf,

        /// 规则文件路径（YARA）
        #[arg(short, long, default_value = "trackers.yara")]
        rules: PathBuf,

        /// 以 JSON 写出结果；不带值时写到 output.json
        #[arg(short, long, num_args = 0..=1, default_missing_value = "output.json")]
        json: Option<PathBuf>,

        /// 线程数（"auto"=CPU 核心数，1=串行）
        #[arg(long)]
        threads: Option<String>,

        /// 最多展开的容器数（含顶层）
        #[arg(long)]
        max_containers: Option<usize>,

        /// 最大嵌套深度
        #[arg(long)]
        max_depth: Option<usize>,

        /// 单个条目的匹配超时（秒）
        #[arg(long)]
        match_timeout: Option<u64>,

        /// 配置文件（TOML），默认读取当前目录下的 trackscan.toml
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// 从 tracker 数据源生成规则文件；目标已存在时拒绝执行
    Gen {
        /// 输出的规则文件
        #[arg(short, long, default_value = "trackers.yara")]
        rules: PathBuf,

        /// 使用本地 JSON 转储代替远程 API
        #[arg(long, conflicts_with = "feed_url")]
        feed_file: Option<PathBuf>,

        /// 远程 API 地址
        #[arg(long)]
        feed_url: Option<String>,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<ExitCode> {
    // 初始化日志（支持通过 RUST_LOG 控制等级，例如 info、debug）
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { apk, rules, json, threads, max_containers, max_depth, match_timeout, config } => {
            if !apk.is_file() {
                bail!("input {} does not exist", apk.display());
            }
            let cfg = Config::discover(config.as_deref())?;
            let mut opts = cfg.scan_options();
            if let Some(t) = threads {
                opts.threads = parse_threads(&t)?;
            }
            if let Some(n) = max_containers {
                opts.max_containers = n;
            }
            if let Some(n) = max_depth {
                opts.max_depth = n;
            }
            if let Some(secs) = match_timeout {
                opts.match_timeout = Duration::from_secs(secs);
            }

            info!(?apk, ?rules, "starting scan");
            let report = scan_apk(&apk, &rules, &opts).context("scan failed")?;
            for s in &report.stats.skipped {
                warn!(container = %s.label, reason = %s.reason, "container skipped");
            }
            for hit in &report.stats.limit_hits {
                warn!("{hit}");
            }

            match json {
                Some(path) => {
                    let mut out = BufWriter::new(File::create(&path).context("create output file")?);
                    write_json(&report.result, &mut out)?;
                    out.flush().context("flush output file")?;
                    println!("Results saved to {}", path.display());
                }
                None => output::print_matches(&report.result),
            }
            output::print_summary(&report.stats);
        }
        Commands::Gen { rules, feed_file, feed_url, config } => {
            let cfg = Config::discover(config.as_deref())?;
            let opts = cfg.generator_options();
            let feed: Box<dyn TrackerFeed> = match feed_file {
                Some(path) => Box::new(FileFeed { path }),
                None => Box::new(HttpFeed::new(feed_url.unwrap_or_else(|| cfg.feed_url().to_string()))),
            };

            match write_corpus(&rules, feed.as_ref(), &opts) {
                Ok(generation) => {
                    println!(
                        "Wrote {} rules to {} ({} duplicates, {} rejected)",
                        generation.rules.len(),
                        rules.display(),
                        generation.duplicates.len(),
                        generation.rejected.len()
                    );
                    for (name, reason) in &generation.rejected {
                        warn!(tracker = %name, %reason, "tracker rejected");
                    }
                }
                Err(GenerateError::CorpusExists(path)) => {
                    eprintln!("File {} already exists, refusing to regenerate it.", path.display());
                    return Ok(ExitCode::FAILURE);
                }
                Err(e) => return Err(e).context("rule generation failed"),
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    // 支持通过环境变量 RUST_LOG 控制日志等级，如：RUST_LOG=debug；日志走 stderr，stdout 留给结果
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// 解析线程参数："auto" 表示自动
fn parse_threads(s: &str) -> Result<Option<usize>> {
    if s.eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    match s.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(Some(n)),
        _ => bail!("invalid --threads value {s:?}, expected a positive number or \"auto\""),
    }
}
