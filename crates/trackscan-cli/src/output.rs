//! 控制台渲染
use colored::Colorize;
use trackscan_core::{ScanStats, SortedRules, SortedScanResult};

pub(crate) fn print_matches(result: &SortedScanResult) {
    if result.is_empty() {
        println!("{}", "No tracker signatures matched.".dimmed());
        return;
    }
    if !result.apk.is_empty() {
        println!("{}", "\nMatches in APK:".green());
        print_rules(&result.apk);
    }
    for (entry, rules) in result.dex.iter().chain(result.elf.iter()) {
        println!("{}", format!("\nMatches in {entry}:").green());
        print_rules(rules);
    }
}

fn print_rules(rules: &SortedRules) {
    for (rule, roles) in rules {
        println!("{}", format!("\nRule: {rule}").yellow());
        for (role, strings) in roles {
            // code_signature2 只是路径形式，显示时与 code_signature 同名
            let shown = role.trim_end_matches(|c: char| c.is_ascii_digit());
            println!("{} {}", "Type:".blue(), shown.dimmed());
            for s in strings {
                println!("  {}", s.white());
            }
        }
    }
}

pub(crate) fn print_summary(stats: &ScanStats) {
    let mut line = format!(
        "\n{} container(s) scanned, {} target(s) matched",
        stats.containers_visited, stats.entries_matched
    );
    if stats.match_failures > 0 {
        line.push_str(&format!(", {} match failure(s)", stats.match_failures));
    }
    if !stats.skipped.is_empty() {
        line.push_str(&format!(", {} container(s) skipped", stats.skipped.len()));
    }
    println!("{}", line.dimmed());
    for hit in &stats.limit_hits {
        println!("{} {}", "Limit:".red(), hit);
    }
}
