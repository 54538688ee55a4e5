//! ステップ進捗の表示
//!
//! オーケストレータから受け取ったステップ遷移を、時刻・所要時間付きで
//! 端末に出力する。最後にサマリーを表示する。

use chrono::Local;
use colored::Colorize;
use stackflow_cloud::StepObserver;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// ステップの実行結果
#[derive(Debug, Clone)]
enum Outcome {
    Success { duration: Duration },
    Skipped,
    Failed { duration: Duration },
}

impl Outcome {
    fn duration(&self) -> Option<Duration> {
        match self {
            Self::Success { duration } | Self::Failed { duration } => Some(*duration),
            Self::Skipped => None,
        }
    }
}

#[derive(Default)]
struct LoggerState {
    current_step: Option<(String, Instant)>,
    step_results: Vec<(String, Outcome)>,
    warnings: usize,
}

/// 進捗ログ出力器
pub struct StepLogger {
    start_time: Instant,
    state: Mutex<LoggerState>,
}

impl StepLogger {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            state: Mutex::new(LoggerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, LoggerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 開始済みステップの経過時間を取り出す
    fn finish(&self, step: &str, outcome: impl FnOnce(Duration) -> Outcome) -> Duration {
        let mut state = self.state();
        let duration = match state.current_step.take() {
            Some((current, start)) if current == step => start.elapsed(),
            _ => Duration::ZERO,
        };
        state.step_results.push((step.to_string(), outcome(duration)));
        duration
    }

    /// サマリーを出力
    pub fn print_summary(&self, title: &str) {
        let state = self.state();
        let total_duration = self.start_time.elapsed();

        let count = |pred: fn(&Outcome) -> bool| {
            state
                .step_results
                .iter()
                .filter(|(_, outcome)| pred(outcome))
                .count()
        };
        let error_count = count(|o| matches!(o, Outcome::Failed { .. }));
        let skipped_count = count(|o| matches!(o, Outcome::Skipped));

        let slowest_step = state
            .step_results
            .iter()
            .filter_map(|(step, outcome)| outcome.duration().map(|d| (step, d)))
            .max_by_key(|(_, d)| *d);

        println!();
        println!("{}", "═".repeat(44));
        println!("Summary: {}", title.cyan().bold());
        println!("{}", "─".repeat(44));
        println!("Total time:    {}", format_duration(total_duration).green());

        if let Some((step, duration)) = slowest_step {
            println!("Slowest step:  {} ({})", step, format_duration(duration));
        }

        println!("Skipped:       {}", skipped_count);

        if state.warnings > 0 {
            println!("Warnings:      {}", state.warnings.to_string().yellow());
        }

        if error_count > 0 {
            println!("Errors:        {}", error_count.to_string().red().bold());
        } else {
            println!("Errors:        {}", "0".green());
        }
        println!("{}", "═".repeat(44));
    }
}

impl Default for StepLogger {
    fn default() -> Self {
        Self::new()
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

impl StepObserver for StepLogger {
    fn step_started(&self, step: &str, description: &str) {
        println!(
            "[{}] {} {} {}",
            timestamp().dimmed(),
            "▶".cyan(),
            step.bold(),
            description
        );
        self.state().current_step = Some((step.to_string(), Instant::now()));
    }

    fn step_succeeded(&self, step: &str, message: &str) {
        let duration = self.finish(step, |duration| Outcome::Success { duration });
        println!(
            "[{}] {} {} ({})",
            timestamp().dimmed(),
            "✓".green().bold(),
            message,
            format_duration(duration).dimmed()
        );
    }

    fn step_skipped(&self, step: &str, reason: &str) {
        self.finish(step, |_| Outcome::Skipped);
        println!(
            "[{}] {} {} ({})",
            timestamp().dimmed(),
            "⏭".yellow(),
            step,
            reason.dimmed()
        );
    }

    fn step_failed(&self, step: &str, error: &str) {
        self.finish(step, |duration| Outcome::Failed { duration });
        println!(
            "[{}] {} {}: {}",
            timestamp().dimmed(),
            "✗".red().bold(),
            step,
            error.red()
        );
    }

    fn detail(&self, message: &str) {
        println!("[{}]   → {}", timestamp().dimmed(), message.cyan());
    }

    fn warning(&self, message: &str) {
        self.state().warnings += 1;
        println!("[{}] {} {}", timestamp().dimmed(), "⚠".yellow(), message.yellow());
    }
}

/// Duration を読みやすい形式にフォーマット
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs >= 60 {
        let minutes = total_secs / 60;
        let secs = total_secs % 60;
        format!("{}m {}s", minutes, secs)
    } else if total_secs >= 1 {
        format!("{}.{}s", total_secs, millis / 100)
    } else {
        format!("{}ms", millis)
    }
}
