//! 撤去前の確認プロンプト

use colored::Colorize;
use stackflow_cloud::{ActionType, ConfirmationPrompt, TeardownPlan};
use std::io::{self, BufRead, Write};

/// 削除計画を表示し、`yes` の入力を求める
pub struct TypedConfirmation;

impl ConfirmationPrompt for TypedConfirmation {
    fn confirm(&self, plan: &TeardownPlan) -> stackflow_cloud::Result<bool> {
        print_plan(plan);

        if !plan.has_changes {
            println!("{}", "削除対象のリソースは記録されていません。".yellow());
        }

        println!();
        print!(
            "{} ",
            "この操作は元に戻せません。続行するには yes と入力してください:".red().bold()
        );
        io::stdout().flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(accepts(&answer))
    }
}

/// 削除計画を表示
pub fn print_plan(plan: &TeardownPlan) {
    println!();
    match &plan.region {
        Some(region) => println!("{} ({})", "削除計画".bold(), region.cyan()),
        None => println!("{}", "削除計画".bold()),
    }

    for action in &plan.actions {
        match action.action_type {
            ActionType::Delete => println!("  {} {}", "-".red(), action.description),
            ActionType::Skip => println!(
                "  {} {}",
                "·".dimmed(),
                format!("{} (未記録)", action.id).dimmed()
            ),
        }
    }
    println!("  {}", plan.summary().to_string().dimmed());
}

/// 完全一致の `yes` だけを承認とみなす
fn accepts(answer: &str) -> bool {
    answer.trim() == "yes"
}
