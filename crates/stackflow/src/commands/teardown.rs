use crate::logger::StepLogger;
use crate::prompt::{TypedConfirmation, print_plan};
use crate::utils;
use colored::Colorize;
use stackflow_cloud::{
    AssumeYes, CloudError, ConfirmationPrompt, RecordKey, StateStore, Teardown, TeardownPlan,
};
use stackflow_cloud_aws::AwsProvider;
use stackflow_config::DeployConfig;

/// `--yes` 指定時も計画だけは表示する
struct ShowPlan;

impl ConfirmationPrompt for ShowPlan {
    fn confirm(&self, plan: &TeardownPlan) -> stackflow_cloud::Result<bool> {
        print_plan(plan);
        println!();
        AssumeYes.confirm(plan)
    }
}

pub async fn handle(config: &DeployConfig, yes: bool) -> anyhow::Result<()> {
    let store = StateStore::new(&config.state_dir);

    // 記録がなければ AWS に触れずに終了
    if !store.exists() {
        return Err(CloudError::StateStoreMissing(store.record_path()).into());
    }

    let record = store.load().await?;
    let region = record
        .get(RecordKey::Region)
        .unwrap_or(config.region.as_str())
        .to_string();

    println!("{}", "記録されたリソースを削除します...".yellow().bold());
    println!("リージョン: {}", region.cyan());
    println!("記録:       {}", store.record_path().display());

    let lock = store.acquire_lock("stackflow teardown").await?;
    let provider = AwsProvider::new(region).await;
    let logger = StepLogger::new();

    let prompt: &dyn ConfirmationPrompt = if yes { &ShowPlan } else { &TypedConfirmation };
    let result = Teardown::new(&provider, config, &store, utils::now_timestamp())
        .with_observer(&logger)
        .run(prompt)
        .await;

    lock.release().await?;
    let report = result?;
    logger.print_summary("teardown");

    if report.is_success() {
        println!();
        println!("{}", "✓ すべてのリソースを削除しました".green().bold());
        if let Some(backup) = &report.backup {
            println!("  記録の退避先: {}", backup.display().to_string().cyan());
        }
        return Ok(());
    }

    println!();
    println!("{}", "失敗したステップ:".red().bold());
    for step in report.failed() {
        println!("  ✗ {}: {}", step.step, step.result.message());
    }
    println!(
        "  記録は残しています。原因を解消してから {} を再実行してください",
        "stackflow teardown".cyan()
    );

    Err(anyhow::anyhow!(
        "{} 個のステップが失敗しました",
        report.failed().len()
    ))
}
