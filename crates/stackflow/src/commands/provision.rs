use crate::logger::StepLogger;
use crate::utils;
use colored::Colorize;
use stackflow_cloud::{Provisioner, StateStore};
use stackflow_cloud_aws::AwsProvider;
use stackflow_config::DeployConfig;

pub async fn handle(config: &DeployConfig) -> anyhow::Result<()> {
    println!("{}", "リソースの構築を開始します...".blue().bold());
    println!("リージョン:   {}", config.region.cyan());
    println!("アプリ名:     {}", config.app_name.cyan());
    println!("リポジトリ:   {}", config.repo_url.cyan());
    println!();

    let store = StateStore::new(&config.state_dir);
    let lock = store.acquire_lock("stackflow provision").await?;

    let provider = AwsProvider::new(config.region.clone()).await;
    let logger = StepLogger::new();
    let timestamp = utils::now_timestamp();

    let result = Provisioner::new(&provider, config, &store, timestamp)
        .with_observer(&logger)
        .run()
        .await;

    lock.release().await?;
    logger.print_summary("provision");

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if store.exists() {
                println!();
                println!(
                    "{}",
                    "途中まで作成したリソースは記録済みです。".yellow()
                );
                println!(
                    "  {} で削除できます（記録: {}）",
                    "stackflow teardown".cyan(),
                    store.record_path().display()
                );
            }
            return Err(e.into());
        }
    };

    println!();
    println!("{}", "デプロイ記録:".bold());
    utils::print_record(&report.record);

    if !report.warnings.is_empty() {
        println!();
        println!("{}", "警告:".yellow().bold());
        for warning in &report.warnings {
            println!("  ⚠ {}", warning);
        }
    }

    println!();
    println!("{}", "✓ 構築が完了しました！".green().bold());
    if let Some(url) = &report.app_url {
        println!("  アプリケーション: {}", url.cyan());
        println!(
            "  {}",
            "インスタンス上のビルドには数分かかります。".dimmed()
        );
    }
    println!(
        "  削除するには {} を実行してください",
        "stackflow teardown".cyan()
    );

    Ok(())
}
