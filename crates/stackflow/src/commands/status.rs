use crate::utils;
use colored::Colorize;
use stackflow_cloud::{RecordKey, ResourceStatus, StateStore, status};
use stackflow_cloud_aws::AwsProvider;
use stackflow_config::DeployConfig;

pub async fn handle(config: &DeployConfig) -> anyhow::Result<()> {
    let store = StateStore::new(&config.state_dir);

    if !store.exists() {
        println!("{}", "デプロイ記録はありません".yellow());
        println!("  {} で構築できます", "stackflow provision".cyan());
        return Ok(());
    }

    let record = store.load().await?;

    println!();
    println!("{}", "デプロイ記録:".bold());
    println!("  {}", store.record_path().display().to_string().dimmed());
    if let Some(created_at) = record.created_at {
        println!("  作成日時: {}", created_at.to_rfc3339().dimmed());
    }
    utils::print_record(&record);

    let region = record
        .get(RecordKey::Region)
        .unwrap_or(config.region.as_str())
        .to_string();
    let provider = AwsProvider::new(region).await;
    let handles = status::inspect(&provider, &record).await?;

    println!();
    println!("{}", format!("リソースの状態 ({} 個):", handles.len()).bold());
    for handle in &handles {
        let status = handle.status.to_string();
        let status = match handle.status {
            ResourceStatus::Available => status.green(),
            ResourceStatus::Creating | ResourceStatus::Deleting => status.yellow(),
            ResourceStatus::Absent | ResourceStatus::Deleted => status.dimmed(),
            ResourceStatus::Failed => status.red().bold(),
        };
        println!(
            "  • {:16} {} {}",
            handle.kind.to_string(),
            format!("{:32}", handle.id).cyan(),
            status
        );
    }

    if let Some(ip) = record.get(RecordKey::PublicIp) {
        println!();
        println!("アプリケーション: {}", format!("http://{}", ip).cyan());
    }

    Ok(())
}
