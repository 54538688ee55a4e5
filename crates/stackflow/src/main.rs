mod commands;
mod logger;
mod prompt;
mod utils;

use clap::{Parser, Subcommand};
use colored::Colorize;
use stackflow_cloud::CloudError;
use std::path::PathBuf;
use std::process::ExitCode;

/// 確認プロンプトで中止された場合の終了コード
const EXIT_CANCELLED: u8 = 2;

#[derive(Parser)]
#[command(name = "stackflow")]
#[command(about = "Webアプリケーション一式のAWSリソースを構築・撤去する", long_about = None)]
struct Cli {
    /// 設定ファイルのパス（省略時は自動検出）
    #[arg(long, global = true, env = "STACKFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// バケット・ロール・セキュリティグループ・DB・インスタンスを順に構築
    Provision,
    /// デプロイ記録にあるリソースを逆順に削除
    Teardown {
        /// 確認プロンプトをスキップ
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// デプロイ記録とリソースの状態を表示
    Status,
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ログはstderrへ（stdoutは進捗表示に使う）
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_cancelled(&e) => {
            println!();
            println!("{}", "撤去をキャンセルしました。何も変更していません。".yellow());
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Versionコマンドは設定ファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("stackflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let (config, source) = stackflow_config::load(cli.config.as_deref())?;
    utils::print_loaded_config(source.as_deref());
    tracing::debug!(
        "state_dir={}, region={}",
        config.state_dir.display(),
        config.region
    );

    match cli.command {
        Commands::Provision => commands::provision::handle(&config).await,
        Commands::Teardown { yes } => commands::teardown::handle(&config, yes).await,
        Commands::Status => commands::status::handle(&config).await,
        Commands::Version => unreachable!("Version is handled before config loading"),
    }
}

fn is_cancelled(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<CloudError>(),
        Some(CloudError::ConfirmationDeclined)
    )
}
