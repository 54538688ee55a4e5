use colored::Colorize;
use stackflow_cloud::DeploymentRecord;
use std::path::Path;

/// 読み込んだ設定ファイル情報を表示
pub fn print_loaded_config(source: Option<&Path>) {
    match source {
        Some(path) => println!("📄 設定ファイル: {}", path.display().to_string().cyan()),
        None => println!("📄 設定ファイルなし（デフォルト値 + 環境変数）"),
    }
}

/// リソース名と記録ファイル名に使う UNIX 秒
pub fn now_timestamp() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// デプロイ記録を `KEY = value` 形式で表示
pub fn print_record(record: &DeploymentRecord) {
    let width = record
        .iter()
        .map(|(key, _)| key.as_str().len())
        .max()
        .unwrap_or(0);

    for (key, value) in record.iter() {
        println!("  {:width$}  {}", key.as_str(), value.cyan(), width = width);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_timestamp_is_recent() {
        // 2023-11-14 以降
        assert!(now_timestamp() > 1_700_000_000);
    }
}
