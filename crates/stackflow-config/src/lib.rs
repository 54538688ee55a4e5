pub mod deploy;
pub mod error;

pub use deploy::*;
pub use error::*;

use std::path::{Path, PathBuf};

/// 設定ファイル名の候補（優先順）
const CONFIG_CANDIDATES: [&str; 4] = [
    "stackflow.local.yaml",
    "stackflow.yaml",
    ".stackflow.yaml",
    "stackflow.yml",
];

/// stackflow のグローバル設定ディレクトリを取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("stackflow");

    Ok(config_dir)
}

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 STACKFLOW_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: stackflow.local.yaml, stackflow.yaml, ...
/// 3. ./.stackflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/stackflow/stackflow.yaml (グローバル設定)
///
/// 見つからない場合は `None`（デフォルト設定で動作する）
pub fn find_config_file() -> Result<Option<PathBuf>> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var("STACKFLOW_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ConfigFileNotFound(path));
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリで検索
    if let Some(path) = find_in_dir(&current_dir) {
        return Ok(Some(path));
    }

    // 3. ./.stackflow/ ディレクトリで検索
    let project_dir = current_dir.join(".stackflow");
    if project_dir.is_dir() {
        if let Some(path) = find_in_dir(&project_dir) {
            return Ok(Some(path));
        }
    }

    // 4. グローバル設定ファイル
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("stackflow").join("stackflow.yaml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

fn find_in_dir(dir: &Path) -> Option<PathBuf> {
    CONFIG_CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// YAML ファイルから設定を読み込む
pub fn load_from_path(path: &Path) -> Result<DeployConfig> {
    if !path.exists() {
        return Err(ConfigError::ConfigFileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// 設定を読み込み、環境変数のオーバーライドを適用して検証する
///
/// `explicit` が指定された場合はそのファイルのみを使用する。
/// プロセス起動時に一度だけ呼び出すこと。
pub fn load(explicit: Option<&Path>) -> Result<(DeployConfig, Option<PathBuf>)> {
    let source = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file()?,
    };

    let mut config = match &source {
        Some(path) => load_from_path(path)?,
        None => DeployConfig::default(),
    };

    config.apply_overrides(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    config.validate()?;

    Ok((config, source))
}
