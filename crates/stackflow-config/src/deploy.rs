//! デプロイ設定モデル
//!
//! プロセス起動時に一度だけ構築し、各ドライバ・オーケストレータへ参照で渡す。
//! コアロジック内で環境変数を直接読むことはしない。

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 環境変数によるオーバーライドのキー
pub const ENV_REGION: &str = "STACKFLOW_REGION";
pub const ENV_REPO_URL: &str = "STACKFLOW_REPO_URL";
pub const ENV_DB_USERNAME: &str = "STACKFLOW_DB_USERNAME";
pub const ENV_DB_PASSWORD: &str = "STACKFLOW_DB_PASSWORD";

/// デプロイ全体の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// プロバイダのリージョン
    pub region: String,
    /// リソース名のベース（バケット名などに使用）
    pub app_name: String,
    /// インスタンス上でビルドするアプリケーションのリポジトリ
    pub repo_url: String,
    /// 状態ファイルを置くディレクトリ
    pub state_dir: PathBuf,
    /// 固定名リソースの名前
    pub names: ResourceNames,
    pub database: DatabaseConfig,
    pub compute: ComputeConfig,
    pub waits: WaitSettings,
    pub delays: DelaySettings,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            app_name: "portfolio-app".to_string(),
            repo_url: String::new(),
            state_dir: PathBuf::from(".stackflow"),
            names: ResourceNames::default(),
            database: DatabaseConfig::default(),
            compute: ComputeConfig::default(),
            waits: WaitSettings::default(),
            delays: DelaySettings::default(),
        }
    }
}

impl DeployConfig {
    /// ロールの固定名
    pub fn role_name(&self) -> String {
        self.names
            .role
            .clone()
            .unwrap_or_else(|| format!("{}-ec2-role", self.app_name))
    }

    /// インスタンスプロファイルの固定名
    pub fn instance_profile_name(&self) -> String {
        self.names
            .instance_profile
            .clone()
            .unwrap_or_else(|| format!("{}-ec2-profile", self.app_name))
    }

    /// ロールのインラインポリシー名
    pub fn policy_name(&self) -> String {
        self.names
            .policy
            .clone()
            .unwrap_or_else(|| format!("{}-s3-access", self.app_name))
    }

    /// Web (コンピュート) 用セキュリティグループ名
    pub fn web_security_group_name(&self) -> String {
        self.names
            .web_security_group
            .clone()
            .unwrap_or_else(|| format!("{}-web-sg", self.app_name))
    }

    /// データベース用セキュリティグループ名
    pub fn db_security_group_name(&self) -> String {
        self.names
            .db_security_group
            .clone()
            .unwrap_or_else(|| format!("{}-db-sg", self.app_name))
    }

    /// DBサブネットグループ名
    pub fn db_subnet_group_name(&self) -> String {
        self.names
            .db_subnet_group
            .clone()
            .unwrap_or_else(|| format!("{}-db-subnets", self.app_name))
    }

    /// タイムスタンプ付きのバケット名
    pub fn bucket_name(&self, timestamp: u64) -> String {
        format!("{}-{}", self.app_name, timestamp)
    }

    /// タイムスタンプ付きのDB識別子
    pub fn db_identifier(&self, timestamp: u64) -> String {
        format!("{}-db-{}", self.app_name, timestamp)
    }

    /// インスタンスの Name タグ
    pub fn instance_name(&self, timestamp: u64) -> String {
        format!("{}-{}", self.app_name, timestamp)
    }

    /// 環境変数でのオーバーライドを適用
    ///
    /// `lookup` は変数名から値を返す関数。テストでは任意の関数を渡せる。
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(region) = lookup(ENV_REGION) {
            self.region = region;
        }
        if let Some(url) = lookup(ENV_REPO_URL) {
            self.repo_url = url;
        }
        if let Some(username) = lookup(ENV_DB_USERNAME) {
            self.database.username = username;
        }
        if let Some(password) = lookup(ENV_DB_PASSWORD) {
            self.database.password = Some(password);
        }
    }

    /// どのコマンドでも必要な最低限の検証
    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::Invalid("region が空です".to_string()));
        }
        validate_app_name(&self.app_name)?;
        self.waits.database.validate("waits.database")?;
        self.waits.instance.validate("waits.instance")?;
        self.waits.deletion.validate("waits.deletion")?;
        Ok(())
    }

    /// provision 実行前の検証（認証情報・リポジトリなど）
    pub fn validate_for_provision(&self) -> Result<()> {
        self.validate()?;

        if self.repo_url.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "repo_url が未設定です（設定ファイルまたは {} で指定）",
                ENV_REPO_URL
            )));
        }

        match self.database.password.as_deref() {
            None | Some("") => {
                return Err(ConfigError::Invalid(format!(
                    "database.password が未設定です（{} で指定してください）",
                    ENV_DB_PASSWORD
                )));
            }
            Some(p) if p.len() < 8 => {
                return Err(ConfigError::Invalid(
                    "database.password は8文字以上必要です".to_string(),
                ));
            }
            Some(p) if p.contains(['/', '@', '"', ' ']) => {
                return Err(ConfigError::Invalid(
                    "database.password に '/', '@', '\"', 空白は使用できません".to_string(),
                ));
            }
            Some(_) => {}
        }

        if self.database.username.trim().is_empty() {
            return Err(ConfigError::Invalid("database.username が空です".to_string()));
        }

        Ok(())
    }
}

/// バケット名にも使われるため S3 の命名規則に合わせる
fn validate_app_name(name: &str) -> Result<()> {
    // 一番長い "{app}-db-{ts}" (DB識別子) でも 63 文字以内
    const MAX_LEN: usize = 63 - "-db-".len() - 10;

    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if name.len() < 3 || name.len() > MAX_LEN || !valid_chars {
        return Err(ConfigError::Invalid(format!(
            "app_name '{}' は3〜{}文字の英小文字・数字・ハイフンで指定してください",
            name, MAX_LEN
        )));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(ConfigError::Invalid(format!(
            "app_name '{}' の先頭・末尾にハイフンは使用できません",
            name
        )));
    }
    Ok(())
}

/// 固定名リソースの名前（未指定時は app_name から導出）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceNames {
    pub role: Option<String>,
    pub instance_profile: Option<String>,
    pub policy: Option<String>,
    pub web_security_group: Option<String>,
    pub db_security_group: Option<String>,
    pub db_subnet_group: Option<String>,
}

/// マネージドデータベースの設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub engine: String,
    pub engine_version: Option<String>,
    pub instance_class: String,
    /// GiB
    pub allocated_storage: i32,
    pub name: String,
    pub username: String,
    /// 設定ファイルには書かず環境変数で渡すことを推奨
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub port: u16,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: "postgres".to_string(),
            engine_version: None,
            instance_class: "db.t3.micro".to_string(),
            allocated_storage: 20,
            name: "portfolio".to_string(),
            username: "portfolio_admin".to_string(),
            password: None,
            port: 5432,
        }
    }
}

/// コンピュートインスタンスの設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub instance_type: String,
    /// 指定時はイメージ検索を行わない
    pub image_id: Option<String>,
    /// image_id 未指定時に最新イメージを探す名前フィルタ
    pub image_name_filter: String,
    pub image_owner: String,
    pub key_name: Option<String>,
    pub app_port: u16,
    /// SSH を許可する CIDR
    pub ssh_cidr: String,
    /// 独自のブートストラップテンプレート（未指定時は組み込み）
    pub bootstrap_template: Option<PathBuf>,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            instance_type: "t3.micro".to_string(),
            image_id: None,
            image_name_filter: "al2023-ami-2023.*-x86_64".to_string(),
            image_owner: "amazon".to_string(),
            key_name: None,
            app_port: 3000,
            ssh_cidr: "0.0.0.0/0".to_string(),
            bootstrap_template: None,
        }
    }
}

/// ポーリング待機の設定（固定間隔 × 最大試行回数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitConfig {
    /// 最大試行回数
    pub max_attempts: u32,
    /// 試行間隔（ミリ秒）
    pub interval_ms: u64,
}

impl WaitConfig {
    pub const fn new(max_attempts: u32, interval_ms: u64) -> Self {
        Self {
            max_attempts,
            interval_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// 待機全体の上限時間
    pub fn budget(&self) -> Duration {
        self.interval() * self.max_attempts
    }

    fn validate(&self, field: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}.max_attempts は1以上を指定してください",
                field
            )));
        }
        Ok(())
    }
}

/// リソース種別ごとの待機設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    /// DB: creating → available（通常10分前後）
    pub database: WaitConfig,
    /// インスタンス: pending → running
    pub instance: WaitConfig,
    /// 削除完了待ち（インスタンス終了・DB削除）
    pub deletion: WaitConfig,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            database: WaitConfig::new(80, 15_000),
            instance: WaitConfig::new(40, 5_000),
            deletion: WaitConfig::new(80, 15_000),
        }
    }
}

/// 結果整合性のための猶予時間
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelaySettings {
    /// インスタンスプロファイル作成後、インスタンス起動までの待機
    pub iam_propagation_ms: u64,
    /// インスタンス終了後、セキュリティグループ削除までの待機
    pub security_group_grace_ms: u64,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            iam_propagation_ms: 10_000,
            security_group_grace_ms: 30_000,
        }
    }
}

impl DelaySettings {
    pub fn iam_propagation(&self) -> Duration {
        Duration::from_millis(self.iam_propagation_ms)
    }

    pub fn security_group_grace(&self) -> Duration {
        Duration::from_millis(self.security_group_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn provisionable() -> DeployConfig {
        let mut config = DeployConfig {
            repo_url: "https://github.com/example/portfolio".to_string(),
            ..Default::default()
        };
        config.database.password = Some("s3cretpassword".to_string());
        config
    }

    #[test]
    fn test_derived_names() {
        let config = DeployConfig::default();
        assert_eq!(config.bucket_name(1700000000), "portfolio-app-1700000000");
        assert_eq!(config.db_identifier(1700000000), "portfolio-app-db-1700000000");
        assert_eq!(config.role_name(), "portfolio-app-ec2-role");
        assert_eq!(config.web_security_group_name(), "portfolio-app-web-sg");
    }

    #[test]
    fn test_explicit_names_win() {
        let mut config = DeployConfig::default();
        config.names.role = Some("custom-role".to_string());
        assert_eq!(config.role_name(), "custom-role");
        assert_eq!(config.instance_profile_name(), "portfolio-app-ec2-profile");
    }

    #[test]
    fn test_apply_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_REGION, "ap-northeast-1"),
            (ENV_DB_PASSWORD, "from-env-password"),
        ]
        .into_iter()
        .collect();

        let mut config = DeployConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.region, "ap-northeast-1");
        assert_eq!(config.database.password.as_deref(), Some("from-env-password"));
        // 指定されていないものはそのまま
        assert_eq!(config.database.username, "portfolio_admin");
    }

    #[test]
    fn test_validate_for_provision() {
        assert!(provisionable().validate_for_provision().is_ok());

        let mut no_password = provisionable();
        no_password.database.password = None;
        assert!(no_password.validate_for_provision().is_err());

        let mut short = provisionable();
        short.database.password = Some("short".to_string());
        assert!(short.validate_for_provision().is_err());

        let mut no_repo = provisionable();
        no_repo.repo_url = String::new();
        assert!(no_repo.validate_for_provision().is_err());
    }

    #[test]
    fn test_app_name_rules() {
        let mut config = DeployConfig::default();
        config.app_name = "Portfolio_App".to_string();
        assert!(config.validate().is_err());

        config.app_name = "-app".to_string();
        assert!(config.validate().is_err());

        config.app_name = "my-app-2".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_name_fits_every_timestamped_name() {
        let mut config = DeployConfig::default();
        config.app_name = "a".repeat(49);
        assert!(config.validate().is_ok());
        assert_eq!(config.db_identifier(1700000000).len(), 63);
        assert!(config.bucket_name(1700000000).len() <= 63);

        // バケット名は収まるがDB識別子は 64 文字になる
        config.app_name = "a".repeat(50);
        assert!(config.validate().is_err());

        config.app_name = "a".repeat(52);
        assert!(config.validate_for_provision().is_err());
    }

    #[test]
    fn test_wait_config_budget() {
        let wait = WaitConfig::new(4, 250);
        assert_eq!(wait.budget(), Duration::from_secs(1));

        let mut config = DeployConfig::default();
        config.waits.instance = WaitConfig::new(0, 10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_password_not_serialized() {
        let config = provisionable();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("s3cretpassword"));
    }
}
