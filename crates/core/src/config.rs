//! # 配信設定
//!
//! 環境変数からの設定読み込み。

use std::time::Duration;

use crate::error::PushError;

/// Push ServiceへのTTLヘッダー（秒）: 24時間
pub const DEFAULT_TTL_SECS: u32 = 86_400;

/// 1リクエストあたりのタイムアウト（秒）
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// 同時配信数の上限
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// 通知アイコンの既定パス
pub const DEFAULT_ICON: &str = "/icons/icon-192x192.png";

/// 通知バッジの既定パス
pub const DEFAULT_BADGE: &str = "/icons/badge-72x72.png";

/// VAPIDの`sub`クレームの既定値
pub const DEFAULT_SUBJECT: &str = "mailto:admin@localhost";

/// 配信エンジンの設定。
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// VAPIDの`sub`クレーム（`mailto:`または`https:`）
    pub subject: String,
    /// `TTL`ヘッダー（秒）
    pub ttl_secs: u32,
    /// 1回のPOSTのタイムアウト
    pub request_timeout: Duration,
    /// 同時に実行する配信タスク数
    pub max_concurrency: usize,
    /// ペイロードの`icon`
    pub icon: String,
    /// ペイロードの`badge`
    pub badge: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            subject: DEFAULT_SUBJECT.to_string(),
            ttl_secs: DEFAULT_TTL_SECS,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            icon: DEFAULT_ICON.to_string(),
            badge: DEFAULT_BADGE.to_string(),
        }
    }
}

impl PushConfig {
    /// 連絡先を指定し、残りを既定値で構築する。
    pub fn new(subject: impl Into<String>) -> Result<Self, PushError> {
        let subject = subject.into();
        validate_subject(&subject)?;
        Ok(Self {
            subject,
            ..Self::default()
        })
    }

    /// 環境変数から構築する。
    ///
    /// - `VAPID_SUBJECT`（必須）
    /// - `PUSH_TTL_SECS` / `PUSH_TIMEOUT_SECS` / `PUSH_MAX_CONCURRENCY`
    /// - `PUSH_ICON` / `PUSH_BADGE`
    pub fn from_env() -> Result<Self, PushError> {
        let subject = std::env::var("VAPID_SUBJECT")
            .map_err(|_| PushError::Configuration("VAPID_SUBJECTが設定されていません".to_string()))?;
        let mut config = Self::new(subject)?;

        config.ttl_secs = parse_env_or("PUSH_TTL_SECS", DEFAULT_TTL_SECS)?;
        config.request_timeout =
            request_timeout(parse_env_or("PUSH_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?)?;
        config.max_concurrency =
            parse_env_or("PUSH_MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY)?.max(1);
        config.icon = std::env::var("PUSH_ICON").unwrap_or_else(|_| DEFAULT_ICON.to_string());
        config.badge = std::env::var("PUSH_BADGE").unwrap_or_else(|_| DEFAULT_BADGE.to_string());

        Ok(config)
    }
}

/// VAPIDの連絡先はRFC 8292 §2.1により`mailto:`か`https:`のURI。
fn validate_subject(subject: &str) -> Result<(), PushError> {
    let valid = subject
        .strip_prefix("mailto:")
        .or_else(|| subject.strip_prefix("https://"))
        .is_some_and(|rest| !rest.is_empty());
    if valid {
        Ok(())
    } else {
        Err(PushError::Configuration(format!(
            "VAPID_SUBJECTはmailto:またはhttps:で始まる必要があります: {subject}"
        )))
    }
}

/// POSTのタイムアウト（1秒以上）。
fn request_timeout(secs: u64) -> Result<Duration, PushError> {
    if secs == 0 {
        return Err(PushError::Configuration(
            "PUSH_TIMEOUT_SECSは1以上である必要があります".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_env_or<T>(name: &str, default: T) -> Result<T, PushError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, PushError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| PushError::Configuration(format!("{name}の値が不正です ({raw}): {e}")))
}
