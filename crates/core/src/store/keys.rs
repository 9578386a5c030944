//! # Key Store実装

use clubpush_types::StoredVapidKeys;

use crate::error::PushError;

use super::KeyStore;

/// メモリ上に保持した鍵ペアを返すKey Store。
#[derive(Debug, Clone)]
pub struct StaticKeyStore {
    keys: StoredVapidKeys,
}

impl StaticKeyStore {
    /// 鍵ペアを保持して構築する。
    pub fn new(keys: StoredVapidKeys) -> Self {
        Self { keys }
    }
}

#[async_trait::async_trait]
impl KeyStore for StaticKeyStore {
    async fn signing_key_pair(&self) -> Result<StoredVapidKeys, PushError> {
        Ok(self.keys.clone())
    }
}

/// 環境変数から鍵ペアを読むKey Store。
///
/// 既定の変数名は`VAPID_PUBLIC_KEY`と`VAPID_PRIVATE_KEY`（いずれもBase64url）。
#[derive(Debug, Clone)]
pub struct EnvKeyStore {
    public_key_var: String,
    private_key_var: String,
}

impl Default for EnvKeyStore {
    fn default() -> Self {
        Self::new("VAPID_PUBLIC_KEY", "VAPID_PRIVATE_KEY")
    }
}

impl EnvKeyStore {
    /// 変数名を指定して構築する。
    pub fn new(public_key_var: impl Into<String>, private_key_var: impl Into<String>) -> Self {
        Self {
            public_key_var: public_key_var.into(),
            private_key_var: private_key_var.into(),
        }
    }

    fn read(&self, name: &str) -> Result<String, PushError> {
        match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => Err(PushError::Configuration(format!("{name}が設定されていません"))),
        }
    }
}

#[async_trait::async_trait]
impl KeyStore for EnvKeyStore {
    async fn signing_key_pair(&self) -> Result<StoredVapidKeys, PushError> {
        Ok(StoredVapidKeys {
            public_key: self.read(&self.public_key_var)?,
            private_key: self.read(&self.private_key_var)?,
        })
    }
}
