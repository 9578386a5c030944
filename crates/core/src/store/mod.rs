//! # 外部コラボレーター
//!
//! 配信エンジンが利用する永続化層・ユーザー管理のインターフェース。
//! 実体は周辺サービスが実装する。このクレートにはメモリ内実装と
//! 環境変数ベースのKey Storeのみを含む。

pub mod keys;
pub mod memory;

use clubpush_crypto::vapid::VapidKeyPair;
use clubpush_types::{NotificationType, StoredVapidKeys, Subscriber};

use crate::error::PushError;

pub use keys::{EnvKeyStore, StaticKeyStore};
pub use memory::{MemoryDirectory, RecordedNotification};

/// VAPID署名鍵ペアの保存先。
#[async_trait::async_trait]
pub trait KeyStore: Send + Sync {
    /// 保存済みの鍵ペアを返す。存在しなければ`Configuration`エラー。
    async fn signing_key_pair(&self) -> Result<StoredVapidKeys, PushError>;
}

/// 論理的な宛先を具体的な購読の一覧に解決する。
#[async_trait::async_trait]
pub trait AudienceResolver: Send + Sync {
    /// 宛先の購読を返す。
    ///
    /// `target_user_id`と`target_user_ids`がどちらも`None`の場合は、
    /// member以上の権限を持つアカウントの購読のみを返す。
    async fn resolve_subscribers(
        &self,
        target_user_id: Option<&str>,
        target_user_ids: Option<&[String]>,
    ) -> Result<Vec<Subscriber>, PushError>;
}

/// 購読の永続化層。
#[async_trait::async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// 指定エンドポイントの購読をまとめて削除する。
    async fn delete_subscriptions_by_endpoint(&self, endpoints: &[String]) -> Result<(), PushError>;
}

/// アプリ内通知履歴の記録先。
#[async_trait::async_trait]
pub trait NotificationRecorder: Send + Sync {
    /// 宛先ユーザーごとに1件ずつ通知を記録する。
    async fn record_notifications(
        &self,
        user_ids: &[String],
        title: &str,
        body: &str,
        kind: NotificationType,
        url: Option<&str>,
    ) -> Result<(), PushError>;
}

/// Key Storeから鍵ペアを読み込み、署名に使える形にする。
///
/// 鍵が無い・壊れている場合は`Configuration`エラー（バッチ全体が中断される）。
pub async fn load_signing_keys(store: &dyn KeyStore) -> Result<VapidKeyPair, PushError> {
    let stored = store.signing_key_pair().await?;
    VapidKeyPair::from_base64url(&stored.public_key, &stored.private_key)
        .map_err(|e| PushError::Configuration(e.to_string()))
}
