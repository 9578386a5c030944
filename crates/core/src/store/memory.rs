//! # メモリ内コラボレーター
//!
//! アカウント・購読・通知履歴をメモリに保持する実装。
//! ローカル開発、CLI、テストで使う。

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use uuid::Uuid;

use clubpush_types::{Account, NotificationType, Role, Subscriber};

use crate::error::PushError;

use super::{AudienceResolver, NotificationRecorder, SubscriptionStore};

/// 記録されたアプリ内通知。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedNotification {
    /// 履歴ID
    pub id: Uuid,
    /// 宛先ユーザー
    pub user_id: String,
    /// タイトル
    pub title: String,
    /// 本文
    pub body: String,
    /// 通知種別
    pub kind: NotificationType,
    /// 遷移先
    pub url: Option<String>,
}

#[derive(Debug, Default)]
struct DirectoryState {
    accounts: HashMap<String, Role>,
    subscriptions: Vec<Subscriber>,
    notifications: Vec<RecordedNotification>,
    delete_batches: Vec<Vec<String>>,
}

/// アカウント・購読・通知履歴のメモリ内ストア。
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl MemoryDirectory {
    /// 空のストアを作る。
    pub fn new() -> Self {
        Self::default()
    }

    /// アカウントを追加（既存なら権限を更新）する。
    pub async fn upsert_account(&self, account: Account) {
        let mut state = self.state.write().await;
        state.accounts.insert(account.user_id, account.role);
    }

    /// 購読を追加する。同じエンドポイントの既存購読は置き換える。
    pub async fn add_subscription(&self, subscriber: Subscriber) {
        let mut state = self.state.write().await;
        state
            .subscriptions
            .retain(|existing| existing.endpoint != subscriber.endpoint);
        state.subscriptions.push(subscriber);
    }

    /// 現在の購読一覧。
    pub async fn subscriptions(&self) -> Vec<Subscriber> {
        self.state.read().await.subscriptions.clone()
    }

    /// 記録済みの通知履歴。
    pub async fn notifications(&self) -> Vec<RecordedNotification> {
        self.state.read().await.notifications.clone()
    }

    /// これまでの一括削除呼び出し（呼び出しごとのエンドポイント一覧）。
    pub async fn delete_batches(&self) -> Vec<Vec<String>> {
        self.state.read().await.delete_batches.clone()
    }
}

#[async_trait::async_trait]
impl AudienceResolver for MemoryDirectory {
    async fn resolve_subscribers(
        &self,
        target_user_id: Option<&str>,
        target_user_ids: Option<&[String]>,
    ) -> Result<Vec<Subscriber>, PushError> {
        let state = self.state.read().await;

        let subscribers = match (target_user_id, target_user_ids) {
            (Some(user_id), _) => state
                .subscriptions
                .iter()
                .filter(|s| s.user_id == user_id)
                .cloned()
                .collect(),
            (None, Some(user_ids)) => {
                let wanted: HashSet<&str> = user_ids.iter().map(String::as_str).collect();
                state
                    .subscriptions
                    .iter()
                    .filter(|s| wanted.contains(s.user_id.as_str()))
                    .cloned()
                    .collect()
            }
            (None, None) => state
                .subscriptions
                .iter()
                .filter(|s| {
                    state
                        .accounts
                        .get(&s.user_id)
                        .is_some_and(|role| role.is_member_or_above())
                })
                .cloned()
                .collect(),
        };

        Ok(subscribers)
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for MemoryDirectory {
    async fn delete_subscriptions_by_endpoint(&self, endpoints: &[String]) -> Result<(), PushError> {
        let mut state = self.state.write().await;
        let gone: HashSet<&str> = endpoints.iter().map(String::as_str).collect();
        state
            .subscriptions
            .retain(|s| !gone.contains(s.endpoint.as_str()));
        state.delete_batches.push(endpoints.to_vec());
        Ok(())
    }
}

#[async_trait::async_trait]
impl NotificationRecorder for MemoryDirectory {
    async fn record_notifications(
        &self,
        user_ids: &[String],
        title: &str,
        body: &str,
        kind: NotificationType,
        url: Option<&str>,
    ) -> Result<(), PushError> {
        let mut state = self.state.write().await;
        for user_id in user_ids {
            state.notifications.push(RecordedNotification {
                id: Uuid::new_v4(),
                user_id: user_id.clone(),
                title: title.to_string(),
                body: body.to_string(),
                kind,
                url: url.map(str::to_string),
            });
        }
        Ok(())
    }
}
