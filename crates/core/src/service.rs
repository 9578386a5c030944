//! # 通知サービス
//!
//! 周辺サービスから呼ばれる入口。鍵の読み込み、宛先解決、履歴記録、配信を順に行う。

use std::sync::Arc;

use clubpush_crypto::random::{OsSecureRandom, SecureRandom};
use clubpush_types::{NotifyOutcome, NotifyRequest, Subscriber};

use crate::config::PushConfig;
use crate::content::build_payload;
use crate::dispatcher::{build_http_client, Dispatcher};
use crate::error::PushError;
use crate::store::{
    load_signing_keys, AudienceResolver, KeyStore, NotificationRecorder, SubscriptionStore,
};

/// サービスが利用する外部コラボレーター一式。
#[derive(Clone)]
pub struct Collaborators {
    pub key_store: Arc<dyn KeyStore>,
    pub resolver: Arc<dyn AudienceResolver>,
    pub subscription_store: Arc<dyn SubscriptionStore>,
    pub recorder: Arc<dyn NotificationRecorder>,
}

/// 通知の配信サービス。
///
/// HTTPクライアントは呼び出し間で共有し、署名鍵は呼び出しごとにKey Storeから読み込む。
pub struct NotificationService {
    config: PushConfig,
    http_client: reqwest::Client,
    collaborators: Collaborators,
    rng: Arc<dyn SecureRandom>,
}

impl NotificationService {
    /// OSの乱数源を使うサービスを作る。
    pub fn new(config: PushConfig, collaborators: Collaborators) -> Result<Self, PushError> {
        let http_client = build_http_client(&config)?;
        Ok(Self {
            config,
            http_client,
            collaborators,
            rng: Arc::new(OsSecureRandom),
        })
    }

    /// 乱数源を差し替える。
    pub fn with_random(mut self, rng: Arc<dyn SecureRandom>) -> Self {
        self.rng = rng;
        self
    }

    /// 通知を1件配信する。
    ///
    /// 呼び出し側に返るエラーは鍵の読み込み失敗（`Configuration`）と宛先解決の失敗のみ。
    /// 購読単位の失敗は[`NotifyOutcome::Delivered`]の集計に含まれる。
    pub async fn notify(&self, request: &NotifyRequest) -> Result<NotifyOutcome, PushError> {
        let keys = load_signing_keys(self.collaborators.key_store.as_ref()).await?;

        let subscribers = self
            .collaborators
            .resolver
            .resolve_subscribers(
                request.target_user_id.as_deref(),
                request.target_user_ids.as_deref(),
            )
            .await?;
        if subscribers.is_empty() {
            tracing::info!(kind = %request.kind, "配信先の購読がありません");
            return Ok(NotifyOutcome::NoSubscribers);
        }

        let payload = build_payload(request, &self.config);
        let recipients = distinct_recipients(&subscribers);
        if let Err(e) = self
            .collaborators
            .recorder
            .record_notifications(
                &recipients,
                &payload.title,
                &payload.body,
                request.kind,
                payload.data.url.as_deref(),
            )
            .await
        {
            tracing::warn!(error = %e, "通知履歴の記録に失敗（配信は継続）");
        }

        tracing::info!(
            kind = %request.kind,
            subscriptions = subscribers.len(),
            recipients = recipients.len(),
            "通知の配信を開始"
        );

        let dispatcher = Dispatcher::with_client(
            self.http_client.clone(),
            &self.config,
            keys,
            Arc::clone(&self.rng),
            Arc::clone(&self.collaborators.subscription_store),
        );
        let summary = dispatcher.deliver(subscribers, &payload).await;
        Ok(NotifyOutcome::Delivered(summary))
    }
}

/// 購読の所有者を出現順に重複なく並べる。
fn distinct_recipients(subscribers: &[Subscriber]) -> Vec<String> {
    let mut recipients: Vec<String> = Vec::new();
    for subscriber in subscribers {
        if !recipients.contains(&subscriber.user_id) {
            recipients.push(subscriber.user_id.clone());
        }
    }
    recipients
}
