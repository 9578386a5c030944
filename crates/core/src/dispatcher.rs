//! # 配信ディスパッチャ
//!
//! 購読ごとに「暗号化 → VAPID署名 → POST → レスポンス分類」を行い、結果を集計する。
//!
//! ## 並行性
//! - 購読ごとの配信は独立しており、`JoinSet`上のタスクとして並行実行する
//! - 同時実行数は`max_concurrency`個のパーミットを持つセマフォで制限する
//! - 各タスクは`DeliveryOutcome`を返し、集計は全タスク完了後に1か所で行う
//! - `deliver`のFutureを破棄すると実行中のタスクもまとめて中断される
//!
//! ## レスポンス分類
//! | HTTP | 分類 | 削除 |
//! |------|------|------|
//! | 2xx | Success | - |
//! | 404 / 410 | Gone | 対象 |
//! | その他・タイムアウト・接続失敗 | OtherFailure | - |

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Url;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use clubpush_crypto::random::SecureRandom;
use clubpush_crypto::vapid::{self, VapidKeyPair};
use clubpush_crypto::{decode_b64url, ece};
use clubpush_types::{
    DeliveryOutcome, DeliveryStatus, DeliverySummary, NotificationPayload, Subscriber,
};

use crate::config::PushConfig;
use crate::error::PushError;
use crate::store::SubscriptionStore;

/// `Content-Encoding`ヘッダー値
pub const AES128GCM: &str = "aes128gcm";

/// `Content-Type`ヘッダー値
pub const OCTET_STREAM: &str = "application/octet-stream";

/// ログに残すレスポンスボディの最大文字数
const MAX_LOGGED_BODY_CHARS: usize = 200;

/// 全配信タスクで共有する読み取り専用の状態。
struct DeliveryContext {
    http_client: reqwest::Client,
    keys: VapidKeyPair,
    public_key_b64: String,
    subject: String,
    ttl_secs: u32,
    rng: Arc<dyn SecureRandom>,
}

/// 購読の一覧に対して通知を配信する。
pub struct Dispatcher {
    context: Arc<DeliveryContext>,
    max_concurrency: usize,
    subscription_store: Arc<dyn SubscriptionStore>,
}

impl Dispatcher {
    /// 設定からHTTPクライアントを構築してディスパッチャを作る。
    pub fn new(
        config: &PushConfig,
        keys: VapidKeyPair,
        rng: Arc<dyn SecureRandom>,
        subscription_store: Arc<dyn SubscriptionStore>,
    ) -> Result<Self, PushError> {
        let http_client = build_http_client(config)?;
        Ok(Self::with_client(
            http_client,
            config,
            keys,
            rng,
            subscription_store,
        ))
    }

    /// 既存のHTTPクライアント（コネクションプール）を使ってディスパッチャを作る。
    ///
    /// クライアントのタイムアウトがリクエストごとの上限になる。
    pub fn with_client(
        http_client: reqwest::Client,
        config: &PushConfig,
        keys: VapidKeyPair,
        rng: Arc<dyn SecureRandom>,
        subscription_store: Arc<dyn SubscriptionStore>,
    ) -> Self {
        let public_key_b64 = keys.public_key_base64url();
        Self {
            context: Arc::new(DeliveryContext {
                http_client,
                keys,
                public_key_b64,
                subject: config.subject.clone(),
                ttl_secs: config.ttl_secs,
                rng,
            }),
            max_concurrency: config.max_concurrency.max(1),
            subscription_store,
        }
    }

    /// 全購読に配信し、集計結果を返す。
    ///
    /// 購読単位の失敗は集計に畳み込まれ、この関数はエラーを返さない。
    /// Goneと判定されたエンドポイントは最後に1回の一括削除で取り除く。
    pub async fn deliver(
        &self,
        subscribers: Vec<Subscriber>,
        payload: &NotificationPayload,
    ) -> DeliverySummary {
        let mut summary = DeliverySummary::default();
        if subscribers.is_empty() {
            tracing::debug!("配信先の購読がありません");
            return summary;
        }

        let total = subscribers.len();
        let plaintext: Arc<[u8]> = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes.into(),
            Err(e) => {
                tracing::error!(error = %e, "通知ペイロードのシリアライズに失敗");
                summary.failed = total;
                return summary;
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        for subscriber in subscribers {
            let context = Arc::clone(&self.context);
            let plaintext = Arc::clone(&plaintext);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // セマフォはcloseしないので取得は失敗しない
                let _permit = semaphore.acquire_owned().await.ok();
                deliver_one(&context, subscriber, &plaintext).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    tracing::error!(error = %e, "配信タスクが異常終了しました");
                    summary.failed += 1;
                }
            }
        }

        summary.pruned_endpoints.sort();
        summary.pruned_endpoints.dedup();
        if !summary.pruned_endpoints.is_empty() {
            match self
                .subscription_store
                .delete_subscriptions_by_endpoint(&summary.pruned_endpoints)
                .await
            {
                Ok(()) => tracing::info!(
                    count = summary.pruned_endpoints.len(),
                    "無効な購読を削除しました"
                ),
                Err(e) => tracing::warn!(error = %e, "無効な購読の削除に失敗"),
            }
        }

        tracing::info!(
            total,
            sent = summary.sent,
            failed = summary.failed,
            pruned = summary.pruned_endpoints.len(),
            "配信完了"
        );
        summary
    }
}

/// 配信用HTTPクライアントを構築する。
pub fn build_http_client(config: &PushConfig) -> Result<reqwest::Client, PushError> {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| PushError::Configuration(format!("HTTPクライアントの構築に失敗: {e}")))
}

/// エンドポイントURLからVAPIDの`aud`（オリジン）を求める。
///
/// `scheme://host`、既定以外のポートは`:port`付き。
pub fn audience_of(endpoint: &str) -> Result<String, PushError> {
    let url = Url::parse(endpoint)
        .map_err(|e| PushError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(PushError::InvalidEndpoint(format!(
            "未対応のスキームです: {}",
            url.scheme()
        )));
    }
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(PushError::InvalidEndpoint(format!(
            "オリジンを決定できません: {endpoint}"
        )));
    }
    Ok(origin.ascii_serialization())
}

/// HTTPステータスを配信結果に分類する。
pub fn classify_status(status: u16) -> DeliveryStatus {
    match status {
        200..=299 => DeliveryStatus::Success,
        404 | 410 => DeliveryStatus::Gone,
        _ => DeliveryStatus::OtherFailure,
    }
}

/// 1購読への配信。失敗はすべて`DeliveryOutcome`に変換する。
async fn deliver_one(
    context: &DeliveryContext,
    subscriber: Subscriber,
    plaintext: &[u8],
) -> DeliveryOutcome {
    let (status, http_status) = match send_push(context, &subscriber, plaintext).await {
        Ok(code) => {
            tracing::debug!(endpoint = %subscriber.endpoint, status = code, "配信成功");
            (DeliveryStatus::Success, Some(code))
        }
        Err(PushError::SubscriptionGone(code)) => {
            tracing::info!(
                endpoint = %subscriber.endpoint,
                user_id = %subscriber.user_id,
                status = code,
                "購読が無効になっているため削除対象にします"
            );
            (DeliveryStatus::Gone, Some(code))
        }
        Err(e) => {
            let http_status = match &e {
                PushError::DeliveryNetwork { status, .. } => *status,
                _ => None,
            };
            tracing::warn!(
                endpoint = %subscriber.endpoint,
                user_id = %subscriber.user_id,
                error = %e,
                "配信に失敗"
            );
            (DeliveryStatus::OtherFailure, http_status)
        }
    };

    DeliveryOutcome {
        endpoint: subscriber.endpoint,
        user_id: subscriber.user_id,
        status,
        http_status,
    }
}

/// 暗号化・署名・送信を行い、成功時のステータスコードを返す。
async fn send_push(
    context: &DeliveryContext,
    subscriber: &Subscriber,
    plaintext: &[u8],
) -> Result<u16, PushError> {
    let ua_public = decode_b64url(&subscriber.p256dh)
        .map_err(|e| PushError::SubscriberEncryption(format!("p256dhのデコードに失敗: {e}")))?;
    let auth_secret = decode_b64url(&subscriber.auth)
        .map_err(|e| PushError::SubscriberEncryption(format!("authのデコードに失敗: {e}")))?;
    let record = ece::encrypt(plaintext, &ua_public, &auth_secret, context.rng.as_ref())
        .map_err(|e| PushError::SubscriberEncryption(e.to_string()))?;

    let audience = audience_of(&subscriber.endpoint)?;
    let token = vapid::build_assertion(&audience, &context.subject, &context.keys)
        .map_err(|e| PushError::Assertion(e.to_string()))?;

    let response = context
        .http_client
        .post(&subscriber.endpoint)
        .header(
            AUTHORIZATION,
            vapid::authorization_header(&token, &context.public_key_b64),
        )
        .header(CONTENT_TYPE, OCTET_STREAM)
        .header(CONTENT_ENCODING, AES128GCM)
        .header("TTL", context.ttl_secs.to_string())
        .body(record.to_bytes())
        .send()
        .await
        .map_err(|e| PushError::DeliveryNetwork {
            status: None,
            reason: if e.is_timeout() {
                "リクエストがタイムアウトしました".to_string()
            } else {
                format!("HTTP送信失敗: {e}")
            },
        })?;

    let status = response.status().as_u16();
    match classify_status(status) {
        DeliveryStatus::Success => Ok(status),
        DeliveryStatus::Gone => Err(PushError::SubscriptionGone(status)),
        DeliveryStatus::OtherFailure => {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_LOGGED_BODY_CHARS).collect();
            Err(PushError::DeliveryNetwork {
                status: Some(status),
                reason: format!("HTTP {status}: {body}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clubpush_crypto::ece::EncryptedRecord;
    use clubpush_crypto::random::OsSecureRandom;
    use clubpush_types::{NotificationData, NotificationType};

    use super::*;
    use crate::store::MemoryDirectory;
    use crate::test_helpers::{start_mock_push_service, test_keys, TestSubscriber};

    fn test_config() -> PushConfig {
        PushConfig::new("mailto:test@club.example").unwrap()
    }

    fn test_payload() -> NotificationPayload {
        NotificationPayload {
            title: "Event reminder".to_string(),
            body: "Training starts at 18:00".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/badge-72x72.png".to_string(),
            data: NotificationData {
                kind: NotificationType::EventReminder,
                event_id: Some("7".to_string()),
                url: Some("/events/7".to_string()),
            },
        }
    }

    fn dispatcher(config: &PushConfig, keys: VapidKeyPair, store: Arc<MemoryDirectory>) -> Dispatcher {
        Dispatcher::new(config, keys, Arc::new(OsSecureRandom), store).unwrap()
    }

    #[test]
    fn test_audience_of() {
        assert_eq!(
            audience_of("https://fcm.googleapis.com/fcm/send/abc:def").unwrap(),
            "https://fcm.googleapis.com"
        );
        assert_eq!(
            audience_of("https://updates.push.services.mozilla.com:443/wpush/v2/x").unwrap(),
            "https://updates.push.services.mozilla.com"
        );
        assert_eq!(
            audience_of("https://push.example:8443/sub/1").unwrap(),
            "https://push.example:8443"
        );
        assert!(audience_of("not a url").is_err());
        assert!(audience_of("ftp://push.example/sub").is_err());
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200), DeliveryStatus::Success);
        assert_eq!(classify_status(201), DeliveryStatus::Success);
        assert_eq!(classify_status(404), DeliveryStatus::Gone);
        assert_eq!(classify_status(410), DeliveryStatus::Gone);
        assert_eq!(classify_status(400), DeliveryStatus::OtherFailure);
        assert_eq!(classify_status(413), DeliveryStatus::OtherFailure);
        assert_eq!(classify_status(429), DeliveryStatus::OtherFailure);
        assert_eq!(classify_status(503), DeliveryStatus::OtherFailure);
    }

    /// 購読が0件ならネットワーク通信も削除も行わないことを確認
    #[tokio::test]
    async fn test_deliver_empty() {
        let mock = start_mock_push_service(&[]).await;
        let store = Arc::new(MemoryDirectory::new());
        let dispatcher = dispatcher(&test_config(), test_keys(), store.clone());

        let summary = dispatcher.deliver(Vec::new(), &test_payload()).await;

        assert_eq!(summary, DeliverySummary::default());
        assert!(mock.received().is_empty());
        assert!(store.delete_batches().await.is_empty());
    }

    /// 3件中1件が410を返すとsent 2 / failed 1となり、その1件だけが削除されることを確認
    #[tokio::test]
    async fn test_deliver_prunes_gone_subscription() {
        let mock = start_mock_push_service(&[("/push/gone", 410)]).await;
        let store = Arc::new(MemoryDirectory::new());

        let subscribers = vec![
            TestSubscriber::new(&mock.url("/push/a"), "u1"),
            TestSubscriber::new(&mock.url("/push/gone"), "u2"),
            TestSubscriber::new(&mock.url("/push/b"), "u3"),
        ];
        for s in &subscribers {
            store.add_subscription(s.subscriber.clone()).await;
        }

        let dispatcher = dispatcher(&test_config(), test_keys(), store.clone());
        let summary = dispatcher
            .deliver(
                subscribers.iter().map(|s| s.subscriber.clone()).collect(),
                &test_payload(),
            )
            .await;

        let gone = mock.url("/push/gone");
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pruned_endpoints, vec![gone.clone()]);
        assert_eq!(store.delete_batches().await, vec![vec![gone.clone()]]);

        let remaining = store.subscriptions().await;
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|s| s.endpoint != gone));
        assert_eq!(mock.received().len(), 3);
    }

    /// 送信リクエストのヘッダー・VAPIDトークン・暗号文を検証
    #[tokio::test]
    async fn test_request_headers_and_body() {
        let mock = start_mock_push_service(&[]).await;
        let store = Arc::new(MemoryDirectory::new());
        let config = test_config();
        let keys = test_keys();
        let public_key_b64 = keys.public_key_base64url();
        let public_key = *keys.public_key_bytes();

        let target = TestSubscriber::new(&mock.url("/push/device"), "u1");
        let dispatcher = dispatcher(&config, keys, store);
        let payload = test_payload();
        let summary = dispatcher
            .deliver(vec![target.subscriber.clone()], &payload)
            .await;
        assert_eq!(summary.sent, 1);

        let received = mock.received();
        assert_eq!(received.len(), 1);
        let push = &received[0];
        assert_eq!(push.path, "/push/device");
        assert_eq!(push.header("content-type"), Some(OCTET_STREAM));
        assert_eq!(push.header("content-encoding"), Some(AES128GCM));
        assert_eq!(push.header("ttl"), Some("86400"));

        // Authorization: vapid t=<jwt>, k=<public key>
        let authorization = push.header("authorization").unwrap();
        let rest = authorization.strip_prefix("vapid t=").unwrap();
        let (token, k) = rest.split_once(", k=").unwrap();
        assert_eq!(k, public_key_b64);

        let claims = vapid::verify_assertion(token, &public_key).unwrap();
        assert_eq!(claims.aud, mock.origin());
        assert_eq!(claims.sub, config.subject);

        // 購読者の秘密鍵で復号するとペイロードJSONが得られる
        let record = EncryptedRecord::from_bytes(&push.body).unwrap();
        assert_eq!(record.record_size, ece::RECORD_SIZE);
        let plaintext = ece::decrypt(&record, &target.secret, &target.auth).unwrap();
        let decoded: NotificationPayload = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(decoded, payload);
    }

    /// Gone以外の失敗は削除対象にならないことを確認
    #[tokio::test]
    async fn test_other_failures_not_pruned() {
        let mock = start_mock_push_service(&[("/push/busy", 429), ("/push/broken", 500)]).await;
        let store = Arc::new(MemoryDirectory::new());
        let dispatcher = dispatcher(&test_config(), test_keys(), store.clone());

        let summary = dispatcher
            .deliver(
                vec![
                    TestSubscriber::new(&mock.url("/push/busy"), "u1").subscriber,
                    TestSubscriber::new(&mock.url("/push/broken"), "u2").subscriber,
                ],
                &test_payload(),
            )
            .await;

        assert_eq!(summary.sent, 0);
        assert_eq!(summary.failed, 2);
        assert!(summary.pruned_endpoints.is_empty());
        assert!(store.delete_batches().await.is_empty());
    }

    #[tokio::test]
    async fn test_not_found_is_gone() {
        let mock = start_mock_push_service(&[("/push/unknown", 404)]).await;
        let store = Arc::new(MemoryDirectory::new());
        let dispatcher = dispatcher(&test_config(), test_keys(), store);

        let endpoint = mock.url("/push/unknown");
        let summary = dispatcher
            .deliver(
                vec![TestSubscriber::new(&endpoint, "u1").subscriber],
                &test_payload(),
            )
            .await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pruned_endpoints, vec![endpoint]);
    }

    /// タイムアウトはOtherFailureとして扱われることを確認
    #[tokio::test]
    async fn test_timeout_is_other_failure() {
        let mock = start_mock_push_service(&[]).await;
        let store = Arc::new(MemoryDirectory::new());
        let mut config = test_config();
        config.request_timeout = Duration::from_millis(200);
        let dispatcher = dispatcher(&config, test_keys(), store.clone());

        let summary = dispatcher
            .deliver(
                vec![
                    TestSubscriber::new(&mock.url("/slow"), "u1").subscriber,
                    TestSubscriber::new(&mock.url("/push/fast"), "u2").subscriber,
                ],
                &test_payload(),
            )
            .await;

        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.pruned_endpoints.is_empty());
        assert!(store.delete_batches().await.is_empty());
    }

    /// 鍵が壊れた購読や到達不能なエンドポイントがあってもバッチは継続することを確認
    #[tokio::test]
    async fn test_per_subscriber_failures_do_not_abort_batch() {
        let mock = start_mock_push_service(&[]).await;
        let store = Arc::new(MemoryDirectory::new());
        let dispatcher = dispatcher(&test_config(), test_keys(), store);

        let mut bad_key = TestSubscriber::new(&mock.url("/push/bad-key"), "u1").subscriber;
        bad_key.p256dh = "AAAA".to_string();
        let mut bad_auth = TestSubscriber::new(&mock.url("/push/bad-auth"), "u2").subscriber;
        bad_auth.auth = "not base64!".to_string();
        let unreachable = TestSubscriber::new("http://127.0.0.1:1/push/closed", "u3").subscriber;
        let bad_url = TestSubscriber::new("mailto:nobody@example.com", "u4").subscriber;
        let good = TestSubscriber::new(&mock.url("/push/good"), "u5").subscriber;

        let summary = dispatcher
            .deliver(vec![bad_key, bad_auth, unreachable, bad_url, good], &test_payload())
            .await;

        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 4);
        assert!(summary.pruned_endpoints.is_empty());

        let received = mock.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].path, "/push/good");
    }

    /// `/hold/*`へ6件配信し、Push Service側で観測した最大同時実行数を返す
    async fn observed_concurrency(max_concurrency: usize) -> usize {
        let mock = start_mock_push_service(&[]).await;
        let store = Arc::new(MemoryDirectory::new());
        let mut config = test_config();
        config.max_concurrency = max_concurrency;
        let dispatcher = dispatcher(&config, test_keys(), store);

        let subscribers = (0..6)
            .map(|i| TestSubscriber::new(&mock.url(&format!("/hold/{i}")), "u").subscriber)
            .collect();
        let summary = dispatcher.deliver(subscribers, &test_payload()).await;

        assert_eq!(summary.sent, 6);
        mock.max_in_flight()
    }

    /// 同時実行数がmax_concurrencyちょうどまで並行することを確認
    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        assert_eq!(observed_concurrency(2).await, 2);
    }

    /// max_concurrency = 1では逐次配信になることを確認
    #[tokio::test]
    async fn test_concurrency_of_one_is_serial() {
        assert_eq!(observed_concurrency(1).await, 1);
    }
}
