//! # Clubpush 共有型定義
//!
//! Web Push配信エンジンと周辺サービスの間で受け渡すデータ構造。
//!
//! ## エンコーディング規則
//! - Base64url（パディングなし）: 購読者の公開鍵・認証シークレット、VAPID鍵
//! - JSONフィールド名: 通知ペイロードと呼び出し側リクエストはブラウザ側の
//!   Service Workerに合わせてcamelCase

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// 購読者・アカウント
// ---------------------------------------------------------------------------

/// ブラウザのPush購読。
///
/// Audience Resolverから渡され、配信エンジンは読み取りのみ行う。
/// 1つの購読につき配信試行は1回。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    /// Push ServiceのエンドポイントURL
    pub endpoint: String,
    /// 購読者のP-256公開鍵（Base64url、65バイトの非圧縮点）
    pub p256dh: String,
    /// 共有認証シークレット（Base64url、16バイト）
    pub auth: String,
    /// 購読を所有するユーザーID
    pub user_id: String,
}

/// クラブ内のアカウント権限。
/// 宣言順が権限の強さ（`Pending` < `Member` < `Admin`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// 承認待ち。全員宛ての通知は届かない。
    Pending,
    /// 一般メンバー
    Member,
    /// 管理者
    Admin,
}

impl Role {
    /// 全員宛て通知の対象となる権限（member以上）か。
    pub fn is_member_or_above(self) -> bool {
        self >= Role::Member
    }
}

/// 通知対象の解決に使うアカウント情報。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// ユーザーID
    pub user_id: String,
    /// 権限
    pub role: Role,
}

// ---------------------------------------------------------------------------
// 通知リクエスト・ペイロード
// ---------------------------------------------------------------------------

/// 通知種別。ペイロードの`data.type`にそのまま入る。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// イベント新規作成
    NewEvent,
    /// イベント更新
    EventUpdated,
    /// イベントのリマインダー
    EventReminder,
    /// 疎通確認用
    Test,
    /// 管理者からの一斉連絡
    Broadcast,
}

impl NotificationType {
    /// ワイヤ上の表記（`new_event`等）を返す。
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::NewEvent => "new_event",
            NotificationType::EventUpdated => "event_updated",
            NotificationType::EventReminder => "event_reminder",
            NotificationType::Test => "test",
            NotificationType::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 未知の通知種別
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("未知の通知種別です: {0}")]
pub struct UnknownNotificationType(pub String);

impl FromStr for NotificationType {
    type Err = UnknownNotificationType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new_event" => Ok(NotificationType::NewEvent),
            "event_updated" => Ok(NotificationType::EventUpdated),
            "event_reminder" => Ok(NotificationType::EventReminder),
            "test" => Ok(NotificationType::Test),
            "broadcast" => Ok(NotificationType::Broadcast),
            other => Err(UnknownNotificationType(other.to_string())),
        }
    }
}

/// 呼び出し側からの通知リクエスト。
///
/// `target_user_id`と`target_user_ids`が両方とも無い場合はメンバー全員宛て。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    /// 通知種別
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// 関連イベントID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// 関連イベントのタイトル（既定本文の組み立てに使用）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_title: Option<String>,
    /// 本文の上書き
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// タイトルの上書き
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// 単一ユーザー宛て
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<String>,
    /// 複数ユーザー宛て
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_ids: Option<Vec<String>>,
}

impl NotifyRequest {
    /// 宛先指定なし（全員宛て）のリクエストを作る。
    pub fn new(kind: NotificationType) -> Self {
        Self {
            kind,
            event_id: None,
            event_title: None,
            message: None,
            title: None,
            target_user_id: None,
            target_user_ids: None,
        }
    }
}

/// 暗号化前に平文JSONへシリアライズされる通知本体。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// 通知タイトル
    pub title: String,
    /// 通知本文
    pub body: String,
    /// アイコン画像のパス
    pub icon: String,
    /// バッジ画像のパス
    pub badge: String,
    /// Service Workerが遷移先の決定に使う付加情報
    pub data: NotificationData,
}

/// ペイロードの`data`部分。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// 通知種別
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// 関連イベントID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// クリック時の遷移先
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

// ---------------------------------------------------------------------------
// 配信結果
// ---------------------------------------------------------------------------

/// 1購読あたりの配信結果の分類。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Push Serviceが受理した
    Success,
    /// 購読が恒久的に無効（404/410）。削除対象。
    Gone,
    /// その他の失敗（タイムアウト、接続失敗、その他の非2xx、暗号化失敗）
    OtherFailure,
}

/// 1購読あたりの配信試行の結果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    /// 配信先エンドポイント
    pub endpoint: String,
    /// 購読の所有者
    pub user_id: String,
    /// 分類結果
    pub status: DeliveryStatus,
    /// HTTPレスポンスを受け取った場合のステータスコード
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

/// 配信結果の集計。呼び出し側に返す。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySummary {
    /// 成功件数
    pub sent: usize,
    /// 失敗件数（Goneを含む）
    pub failed: usize,
    /// Goneと判定され削除対象になったエンドポイント
    pub pruned_endpoints: Vec<String>,
}

impl DeliverySummary {
    /// 1件の配信結果を集計に加える。
    pub fn record(&mut self, outcome: &DeliveryOutcome) {
        match outcome.status {
            DeliveryStatus::Success => self.sent += 1,
            DeliveryStatus::Gone => {
                self.failed += 1;
                self.pruned_endpoints.push(outcome.endpoint.clone());
            }
            DeliveryStatus::OtherFailure => self.failed += 1,
        }
    }
}

/// 通知処理全体の結果。
///
/// 購読者が一人もいない場合を「全件失敗」と区別して返す。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotifyOutcome {
    /// 宛先に購読が存在しなかった
    NoSubscribers,
    /// 配信を試行した
    Delivered(DeliverySummary),
}

// ---------------------------------------------------------------------------
// VAPID鍵
// ---------------------------------------------------------------------------

/// 永続化されたVAPID署名鍵ペア（Base64url）。Key Storeが返す形式。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredVapidKeys {
    /// 65バイト非圧縮P-256公開鍵
    pub public_key: String,
    /// 32バイトP-256秘密スカラー
    pub private_key: String,
}

impl fmt::Debug for StoredVapidKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredVapidKeys")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}
