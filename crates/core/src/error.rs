//! # 配信エンジンのエラー型
//!
//! `Configuration`と宛先解決時の`Collaborator`のみが呼び出し側まで伝播する。購読単位のエラーは
//! [`crate::dispatcher`]内で[`clubpush_types::DeliveryOutcome`]に畳み込まれる。

/// 配信エンジンのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// 署名鍵や設定の欠落・不正。バッチ全体を中断する。
    #[error("設定が不正です: {0}")]
    Configuration(String),
    /// 購読者の鍵情報が不正。この購読をスキップする。
    #[error("購読者向けの暗号化に失敗: {0}")]
    SubscriberEncryption(String),
    /// VAPIDアサーションの構築に失敗
    #[error("VAPIDアサーションの構築に失敗: {0}")]
    Assertion(String),
    /// エンドポイントURLが不正
    #[error("エンドポイントURLが不正です: {0}")]
    InvalidEndpoint(String),
    /// タイムアウト・接続失敗・Gone以外の非2xx
    #[error("Push Serviceへの配信に失敗: {reason}")]
    DeliveryNetwork {
        /// HTTPレスポンスを受け取った場合のステータス
        status: Option<u16>,
        /// 失敗理由
        reason: String,
    },
    /// 購読が恒久的に無効（404/410）
    #[error("購読が無効になっています: HTTP {0}")]
    SubscriptionGone(u16),
    /// 外部コラボレーター（購読ストア、履歴記録等）の失敗
    #[error("外部コンポーネントの処理に失敗: {0}")]
    Collaborator(String),
}
