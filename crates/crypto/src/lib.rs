//! # Clubpush 暗号処理
//!
//! Web Pushの2つのIETF仕様をサードパーティのPush SDKに頼らず実装する。
//!
//! ## 暗号アルゴリズム
//! | 用途 | アルゴリズム | 参照 |
//! |------|------------|------|
//! | 送信者認証 | ES256 (ECDSA P-256 + SHA-256) JWT | RFC 8292 |
//! | 鍵交換 | P-256 ECDH | RFC 8291 |
//! | 鍵導出 | HKDF-SHA256（2段） | RFC 8291 / RFC 8188 |
//! | 対称暗号 | AES-128-GCM | RFC 8188 |
//!
//! 乱数源は[`random::SecureRandom`]として注入する。

pub mod ece;
pub mod random;
pub mod vapid;

use base64::Engine;

pub use p256::SecretKey as P256SecretKey;

/// 暗号処理のエラー型
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// 保存済みVAPID署名鍵が不正（バッチ全体に致命的）
    #[error("VAPID署名鍵が不正です: {0}")]
    InvalidSigningKey(String),
    /// 購読者の公開鍵または認証シークレットが不正
    #[error("購読者の鍵情報が不正です: {0}")]
    InvalidSubscriberKey(String),
    /// 乱数生成エラー
    #[error("乱数の生成に失敗しました: {0}")]
    Random(String),
    /// HKDF鍵導出エラー
    #[error("HKDF鍵導出に失敗しました: {0}")]
    KeyDerivation(String),
    /// AES-GCM暗号化エラー
    #[error("AES-GCM暗号化に失敗しました")]
    Encrypt,
    /// AES-GCM復号エラー
    #[error("AES-GCM復号に失敗しました")]
    Decrypt,
    /// ECDSA署名・検証エラー
    #[error("ECDSA署名処理に失敗しました: {0}")]
    Signing(String),
    /// JWTのJSON処理エラー
    #[error("JSONの処理に失敗しました: {0}")]
    Serialization(String),
    /// 平文が1レコードに収まらない
    #[error("ペイロードが1レコードに収まりません: {size} bytes (上限: {limit} bytes)")]
    PayloadTooLarge { size: usize, limit: usize },
    /// aes128gcmレコードの構造が不正
    #[error("暗号化レコードが不正です: {0}")]
    MalformedRecord(String),
}

/// Base64urlエンジン（パディングなし）
pub fn b64url() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
}

/// Base64url文字列をデコードする。
///
/// ブラウザの`PushSubscription.toJSON()`は実装によって末尾の`=`を付けるため、
/// パディングは取り除いてから読む。
pub fn decode_b64url(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    b64url().decode(input.trim().trim_end_matches('='))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_b64url_accepts_padding() {
        assert_eq!(decode_b64url("BTBZMqHH6r4Tts7J_aSIgg").unwrap().len(), 16);
        assert_eq!(decode_b64url("BTBZMqHH6r4Tts7J_aSIgg==").unwrap().len(), 16);
    }

    #[test]
    fn test_decode_b64url_rejects_standard_alphabet() {
        assert!(decode_b64url("BTBZMqHH6r4Tts7J/aSIgg").is_err());
    }
}
