//! # VAPID (RFC 8292)
//!
//! Push Serviceに対して送信元サーバーを証明するES256署名付きJWTを構築する。
//!
//! ## トークン構造
//! ```text
//! base64url({"alg":"ES256","typ":"JWT"}) . base64url({"aud","exp","sub"}) . base64url(r || s)
//! ```
//!
//! 署名はDERではなく64バイトの生の`r || s`。

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;
use serde::{Deserialize, Serialize};

use crate::random::{random_secret_key, SecureRandom};
use crate::{b64url, decode_b64url, CryptoError};

/// アサーションの有効期間（12時間）。RFC 8292の上限は24時間。
pub const ASSERTION_LIFETIME_SECS: u64 = 12 * 60 * 60;

/// JWTヘッダーの`alg`
pub const JWT_ALG: &str = "ES256";

/// 秘密スカラーを包む最小PKCS#8 (RFC 5208) DERの固定部分。
///
/// ```text
/// 30 41                                PrivateKeyInfo SEQUENCE (65)
///    02 01 00                          version 0
///    30 13                             AlgorithmIdentifier SEQUENCE (19)
///       06 07 2a8648ce3d0201           id-ecPublicKey
///       06 08 2a8648ce3d030107         prime256v1
///    04 27                             privateKey OCTET STRING (39)
///       30 25                          ECPrivateKey SEQUENCE (37)
///          02 01 01                    version 1
///          04 20 <32バイトのスカラー>
/// ```
///
/// ECPrivateKeyの公開鍵フィールド（省略可能）は含めない。
/// 長さバイトはスカラーが常に32バイトであることを前提にしている。
const PKCS8_P256_PREFIX: [u8; 35] = [
    0x30, 0x41, 0x02, 0x01, 0x00, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02,
    0x01, 0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x04, 0x27, 0x30, 0x25,
    0x02, 0x01, 0x01, 0x04, 0x20,
];

/// P-256秘密スカラーの長さ
pub const PRIVATE_KEY_LEN: usize = 32;

/// 非圧縮P-256公開鍵の長さ（`0x04 || x || y`）
pub const PUBLIC_KEY_LEN: usize = 65;

/// 32バイトのスカラーを最小PKCS#8 DERに包む。
pub fn pkcs8_der_from_scalar(scalar: &[u8; PRIVATE_KEY_LEN]) -> Vec<u8> {
    let mut der = Vec::with_capacity(PKCS8_P256_PREFIX.len() + PRIVATE_KEY_LEN);
    der.extend_from_slice(&PKCS8_P256_PREFIX);
    der.extend_from_slice(scalar);
    der
}

/// サービスのVAPID署名鍵ペア。
///
/// バッチ単位で1回読み込み、全配信タスクから読み取り専用で共有する。
#[derive(Clone)]
pub struct VapidKeyPair {
    signing_key: SigningKey,
    public_key: [u8; PUBLIC_KEY_LEN],
}

impl fmt::Debug for VapidKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VapidKeyPair")
            .field("public_key", &self.public_key_base64url())
            .finish_non_exhaustive()
    }
}

impl VapidKeyPair {
    /// Key Storeに保存されたBase64url形式の鍵ペアを読み込む。
    ///
    /// 秘密スカラーから導出した公開鍵が保存済み公開鍵と一致しなければ拒否する。
    pub fn from_base64url(public_key_b64: &str, private_key_b64: &str) -> Result<Self, CryptoError> {
        let public_bytes = decode_b64url(public_key_b64).map_err(|e| {
            CryptoError::InvalidSigningKey(format!("公開鍵のBase64urlデコードに失敗: {e}"))
        })?;
        let private_bytes = decode_b64url(private_key_b64).map_err(|e| {
            CryptoError::InvalidSigningKey(format!("秘密鍵のBase64urlデコードに失敗: {e}"))
        })?;

        let keys = Self::from_private_scalar(&private_bytes)?;
        if public_bytes.as_slice() != keys.public_key.as_slice() {
            return Err(CryptoError::InvalidSigningKey(
                "保存済み公開鍵が秘密鍵と対応していません".to_string(),
            ));
        }
        Ok(keys)
    }

    /// 生の32バイト秘密スカラーから鍵ペアを構築する。
    pub fn from_private_scalar(scalar: &[u8]) -> Result<Self, CryptoError> {
        let scalar: &[u8; PRIVATE_KEY_LEN] = scalar.try_into().map_err(|_| {
            CryptoError::InvalidSigningKey(format!(
                "秘密鍵は{PRIVATE_KEY_LEN}バイトである必要があります（実際: {} bytes）",
                scalar.len()
            ))
        })?;

        let der = pkcs8_der_from_scalar(scalar);
        let signing_key = SigningKey::from_pkcs8_der(&der)
            .map_err(|e| CryptoError::InvalidSigningKey(format!("PKCS#8のインポートに失敗: {e}")))?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// 新しい鍵ペアを生成する（プロビジョニング用）。
    pub fn generate(rng: &dyn SecureRandom) -> Result<Self, CryptoError> {
        let secret = random_secret_key(rng)?;
        Ok(Self::from_signing_key(SigningKey::from(secret)))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let point = signing_key.verifying_key().to_encoded_point(false);
        let mut public_key = [0u8; PUBLIC_KEY_LEN];
        public_key.copy_from_slice(point.as_bytes());
        Self {
            signing_key,
            public_key,
        }
    }

    /// 非圧縮公開鍵（65バイト）。
    pub fn public_key_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public_key
    }

    /// Base64url公開鍵。`Authorization`ヘッダーの`k=`とブラウザの
    /// `applicationServerKey`に使う。
    pub fn public_key_base64url(&self) -> String {
        b64url().encode(self.public_key)
    }

    /// Base64url秘密スカラー。Key Storeへの保存用。
    pub fn private_key_base64url(&self) -> String {
        b64url().encode(self.signing_key.to_bytes())
    }

    fn sign(&self, message: &[u8]) -> Result<Signature, CryptoError> {
        self.signing_key
            .try_sign(message)
            .map_err(|e| CryptoError::Signing(e.to_string()))
    }
}

/// JWTヘッダー
#[derive(Debug, Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    typ: String,
}

/// VAPIDアサーションのクレーム。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Push Serviceのオリジン
    pub aud: String,
    /// 有効期限（UNIX秒）
    pub exp: u64,
    /// 送信者の連絡先（`mailto:`または`https:`）
    pub sub: String,
}

/// 現在時刻を基準にVAPIDアサーションを構築する。
pub fn build_assertion(
    audience: &str,
    subject: &str,
    keys: &VapidKeyPair,
) -> Result<String, CryptoError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| CryptoError::Signing(format!("システム時刻が不正です: {e}")))?
        .as_secs();
    build_assertion_at(audience, subject, keys, now)
}

/// 指定時刻`now`（UNIX秒）を基準にVAPIDアサーションを構築する。
/// `exp = now + 12h`。
pub fn build_assertion_at(
    audience: &str,
    subject: &str,
    keys: &VapidKeyPair,
    now: u64,
) -> Result<String, CryptoError> {
    let header = JwtHeader {
        alg: JWT_ALG.to_string(),
        typ: "JWT".to_string(),
    };
    let claims = AssertionClaims {
        aud: audience.to_string(),
        exp: now + ASSERTION_LIFETIME_SECS,
        sub: subject.to_string(),
    };

    let header_json =
        serde_json::to_vec(&header).map_err(|e| CryptoError::Serialization(e.to_string()))?;
    let claims_json =
        serde_json::to_vec(&claims).map_err(|e| CryptoError::Serialization(e.to_string()))?;

    let signing_input = format!(
        "{}.{}",
        b64url().encode(header_json),
        b64url().encode(claims_json)
    );
    let signature = keys.sign(signing_input.as_bytes())?;

    Ok(format!(
        "{signing_input}.{}",
        b64url().encode(signature.to_bytes())
    ))
}

/// VAPIDアサーションの署名を検証し、クレームを返す。
///
/// `public_key`は65バイトの非圧縮点。有効期限は検証しない。
pub fn verify_assertion(token: &str, public_key: &[u8]) -> Result<AssertionClaims, CryptoError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(CryptoError::Signing("JWTは3つのセグメントで構成される必要があります".to_string()));
    };

    let header: JwtHeader = decode_segment(header_b64)?;
    if header.alg != JWT_ALG {
        return Err(CryptoError::Signing(format!("未対応のalgです: {}", header.alg)));
    }

    let signature_bytes = b64url()
        .decode(signature_b64)
        .map_err(|e| CryptoError::Signing(format!("署名のBase64urlデコードに失敗: {e}")))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|e| CryptoError::Signing(format!("署名の形式が不正です: {e}")))?;
    let verifying_key = VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|e| CryptoError::Signing(format!("公開鍵が不正です: {e}")))?;

    let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| CryptoError::Signing("署名の検証に失敗しました".to_string()))?;

    decode_segment(claims_b64)
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, CryptoError> {
    let bytes = b64url()
        .decode(segment)
        .map_err(|e| CryptoError::Serialization(format!("JWTセグメントのデコードに失敗: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| CryptoError::Serialization(e.to_string()))
}

/// `Authorization`ヘッダー値を組み立てる（RFC 8292 §3）。
pub fn authorization_header(token: &str, public_key_b64: &str) -> String {
    format!("vapid t={token}, k={public_key_b64}")
}
