//! # aes128gcm コンテンツ暗号化 (RFC 8291 / RFC 8188)
//!
//! 購読者の公開鍵と認証シークレットに対してペイロードを暗号化し、
//! 自己記述的な単一レコードを組み立てる。
//!
//! ## 鍵導出
//! ```text
//! ecdh_secret = ECDH(as_private, ua_public)
//! IKM   = HKDF(salt=auth_secret, ikm=ecdh_secret, info="WebPush: info\0" || ua_public || as_public, L=32)
//! CEK   = HKDF(salt=salt, ikm=IKM, info="Content-Encoding: aes128gcm\0", L=16)
//! NONCE = HKDF(salt=salt, ikm=IKM, info="Content-Encoding: nonce\0", L=12)
//! ```
//!
//! ## レコード構造
//! ```text
//! [16B: salt][4B: rs (BE)][1B: idlen][65B: as_public][ciphertext || 16B tag]
//! ```

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use hkdf::Hkdf;
use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use sha2::Sha256;

use crate::random::{random_secret_key, SecureRandom};
use crate::vapid::PUBLIC_KEY_LEN;
use crate::CryptoError;

/// ソルト長
pub const SALT_LEN: usize = 16;

/// 購読者の認証シークレット長
pub const AUTH_SECRET_LEN: usize = 16;

/// ヘッダーに書くレコードサイズ。実際のレコード長に関係なく固定。
pub const RECORD_SIZE: u32 = 4096;

/// 最終レコードを示すパディング区切りバイト
pub const PADDING_DELIMITER: u8 = 0x02;

/// ヘッダー長（salt + rs + idlen + keyid）
pub const HEADER_LEN: usize = SALT_LEN + 4 + 1 + PUBLIC_KEY_LEN;

/// AES-GCM認証タグ長
const TAG_LEN: usize = 16;

/// 平文の上限（レコードサイズからタグと区切りバイトを引いたもの）
pub const MAX_PLAINTEXT_LEN: usize = RECORD_SIZE as usize - TAG_LEN - 1;

const KEY_INFO_PREFIX: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

/// 1回の配信のために生成される暗号化レコード。永続化しない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedRecord {
    /// 配信ごとに新規生成したソルト
    pub salt: [u8; SALT_LEN],
    /// ヘッダーのレコードサイズ
    pub record_size: u32,
    /// 送信側エフェメラル公開鍵（keyid）
    pub key_id: [u8; PUBLIC_KEY_LEN],
    /// AES-128-GCM暗号文（タグ込み）
    pub ciphertext: Vec<u8>,
}

impl EncryptedRecord {
    /// HTTPボディとして送るバイト列に直列化する。
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.record_size.to_be_bytes());
        out.push(PUBLIC_KEY_LEN as u8);
        out.extend_from_slice(&self.key_id);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// 受信したバイト列をパースする。
    ///
    /// keyidは65バイトのP-256公開鍵のみ受け付ける。
    pub fn from_bytes(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() < SALT_LEN + 5 {
            return Err(CryptoError::MalformedRecord(format!(
                "ヘッダーが短すぎます: {} bytes",
                data.len()
            )));
        }

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&data[..SALT_LEN]);

        let mut rs = [0u8; 4];
        rs.copy_from_slice(&data[SALT_LEN..SALT_LEN + 4]);
        let record_size = u32::from_be_bytes(rs);
        if record_size < (TAG_LEN + 2) as u32 {
            return Err(CryptoError::MalformedRecord(format!(
                "レコードサイズが小さすぎます: {record_size}"
            )));
        }

        let id_len = data[SALT_LEN + 4] as usize;
        if id_len != PUBLIC_KEY_LEN {
            return Err(CryptoError::MalformedRecord(format!(
                "keyid長は{PUBLIC_KEY_LEN}である必要があります（実際: {id_len}）"
            )));
        }
        if data.len() < HEADER_LEN + TAG_LEN + 1 {
            return Err(CryptoError::MalformedRecord(format!(
                "暗号文が短すぎます: {} bytes",
                data.len().saturating_sub(HEADER_LEN)
            )));
        }

        let ciphertext_len = data.len() - HEADER_LEN;
        if ciphertext_len > record_size as usize {
            return Err(CryptoError::MalformedRecord(format!(
                "暗号文がレコードサイズを超えています: {ciphertext_len} bytes (rs: {record_size})"
            )));
        }

        let mut key_id = [0u8; PUBLIC_KEY_LEN];
        key_id.copy_from_slice(&data[SALT_LEN + 5..HEADER_LEN]);

        Ok(Self {
            salt,
            record_size,
            key_id,
            ciphertext: data[HEADER_LEN..].to_vec(),
        })
    }
}

/// 購読者向けにペイロードを暗号化する。
///
/// エフェメラル鍵ペアとソルトは呼び出しごとに`rng`から新規生成する
/// （エフェメラル鍵32バイト → ソルト16バイトの順に消費）。
pub fn encrypt(
    plaintext: &[u8],
    ua_public: &[u8],
    auth_secret: &[u8],
    rng: &dyn SecureRandom,
) -> Result<EncryptedRecord, CryptoError> {
    let ua_key = parse_subscriber_public_key(ua_public)?;
    if auth_secret.len() != AUTH_SECRET_LEN {
        return Err(CryptoError::InvalidSubscriberKey(format!(
            "認証シークレットは{AUTH_SECRET_LEN}バイトである必要があります（実際: {} bytes）",
            auth_secret.len()
        )));
    }
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(CryptoError::PayloadTooLarge {
            size: plaintext.len(),
            limit: MAX_PLAINTEXT_LEN,
        });
    }

    let ephemeral = random_secret_key(rng)?;
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt)?;

    let as_public = uncompressed_point(&ephemeral.public_key());
    let shared = diffie_hellman(ephemeral.to_nonzero_scalar(), ua_key.as_affine());
    let (cek, nonce) = derive_key_and_nonce(
        shared.raw_secret_bytes().as_slice(),
        auth_secret,
        ua_public,
        &as_public,
        &salt,
    )?;

    let mut padded = Vec::with_capacity(plaintext.len() + 1);
    padded.extend_from_slice(plaintext);
    padded.push(PADDING_DELIMITER);

    let cipher = Aes128Gcm::new_from_slice(&cek).map_err(|_| CryptoError::Encrypt)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), padded.as_slice())
        .map_err(|_| CryptoError::Encrypt)?;

    Ok(EncryptedRecord {
        salt,
        record_size: RECORD_SIZE,
        key_id: as_public,
        ciphertext,
    })
}

/// 購読者側の復号。受信側の実装と、暗号化結果の検証に使う。
///
/// パディング（末尾の0x00列と区切りバイト0x02）を取り除いた平文を返す。
pub fn decrypt(
    record: &EncryptedRecord,
    ua_secret: &SecretKey,
    auth_secret: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let as_key = PublicKey::from_sec1_bytes(&record.key_id)
        .map_err(|_| CryptoError::MalformedRecord("keyidがP-256公開鍵ではありません".to_string()))?;
    let ua_public = uncompressed_point(&ua_secret.public_key());

    let shared = diffie_hellman(ua_secret.to_nonzero_scalar(), as_key.as_affine());
    let (cek, nonce) = derive_key_and_nonce(
        shared.raw_secret_bytes().as_slice(),
        auth_secret,
        &ua_public,
        &record.key_id,
        &record.salt,
    )?;

    let cipher = Aes128Gcm::new_from_slice(&cek).map_err(|_| CryptoError::Decrypt)?;
    let mut padded = cipher
        .decrypt(Nonce::from_slice(&nonce), record.ciphertext.as_slice())
        .map_err(|_| CryptoError::Decrypt)?;

    while padded.last() == Some(&0) {
        padded.pop();
    }
    match padded.pop() {
        Some(PADDING_DELIMITER) => Ok(padded),
        _ => Err(CryptoError::MalformedRecord(
            "最終レコードの区切りバイトがありません".to_string(),
        )),
    }
}

/// 2段のHKDFでコンテンツ暗号鍵とナンスを導出する。
///
/// 第1段のinfoは購読者公開鍵、送信側公開鍵の順。
fn derive_key_and_nonce(
    ecdh_secret: &[u8],
    auth_secret: &[u8],
    ua_public: &[u8],
    as_public: &[u8],
    salt: &[u8; SALT_LEN],
) -> Result<([u8; 16], [u8; 12]), CryptoError> {
    let mut key_info = Vec::with_capacity(KEY_INFO_PREFIX.len() + ua_public.len() + as_public.len());
    key_info.extend_from_slice(KEY_INFO_PREFIX);
    key_info.extend_from_slice(ua_public);
    key_info.extend_from_slice(as_public);

    let mut ikm = [0u8; 32];
    Hkdf::<Sha256>::new(Some(auth_secret), ecdh_secret)
        .expand(&key_info, &mut ikm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let hkdf = Hkdf::<Sha256>::new(Some(salt.as_slice()), &ikm);
    let mut cek = [0u8; 16];
    hkdf.expand(CEK_INFO, &mut cek)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let mut nonce = [0u8; 12];
    hkdf.expand(NONCE_INFO, &mut nonce)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    Ok((cek, nonce))
}

/// 購読者の公開鍵（65バイト非圧縮点）を検証して読み込む。
fn parse_subscriber_public_key(ua_public: &[u8]) -> Result<PublicKey, CryptoError> {
    if ua_public.len() != PUBLIC_KEY_LEN || ua_public[0] != 0x04 {
        return Err(CryptoError::InvalidSubscriberKey(format!(
            "p256dhは{PUBLIC_KEY_LEN}バイトの非圧縮点である必要があります（実際: {} bytes）",
            ua_public.len()
        )));
    }
    PublicKey::from_sec1_bytes(ua_public).map_err(|_| {
        CryptoError::InvalidSubscriberKey("p256dhがP-256曲線上の点ではありません".to_string())
    })
}

fn uncompressed_point(key: &PublicKey) -> [u8; PUBLIC_KEY_LEN] {
    let point = key.to_encoded_point(false);
    let mut out = [0u8; PUBLIC_KEY_LEN];
    out.copy_from_slice(point.as_bytes());
    out
}
