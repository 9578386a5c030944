//! # 乱数源
//!
//! エフェメラル鍵とソルトの生成に使う暗号学的乱数を抽象化する。
//! 本番はOSのエントロピー、テストでは既知の値を返す実装を注入する。

use std::collections::VecDeque;
use std::sync::Mutex;

use rand::RngCore;

use crate::CryptoError;

/// 暗号学的に安全な乱数源。
///
/// 並行配信タスク間で共有されるため`&self`で呼べること。
pub trait SecureRandom: Send + Sync {
    /// `dest`を乱数で埋める。
    fn fill(&self, dest: &mut [u8]) -> Result<(), CryptoError>;
}

/// 鍵生成時にスカラーの引き直しを許す回数
const MAX_KEYGEN_ATTEMPTS: usize = 8;

/// 乱数源からP-256秘密鍵を生成する。
///
/// 32バイトを引き、0または群の位数以上なら引き直す。
pub(crate) fn random_secret_key(rng: &dyn SecureRandom) -> Result<p256::SecretKey, CryptoError> {
    for _ in 0..MAX_KEYGEN_ATTEMPTS {
        let mut scalar = [0u8; 32];
        rng.fill(&mut scalar)?;
        if let Ok(secret) = p256::SecretKey::from_slice(&scalar) {
            return Ok(secret);
        }
    }
    Err(CryptoError::Random("有効なP-256スカラーを生成できませんでした".to_string()))
}

/// OSの乱数源（`getrandom`経由）。
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSecureRandom;

impl SecureRandom for OsSecureRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<(), CryptoError> {
        rand::rngs::OsRng
            .try_fill_bytes(dest)
            .map_err(|e| CryptoError::Random(e.to_string()))
    }
}

/// 事前に与えたバイト列を順に返す決定的な乱数源。既知解テスト用。
///
/// `fill`1回につきチャンクを1つ消費し、長さが一致しなければエラーにする。
#[derive(Debug, Default)]
pub struct SequenceRandom {
    chunks: Mutex<VecDeque<Vec<u8>>>,
}

impl SequenceRandom {
    /// チャンク列から構築する。
    pub fn new(chunks: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            chunks: Mutex::new(chunks.into_iter().collect()),
        }
    }

    /// 未消費のチャンク数。
    pub fn remaining(&self) -> usize {
        self.chunks.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl SecureRandom for SequenceRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<(), CryptoError> {
        let mut chunks = self
            .chunks
            .lock()
            .map_err(|_| CryptoError::Random("SequenceRandomのロックが汚染されています".to_string()))?;
        let chunk = chunks
            .pop_front()
            .ok_or_else(|| CryptoError::Random("SequenceRandomのチャンクが尽きました".to_string()))?;
        if chunk.len() != dest.len() {
            return Err(CryptoError::Random(format!(
                "チャンク長が一致しません: 要求 {} bytes, 用意 {} bytes",
                dest.len(),
                chunk.len()
            )));
        }
        dest.copy_from_slice(&chunk);
        Ok(())
    }
}
