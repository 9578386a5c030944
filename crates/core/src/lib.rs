//! # Clubpush Core
//!
//! Web Push配信エンジン。通知を暗号化し、各購読者のPush Serviceに送信し、
//! 失効した購読を削除する。
//!
//! ## 処理フロー
//! 1. Audience Resolverで宛先の購読を解決する
//! 2. 宛先ユーザーごとに通知履歴を記録する
//! 3. 購読ごとに暗号化・VAPID署名・POSTを並行実行する（[`dispatcher`]）
//! 4. 404/410を返した購読をまとめて削除する

pub mod config;
pub mod content;
pub mod dispatcher;
pub mod error;
pub mod service;
pub mod store;

#[cfg(test)]
mod test_helpers;

pub use config::PushConfig;
pub use dispatcher::Dispatcher;
pub use error::PushError;
pub use service::{Collaborators, NotificationService};
