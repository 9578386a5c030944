//! # Clubpush CLI
//!
//! 配信エンジンの運用ツール。
//!
//! ## コマンド
//! - `generate-keys`: VAPID署名鍵ペアを生成して出力する
//! - `send`: 1件の購読にテスト通知を送る
//!
//! `send`は環境変数から設定と鍵を読み込む（`VAPID_SUBJECT`, `VAPID_PUBLIC_KEY`,
//! `VAPID_PRIVATE_KEY`, `PUSH_TTL_SECS`, `PUSH_TIMEOUT_SECS`）。
//! ログはstderr、結果はstdoutに出力する。

use std::sync::Arc;

use clap::{Parser, Subcommand};

use clubpush_core::store::{EnvKeyStore, MemoryDirectory};
use clubpush_core::{Collaborators, NotificationService, PushConfig};
use clubpush_crypto::random::OsSecureRandom;
use clubpush_crypto::vapid::VapidKeyPair;
use clubpush_types::{
    Account, NotificationType, NotifyOutcome, NotifyRequest, Role, StoredVapidKeys, Subscriber,
};

/// `send`で作る一時アカウントのユーザーID
const CLI_USER_ID: &str = "cli";

#[derive(Parser)]
#[command(name = "clubpush-cli")]
#[command(version)]
#[command(about = "Web Push delivery tool for club notifications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a VAPID signing key pair (base64url)
    GenerateKeys {
        /// Print as JSON instead of environment variable lines
        #[arg(long)]
        json: bool,
    },
    /// Send a notification to a single push subscription
    Send {
        /// Push service endpoint URL
        #[arg(long)]
        endpoint: String,
        /// Subscriber public key (base64url, 65-byte uncompressed point)
        #[arg(long)]
        p256dh: String,
        /// Subscriber auth secret (base64url, 16 bytes)
        #[arg(long)]
        auth: String,
        /// Notification type
        #[arg(long = "type", default_value = "test")]
        kind: NotificationType,
        /// Title override
        #[arg(long)]
        title: Option<String>,
        /// Body override
        #[arg(long)]
        message: Option<String>,
        /// Event ID (sets the click-through URL)
        #[arg(long)]
        event_id: Option<String>,
        /// Event title used in the default body
        #[arg(long)]
        event_title: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::GenerateKeys { json } => generate_keys(json),
        Commands::Send {
            endpoint,
            p256dh,
            auth,
            kind,
            title,
            message,
            event_id,
            event_title,
        } => {
            let subscriber = Subscriber {
                endpoint,
                p256dh,
                auth,
                user_id: CLI_USER_ID.to_string(),
            };
            let mut request = NotifyRequest::new(kind);
            request.title = title;
            request.message = message;
            request.event_id = event_id;
            request.event_title = event_title;
            request.target_user_id = Some(CLI_USER_ID.to_string());
            send(subscriber, request).await
        }
    }
}

fn generate_keys(json: bool) -> anyhow::Result<()> {
    let keys = VapidKeyPair::generate(&OsSecureRandom)?;
    let stored = StoredVapidKeys {
        public_key: keys.public_key_base64url(),
        private_key: keys.private_key_base64url(),
    };
    tracing::info!("VAPID鍵ペアを生成しました");

    if json {
        println!("{}", serde_json::to_string_pretty(&stored)?);
    } else {
        println!("VAPID_PUBLIC_KEY={}", stored.public_key);
        println!("VAPID_PRIVATE_KEY={}", stored.private_key);
    }
    Ok(())
}

async fn send(subscriber: Subscriber, request: NotifyRequest) -> anyhow::Result<()> {
    let config = PushConfig::from_env()?;

    let directory = Arc::new(MemoryDirectory::new());
    directory
        .upsert_account(Account {
            user_id: CLI_USER_ID.to_string(),
            role: Role::Member,
        })
        .await;
    directory.add_subscription(subscriber).await;

    let service = NotificationService::new(
        config,
        Collaborators {
            key_store: Arc::new(EnvKeyStore::default()),
            resolver: directory.clone(),
            subscription_store: directory.clone(),
            recorder: directory,
        },
    )?;

    let outcome = service.notify(&request).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    match outcome {
        NotifyOutcome::Delivered(summary) if summary.failed > 0 => {
            anyhow::bail!("配信に失敗しました（failed: {}）", summary.failed)
        }
        _ => Ok(()),
    }
}
