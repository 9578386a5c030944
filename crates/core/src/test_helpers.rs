//! # テスト用共通ヘルパー
//!
//! dispatcher, serviceテストで共有するモックPush Serviceと購読者の生成。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use base64::Engine;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;

use clubpush_crypto::random::OsSecureRandom;
use clubpush_crypto::vapid::VapidKeyPair;
use clubpush_crypto::{b64url, P256SecretKey};
use clubpush_types::Subscriber;

/// モックが受信した1件のPushリクエスト。
#[derive(Debug, Clone)]
pub struct ReceivedPush {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ReceivedPush {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

struct MockState {
    statuses: HashMap<String, u16>,
    received: Mutex<Vec<ReceivedPush>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// 起動済みのモックPush Service。
pub struct MockPushService {
    pub port: u16,
    state: Arc<MockState>,
}

impl MockPushService {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.origin())
    }

    pub fn origin(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn received(&self) -> Vec<ReceivedPush> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

/// モックPush Serviceを起動する。
///
/// - `statuses`に登録したパスは指定のステータスを返し、それ以外は201を返す
/// - `/slow`は3秒待ってから201を返す
/// - `/hold/*`は同時実行数を記録しながら100ms待ってから201を返す
pub async fn start_mock_push_service(statuses: &[(&str, u16)]) -> MockPushService {
    let state = Arc::new(MockState {
        statuses: statuses
            .iter()
            .map(|(path, status)| (path.to_string(), *status))
            .collect(),
        received: Mutex::new(Vec::new()),
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
    });

    let app = axum::Router::new()
        .fallback(handle_push)
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    MockPushService { port, state }
}

async fn handle_push(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let path = uri.path().to_string();
    state.received.lock().unwrap().push(ReceivedPush {
        path: path.clone(),
        headers,
        body: body.to_vec(),
    });

    if path == "/slow" {
        tokio::time::sleep(Duration::from_secs(3)).await;
    } else if path.starts_with("/hold/") {
        let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    let status = state.statuses.get(&path).copied().unwrap_or(201);
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// 復号用の秘密情報を保持したテスト用購読者。
pub struct TestSubscriber {
    pub subscriber: Subscriber,
    pub secret: P256SecretKey,
    pub auth: [u8; 16],
}

impl TestSubscriber {
    pub fn new(endpoint: &str, user_id: &str) -> Self {
        let secret = P256SecretKey::random(&mut rand::rngs::OsRng);
        let public = secret.public_key().to_encoded_point(false);
        let mut auth = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut auth);

        Self {
            subscriber: Subscriber {
                endpoint: endpoint.to_string(),
                p256dh: b64url().encode(public.as_bytes()),
                auth: b64url().encode(auth),
                user_id: user_id.to_string(),
            },
            secret,
            auth,
        }
    }
}

/// テスト用のVAPID鍵ペアを生成する。
pub fn test_keys() -> VapidKeyPair {
    VapidKeyPair::generate(&OsSecureRandom).unwrap()
}
