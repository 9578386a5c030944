//! # 通知文面
//!
//! 通知種別ごとの既定タイトル・本文の表と、呼び出し側リクエストから
//! ペイロードを組み立てる処理。

use clubpush_types::{NotificationData, NotificationPayload, NotificationType, NotifyRequest};

use crate::config::PushConfig;

/// イベント名が無い場合の呼び名
const UNTITLED_EVENT: &str = "an event";

/// 既定のタイトルと本文を返す。
fn default_text(kind: NotificationType, event_title: &str) -> (String, String) {
    match kind {
        NotificationType::NewEvent => (
            "New event".to_string(),
            format!("{event_title} has been scheduled."),
        ),
        NotificationType::EventUpdated => (
            "Event updated".to_string(),
            format!("{event_title} has been updated."),
        ),
        NotificationType::EventReminder => (
            "Event reminder".to_string(),
            format!("Don't forget: {event_title} is coming up."),
        ),
        NotificationType::Test => (
            "Test notification".to_string(),
            "Push notifications are working.".to_string(),
        ),
        NotificationType::Broadcast => (
            "Club announcement".to_string(),
            "There is a new message from the club.".to_string(),
        ),
    }
}

/// リクエストから通知ペイロードを組み立てる。
///
/// `title`と`message`が指定されていれば既定文面より優先する。
/// イベントIDがあれば遷移先は`/events/<id>`、無ければ`/`。
pub fn build_payload(request: &NotifyRequest, config: &PushConfig) -> NotificationPayload {
    let event_title = request
        .event_title
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(UNTITLED_EVENT);
    let (default_title, default_body) = default_text(request.kind, event_title);

    let title = non_empty(request.title.as_deref()).unwrap_or(default_title);
    let body = non_empty(request.message.as_deref()).unwrap_or(default_body);
    let url = match request.event_id.as_deref() {
        Some(id) if !id.is_empty() => format!("/events/{id}"),
        _ => "/".to_string(),
    };

    NotificationPayload {
        title,
        body,
        icon: config.icon.clone(),
        badge: config.badge.clone(),
        data: NotificationData {
            kind: request.kind,
            event_id: request.event_id.clone(),
            url: Some(url),
        },
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
