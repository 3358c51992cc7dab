//! 싱크별 페이로드 생성

use chrono::{DateTime, SecondsFormat, Utc};
use screlay_core::event::Event;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::config::WebhookFormat;
use crate::context::ClientSnapshot;

/// RFC 3339, 밀리초, `Z`
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `actor_stall` -> `Actor Stall`
pub fn title_case(event_type: &str) -> String {
    event_type
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn fields_map(event: &Event) -> Map<String, Value> {
    event
        .fields
        .iter()
        .map(|(k, v)| (k.to_owned(), Value::String(v.to_owned())))
        .collect()
}

/// 실시간 브로드캐스트 페이로드
///
/// `raw_data`는 캡처 필드에 `action`, `timestamp`, `username`, `version`, `shard`를 더합니다.
/// 캡처된 `action`은 유지되고 `timestamp`는 항상 정규화된 발생 시각으로 덮어씁니다.
pub fn realtime_payload(event: &Event, content: &str, ctx: &ClientSnapshot) -> Value {
    let timestamp = format_timestamp(&event.occurred_at);
    let mut raw = fields_map(event);
    raw.entry("action")
        .or_insert_with(|| Value::String(title_case(&event.event_type)));
    raw.insert("timestamp".to_owned(), Value::String(timestamp.clone()));
    for (key, value) in [
        ("username", &ctx.username),
        ("version", &ctx.version),
        ("shard", &ctx.shard),
    ] {
        raw.entry(key)
            .or_insert_with(|| Value::String(value.clone()));
    }

    json!({
        "content": content,
        "raw_data": raw,
        "timestamp": timestamp,
        "type": event.event_type,
    })
}

/// 웹훅 요청 본문
pub fn webhook_body(format: WebhookFormat, event: &Event, content: &str) -> Value {
    match format {
        WebhookFormat::Content => json!({ "content": content }),
        WebhookFormat::Embed => {
            let fields: Vec<Value> = event
                .fields
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| json!({ "name": k, "value": v, "inline": true }))
                .collect();
            json!({
                "embeds": [{
                    "title": title_case(&event.event_type),
                    "description": content,
                    "fields": fields,
                    "timestamp": format_timestamp(&event.occurred_at),
                }]
            })
        }
    }
}

/// 기술 채널용 CSV 한 줄: `event_type,timestamp,<나머지 필드 값>`
///
/// 필드는 선언 순서이며 빈 값도 자리를 유지합니다.
pub fn technical_line(event: &Event) -> String {
    let mut parts = vec![
        event.event_type.clone(),
        format_timestamp(&event.occurred_at),
    ];
    parts.extend(
        event
            .fields
            .iter()
            .filter(|(k, _)| *k != "timestamp")
            .map(|(_, v)| v.replace(',', " ")),
    );
    parts.join(",")
}

/// 저장소 행 식별 해시 (SHA-256 hex)
///
/// `hash_fields` 값을 순서대로 이어 붙입니다. `username`은 이벤트 필드가 없으면
/// 컨텍스트 값을 씁니다.
pub fn identity_hash(event: &Event, ctx: &ClientSnapshot, hash_fields: &[String]) -> String {
    let mut input = String::new();
    for name in hash_fields {
        let value = match (name.as_str(), event.field(name)) {
            (_, Some(v)) => v,
            ("username", None) => ctx.username.as_str(),
            _ => "",
        };
        input.push_str(value);
    }
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// 저장소 행: 필드 + `username` + `hash_value`
pub fn store_row(event: &Event, ctx: &ClientSnapshot, hash_fields: &[String]) -> Value {
    let mut row = fields_map(event);
    row.entry("username")
        .or_insert_with(|| Value::String(ctx.username.clone()));
    row.insert(
        "hash_value".to_owned(),
        Value::String(identity_hash(event, ctx, hash_fields)),
    );
    Value::Object(row)
}
