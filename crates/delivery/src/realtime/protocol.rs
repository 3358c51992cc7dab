//! Phoenix 채널 메시지 (Supabase Realtime)

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::context::ClientSnapshot;

pub const PHOENIX_TOPIC: &str = "phoenix";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_BROADCAST: &str = "broadcast";
pub const EVENT_PRESENCE: &str = "presence";
pub const EVENT_ACCESS_TOKEN: &str = "access_token";
pub const EVENT_SYSTEM: &str = "system";

/// 와이어 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// 메시지 ref 발급기
#[derive(Debug, Default)]
pub struct RefCounter(u64);

impl RefCounter {
    pub fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}

pub fn heartbeat(msg_ref: String) -> PhoenixMessage {
    PhoenixMessage {
        topic: PHOENIX_TOPIC.to_owned(),
        event: EVENT_HEARTBEAT.to_owned(),
        payload: json!({}),
        msg_ref: Some(msg_ref),
        join_ref: None,
    }
}

/// 채널 가입 요청
pub fn join(topic: &str, username: &str, access_token: &str, msg_ref: String) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_owned(),
        event: EVENT_JOIN.to_owned(),
        payload: json!({
            "config": {
                "broadcast": { "self": true, "ack": false },
                "presence": { "key": username },
                "postgres_changes": [],
            },
            "access_token": access_token,
        }),
        msg_ref: Some(msg_ref.clone()),
        join_ref: Some(msg_ref),
    }
}

pub fn broadcast(
    topic: &str,
    event: &str,
    payload: Value,
    msg_ref: String,
    join_ref: &str,
) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_owned(),
        event: EVENT_BROADCAST.to_owned(),
        payload: json!({
            "type": "broadcast",
            "event": event,
            "payload": payload,
        }),
        msg_ref: Some(msg_ref),
        join_ref: Some(join_ref.to_owned()),
    }
}

/// presence track (사용자 이름/샤드/버전)
pub fn track(topic: &str, ctx: &ClientSnapshot, msg_ref: String, join_ref: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_owned(),
        event: EVENT_PRESENCE.to_owned(),
        payload: json!({
            "type": "presence",
            "event": "track",
            "payload": {
                "username": ctx.username,
                "shard": ctx.shard,
                "version": ctx.version,
            },
        }),
        msg_ref: Some(msg_ref),
        join_ref: Some(join_ref.to_owned()),
    }
}

/// 연결 중 토큰 교체
pub fn access_token(topic: &str, token: &str, msg_ref: String, join_ref: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_owned(),
        event: EVENT_ACCESS_TOKEN.to_owned(),
        payload: json!({ "access_token": token }),
        msg_ref: Some(msg_ref),
        join_ref: Some(join_ref.to_owned()),
    }
}

/// 수신 메시지 분류
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    HeartbeatReply,
    JoinOk,
    JoinError(String),
    /// 채널 에러 또는 종료
    ChannelClosed(String),
    /// 토큰 만료/거부 통지
    TokenExpired(String),
    Other,
}

/// `join_ref`와 일치하는 가입 응답만 `JoinOk`/`JoinError`로 분류합니다.
pub fn classify(msg: &PhoenixMessage, topic: &str, join_ref: Option<&str>) -> Inbound {
    let status = msg.payload.get("status").and_then(Value::as_str);

    if msg.topic == PHOENIX_TOPIC {
        return if msg.event == EVENT_REPLY {
            Inbound::HeartbeatReply
        } else {
            Inbound::Other
        };
    }
    if msg.topic != topic {
        return Inbound::Other;
    }

    match msg.event.as_str() {
        EVENT_REPLY if join_ref.is_some() && msg.msg_ref.as_deref() == join_ref => {
            if status == Some("ok") {
                Inbound::JoinOk
            } else {
                Inbound::JoinError(reason_of(&msg.payload))
            }
        }
        EVENT_REPLY if status == Some("error") && mentions_token(&msg.payload) => {
            Inbound::TokenExpired(reason_of(&msg.payload))
        }
        EVENT_ERROR | EVENT_CLOSE => Inbound::ChannelClosed(msg.event.clone()),
        EVENT_SYSTEM if status == Some("error") => {
            if mentions_token(&msg.payload) {
                Inbound::TokenExpired(reason_of(&msg.payload))
            } else {
                Inbound::ChannelClosed(reason_of(&msg.payload))
            }
        }
        _ => Inbound::Other,
    }
}

fn mentions_token(payload: &Value) -> bool {
    let text = payload.to_string().to_ascii_lowercase();
    text.contains("token") || text.contains("jwt")
}

fn reason_of(payload: &Value) -> String {
    payload
        .pointer("/response/reason")
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "realtime:general";

    fn reply(topic: &str, msg_ref: &str, status: &str, response: Value) -> PhoenixMessage {
        PhoenixMessage {
            topic: topic.to_owned(),
            event: EVENT_REPLY.to_owned(),
            payload: json!({ "status": status, "response": response }),
            msg_ref: Some(msg_ref.to_owned()),
            join_ref: None,
        }
    }

    #[test]
    fn join_frame_shape() {
        let msg = join(TOPIC, "ElKoukra", "tok", "1".to_owned());
        let v: Value = serde_json::from_str(&msg.to_text().unwrap()).unwrap();
        assert_eq!(v["event"], "phx_join");
        assert_eq!(v["ref"], "1");
        assert_eq!(v["join_ref"], "1");
        assert_eq!(v["payload"]["config"]["broadcast"]["self"], true);
        assert_eq!(v["payload"]["config"]["presence"]["key"], "ElKoukra");
        assert_eq!(v["payload"]["access_token"], "tok");
    }

    #[test]
    fn heartbeat_frame_shape() {
        let v: Value = serde_json::from_str(&heartbeat("7".to_owned()).to_text().unwrap()).unwrap();
        assert_eq!(v["topic"], "phoenix");
        assert_eq!(v["event"], "heartbeat");
        assert!(v.get("join_ref").is_none());
    }

    #[test]
    fn broadcast_wraps_payload() {
        let msg = broadcast(TOPIC, "realtime-event", json!({"type": "actor_stall"}), "3".into(), "1");
        assert_eq!(msg.payload["type"], "broadcast");
        assert_eq!(msg.payload["event"], "realtime-event");
        assert_eq!(msg.payload["payload"]["type"], "actor_stall");
    }

    #[test]
    fn classify_replies() {
        let hb = reply(PHOENIX_TOPIC, "2", "ok", json!({}));
        assert_eq!(classify(&hb, TOPIC, Some("1")), Inbound::HeartbeatReply);

        let ok = reply(TOPIC, "1", "ok", json!({}));
        assert_eq!(classify(&ok, TOPIC, Some("1")), Inbound::JoinOk);

        let denied = reply(TOPIC, "1", "error", json!({"reason": "unauthorized"}));
        assert_eq!(
            classify(&denied, TOPIC, Some("1")),
            Inbound::JoinError("unauthorized".to_owned())
        );

        let other_ref = reply(TOPIC, "9", "ok", json!({}));
        assert_eq!(classify(&other_ref, TOPIC, Some("1")), Inbound::Other);
    }

    #[test]
    fn classify_token_expiry_and_close() {
        let expired = PhoenixMessage {
            topic: TOPIC.to_owned(),
            event: EVENT_SYSTEM.to_owned(),
            payload: json!({"status": "error", "message": "Token has expired 12 seconds ago"}),
            msg_ref: None,
            join_ref: None,
        };
        assert!(matches!(classify(&expired, TOPIC, Some("1")), Inbound::TokenExpired(_)));

        let closed = PhoenixMessage {
            topic: TOPIC.to_owned(),
            event: EVENT_CLOSE.to_owned(),
            payload: json!({}),
            msg_ref: None,
            join_ref: None,
        };
        assert!(matches!(classify(&closed, TOPIC, Some("1")), Inbound::ChannelClosed(_)));
    }

    #[test]
    fn parse_tolerates_null_ref() {
        let msg = PhoenixMessage::parse(
            r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok"},"ref":null}"#,
        )
        .unwrap();
        assert_eq!(msg.msg_ref, None);
    }
}
