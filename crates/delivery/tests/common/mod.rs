//! 통합 테스트 공용 도우미 -- 로컬 Phoenix 채널 서버와 이벤트 생성

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use screlay_core::event::{Event, EventFields};

/// 로컬 서버의 응답 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// 가입과 하트비트에 모두 응답
    Reply,
    /// 가입에만 응답 (하트비트 무시)
    IgnoreHeartbeats,
    /// 가입에 응답한 뒤 소켓을 열어 둔 채 더 이상 읽지 않음
    StallAfterJoin,
    /// 첫 가입 직후 토큰 만료 `system` 메시지를 보냄
    ExpireTokenAfterJoin,
}

/// 로컬 실시간 서버
///
/// `phx_join`에는 항상 ok로 응답하고, 그 뒤의 동작은 [`Behavior`]로 정합니다.
pub struct RealtimeServer {
    pub url: String,
    frames: Arc<Mutex<Vec<Value>>>,
    joins: Arc<AtomicUsize>,
}

impl RealtimeServer {
    pub async fn start(reply_heartbeats: bool) -> Self {
        let behavior = if reply_heartbeats {
            Behavior::Reply
        } else {
            Behavior::IgnoreHeartbeats
        };
        Self::start_with(behavior).await
    }

    pub async fn start_with(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let joins = Arc::new(AtomicUsize::new(0));

        let server_frames = Arc::clone(&frames);
        let server_joins = Arc::clone(&joins);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let frames = Arc::clone(&server_frames);
                let joins = Arc::clone(&server_joins);
                tokio::spawn(async move {
                    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    let (mut write, mut read) = ws.split();
                    while let Some(Ok(msg)) = read.next().await {
                        let Message::Text(text) = msg else {
                            continue;
                        };
                        let frame: Value = serde_json::from_str(&text).unwrap();
                        frames.lock().unwrap().push(frame.clone());

                        let event = frame["event"].as_str().unwrap_or_default();
                        let first_join =
                            event == "phx_join" && joins.fetch_add(1, Ordering::SeqCst) == 0;
                        let reply = match event {
                            "phx_join" => Some(json!({
                                "topic": frame["topic"],
                                "event": "phx_reply",
                                "payload": { "status": "ok", "response": {} },
                                "ref": frame["ref"],
                            })),
                            "heartbeat" if behavior != Behavior::IgnoreHeartbeats => Some(json!({
                                "topic": "phoenix",
                                "event": "phx_reply",
                                "payload": { "status": "ok", "response": {} },
                                "ref": frame["ref"],
                            })),
                            _ => None,
                        };
                        if let Some(reply) = reply
                            && write.send(Message::text(reply.to_string())).await.is_err()
                        {
                            break;
                        }
                        if event != "phx_join" {
                            continue;
                        }

                        match behavior {
                            Behavior::StallAfterJoin => {
                                // 읽기를 멈춘 채 연결만 붙잡아 둔다
                                std::future::pending::<()>().await;
                            }
                            Behavior::ExpireTokenAfterJoin if first_join => {
                                let expired = json!({
                                    "topic": frame["topic"],
                                    "event": "system",
                                    "payload": {
                                        "status": "error",
                                        "message": "Token has expired 3 seconds ago",
                                    },
                                    "ref": null,
                                });
                                if write.send(Message::text(expired.to_string())).await.is_err() {
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}/realtime/v1/websocket"),
            frames,
            joins,
        }
    }

    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    /// 주어진 이벤트 이름의 수신 프레임
    pub fn frames(&self, event: &str) -> Vec<Value> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f["event"] == event)
            .cloned()
            .collect()
    }
}

/// 조건이 참이 될 때까지 기다린다 (최대 5초)
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

pub fn event(event_type: &str, fields: &[(&str, &str)]) -> Arc<Event> {
    let fields: EventFields = fields.iter().copied().collect();
    let identity = format!("{event_type}:{}", Utc::now().timestamp_nanos_opt().unwrap_or(0));
    Arc::new(Event::new(event_type, fields, "", Utc::now(), identity))
}
