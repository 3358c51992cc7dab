//! 이벤트 시스템 -- 로그 한 줄과 분류된 이벤트
//!
//! [`LogLine`]은 `LogWatcher`가 만들어 한 번만 소비되는 원시 줄이고,
//! [`Event`]는 패턴 분류를 통과한 뒤 불변으로 공유되는 구조화 이벤트입니다.
//! 이벤트는 `Arc<Event>`로 버스와 각 싱크에 전달됩니다.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use uuid::Uuid;

// --- 모듈명 상수 ---

/// 수집 파이프라인 모듈명
pub const MODULE_INGEST: &str = "ingest";
/// 전송 모듈명
pub const MODULE_DELIVERY: &str = "delivery";

/// 원시 로그 한 줄
///
/// 줄 종결자(`\n`, `\r\n`)는 제거된 상태입니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// 줄 내용
    pub text: String,
    /// 파일 내 시작 바이트 오프셋
    pub offset: u64,
    /// 줄 종결자 다음 바이트 오프셋 (재시작 시 이어 읽을 위치)
    pub end_offset: u64,
    /// 수집 시각
    pub received_at: DateTime<Utc>,
}

impl LogLine {
    /// 현재 시각으로 새 줄을 만듭니다.
    pub fn new(text: impl Into<String>, offset: u64, end_offset: u64) -> Self {
        Self {
            text: text.into(),
            offset,
            end_offset,
            received_at: Utc::now(),
        }
    }
}

/// 패턴의 명명 캡처 -- 선언 순서를 유지하는 (이름, 값) 목록
///
/// 참여하지 않은 그룹도 빈 문자열로 반드시 존재합니다.
/// 직렬화 시 JSON 객체로 출력되며 키 순서는 선언 순서를 따릅니다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFields(Vec<(String, String)>);

impl EventFields {
    /// 빈 필드 목록
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// 필드를 추가합니다. 같은 이름이 이미 있으면 값을 교체합니다.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// 이름으로 값을 조회합니다.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// 필드 존재 여부
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(k, _)| k == name)
    }

    /// 선언 순서대로 순회합니다.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 필드 이름 목록
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EventFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

impl Serialize for EventFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// 분류된 로그 이벤트
///
/// 생성 후 불변입니다. `event_type`은 항상 설정된 패턴 집합의 키이고,
/// `fields`는 해당 패턴이 선언한 명명 그룹을 정확히 담습니다.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// 이벤트 고유 ID (UUID v4, 추적용)
    pub id: Uuid,
    /// 이벤트 타입 (패턴 이름)
    pub event_type: String,
    /// 명명 캡처 필드
    pub fields: EventFields,
    /// 원본 줄
    pub raw_line: String,
    /// 발생 시각 (캡처된 timestamp, 없으면 수집 시각)
    pub occurred_at: DateTime<Utc>,
    /// 중복 판정 키
    pub identity_key: String,
}

impl Event {
    /// 새 이벤트를 생성합니다. `id`는 새 UUID v4로 채워집니다.
    pub fn new(
        event_type: impl Into<String>,
        fields: EventFields,
        raw_line: impl Into<String>,
        occurred_at: DateTime<Utc>,
        identity_key: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            fields,
            raw_line: raw_line.into(),
            occurred_at,
            identity_key: identity_key.into(),
        }
    }

    /// 필드 값 조회 단축 메서드
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.event_type, self.id)?;
        for (k, v) in self.fields.iter() {
            write!(f, " {k}={v}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_preserve_declaration_order() {
        let fields: EventFields = [("timestamp", "t"), ("player", "p"), ("action", "a")]
            .into_iter()
            .collect();
        let names: Vec<_> = fields.names().collect();
        assert_eq!(names, vec!["timestamp", "player", "action"]);
    }

    #[test]
    fn fields_insert_replaces_existing() {
        let mut fields = EventFields::new();
        fields.insert("player", "a");
        fields.insert("player", "b");
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("player"), Some("b"));
    }

    #[test]
    fn fields_serialize_as_ordered_object() {
        let fields: EventFields = [("b", "2"), ("a", "1")].into_iter().collect();
        let json = serde_json::to_string(&fields).unwrap();
        assert_eq!(json, r#"{"b":"2","a":"1"}"#);
    }

    #[test]
    fn event_field_lookup() {
        let fields: EventFields = [("player", "ElKoukra")].into_iter().collect();
        let event = Event::new("actor_stall", fields, "raw", Utc::now(), "actor_stall:ElKoukra");
        assert_eq!(event.field("player"), Some("ElKoukra"));
        assert_eq!(event.field("missing"), None);
    }

    #[test]
    fn events_get_distinct_ids() {
        let a = Event::new("x", EventFields::new(), "", Utc::now(), "x:");
        let b = Event::new("x", EventFields::new(), "", Utc::now(), "x:");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn display_includes_type_and_fields() {
        let fields: EventFields = [("player", "p1")].into_iter().collect();
        let event = Event::new("connected", fields, "", Utc::now(), "connected:p1");
        let s = event.to_string();
        assert!(s.starts_with("[connected]"));
        assert!(s.contains("player=p1"));
    }
}
