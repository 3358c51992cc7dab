//! 패턴 라이브러리 -- 로그 한 줄을 이벤트 타입과 필드로 분류합니다.
//!
//! # 우선순위
//! 패턴은 `priority` 오름차순으로 시도되고, 같은 우선순위는 선언 순서를 따릅니다.
//! 첫 번째로 매치된 패턴만 사용되므로 NPC를 제외하는 `player_death`처럼
//! 제한적인 패턴은 일반 패턴(`actor_death`)보다 작은 priority를 가져야 합니다.
//!
//! # 리로드
//! [`PatternLibrary::reload`]는 새 집합을 모두 컴파일한 뒤에만 교체합니다.
//! 실패하면 기존 집합이 그대로 유지됩니다.

mod matcher;

pub use matcher::{CompiledPattern, TIMESTAMP_FIELD};

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use screlay_core::config::PatternConfig;
use screlay_core::event::{Event, EventFields, LogLine};

use crate::error::LogPipelineError;

/// 분류 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub event_type: String,
    pub fields: EventFields,
}

#[derive(Debug)]
struct CompiledSet {
    /// priority 순으로 정렬됨
    patterns: Vec<CompiledPattern>,
}

impl CompiledSet {
    fn compile(defs: &[PatternConfig]) -> Result<Self, LogPipelineError> {
        if defs.is_empty() {
            return Err(LogPipelineError::EmptyPatternSet);
        }
        let mut patterns = defs
            .iter()
            .map(CompiledPattern::compile)
            .collect::<Result<Vec<_>, _>>()?;
        // stable sort: 같은 priority는 선언 순서 유지
        patterns.sort_by_key(CompiledPattern::priority);
        Ok(Self { patterns })
    }

    fn first_match(&self, line: &str) -> Option<(&CompiledPattern, EventFields)> {
        self.patterns
            .iter()
            .find_map(|p| p.captures(line).map(|fields| (p, fields)))
    }
}

/// 이벤트 패턴 라이브러리
///
/// 분류는 읽기 잠금만 잡고, 리로드는 컴파일이 끝난 집합의 `Arc`만 교체합니다.
pub struct PatternLibrary {
    compiled: RwLock<Arc<CompiledSet>>,
}

impl PatternLibrary {
    /// 패턴 집합을 컴파일합니다. 빈 집합이나 잘못된 정규식은 에러입니다.
    pub fn new(defs: &[PatternConfig]) -> Result<Self, LogPipelineError> {
        let set = CompiledSet::compile(defs)?;
        tracing::info!(patterns = set.patterns.len(), "pattern library compiled");
        Ok(Self {
            compiled: RwLock::new(Arc::new(set)),
        })
    }

    fn snapshot(&self) -> Arc<CompiledSet> {
        Arc::clone(&self.compiled.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// 줄을 분류합니다. 어떤 패턴과도 맞지 않으면 `None` (에러 아님).
    pub fn classify(&self, line: &str) -> Option<Classification> {
        let set = self.snapshot();
        set.first_match(line).map(|(p, fields)| Classification {
            event_type: p.name().to_owned(),
            fields,
        })
    }

    /// `LogLine`을 분류하여 `Event`를 만듭니다.
    ///
    /// `timestamp` 캡처가 RFC 3339이면 발생 시각으로 쓰고, 아니면 수집 시각을 씁니다.
    pub fn build_event(&self, line: &LogLine) -> Option<Event> {
        let set = self.snapshot();
        let (pattern, fields) = set.first_match(&line.text)?;
        let occurred_at = fields
            .get(TIMESTAMP_FIELD)
            .and_then(parse_timestamp)
            .unwrap_or(line.received_at);
        let identity_key = pattern.identity_key(&fields);
        Some(Event::new(
            pattern.name(),
            fields,
            line.text.clone(),
            occurred_at,
            identity_key,
        ))
    }

    /// 패턴 집합을 원자적으로 교체합니다. 실패 시 기존 집합 유지.
    pub fn reload(&self, defs: &[PatternConfig]) -> Result<(), LogPipelineError> {
        let set = match CompiledSet::compile(defs) {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!(error = %e, "pattern reload rejected, keeping current set");
                return Err(e);
            }
        };
        let count = set.patterns.len();
        *self.compiled.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(set);
        tracing::info!(patterns = count, "pattern library reloaded");
        Ok(())
    }

    /// 실제 시도 순서의 이벤트 타입 목록
    pub fn priority_order(&self) -> Vec<String> {
        self.snapshot()
            .patterns
            .iter()
            .map(|p| p.name().to_owned())
            .collect()
    }

    /// 이벤트 타입의 선언된 필드 이름
    pub fn fields_of(&self, event_type: &str) -> Option<Vec<String>> {
        self.snapshot()
            .patterns
            .iter()
            .find(|p| p.name() == event_type)
            .map(|p| p.group_names().to_vec())
    }

    pub fn len(&self) -> usize {
        self.snapshot().patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
