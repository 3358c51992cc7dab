//! 중복 억제와 상한(ceiling)을 적용하는 RateLimiter
//!
//! 두 관문을 모두 통과해야 허용됩니다.
//!
//! 1. **중복 억제**: 같은 `identity_key`는 첫 발생을 기준으로 한 윈도우 동안
//!    `max_duplicates`번까지만 허용됩니다. 거부된 발생은 윈도우를 연장하지 않습니다.
//! 2. **상한**: 이벤트 타입(또는 전체)별로 rolling window 동안 최대 `ceiling`개.
//!    초과분은 거부되고 윈도우당 한 번만 경고 로그를 남깁니다.
//!
//! 상한에 걸린 이벤트는 중복 억제 엔트리를 만들지 않습니다.
//! 입력 시각은 단조 증가하도록 보정됩니다.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use screlay_core::event::Event;
use screlay_core::metrics as m;

use crate::config::{CeilingScope, LimiterConfig};

const GLOBAL_SCOPE: &str = "*";

/// 허용 판정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// 중복 억제 윈도우 내 반복
    Duplicate,
    /// 상한 초과
    Throttled,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    fn reason(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Duplicate => "duplicate",
            Self::Throttled => "throttled",
        }
    }
}

/// 중복 억제 테이블 엔트리
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub identity_key: String,
    pub event_type: String,
    /// 윈도우 기준점
    pub first_seen_at: Instant,
    pub last_seen_at: Instant,
    pub count_in_window: u32,
}

/// 통계 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    pub allowed: u64,
    pub duplicate_denied: u64,
    pub throttled: u64,
    pub throttle_notices: u64,
    pub table_size: usize,
}

#[derive(Debug, Default)]
struct CeilingWindow {
    hits: VecDeque<Instant>,
    /// 이 시각 전까지는 추가 경고를 남기지 않음
    quiet_until: Option<Instant>,
}

impl CeilingWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.hits.is_empty() && self.quiet_until.is_none_or(|t| now >= t)
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    entries: HashMap<String, RateLimitEntry>,
    ceilings: HashMap<String, CeilingWindow>,
    last_now: Option<Instant>,
    last_sweep: Option<Instant>,
    stats: LimiterStats,
}

/// 이벤트 허용 판정기
pub struct RateLimiter {
    config: LimiterConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 현재 시각 기준으로 판정합니다.
    pub fn allow(&self, event: &Event) -> Decision {
        self.allow_at(event, Instant::now())
    }

    /// 주어진 시각 기준으로 판정합니다.
    pub fn allow_at(&self, event: &Event, now: Instant) -> Decision {
        let mut state = self.lock();
        let now = match state.last_now {
            Some(last) if last > now => last,
            _ => now,
        };
        state.last_now = Some(now);

        let last_sweep = state.last_sweep;
        match last_sweep {
            None => state.last_sweep = Some(now),
            Some(last) if now.saturating_duration_since(last) >= self.config.cleanup_interval => {
                self.sweep_locked(&mut state, now);
            }
            Some(_) => {}
        }

        let decision = self.decide(&mut state, event, now);
        match decision {
            Decision::Allowed => {
                state.stats.allowed += 1;
                metrics::counter!(m::LIMITER_ALLOWED_TOTAL, m::LABEL_EVENT_TYPE => event.event_type.clone())
                    .increment(1);
            }
            Decision::Duplicate => {
                state.stats.duplicate_denied += 1;
                tracing::debug!(
                    identity_key = %event.identity_key,
                    "event suppressed as duplicate"
                );
                metrics::counter!(m::LIMITER_DENIED_TOTAL, m::LABEL_REASON => decision.reason())
                    .increment(1);
            }
            Decision::Throttled => {
                state.stats.throttled += 1;
                metrics::counter!(m::LIMITER_DENIED_TOTAL, m::LABEL_REASON => decision.reason())
                    .increment(1);
            }
        }
        state.stats.table_size = state.entries.len();
        metrics::gauge!(m::LIMITER_TABLE_SIZE).set(state.entries.len() as f64);
        decision
    }

    fn decide(&self, state: &mut LimiterState, event: &Event, now: Instant) -> Decision {
        // 1. 중복 억제 (읽기만)
        let in_window = state.entries.get(&event.identity_key).and_then(|entry| {
            (now.saturating_duration_since(entry.first_seen_at) < self.config.dedup_window)
                .then_some(entry.count_in_window)
        });
        if let Some(count) = in_window
            && count >= self.config.max_duplicates
        {
            if let Some(entry) = state.entries.get_mut(&event.identity_key) {
                entry.last_seen_at = now;
            }
            return Decision::Duplicate;
        }

        // 2. 상한
        if self.config.ceiling > 0 {
            let scope = match self.config.ceiling_scope {
                CeilingScope::PerType => event.event_type.as_str(),
                CeilingScope::Global => GLOBAL_SCOPE,
            };
            let window = state.ceilings.entry(scope.to_owned()).or_default();
            window.prune(now, self.config.ceiling_window);
            if window.hits.len() >= self.config.ceiling as usize {
                if window.quiet_until.is_none_or(|t| now >= t) {
                    window.quiet_until = now.checked_add(self.config.ceiling_window);
                    state.stats.throttle_notices += 1;
                    metrics::counter!(m::LIMITER_THROTTLE_NOTICES_TOTAL).increment(1);
                    tracing::warn!(
                        scope = %scope,
                        ceiling = self.config.ceiling,
                        window_secs = self.config.ceiling_window.as_secs(),
                        "event ceiling reached, throttling until window rolls over"
                    );
                }
                return Decision::Throttled;
            }
            window.hits.push_back(now);
        }

        // 3. 중복 억제 엔트리 기록
        if in_window.is_some()
            && let Some(entry) = state.entries.get_mut(&event.identity_key)
        {
            entry.count_in_window += 1;
            entry.last_seen_at = now;
        } else {
            state.entries.insert(
                event.identity_key.clone(),
                RateLimitEntry {
                    identity_key: event.identity_key.clone(),
                    event_type: event.event_type.clone(),
                    first_seen_at: now,
                    last_seen_at: now,
                    count_in_window: 1,
                },
            );
        }
        Decision::Allowed
    }

    /// 만료된 엔트리를 정리하고 제거된 엔트리 수를 반환합니다.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut state = self.lock();
        let now = match state.last_now {
            Some(last) if last > now => last,
            _ => now,
        };
        self.sweep_locked(&mut state, now)
    }

    fn sweep_locked(&self, state: &mut LimiterState, now: Instant) -> usize {
        let dedup_window = self.config.dedup_window;
        let ceiling_window = self.config.ceiling_window;

        let before = state.entries.len();
        state
            .entries
            .retain(|_, e| now.saturating_duration_since(e.first_seen_at) < dedup_window);
        let removed = before - state.entries.len();

        state.ceilings.retain(|_, w| {
            w.prune(now, ceiling_window);
            !w.is_idle(now)
        });

        state.last_sweep = Some(now);
        state.stats.table_size = state.entries.len();
        metrics::gauge!(m::LIMITER_TABLE_SIZE).set(state.entries.len() as f64);
        if removed > 0 {
            tracing::debug!(removed, remaining = state.entries.len(), "rate limiter swept");
        }
        removed
    }

    /// 식별 키의 현재 엔트리 (진단용)
    pub fn entry(&self, identity_key: &str) -> Option<RateLimitEntry> {
        self.lock().entries.get(identity_key).cloned()
    }

    pub fn stats(&self) -> LimiterStats {
        self.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use screlay_core::event::EventFields;

    fn event(event_type: &str, key: &str) -> Event {
        Event::new(
            event_type,
            EventFields::new(),
            "raw",
            Utc::now(),
            format!("{event_type}:{key}"),
        )
    }

    fn config(ceiling: u32) -> LimiterConfig {
        LimiterConfig {
            dedup_window: Duration::from_secs(300),
            max_duplicates: 1,
            ceiling,
            ceiling_window: Duration::from_secs(60),
            ceiling_scope: CeilingScope::PerType,
            cleanup_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn only_first_duplicate_in_window_is_allowed() {
        let limiter = RateLimiter::new(config(0));
        let t0 = Instant::now();
        let e = event("actor_stall", "ElKoukra");

        assert_eq!(limiter.allow_at(&e, t0), Decision::Allowed);
        for s in 1..10 {
            assert_eq!(
                limiter.allow_at(&e, t0 + Duration::from_secs(s * 20)),
                Decision::Duplicate
            );
        }
        let stats = limiter.stats();
        assert_eq!(stats.allowed, 1);
        assert_eq!(stats.duplicate_denied, 9);
    }

    #[test]
    fn window_is_anchored_to_first_occurrence() {
        let limiter = RateLimiter::new(config(0));
        let t0 = Instant::now();
        let e = event("actor_stall", "ElKoukra");

        assert!(limiter.allow_at(&e, t0).is_allowed());
        // 윈도우 끝 직전의 거부가 윈도우를 연장하지 않는다
        assert!(!limiter.allow_at(&e, t0 + Duration::from_secs(299)).is_allowed());
        assert!(limiter.allow_at(&e, t0 + Duration::from_secs(300)).is_allowed());

        let entry = limiter.entry("actor_stall:ElKoukra").unwrap();
        assert_eq!(entry.first_seen_at, t0 + Duration::from_secs(300));
        assert_eq!(entry.count_in_window, 1);
    }

    #[test]
    fn distinct_keys_are_independent() {
        let limiter = RateLimiter::new(config(0));
        let t0 = Instant::now();
        assert!(limiter.allow_at(&event("actor_stall", "a"), t0).is_allowed());
        assert!(limiter.allow_at(&event("actor_stall", "b"), t0).is_allowed());
        assert!(limiter.allow_at(&event("corpse", "a"), t0).is_allowed());
        assert_eq!(limiter.stats().table_size, 3);
    }

    #[test]
    fn max_duplicates_allows_n_per_window() {
        let limiter = RateLimiter::new(LimiterConfig {
            max_duplicates: 3,
            ..config(0)
        });
        let t0 = Instant::now();
        let e = event("x", "k");
        let decisions: Vec<_> = (0..5)
            .map(|i| limiter.allow_at(&e, t0 + Duration::from_secs(i)))
            .collect();
        assert_eq!(
            decisions,
            vec![
                Decision::Allowed,
                Decision::Allowed,
                Decision::Allowed,
                Decision::Duplicate,
                Decision::Duplicate
            ]
        );
    }

    #[test]
    fn ceiling_allows_exactly_k_and_notices_once() {
        let k = 5;
        let limiter = RateLimiter::new(config(k));
        let t0 = Instant::now();

        let allowed = (0..=k)
            .filter(|i| {
                limiter
                    .allow_at(&event("actor_death", &i.to_string()), t0 + Duration::from_millis(u64::from(*i)))
                    .is_allowed()
            })
            .count();
        assert_eq!(allowed, k as usize);

        // 같은 윈도우 안의 추가 초과도 경고는 한 번뿐
        for i in 0..10 {
            let d = limiter.allow_at(&event("actor_death", &format!("more-{i}")), t0 + Duration::from_secs(1));
            assert_eq!(d, Decision::Throttled);
        }
        let stats = limiter.stats();
        assert_eq!(stats.throttled, 11);
        assert_eq!(stats.throttle_notices, 1);
    }

    #[test]
    fn ceiling_rolls_over_and_notices_again() {
        let limiter = RateLimiter::new(config(1));
        let t0 = Instant::now();
        assert!(limiter.allow_at(&event("x", "1"), t0).is_allowed());
        assert_eq!(limiter.allow_at(&event("x", "2"), t0), Decision::Throttled);

        let later = t0 + Duration::from_secs(61);
        assert!(limiter.allow_at(&event("x", "3"), later).is_allowed());
        assert_eq!(limiter.allow_at(&event("x", "4"), later), Decision::Throttled);
        assert_eq!(limiter.stats().throttle_notices, 2);
    }

    #[test]
    fn throttled_event_creates_no_dedup_entry() {
        let limiter = RateLimiter::new(config(1));
        let t0 = Instant::now();
        assert!(limiter.allow_at(&event("x", "first"), t0).is_allowed());
        assert_eq!(limiter.allow_at(&event("x", "second"), t0), Decision::Throttled);
        assert!(limiter.entry("x:second").is_none());

        // 윈도우가 지나면 같은 이벤트가 중복으로 취급되지 않는다
        let later = t0 + Duration::from_secs(61);
        assert!(limiter.allow_at(&event("x", "second"), later).is_allowed());
    }

    #[test]
    fn per_type_scope_isolates_types() {
        let limiter = RateLimiter::new(config(1));
        let t0 = Instant::now();
        assert!(limiter.allow_at(&event("a", "1"), t0).is_allowed());
        assert!(limiter.allow_at(&event("b", "1"), t0).is_allowed());
        assert!(!limiter.allow_at(&event("a", "2"), t0).is_allowed());
    }

    #[test]
    fn global_scope_shares_ceiling() {
        let limiter = RateLimiter::new(LimiterConfig {
            ceiling_scope: CeilingScope::Global,
            ..config(2)
        });
        let t0 = Instant::now();
        assert!(limiter.allow_at(&event("a", "1"), t0).is_allowed());
        assert!(limiter.allow_at(&event("b", "1"), t0).is_allowed());
        assert_eq!(limiter.allow_at(&event("c", "1"), t0), Decision::Throttled);
    }

    #[test]
    fn sweep_evicts_stale_entries_only() {
        let limiter = RateLimiter::new(config(0));
        let t0 = Instant::now();
        limiter.allow_at(&event("x", "old"), t0);
        limiter.allow_at(&event("x", "new"), t0 + Duration::from_secs(200));

        let removed = limiter.sweep_at(t0 + Duration::from_secs(301));
        assert_eq!(removed, 1);
        assert!(limiter.entry("x:old").is_none());
        assert!(limiter.entry("x:new").is_some());
        assert_eq!(limiter.stats().table_size, 1);
    }

    #[test]
    fn admission_path_sweeps_opportunistically() {
        let limiter = RateLimiter::new(config(0));
        let t0 = Instant::now();
        for i in 0..10 {
            limiter.allow_at(&event("x", &i.to_string()), t0);
        }
        assert_eq!(limiter.stats().table_size, 10);
        limiter.allow_at(&event("x", "late"), t0 + Duration::from_secs(400));
        assert_eq!(limiter.stats().table_size, 1);
    }

    #[test]
    fn time_going_backwards_is_clamped() {
        let limiter = RateLimiter::new(config(0));
        let t0 = Instant::now();
        let e = event("x", "k");
        assert!(limiter.allow_at(&e, t0 + Duration::from_secs(400)).is_allowed());
        // 과거 시각이 들어와도 윈도우 기준점 이전으로 되돌아가지 않는다
        assert_eq!(limiter.allow_at(&e, t0), Decision::Duplicate);
        assert_eq!(limiter.sweep_at(t0), 0);
    }
}
