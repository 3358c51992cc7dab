//! 재시도 백오프 정책
//!
//! 시도 `n`(0부터)의 대기 시간은 `first × factor^n`이며 `max`로 제한됩니다.
//! 기준값은 시도 번호에서만 계산되므로 이전 대기 시간이 다음 계산에 영향을 주지 않습니다.

use std::time::Duration;

/// 지수 백오프 정책
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// 첫 재시도 전 대기
    pub first: Duration,
    /// 최대 대기
    pub max: Duration,
    /// 증가 배수
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    pub fn new(first: Duration, max: Duration) -> Self {
        Self {
            first,
            max,
            ..Self::default()
        }
    }

    /// 시도 번호(0부터)에 대한 대기 시간
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// 서버 힌트를 반영한 대기 시간 (힌트가 더 길면 힌트, 단 `max` 이내)
    pub fn next_with_hint(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let base = self.next(attempt);
        match hint {
            Some(hint) if hint > base => hint.min(self.max),
            _ => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2.0,
        }
    }

    #[test]
    fn exponential_growth() {
        let p = policy();
        assert_eq!(p.next(0), Duration::from_millis(100));
        assert_eq!(p.next(1), Duration::from_millis(200));
        assert_eq!(p.next(2), Duration::from_millis(400));
        assert_eq!(p.next(3), Duration::from_millis(800));
    }

    #[test]
    fn clamped_to_max() {
        let p = policy();
        assert_eq!(p.next(4), Duration::from_secs(1));
        assert_eq!(p.next(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn first_above_max_clamps() {
        let p = BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(5));
        assert_eq!(p.next(0), Duration::from_secs(5));
    }

    #[test]
    fn hint_extends_but_never_beyond_max() {
        let p = policy();
        assert_eq!(
            p.next_with_hint(0, Some(Duration::from_millis(300))),
            Duration::from_millis(300)
        );
        assert_eq!(
            p.next_with_hint(0, Some(Duration::from_millis(50))),
            Duration::from_millis(100)
        );
        assert_eq!(
            p.next_with_hint(0, Some(Duration::from_secs(60))),
            Duration::from_secs(1)
        );
    }
}
