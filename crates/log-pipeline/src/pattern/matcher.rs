//! 단일 패턴 매칭 -- 정규식 컴파일, 명명 캡처 추출, 접두어 제외
//!
//! [`CompiledPattern`]은 `PatternConfig` 하나를 컴파일한 결과입니다.
//! 정규식은 생성 시 한 번만 컴파일되고, 선언된 명명 그룹 목록을 함께 보관하여
//! 매칭된 모든 이벤트가 같은 필드 키 집합을 갖도록 합니다.

use regex::Regex;

use screlay_core::config::PatternConfig;
use screlay_core::event::EventFields;

use crate::error::LogPipelineError;

/// timestamp 캡처 그룹 이름
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// 컴파일된 접두어 제외 규칙
#[derive(Debug, Clone)]
struct Exclusion {
    field: String,
    prefixes: Vec<String>,
}

/// 컴파일된 패턴
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    name: String,
    priority: u32,
    regex: Regex,
    /// 선언 순서의 명명 그룹
    group_names: Vec<String>,
    exclusions: Vec<Exclusion>,
    identity_fields: Vec<String>,
}

impl CompiledPattern {
    /// 패턴 정의를 컴파일합니다.
    ///
    /// 제외 규칙이나 identity 필드가 존재하지 않는 그룹을 가리키면 에러입니다.
    pub fn compile(def: &PatternConfig) -> Result<Self, LogPipelineError> {
        let regex = Regex::new(&def.regex).map_err(|e| LogPipelineError::PatternCompile {
            name: def.name.clone(),
            reason: e.to_string(),
        })?;

        let group_names: Vec<String> = regex
            .capture_names()
            .flatten()
            .map(str::to_owned)
            .collect();

        let has_group = |field: &str| group_names.iter().any(|g| g == field);

        let mut exclusions = Vec::with_capacity(def.exclude.len());
        for ex in &def.exclude {
            if !has_group(&ex.field) {
                return Err(LogPipelineError::PatternCompile {
                    name: def.name.clone(),
                    reason: format!("exclude field '{}' is not a named group", ex.field),
                });
            }
            exclusions.push(Exclusion {
                field: ex.field.clone(),
                prefixes: ex.prefixes.clone(),
            });
        }

        let identity_fields = if def.identity_fields.is_empty() {
            group_names
                .iter()
                .filter(|g| g.as_str() != TIMESTAMP_FIELD)
                .cloned()
                .collect()
        } else {
            for field in &def.identity_fields {
                if !has_group(field) {
                    return Err(LogPipelineError::PatternCompile {
                        name: def.name.clone(),
                        reason: format!("identity field '{field}' is not a named group"),
                    });
                }
            }
            def.identity_fields.clone()
        };

        Ok(Self {
            name: def.name.clone(),
            priority: def.priority,
            regex,
            group_names,
            exclusions,
            identity_fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// 선언된 명명 그룹 이름
    pub fn group_names(&self) -> &[String] {
        &self.group_names
    }

    /// 줄을 매칭하여 필드를 추출합니다.
    ///
    /// 매치되지 않거나 제외 규칙에 걸리면 `None`입니다.
    /// 참여하지 않은 선택 그룹은 빈 문자열로 채워집니다.
    pub fn captures(&self, line: &str) -> Option<EventFields> {
        let caps = self.regex.captures(line)?;

        let fields: EventFields = self
            .group_names
            .iter()
            .map(|name| {
                let value = caps.name(name).map_or("", |m| m.as_str());
                (name.clone(), value.to_owned())
            })
            .collect();

        let excluded = self.exclusions.iter().any(|ex| {
            fields
                .get(&ex.field)
                .is_some_and(|v| ex.prefixes.iter().any(|p| v.starts_with(p.as_str())))
        });
        if excluded {
            return None;
        }

        Some(fields)
    }

    /// 중복 판정 키: `{event_type}:{v1}|{v2}|...`
    pub fn identity_key(&self, fields: &EventFields) -> String {
        let values: Vec<&str> = self
            .identity_fields
            .iter()
            .map(|f| fields.get(f).unwrap_or(""))
            .collect();
        format!("{}:{}", self.name, values.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screlay_core::config::FieldExclusion;

    fn def(name: &str, regex: &str) -> PatternConfig {
        PatternConfig {
            name: name.to_owned(),
            regex: regex.to_owned(),
            priority: 100,
            identity_fields: Vec::new(),
            exclude: Vec::new(),
        }
    }

    #[test]
    fn invalid_regex_is_compile_error() {
        let err = CompiledPattern::compile(&def("broken", "(?P<x>unclosed")).unwrap_err();
        assert!(matches!(err, LogPipelineError::PatternCompile { ref name, .. } if name == "broken"));
    }

    #[test]
    fn captures_every_declared_group() {
        let p = CompiledPattern::compile(&def(
            "connected",
            r"<(?P<timestamp>[^>]+)> Player (?P<player>\w+)(?: on (?P<shard>\S+))?",
        ))
        .unwrap();
        let fields = p.captures("<t1> Player Alice").unwrap();
        assert_eq!(fields.get("timestamp"), Some("t1"));
        assert_eq!(fields.get("player"), Some("Alice"));
        // 참여하지 않은 그룹도 키는 존재
        assert_eq!(fields.get("shard"), Some(""));
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn non_matching_line_returns_none() {
        let p = CompiledPattern::compile(&def("x", r"Player (?P<player>\w+)")).unwrap();
        assert!(p.captures("nothing here").is_none());
    }

    #[test]
    fn exclusion_rejects_prefixed_values() {
        let mut d = def("player_death", r"killed '(?P<victim>[^']+)'");
        d.exclude = vec![FieldExclusion {
            field: "victim".to_owned(),
            prefixes: vec!["NPC_".to_owned(), "PU_".to_owned()],
        }];
        let p = CompiledPattern::compile(&d).unwrap();
        assert!(p.captures("killed 'NPC_Guard'").is_none());
        assert!(p.captures("killed 'PU_Pilot'").is_none());
        assert!(p.captures("killed 'Alice'").is_some());
    }

    #[test]
    fn exclusion_on_unknown_field_is_rejected() {
        let mut d = def("x", r"(?P<a>\w+)");
        d.exclude = vec![FieldExclusion {
            field: "b".to_owned(),
            prefixes: vec!["NPC_".to_owned()],
        }];
        assert!(CompiledPattern::compile(&d).is_err());
    }

    #[test]
    fn default_identity_skips_timestamp() {
        let p = CompiledPattern::compile(&def(
            "actor_stall",
            r"<(?P<timestamp>[^>]+)> stall (?P<player>\w+) (?P<length>\d+)",
        ))
        .unwrap();
        let a = p.captures("<t1> stall Bob 5").unwrap();
        let b = p.captures("<t2> stall Bob 5").unwrap();
        assert_eq!(p.identity_key(&a), "actor_stall:Bob|5");
        assert_eq!(p.identity_key(&a), p.identity_key(&b));
    }

    #[test]
    fn explicit_identity_fields() {
        let mut d = def("x", r"(?P<timestamp>\d+) (?P<player>\w+) (?P<noise>\w+)");
        d.identity_fields = vec!["player".to_owned()];
        let p = CompiledPattern::compile(&d).unwrap();
        let fields = p.captures("1 Bob abc").unwrap();
        assert_eq!(p.identity_key(&fields), "x:Bob");
    }

    #[test]
    fn identity_field_must_be_a_group() {
        let mut d = def("x", r"(?P<player>\w+)");
        d.identity_fields = vec!["ship".to_owned()];
        assert!(CompiledPattern::compile(&d).is_err());
    }
}
