//! 분류기 속성 테스트

use proptest::prelude::*;

use screlay_core::config::default_patterns;
use screlay_core::event::LogLine;
use screlay_log_pipeline::PatternLibrary;

fn library() -> PatternLibrary {
    PatternLibrary::new(&default_patterns()).unwrap()
}

proptest! {
    /// 기본 패턴은 모두 `<`로 둘러싼 태그를 요구하므로 태그 없는 줄은 분류되지 않는다
    #[test]
    fn lines_without_tags_never_classify(line in "[A-Za-z0-9 ,.:'_\\-]{0,200}") {
        let library = library();
        prop_assert!(library.classify(&line).is_none());
        let log_line = LogLine::new(line.clone(), 0, line.len() as u64 + 1);
        prop_assert!(library.build_event(&log_line).is_none());
    }

    /// 선택 그룹이 빠져도 선언된 모든 필드가 이벤트에 존재한다
    #[test]
    fn stall_events_carry_every_declared_field(
        player in "[A-Za-z0-9_\\-]{1,24}",
        stall_type in proptest::option::of("[a-z]{3,12}"),
        length in proptest::option::of(0u32..1000),
    ) {
        let mut line = format!(
            "<2025-05-09T17:25:35.683Z> [Notice] <Actor stall> Actor stall detected, Player: {player}"
        );
        if let Some(t) = &stall_type {
            line.push_str(&format!(", Type: {t}"));
        }
        if let Some(l) = length {
            line.push_str(&format!(", Length: {l}.5"));
        }
        line.push_str(". [Team_CoreGameplayFeatures][Actor][Stall]");

        let library = library();
        let event = library
            .build_event(&LogLine::new(line.clone(), 0, line.len() as u64 + 1))
            .expect("stall line should classify");
        prop_assert_eq!(event.event_type.as_str(), "actor_stall");

        let declared = library.fields_of("actor_stall").unwrap();
        let names: Vec<&str> = event.fields.names().collect();
        prop_assert_eq!(names.len(), declared.len());
        for field in &declared {
            prop_assert!(event.fields.contains(field), "missing field {}", field);
        }
        prop_assert_eq!(event.field("player"), Some(player.as_str()));
        prop_assert_eq!(event.field("stall_type"), Some(stall_type.as_deref().unwrap_or("")));
        prop_assert_eq!(event.identity_key, format!("actor_stall:{player}"));
    }

    /// 분류는 결정적이다
    #[test]
    fn classification_is_deterministic(victim in "[A-Za-z][A-Za-z0-9_]{0,30}") {
        let line = format!(
            "<2025-05-09T18:01:02.000Z> [Notice] <Actor Death> CActor::Kill: '{victim}' [1] in zone 'Daymar' killed by 'Alice' [2] using 'Gun' [Class unknown] with damage type 'Bullet' from direction x: 0, y: 0, z: 0"
        );
        let library = library();
        let first = library.classify(&line).map(|c| c.event_type);
        let second = library.classify(&line).map(|c| c.event_type);
        prop_assert_eq!(&first, &second);
        prop_assert!(first.is_some());
    }
}
