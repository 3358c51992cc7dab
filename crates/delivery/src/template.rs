//! 메시지 템플릿
//!
//! `{name}` 자리표시자는 이벤트 필드, 그다음 `event_type`/`username`/`shard`/`version`
//! 순으로 치환됩니다. 알 수 없는 자리표시자는 그대로 남습니다.
//! 템플릿이 없는 이벤트 타입은 `"{event_type}: k=v, k=v"` 형식으로 렌더링됩니다.

use std::collections::BTreeMap;

use screlay_core::event::Event;

use crate::context::ClientSnapshot;

/// 이벤트 타입별 템플릿 집합
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: BTreeMap<String, String>,
}

impl TemplateSet {
    pub fn new(templates: BTreeMap<String, String>) -> Self {
        Self { templates }
    }

    pub fn get(&self, event_type: &str) -> Option<&str> {
        self.templates.get(event_type).map(String::as_str)
    }

    /// 이벤트를 사람이 읽는 한 줄 메시지로 렌더링합니다.
    pub fn render(&self, event: &Event, ctx: &ClientSnapshot) -> String {
        match self.get(&event.event_type) {
            Some(template) => substitute(template, event, ctx),
            None => fallback(event),
        }
    }
}

fn lookup<'a>(name: &str, event: &'a Event, ctx: &'a ClientSnapshot) -> Option<&'a str> {
    if let Some(value) = event.field(name) {
        return Some(value);
    }
    match name {
        "event_type" => Some(&event.event_type),
        "username" => Some(&ctx.username),
        "shard" => Some(&ctx.shard),
        "version" => Some(&ctx.version),
        _ => None,
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn substitute(template: &str, event: &Event, ctx: &ClientSnapshot) -> String {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let name_len = after.find(|c: char| !is_name_char(c)).unwrap_or(after.len());
        let name = &after[..name_len];

        if !name.is_empty()
            && after[name_len..].starts_with('}')
            && let Some(value) = lookup(name, event, ctx)
        {
            out.push_str(value);
            rest = &after[name_len + 1..];
        } else {
            out.push('{');
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

fn fallback(event: &Event) -> String {
    let pairs: Vec<String> = event
        .fields
        .iter()
        .filter(|(k, _)| *k != "timestamp")
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    if pairs.is_empty() {
        event.event_type.clone()
    } else {
        format!("{}: {}", event.event_type, pairs.join(", "))
    }
}
