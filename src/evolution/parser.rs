//! Parsing evolution crew output into typed changes.
//!
//! The crew is asked for `{"changes": [...]}` but replies arrive as free
//! text: fenced code blocks, surrounding prose, sometimes several JSON
//! objects. The parser scans for balanced objects, takes the first one
//! carrying a `changes` array (or a bare top-level array of typed entries),
//! and validates each entry individually so one malformed change never
//! discards the rest.

use serde_json::Value;

use crate::evolution::Change;

/// Parse result: the valid changes plus a count of rejected entries.
#[derive(Debug, Default)]
pub struct ParsedChanges {
    pub changes: Vec<Change>,
    pub malformed: usize,
}

#[derive(Debug, Default)]
pub struct ImprovementParser;

impl ImprovementParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw: &str) -> ParsedChanges {
        let mut parsed = ParsedChanges::default();

        for candidate in balanced_json_objects(raw) {
            let Ok(value) = serde_json::from_str::<Value>(candidate) else {
                continue;
            };
            if let Some(entries) = value.get("changes").and_then(|c| c.as_array()) {
                self.collect(entries, &mut parsed);
                break;
            }
        }

        // Fallback: the whole reply may be a bare array of change entries.
        if parsed.changes.is_empty() && parsed.malformed == 0 {
            if let Ok(Value::Array(entries)) = serde_json::from_str::<Value>(strip_fences(raw)) {
                self.collect(&entries, &mut parsed);
            }
        }

        log::info!(
            "parsed evolution output: {} changes, {} malformed entries",
            parsed.changes.len(),
            parsed.malformed
        );
        parsed
    }

    fn collect(&self, entries: &[Value], parsed: &mut ParsedChanges) {
        for entry in entries {
            match Change::from_value(entry) {
                Ok(change) => parsed.changes.push(change),
                Err(error) => {
                    log::warn!("skipping malformed change entry: {}", error);
                    parsed.malformed += 1;
                }
            }
        }
    }
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
    }
    trimmed
}

/// Every balanced top-level `{...}` substring, string-literal aware.
fn balanced_json_objects(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        objects.push(&text[start..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    objects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::Change;

    #[test]
    fn parses_fenced_changes_payload() {
        let raw = r#"Based on the trace, I recommend the following.

```json
{"changes": [
  {"type": "add_knowledge", "category": "agents", "file": "knowledge/agents/x.md",
   "title": "X guidance on Y", "content": "Start topic Y from the glossary.",
   "tags": ["x", "y"], "reason": "gap"},
  {"type": "update_agent_parameter", "agent": "research", "parameter": "max_iter",
   "value": 50, "reason": "cap reached"}
]}
```

Let me know if you need more detail."#;
        let parsed = ImprovementParser::new().parse(raw);
        assert_eq!(parsed.changes.len(), 2);
        assert_eq!(parsed.malformed, 0);
        assert!(matches!(parsed.changes[0], Change::AddKnowledge(_)));
        assert!(matches!(parsed.changes[1], Change::Proposed(_)));
    }

    #[test]
    fn malformed_entries_do_not_discard_the_rest() {
        let raw = r#"{"changes": [
          {"type": "add_knowledge", "file": "a.md", "title": "A", "content": ""},
          {"no_type_at_all": true},
          {"type": "update_knowledge", "file": "b.md", "content": "valid body",
           "operation": "append", "reason": "r"}
        ]}"#;
        let parsed = ImprovementParser::new().parse(raw);
        assert_eq!(parsed.changes.len(), 1);
        assert_eq!(parsed.malformed, 2);
    }

    #[test]
    fn accepts_bare_array_output() {
        let raw = r#"[{"type": "add_knowledge", "file": "notes.md", "title": "N",
                       "content": "A useful observation.", "reason": "r"}]"#;
        let parsed = ImprovementParser::new().parse(raw);
        assert_eq!(parsed.changes.len(), 1);
    }

    #[test]
    fn prose_without_json_yields_nothing() {
        let parsed = ImprovementParser::new().parse("Everything looks great, no changes.");
        assert!(parsed.changes.is_empty());
        assert_eq!(parsed.malformed, 0);
    }

    #[test]
    fn braces_inside_strings_do_not_break_scanning() {
        let raw = r#"{"changes": [{"type": "add_knowledge", "file": "c.md", "title": "C",
                      "content": "Use {braces} carefully in templates.", "reason": "r"}]}"#;
        let parsed = ImprovementParser::new().parse(raw);
        assert_eq!(parsed.changes.len(), 1);
    }
}
