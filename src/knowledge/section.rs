//! Markdown section editing.
//!
//! A "section" is a markdown heading line; its body runs until the next
//! heading of the same or higher level. A `None` section addresses the whole
//! file. Matching is substring-based so callers can pass either the bare
//! title or the full heading line.

/// How an update mutates the addressed section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionOperation {
    /// Insert text at the end of the section, creating it if absent.
    #[default]
    Append,
    /// Replace the entire section body, keeping the heading.
    Replace,
    /// Place text immediately after the section heading.
    Insert,
}

/// Heading level of a section reference ("## Notes" → 2). Zero when the
/// reference carries no hashes.
fn heading_level(section: &str) -> usize {
    section
        .trim_start()
        .chars()
        .take_while(|c| *c == '#')
        .count()
}

/// Line index of the section heading, if present.
fn find_heading(lines: &[&str], section: &str) -> Option<usize> {
    let needle = section.trim();
    lines.iter().position(|line| line.contains(needle))
}

/// Exclusive end index of the section starting at `start`.
fn section_end(lines: &[&str], start: usize, level: usize) -> usize {
    let level = if level == 0 { 1 } else { level };
    for (offset, line) in lines.iter().enumerate().skip(start + 1) {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            let current = trimmed.chars().take_while(|c| *c == '#').count();
            if current <= level {
                return offset;
            }
        }
    }
    lines.len()
}

/// Render a heading for a section reference that lacks hashes.
fn as_heading(section: &str) -> String {
    if section.trim_start().starts_with('#') {
        section.trim().to_string()
    } else {
        format!("## {}", section.trim())
    }
}

/// Insert `text` at the end of the named section, creating the section at
/// the end of the file when absent. `None` appends to the file.
pub fn append_to_section(content: &str, section: Option<&str>, text: &str) -> String {
    let section = match section {
        Some(s) if !s.trim().is_empty() => s,
        _ => {
            return format!("{}\n\n{}\n", content.trim_end(), text);
        }
    };

    let lines: Vec<&str> = content.lines().collect();
    match find_heading(&lines, section) {
        Some(start) => {
            let end = section_end(&lines, start, heading_level(section));
            let mut out: Vec<String> = lines[..end].iter().map(|l| l.to_string()).collect();
            while out.last().is_some_and(|l| l.trim().is_empty()) {
                out.pop();
            }
            out.push(String::new());
            out.push(text.to_string());
            for line in &lines[end..] {
                out.push(line.to_string());
            }
            ensure_trailing_newline(out.join("\n"))
        }
        None => format!(
            "{}\n\n{}\n\n{}\n",
            content.trim_end(),
            as_heading(section),
            text
        ),
    }
}

/// Replace the body of the named section, keeping its heading. `None`
/// replaces the whole file. An absent section is created at the end.
pub fn replace_section(content: &str, section: Option<&str>, text: &str) -> String {
    let section = match section {
        Some(s) if !s.trim().is_empty() => s,
        _ => return ensure_trailing_newline(text.to_string()),
    };

    let lines: Vec<&str> = content.lines().collect();
    match find_heading(&lines, section) {
        Some(start) => {
            let end = section_end(&lines, start, heading_level(section));
            let mut out: Vec<String> =
                lines[..=start].iter().map(|l| l.to_string()).collect();
            out.push(String::new());
            out.push(text.to_string());
            if end < lines.len() {
                out.push(String::new());
                for line in &lines[end..] {
                    out.push(line.to_string());
                }
            }
            ensure_trailing_newline(out.join("\n"))
        }
        None => format!(
            "{}\n\n{}\n\n{}\n",
            content.trim_end(),
            as_heading(section),
            text
        ),
    }
}

/// Place `text` immediately after the named section heading. An absent
/// section (or `None`) prepends at the top of the file.
pub fn insert_after_section(content: &str, section: Option<&str>, text: &str) -> String {
    if let Some(section) = section.filter(|s| !s.trim().is_empty()) {
        let lines: Vec<&str> = content.lines().collect();
        if let Some(start) = find_heading(&lines, section) {
            let mut out: Vec<String> =
                lines[..=start].iter().map(|l| l.to_string()).collect();
            out.push(String::new());
            out.push(text.to_string());
            for line in &lines[start + 1..] {
                out.push(line.to_string());
            }
            return ensure_trailing_newline(out.join("\n"));
        }
    }
    format!("{}\n\n{}", text, content.trim_start())
}

fn ensure_trailing_newline(mut s: String) -> String {
    if !s.ends_with('\n') {
        s.push('\n');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Title\n\nIntro text.\n\n## Findings\n\n- first finding\n\n## Notes\n\nSome notes.\n";

    #[test]
    fn append_lands_at_section_end() {
        let updated = append_to_section(DOC, Some("## Findings"), "- second finding");
        let findings_at = updated.find("- second finding").unwrap();
        let notes_at = updated.find("## Notes").unwrap();
        assert!(findings_at < notes_at);
        assert!(updated.contains("- first finding"));
    }

    #[test]
    fn append_creates_missing_section() {
        let updated = append_to_section(DOC, Some("## Risks"), "- a new risk");
        assert!(updated.contains("## Risks"));
        assert!(updated.ends_with("- a new risk\n"));
    }

    #[test]
    fn append_without_section_appends_to_file() {
        let updated = append_to_section(DOC, None, "Trailing note.");
        assert!(updated.ends_with("Trailing note.\n"));
    }

    #[test]
    fn replace_keeps_heading_and_swaps_body() {
        let updated = replace_section(DOC, Some("## Findings"), "- rewritten");
        assert!(updated.contains("## Findings"));
        assert!(updated.contains("- rewritten"));
        assert!(!updated.contains("- first finding"));
        assert!(updated.contains("## Notes"));
        assert!(updated.contains("Some notes."));
    }

    #[test]
    fn replace_is_idempotent() {
        let once = replace_section(DOC, Some("## Findings"), "- stable body");
        let twice = replace_section(&once, Some("## Findings"), "- stable body");
        assert_eq!(once, twice);
    }

    #[test]
    fn replace_without_section_replaces_whole_file() {
        let updated = replace_section(DOC, None, "entirely new content");
        assert_eq!(updated, "entirely new content\n");
    }

    #[test]
    fn insert_goes_right_after_heading() {
        let updated = insert_after_section(DOC, Some("## Notes"), "Inserted line.");
        let heading_at = updated.find("## Notes").unwrap();
        let inserted_at = updated.find("Inserted line.").unwrap();
        let body_at = updated.find("Some notes.").unwrap();
        assert!(heading_at < inserted_at && inserted_at < body_at);
    }

    #[test]
    fn insert_with_missing_section_prepends() {
        let updated = insert_after_section(DOC, Some("## Ghost"), "Front matter.");
        assert!(updated.starts_with("Front matter."));
    }
}
