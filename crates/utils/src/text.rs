use uuid::Uuid;

/// First 8 hex chars of a UUID, used in log lines and staging dir names.
pub fn short_uuid(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Canonical artifact/collection name: trimmed, lowercased, spaces and
/// separators collapsed to single hyphens.
pub fn canonical_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = true;
    for ch in raw.trim().chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('-');
            last_was_sep = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Truncate to at most `max` chars on a char boundary, appending an ellipsis
/// marker when anything was cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{truncated}\u{2026}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_name_collapses_separators() {
        assert_eq!(canonical_name("  My  Cool_Skill! "), "my-cool-skill");
        assert_eq!(canonical_name("deploy"), "deploy");
        assert_eq!(canonical_name("a--b"), "a-b");
    }

    #[test]
    fn short_uuid_is_eight_chars() {
        let id = Uuid::new_v4();
        assert_eq!(short_uuid(&id).len(), 8);
    }

    #[test]
    fn truncate_preserves_short_strings() {
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abcdef", 4).chars().count(), 4);
    }
}
