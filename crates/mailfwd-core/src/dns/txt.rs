//! TXT value quoting, chunking and reassembly
//!
//! Providers cap a single character-string at 255 bytes. Long values
//! (DKIM keys) are published as several quoted strings in one record value,
//! `"part1" "part2"`, which resolvers concatenate.

/// Quote one string, escaping `"` and `\`
pub fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for ch in text.chars() {
        if ch == '"' || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Smallest chunk that always fits one UTF-8 char
pub const MIN_CHUNK_SIZE: usize = 4;

/// Split `text` into quoted chunks of at most `size` bytes each
///
/// Splits only on char boundaries, so a chunk may be shorter than `size`.
/// Sizes below [`MIN_CHUNK_SIZE`] are raised to it.
pub fn chunk(text: &str, size: usize) -> Vec<String> {
    let size = size.max(MIN_CHUNK_SIZE);
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut end = rest.len().min(size);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(quote(head));
        rest = tail;
    }
    if chunks.is_empty() {
        chunks.push(quote(""));
    }
    chunks
}

/// One record value carrying `text` as space-separated quoted chunks
pub fn encode(text: &str, size: usize) -> String {
    chunk(text, size).join(" ")
}

/// Recover the logical text of a record value
///
/// Accepts `"a" "b"` (concatenated), `"a"` and unquoted text.
pub fn reassemble(value: &str) -> String {
    let trimmed = value.trim();
    if !trimmed.starts_with('"') {
        return trimmed.to_string();
    }

    let mut text = String::with_capacity(trimmed.len());
    let mut in_quotes = false;
    let mut chars = trimmed.chars();
    while let Some(ch) = chars.next() {
        match (in_quotes, ch) {
            (true, '\\') => {
                if let Some(escaped) = chars.next() {
                    text.push(escaped);
                }
            }
            (true, '"') => in_quotes = false,
            (true, other) => text.push(other),
            (false, '"') => in_quotes = true,
            (false, _) => {}
        }
    }
    text
}

/// Logical text of a record stored as several values
pub fn reassemble_all<S: AsRef<str>>(values: &[S]) -> String {
    values.iter().map(|v| reassemble(v.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_value_splits_into_three_chunks() {
        let value = "k".repeat(500);
        let chunks = chunk(&value, 240);

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.starts_with('"') && c.ends_with('"')));
        assert!(chunks.iter().all(|c| c.len() <= 242));

        // Stored as three separate parts
        assert_eq!(reassemble_all(&chunks), value);
        // Stored as one space-joined value
        assert_eq!(reassemble(&encode(&value, 240)), value);
    }

    #[test]
    fn short_value_is_single_chunk() {
        assert_eq!(chunk("v=spf1 ~all", 240), vec!["\"v=spf1 ~all\"".to_string()]);
    }

    #[test]
    fn chunking_respects_char_boundaries() {
        let value = "é".repeat(10);
        let chunks = chunk(&value, 5);
        assert_eq!(reassemble_all(&chunks), value);
    }

    #[test]
    fn reassemble_handles_escapes_and_bare_text() {
        assert_eq!(reassemble(r#""say \"hi\"""#), r#"say "hi""#);
        assert_eq!(reassemble("  plain text "), "plain text");
        assert_eq!(reassemble(r#""a" "b""#), "ab");
    }
}
