//! Chunk key derivation and splitting.

/// Key of the `index`th chunk belonging to `base`.
pub(crate) fn chunk_key(base: &str, index: usize) -> String {
    format!("{base}#{index}")
}

/// Keys `{base}#0` through `{base}#{count - 1}`.
pub(crate) fn chunk_range(base: &str, count: usize) -> Vec<String> {
    (0..count).map(|index| chunk_key(base, index)).collect()
}

/// Split `key` into its base and chunk index if it names a chunk.
pub(crate) fn parse_chunk_key(key: &str) -> Option<(&str, usize)> {
    let (base, index) = key.rsplit_once('#')?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((base, index.parse().ok()?))
}

/// Split `value` into parts of at most `size` bytes without breaking a UTF-8
/// character. A part only exceeds `size` when a single character is wider.
pub(crate) fn split(value: &str, size: usize) -> Vec<&str> {
    let mut parts = Vec::with_capacity(value.len().div_ceil(size.max(1)));
    let mut start = 0;
    while start < value.len() {
        let mut end = (start + size).min(value.len());
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            end = start + value[start..].chars().next().map_or(1, char::len_utf8);
        }
        parts.push(&value[start..end]);
        start = end;
    }
    parts
}
