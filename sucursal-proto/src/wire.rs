/// Splits a pipe-delimited command/control string into its fields. Field
/// values are literal text with no escaping (spec invariant: they MUST NOT
/// contain `|`), so splitting on the raw byte is always correct.
pub(crate) fn split_pipe(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut start = 0usize;
    for i in memchr::memchr_iter(b'|', bytes) {
        out.push(&s[start..i]);
        start = i + 1;
    }
    out.push(&s[start..]);
    out
}

/// Splits on the first `sep` only, into (before, after). Used for the
/// `verb-<id>` and `verb-<id>|rest` control message shapes where the
/// remainder may itself contain further pipes.
pub(crate) fn split_once_byte(s: &str, sep: u8) -> Option<(&str, &str)> {
    let i = memchr::memchr(sep, s.as_bytes())?;
    Some((&s[..i], &s[i + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_simple_fields() {
        assert_eq!(
            split_pipe("create_cliente|alice|Alice|Main St 1|4111"),
            vec!["create_cliente", "alice", "Alice", "Main St 1", "4111"]
        );
    }

    #[test]
    fn splits_empty_field() {
        assert_eq!(
            split_pipe("create_cliente|bob|Bob||9999"),
            vec!["create_cliente", "bob", "Bob", "", "9999"]
        );
    }

    #[test]
    fn split_once_byte_keeps_remainder_intact() {
        let (head, rest) = split_once_byte("start_consensus-1|create_cliente|a|b|c|d", b'|').unwrap();
        assert_eq!(head, "start_consensus-1");
        assert_eq!(rest, "create_cliente|a|b|c|d");
    }
}
