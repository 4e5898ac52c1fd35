//! Line addressing shared by `readF` and `writeT`.
//!
//! A file is a sequence of `\n`-terminated lines; the last one may lack its
//! terminator. Line numbers start at 1.

/// (start, end) of every line, terminator excluded.
fn spans(content: &[u8]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for (i, byte) in content.iter().enumerate() {
        if *byte == b'\n' {
            spans.push((start, i));
            start = i + 1;
        }
    }
    if start < content.len() {
        spans.push((start, content.len()));
    }
    spans
}

pub fn line_count(content: &[u8]) -> usize {
    spans(content).len()
}

pub fn nth_line(content: &[u8], n: usize) -> Option<&[u8]> {
    let (start, end) = *spans(content).get(n.checked_sub(1)?)?;
    Some(&content[start..end])
}

pub fn append_line(content: &[u8], text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + text.len() + 2);
    out.extend_from_slice(content);
    if !content.is_empty() && !content.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(text);
    out.push(b'\n');
    out
}

/// Replaces line `n`, or appends when `n` is one past the last line.
/// `None` when `n` is further out.
pub fn replace_line(content: &[u8], n: usize, text: &[u8]) -> Option<Vec<u8>> {
    let spans = spans(content);
    if n == 0 || n > spans.len() + 1 {
        return None;
    }
    if n == spans.len() + 1 {
        return Some(append_line(content, text));
    }
    let (start, end) = spans[n - 1];
    let mut out = Vec::with_capacity(content.len() - (end - start) + text.len());
    out.extend_from_slice(&content[..start]);
    out.extend_from_slice(text);
    out.extend_from_slice(&content[end..]);
    Some(out)
}

pub fn parse_line_number(arg: &str) -> Result<usize, &'static str> {
    let value: i64 = arg
        .parse()
        .map_err(|_| "Line number must be a valid number, not string.")?;
    if value < 1 {
        return Err("Line number can't be less than 1.");
    }
    Ok(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_ignore_trailing_terminator() {
        assert_eq!(line_count(b""), 0);
        assert_eq!(line_count(b"one"), 1);
        assert_eq!(line_count(b"one\ntwo\n"), 2);
        assert_eq!(line_count(b"one\n\nthree"), 3);
    }

    #[test]
    fn nth_line_strips_terminator() {
        let text = b"alpha\nbeta\ngamma";
        assert_eq!(nth_line(text, 1), Some(&b"alpha"[..]));
        assert_eq!(nth_line(text, 3), Some(&b"gamma"[..]));
        assert_eq!(nth_line(text, 0), None);
        assert_eq!(nth_line(text, 4), None);
    }

    #[test]
    fn replace_then_read_returns_the_text() {
        let text = b"alpha\nbeta\ngamma\n";
        let out = replace_line(text, 2, b"new words here").unwrap();
        assert_eq!(out, b"alpha\nnew words here\ngamma\n");
        assert_eq!(nth_line(&out, 2), Some(&b"new words here"[..]));

        let appended = replace_line(b"alpha", 2, b"beta").unwrap();
        assert_eq!(appended, b"alpha\nbeta\n");
        assert_eq!(replace_line(b"alpha\n", 3, b"x"), None);
        assert_eq!(replace_line(b"", 1, b"first").unwrap(), b"first\n");
    }

    #[test]
    fn line_numbers_must_be_positive_integers() {
        assert_eq!(parse_line_number("12"), Ok(12));
        assert!(parse_line_number("abc").is_err());
        assert_eq!(
            parse_line_number("0"),
            Err("Line number can't be less than 1.")
        );
        assert!(parse_line_number("-4").is_err());
    }
}
