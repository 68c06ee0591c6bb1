//! Low-level readers over the remaining command text.
//!
//! Every reader takes the text that is still unparsed and reports how many
//! bytes it consumed. Positions are byte offsets that always fall on a char
//! boundary, so callers can slice the input with them.

/// Separates command elements.
pub const DIVIDER: char = ' ';

/// Strips leading dividers.
pub fn remove_divider_prefix(text: &str) -> &str {
    text.trim_start_matches(DIVIDER)
}

/// The next element: everything up to the first divider.
pub fn get_element(text: &str) -> &str {
    match text.find(DIVIDER) {
        Some(end) => &text[..end],
        None => text,
    }
}

/// Reads an integer element.
///
/// Returns `(consumed, value)`, or the element length when it is not an
/// integer.
pub fn read_integer(text: &str) -> Result<(usize, i64), usize> {
    let element = get_element(text);
    element
        .parse::<i64>()
        .map(|value| (element.len(), value))
        .map_err(|_| element.len())
}

/// Reads a float element. Non-finite spellings such as `nan` are rejected.
pub fn read_float(text: &str) -> Result<(usize, f64), usize> {
    let element = get_element(text);
    match element.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok((element.len(), value)),
        _ => Err(element.len()),
    }
}

/// Failure of [`read_quoted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteError {
    /// A backslash followed by anything but `\` or `"`.
    IllegalEscape { read: usize },
    /// The input ended before the closing quote.
    Unclosed { read: usize },
}

/// Reads a double-quoted string. `text` must start with `"`.
///
/// Only `\\` and `\"` are recognised escapes. On success returns the number
/// of bytes up to and including the closing quote, and the unescaped body.
pub fn read_quoted(text: &str) -> Result<(usize, String), QuoteError> {
    debug_assert!(text.starts_with('"'));
    let mut value = String::new();
    let mut escaped = false;

    for (i, ch) in text.char_indices().skip(1) {
        if escaped {
            if ch != '\\' && ch != '"' {
                return Err(QuoteError::IllegalEscape {
                    read: i + ch.len_utf8(),
                });
            }
            value.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => return Ok((i + 1, value)),
            _ => value.push(ch),
        }
    }

    Err(QuoteError::Unclosed { read: text.len() })
}
