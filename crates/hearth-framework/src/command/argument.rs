//! Argument values and parsers.
//!
//! An [`ArgumentParser`] consumes a prefix of the remaining command text and
//! reports how much it read. The built-in parsers cover numbers and the three
//! text shapes; anything else implements the trait directly.

use std::fmt;
use std::sync::Arc;

use super::error::ParseFailure;
use super::reader::{QuoteError, get_element, read_float, read_integer, read_quoted};

// ─── ArgumentValue ────────────────────────────────────────────────────────────

/// A parsed argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ArgumentValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ArgumentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

// ─── ArgumentParser ───────────────────────────────────────────────────────────

/// Parses one argument off the front of the remaining text.
///
/// On success returns `(consumed, value)`, where `consumed` is a byte count
/// that ends on a char boundary of `remaining`.
pub trait ArgumentParser: Send + Sync {
    fn parse(&self, remaining: &str) -> Result<(usize, ArgumentValue), ParseFailure>;
}

impl<F> ArgumentParser for F
where
    F: Fn(&str) -> Result<(usize, ArgumentValue), ParseFailure> + Send + Sync,
{
    fn parse(&self, remaining: &str) -> Result<(usize, ArgumentValue), ParseFailure> {
        self(remaining)
    }
}

// ─── Built-in parsers ─────────────────────────────────────────────────────────

/// Inclusive numeric bounds. Unbounded sides are infinite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberRange {
    pub min: f64,
    pub max: f64,
}

impl NumberRange {
    pub const UNBOUNDED: NumberRange = NumberRange {
        min: f64::NEG_INFINITY,
        max: f64::INFINITY,
    };

    fn check(&self, value: f64, read: usize) -> Result<(), ParseFailure> {
        if value < self.min || value > self.max {
            return Err(ParseFailure::out_of_range(
                format!("Value out of range [{}, {}]", self.min, self.max),
                read,
            ));
        }
        Ok(())
    }
}

impl Default for NumberRange {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

/// The parser attached to an argument node.
#[derive(Clone)]
pub(crate) enum Parser {
    Integer(NumberRange),
    Number(NumberRange),
    Float(NumberRange),
    Text,
    QuotableText { allow_empty: bool },
    GreedyText,
    Custom(Arc<dyn ArgumentParser>),
}

impl ArgumentParser for Parser {
    fn parse(&self, remaining: &str) -> Result<(usize, ArgumentValue), ParseFailure> {
        match self {
            Parser::Integer(range) => {
                let (read, value) =
                    read_integer(remaining).map_err(|read| ParseFailure::invalid("Invalid integer", read))?;
                range.check(value as f64, read)?;
                Ok((read, ArgumentValue::Integer(value)))
            }
            Parser::Number(range) => {
                if let Ok((read, value)) = read_integer(remaining) {
                    range.check(value as f64, read)?;
                    return Ok((read, ArgumentValue::Integer(value)));
                }
                let (read, value) =
                    read_float(remaining).map_err(|read| ParseFailure::invalid("Invalid number", read))?;
                range.check(value, read)?;
                Ok((read, ArgumentValue::Float(value)))
            }
            Parser::Float(range) => {
                let (read, value) =
                    read_float(remaining).map_err(|read| ParseFailure::invalid("Invalid float", read))?;
                range.check(value, read)?;
                Ok((read, ArgumentValue::Float(value)))
            }
            Parser::Text => {
                let element = get_element(remaining);
                Ok((element.len(), ArgumentValue::Text(element.to_string())))
            }
            Parser::QuotableText { allow_empty } => {
                if !remaining.starts_with('"') {
                    return Parser::Text.parse(remaining);
                }
                match read_quoted(remaining) {
                    Ok((read, value)) if value.is_empty() && !allow_empty => {
                        Err(ParseFailure::invalid("Empty text is not allowed", read))
                    }
                    Ok((read, value)) => Ok((read, ArgumentValue::Text(value))),
                    Err(QuoteError::IllegalEscape { read }) => {
                        Err(ParseFailure::invalid("Illegal usage of escapes", read))
                    }
                    Err(QuoteError::Unclosed { read }) => {
                        Err(ParseFailure::invalid("Unclosed quoted string", read))
                    }
                }
            }
            Parser::GreedyText => Ok((remaining.len(), ArgumentValue::Text(remaining.to_string()))),
            Parser::Custom(parser) => parser.parse(remaining),
        }
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parser::Integer(range) => f.debug_tuple("Integer").field(range).finish(),
            Parser::Number(range) => f.debug_tuple("Number").field(range).finish(),
            Parser::Float(range) => f.debug_tuple("Float").field(range).finish(),
            Parser::Text => f.write_str("Text"),
            Parser::QuotableText { allow_empty } => f
                .debug_struct("QuotableText")
                .field("allow_empty", allow_empty)
                .finish(),
            Parser::GreedyText => f.write_str("GreedyText"),
            Parser::Custom(_) => f.write_str("Custom"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(min: f64, max: f64) -> NumberRange {
        NumberRange { min, max }
    }

    #[test]
    fn test_numbers() {
        let int = Parser::Integer(range(1.0, 10.0));
        assert_eq!(int.parse("5 rest").unwrap(), (1, ArgumentValue::Integer(5)));
        let err = int.parse("11").unwrap_err();
        assert_eq!(err.message(), "Value out of range [1, 10]");
        assert!(matches!(err, ParseFailure::OutOfRange { read: 2, .. }));
        assert_eq!(int.parse("x").unwrap_err().message(), "Invalid integer");

        let number = Parser::Number(NumberRange::UNBOUNDED);
        assert_eq!(number.parse("3").unwrap().1, ArgumentValue::Integer(3));
        assert_eq!(number.parse("2.5").unwrap().1, ArgumentValue::Float(2.5));
        assert_eq!(number.parse("two").unwrap_err().message(), "Invalid number");

        let float = Parser::Float(range(0.0, f64::INFINITY));
        assert_eq!(float.parse("-1").unwrap_err().message(), "Value out of range [0, inf]");
    }

    #[test]
    fn test_quotable_text() {
        let strict = Parser::QuotableText { allow_empty: false };
        assert_eq!(
            strict.parse(r#""a b" c"#).unwrap(),
            (5, ArgumentValue::Text("a b".into()))
        );
        assert_eq!(strict.parse("plain rest").unwrap().0, 5);
        assert_eq!(strict.parse(r#""""#).unwrap_err().message(), "Empty text is not allowed");
        assert_eq!(strict.parse(r#""x\y""#).unwrap_err().message(), "Illegal usage of escapes");
        assert_eq!(strict.parse(r#""abc"#).unwrap_err().read(), 4);

        let lenient = Parser::QuotableText { allow_empty: true };
        assert_eq!(lenient.parse(r#""""#).unwrap().1, ArgumentValue::Text(String::new()));
    }

    #[test]
    fn test_greedy_and_custom() {
        assert_eq!(
            Parser::GreedyText.parse("all of it").unwrap(),
            (9, ArgumentValue::Text("all of it".into()))
        );

        let yes_no = |remaining: &str| {
            let element = get_element(remaining);
            match element {
                "yes" | "no" => Ok((element.len(), ArgumentValue::Text(element.into()))),
                _ => Err(ParseFailure::invalid("Expected yes or no", element.len())),
            }
        };
        let custom = Parser::Custom(Arc::new(yes_no));
        assert_eq!(custom.parse("yes").unwrap().0, 3);
        assert!(custom.parse("maybe").is_err());
    }
}
