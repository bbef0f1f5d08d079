//! Path text to [`ElementPath`].
//!
//! ```text
//! path      := prefix segment ("/" segment)*
//! segment   := role ["#" digits] predicate*
//! predicate := "[@" name "=" quoted "]"
//! quoted    := '"' (escape | any char except '"' and '\')* '"'
//! escape    := "\" ( '"' | "\" | "n" | "t" | "r" )
//! ```
//!
//! Parsing is pure: no tree access, no side effects. Errors carry the
//! character offset at which the text stopped making sense.

use crate::errors::SyntaxError;
use crate::segment::{ElementPath, Predicate, Segment, DEFAULT_PREFIX};
use std::num::NonZeroUsize;

/// Parse with the default prefix.
pub fn parse(text: &str) -> Result<ElementPath, SyntaxError> {
    PathParser::default().parse(text)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParser {
    prefix: String,
}

impl Default for PathParser {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl PathParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn parse(&self, text: &str) -> Result<ElementPath, SyntaxError> {
        let Some(rest) = text.strip_prefix(self.prefix.as_str()) else {
            let offset = text
                .chars()
                .zip(self.prefix.chars())
                .take_while(|(a, b)| a == b)
                .count();
            return Err(SyntaxError::new(
                offset,
                format!("path must start with '{}'", self.prefix),
            ));
        };

        let mut cursor = Cursor::new(rest, self.prefix.chars().count());
        let mut segments = Vec::new();

        loop {
            segments.push(cursor.segment()?);
            match cursor.peek() {
                None => break,
                Some('/') => {
                    cursor.bump();
                    if cursor.peek().is_none() {
                        return Err(cursor.error("trailing '/' must be followed by a segment"));
                    }
                }
                Some(c) => {
                    return Err(cursor.error(format!("unexpected character '{c}' after segment")))
                }
            }
        }

        ElementPath::new(self.prefix.clone(), segments)
    }
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
    base: usize,
}

impl Cursor {
    fn new(text: &str, base: usize) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            base,
        }
    }

    fn offset(&self) -> usize {
        self.base + self.pos
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.offset(), message)
    }

    fn segment(&mut self) -> Result<Segment, SyntaxError> {
        let start = self.offset();
        let mut role = String::new();

        while let Some(c) = self.peek() {
            match c {
                '#' | '[' | '/' => break,
                '"' | ']' | '@' | '=' | '\\' => {
                    return Err(self.error(format!("unexpected character '{c}' in role")))
                }
                c if c.is_whitespace() => {
                    return Err(self.error("whitespace is not allowed in a role"))
                }
                _ => {
                    role.push(c);
                    self.pos += 1;
                }
            }
        }

        if role.is_empty() {
            return Err(SyntaxError::new(start, "expected a role"));
        }

        let mut segment = Segment::new(role);
        if self.eat('#') {
            segment.index = Some(self.index()?);
        }
        while self.peek() == Some('[') {
            segment.predicates.push(self.predicate()?);
        }
        Ok(segment)
    }

    fn index(&mut self) -> Result<NonZeroUsize, SyntaxError> {
        let start = self.offset();
        let mut digits = String::new();
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            digits.push(c);
            self.pos += 1;
        }

        if digits.is_empty() {
            return Err(SyntaxError::new(start, "expected digits after '#'"));
        }
        let value: usize = digits
            .parse()
            .map_err(|_| SyntaxError::new(start, format!("index '{digits}' is too large")))?;
        NonZeroUsize::new(value)
            .ok_or_else(|| SyntaxError::new(start, "index must be at least 1 (indices are 1-based)"))
    }

    fn predicate(&mut self) -> Result<Predicate, SyntaxError> {
        let open = self.offset();
        // caller saw '['
        self.pos += 1;
        if !self.eat('@') {
            return Err(self.error("expected '@' after '['"));
        }

        let name_start = self.offset();
        let mut name = String::new();
        while let Some(c) = self.peek() {
            match c {
                '=' => break,
                ']' | '[' | '"' | '/' | '@' | '\\' => {
                    return Err(self.error(format!("unexpected character '{c}' in attribute name")))
                }
                c if c.is_whitespace() => {
                    return Err(self.error("whitespace is not allowed in an attribute name"))
                }
                _ => {
                    name.push(c);
                    self.pos += 1;
                }
            }
        }
        if name.is_empty() {
            return Err(SyntaxError::new(name_start, "expected an attribute name"));
        }
        if !self.eat('=') {
            return Err(self.error("expected '=' after attribute name"));
        }

        let value = self.quoted()?;
        if !self.eat(']') {
            return Err(self.error(format!(
                "expected ']' to close the predicate opened at offset {open}"
            )));
        }
        Ok(Predicate { name, value })
    }

    fn quoted(&mut self) -> Result<String, SyntaxError> {
        let quote = self.offset();
        if !self.eat('"') {
            return Err(self.error("expected '\"' to open the attribute value"));
        }

        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(SyntaxError::new(quote, "unterminated quoted value")),
                Some('"') => return Ok(value),
                Some('\\') => {
                    let escape = self.offset() - 1;
                    match self.bump() {
                        Some('"') => value.push('"'),
                        Some('\\') => value.push('\\'),
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('r') => value.push('\r'),
                        Some(c) => {
                            return Err(SyntaxError::new(
                                escape,
                                format!("unknown escape sequence '\\{c}'"),
                            ))
                        }
                        None => return Err(SyntaxError::new(quote, "unterminated quoted value")),
                    }
                }
                Some(c) => value.push(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> ElementPath {
        parse(text).unwrap_or_else(|e| panic!("failed to parse {text:?}: {e}"))
    }

    #[test]
    fn test_single_segment() {
        let path = p("macos://ui/AXApplication");
        assert_eq!(path.len(), 1);
        assert_eq!(path.first().role, "AXApplication");
        assert_eq!(path.first().index, None);
        assert!(path.first().predicates.is_empty());
    }

    #[test]
    fn test_full_path() {
        let path = p(r#"macos://ui/AXApplication[@bundleIdentifier="com.acme.calc"]/AXWindow/AXButton[@AXDescription="7"]"#);
        let segments = path.segments();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].predicates, vec![Predicate::new("bundleIdentifier", "com.acme.calc")]);
        assert_eq!(segments[1].role, "AXWindow");
        assert_eq!(segments[2].predicates[0].value, "7");
    }

    #[test]
    fn test_index_and_multiple_predicates() {
        let path = p(r#"macos://ui/AXWindow/AXButton#2[@AXDescription="Add"][@AXEnabled="true"]"#);
        let button = path.last();
        assert_eq!(button.index.map(NonZeroUsize::get), Some(2));
        assert_eq!(button.predicates.len(), 2);
        assert_eq!(button.predicates[1], Predicate::new("AXEnabled", "true"));
    }

    #[test]
    fn test_slash_inside_value_is_not_a_separator() {
        let path = p(r#"macos://ui/AXWindow[@AXTitle="a/b/c"]/AXButton"#);
        assert_eq!(path.len(), 2);
        assert_eq!(path.first().predicates[0].value, "a/b/c");
    }

    #[test]
    fn test_brackets_inside_value() {
        let path = p(r#"macos://ui/AXCell[@AXValue="[@x=\"y\"]"]"#);
        assert_eq!(path.first().predicates[0].value, r#"[@x="y"]"#);
    }

    #[test]
    fn test_escape_sequences() {
        let path = p(r#"macos://ui/AXTextArea[@AXValue="a\"b\\c\nd\te\rf"]"#);
        assert_eq!(path.first().predicates[0].value, "a\"b\\c\nd\te\rf");
    }

    #[test]
    fn test_unterminated_quote_reports_opening_quote() {
        let err = parse(r#"macos://ui/Window[@title="Unterminated"#).unwrap_err();
        assert_eq!(err.offset, 25);
        assert!(err.message.contains("unterminated"), "{err}");
    }

    #[test]
    fn test_index_zero_is_rejected() {
        let err = parse("macos://ui/AXWindow/AXButton#0").unwrap_err();
        assert_eq!(err.offset, "macos://ui/AXWindow/AXButton#".len());
        assert!(err.message.contains("at least 1"));
    }

    #[test]
    fn test_index_requires_digits() {
        let err = parse("macos://ui/AXButton#x").unwrap_err();
        assert_eq!(err.offset, "macos://ui/AXButton#".len());
        let err = parse("macos://ui/AXButton#-1").unwrap_err();
        assert_eq!(err.offset, "macos://ui/AXButton#".len());
    }

    #[test]
    fn test_index_overflow() {
        let err = parse("macos://ui/AXButton#99999999999999999999999").unwrap_err();
        assert!(err.message.contains("too large"));
    }

    #[test]
    fn test_wrong_prefix() {
        let err = parse("macos://uix/AXWindow").unwrap_err();
        assert_eq!(err.offset, 10);
        let err = parse("AXWindow").unwrap_err();
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let err = parse("macos://ui/").unwrap_err();
        assert_eq!(err.offset, 11);
        assert!(err.message.contains("expected a role"));
    }

    #[test]
    fn test_empty_segments_are_rejected() {
        let err = parse("macos://ui/AXWindow//AXButton").unwrap_err();
        assert_eq!(err.offset, "macos://ui/AXWindow/".len());

        let err = parse("macos://ui/AXWindow/").unwrap_err();
        assert!(err.message.contains("trailing"));
    }

    #[test]
    fn test_index_after_predicate_is_rejected() {
        let err = parse(r#"macos://ui/AXButton[@AXTitle="OK"]#2"#).unwrap_err();
        assert_eq!(err.offset, r#"macos://ui/AXButton[@AXTitle="OK"]"#.len());
    }

    #[test]
    fn test_unescaped_quote_inside_value() {
        let err = parse(r#"macos://ui/AXButton[@AXTitle="say "hi""]"#).unwrap_err();
        assert_eq!(err.offset, r#"macos://ui/AXButton[@AXTitle="say ""#.len());
        assert!(err.message.contains("']'"));
    }

    #[test]
    fn test_unknown_escape() {
        let err = parse(r#"macos://ui/AXButton[@AXTitle="a\qb"]"#).unwrap_err();
        assert_eq!(err.offset, r#"macos://ui/AXButton[@AXTitle="a"#.len());
    }

    #[test]
    fn test_predicate_shape_errors() {
        let err = parse(r#"macos://ui/AXButton[AXTitle="a"]"#).unwrap_err();
        assert!(err.message.contains("'@'"));

        let err = parse(r#"macos://ui/AXButton[@="a"]"#).unwrap_err();
        assert!(err.message.contains("attribute name"));

        let err = parse(r#"macos://ui/AXButton[@AXTitle]"#).unwrap_err();
        assert!(err.message.contains("unexpected character ']'"));

        let err = parse(r#"macos://ui/AXButton[@AXTitle=a]"#).unwrap_err();
        assert!(err.message.contains("open the attribute value"));

        let err = parse(r#"macos://ui/AXButton[@AXTitle="a""#).unwrap_err();
        assert!(err.message.contains("']'"));
    }

    #[test]
    fn test_whitespace_in_role_is_rejected() {
        let err = parse("macos://ui/AX Window").unwrap_err();
        assert_eq!(err.offset, 13);
    }

    #[test]
    fn test_offsets_count_characters_not_bytes() {
        let err = parse(r#"macos://ui/AXButton[@AXTitle="ü"]x"#).unwrap_err();
        assert_eq!(err.offset, r#"macos://ui/AXButton[@AXTitle="ü"]"#.chars().count());
    }

    #[test]
    fn test_custom_prefix() {
        let parser = PathParser::new("ax://");
        let path = parser.parse("ax://AXWindow/AXButton").unwrap();
        assert_eq!(path.prefix(), "ax://");
        assert_eq!(path.to_string(), "ax://AXWindow/AXButton");
        assert!(parser.parse("macos://ui/AXWindow").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let text = r#"macos://ui/AXApplication[@bundleIdentifier="com.acme.calc"]/AXWindow#2/AXButton[@AXDescription="a\"b\\"][@AXTitle="x/y"]"#;
        assert_eq!(p(text).to_string(), text);
        assert_eq!(text.parse::<ElementPath>().unwrap(), p(text));
    }
}
