//! FX Tokenizer
//!
//! Splits the declaration section of a shader into words, quoted strings and
//! single-character punctuation. Whitespace, `//` line comments and `/* */`
//! block comments are skipped. Every token knows the line it started on so
//! parse errors can point at the source.

use crate::errors::ParseError;

/// A lexical token borrowed from the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// Identifier, keyword or number.
    Word(&'a str),
    /// Contents of a double-quoted string, without the quotes.
    Str(&'a str),
    Punct(char),
}

impl Token<'_> {
    /// Returns `true` when the token spells `text`, regardless of its kind.
    #[must_use]
    pub fn is(&self, text: &str) -> bool {
        match *self {
            Token::Word(w) | Token::Str(w) => w == text,
            Token::Punct(c) => text.len() == c.len_utf8() && text.starts_with(c),
        }
    }
}

impl std::fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Word(w) => f.write_str(w),
            Token::Str(s) => write!(f, "\"{s}\""),
            Token::Punct(c) => write!(f, "{c}"),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '+')
}

/// Cursor over FX text.
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    source_name: &'a str,
    src: &'a str,
    pos: usize,
    line: u32,
}

impl<'a> Tokenizer<'a> {
    /// `first_line` is the line of `src` within the enclosing file.
    #[must_use]
    pub fn new(source_name: &'a str, src: &'a str, first_line: u32) -> Self {
        Self {
            source_name,
            src,
            pos: 0,
            line: first_line,
        }
    }

    /// Line of the next unread character.
    #[inline]
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Builds a parse error located at the current line.
    pub fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.source_name, self.line, message)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn bump(&mut self, bytes: usize) {
        let consumed = &self.src[self.pos..self.pos + bytes];
        self.line += consumed.matches('\n').count() as u32;
        self.pos += bytes;
    }

    fn skip_trivia(&mut self) {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            if trimmed.len() != rest.len() {
                self.bump(rest.len() - trimmed.len());
                continue;
            }

            if rest.starts_with("//") {
                let len = rest.find('\n').unwrap_or(rest.len());
                self.bump(len);
            } else if rest.starts_with("/*") {
                let len = rest[2..].find("*/").map_or(rest.len(), |end| end + 4);
                self.bump(len);
            } else {
                break;
            }
        }
    }

    /// Returns `true` once only whitespace and comments remain.
    pub fn at_end(&mut self) -> bool {
        self.skip_trivia();
        self.pos >= self.src.len()
    }

    /// Reads the next token.
    pub fn next_token(&mut self) -> Option<Token<'a>> {
        self.skip_trivia();
        let rest = self.rest();
        let c = rest.chars().next()?;

        if c == '"' {
            let body = &rest[1..];
            let len = body.find(['"', '\n']).unwrap_or(body.len());
            let closed = body[len..].starts_with('"');
            self.bump(1 + len + usize::from(closed));
            return Some(Token::Str(&body[..len]));
        }

        if is_word_char(c) {
            let len = rest.find(|ch: char| !is_word_char(ch)).unwrap_or(rest.len());
            self.bump(len);
            return Some(Token::Word(&rest[..len]));
        }

        self.bump(c.len_utf8());
        Some(Token::Punct(c))
    }

    /// Returns the next token without consuming it.
    pub fn peek_token(&self) -> Option<Token<'a>> {
        self.clone().next_token()
    }

    /// Consumes the next token when it spells `expected`.
    pub fn check(&mut self, expected: &str) -> bool {
        if self.peek_token().is_some_and(|tok| tok.is(expected)) {
            self.next_token();
            true
        } else {
            false
        }
    }

    /// Consumes `expected` or fails.
    pub fn expect(&mut self, expected: &str) -> Result<(), ParseError> {
        match self.next_token() {
            Some(tok) if tok.is(expected) => Ok(()),
            Some(tok) => Err(self.error(format!("expected '{expected}', found '{tok}'"))),
            None => Err(self.error(format!("expected '{expected}', found end of section"))),
        }
    }

    /// Reads an identifier.
    pub fn ident(&mut self) -> Result<&'a str, ParseError> {
        match self.next_token() {
            Some(Token::Word(w))
                if w.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
                    && w.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
            {
                Ok(w)
            }
            Some(tok) => Err(self.error(format!("expected identifier, found '{tok}'"))),
            None => Err(self.error("expected identifier, found end of section")),
        }
    }

    /// Reads a quoted string.
    pub fn string(&mut self) -> Result<&'a str, ParseError> {
        match self.next_token() {
            Some(Token::Str(s)) => Ok(s),
            Some(tok) => Err(self.error(format!("expected string, found '{tok}'"))),
            None => Err(self.error("expected string, found end of section")),
        }
    }

    /// Reads an integer literal.
    pub fn int(&mut self) -> Result<i64, ParseError> {
        match self.next_token() {
            Some(Token::Word(w)) => w
                .parse()
                .map_err(|_| self.error(format!("expected integer, found '{w}'"))),
            Some(tok) => Err(self.error(format!("expected integer, found '{tok}'"))),
            None => Err(self.error("expected integer, found end of section")),
        }
    }

    /// Reads a floating-point literal (an optional `f` suffix is accepted).
    pub fn float(&mut self) -> Result<f32, ParseError> {
        match self.next_token() {
            Some(Token::Word(w)) => w
                .trim_end_matches(['f', 'F'])
                .parse()
                .map_err(|_| self.error(format!("expected number, found '{w}'"))),
            Some(tok) => Err(self.error(format!("expected number, found '{tok}'"))),
            None => Err(self.error("expected number, found end of section")),
        }
    }

    /// Reads `true` or `false`.
    pub fn boolean(&mut self) -> Result<bool, ParseError> {
        match self.next_token() {
            Some(Token::Word("true")) => Ok(true),
            Some(Token::Word("false")) => Ok(false),
            Some(tok) => Err(self.error(format!("expected 'true' or 'false', found '{tok}'"))),
            None => Err(self.error("expected boolean, found end of section")),
        }
    }

    /// Skips tokens up to and including the punctuation `close`.
    pub fn skip_past(&mut self, close: char) -> Result<(), ParseError> {
        let start_line = self.line;
        loop {
            match self.next_token() {
                Some(Token::Punct(c)) if c == close => return Ok(()),
                Some(_) => {}
                None => {
                    return Err(ParseError::new(
                        self.source_name,
                        start_line,
                        format!("missing '{close}'"),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token<'_>> {
        let mut tok = Tokenizer::new("test", src, 1);
        std::iter::from_fn(|| tok.next_token()).collect()
    }

    #[test]
    fn test_words_strings_and_punct() {
        assert_eq!(
            tokens(r#"sampler2D albedo = { Texture = "tex/a b.png"; };"#),
            vec![
                Token::Word("sampler2D"),
                Token::Word("albedo"),
                Token::Punct('='),
                Token::Punct('{'),
                Token::Word("Texture"),
                Token::Punct('='),
                Token::Str("tex/a b.png"),
                Token::Punct(';'),
                Token::Punct('}'),
                Token::Punct(';'),
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            tokens("flag A; // trailing\n/* block\n comment */ flag B;"),
            vec![
                Token::Word("flag"),
                Token::Word("A"),
                Token::Punct(';'),
                Token::Word("flag"),
                Token::Word("B"),
                Token::Punct(';'),
            ]
        );
    }

    #[test]
    fn test_line_tracking() {
        let mut tok = Tokenizer::new("test", "a\n\n  b /* x\n */ c", 10);
        tok.next_token();
        assert_eq!(tok.line(), 10);
        tok.next_token();
        assert_eq!(tok.line(), 12);
        tok.next_token();
        assert_eq!(tok.line(), 13);
        assert!(tok.at_end());
    }

    #[test]
    fn test_numbers() {
        let mut tok = Tokenizer::new("test", "-1.5 2.0f 42 x", 1);
        assert!((tok.float().unwrap() + 1.5).abs() < f32::EPSILON);
        assert!((tok.float().unwrap() - 2.0).abs() < f32::EPSILON);
        assert_eq!(tok.int().unwrap(), 42);
        let err = tok.int().unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("expected integer"));
    }

    #[test]
    fn test_check_and_expect() {
        let mut tok = Tokenizer::new("test", "context X { }", 1);
        assert!(!tok.check("flag"));
        assert!(tok.check("context"));
        assert_eq!(tok.ident().unwrap(), "X");
        tok.expect("{").unwrap();
        let err = tok.expect(";").unwrap_err();
        assert!(err.message.contains("found '}'"));
    }

    #[test]
    fn test_skip_past_annotation() {
        let mut tok = Tokenizer::new("test", "< alias = \"x\" > = 1;", 1);
        tok.expect("<").unwrap();
        tok.skip_past('>').unwrap();
        assert!(tok.check("="));

        let mut open = Tokenizer::new("test", "< never closed", 3);
        assert_eq!(open.skip_past('>').unwrap_err().line, 3);
    }
}
