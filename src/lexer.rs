// File: src/lexer.rs
//
// Hand-written scanner: source text to a flat token stream. Peripheral to
// the bytecode pipeline, but the parser needs tokens to build the trees the
// code generator consumes.

use crate::errors::{ArdanError, ErrorKind, SourceLocation};

const KEYWORDS: &[&str] = &[
    "var", "let", "const", "function", "return", "if", "else", "while", "for", "in", "of", "break",
    "continue", "throw", "try", "catch", "finally", "class", "extends", "public", "protected",
    "private", "static", "new", "this", "super", "true", "false", "null", "undefined", "typeof",
    "void", "delete", "import", "from", "await", "async",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    String(String),
    Identifier(String),
    Keyword(String),
    /// Operators and punctuation, kept as their literal spelling (`"=="`,
    /// `"{"`, `"..."`) — the parser matches on these directly.
    Punct(String),
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn is_punct(&self, s: &str) -> bool {
        matches!(&self.kind, TokenKind::Punct(p) if p == s)
    }

    pub fn is_keyword(&self, s: &str) -> bool {
        matches!(&self.kind, TokenKind::Keyword(k) if k == s)
    }

    pub fn location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column)
    }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Lexer { chars: source.chars().peekable(), line: 1, column: 1 }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn peek_second(&self) -> Option<char> {
        let mut iter = self.chars.clone();
        iter.next();
        iter.next()
    }

    fn make(&self, kind: TokenKind, line: usize, column: usize) -> Token {
        Token { kind, line, column }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_second() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_second() == Some('*') => {
                    self.advance();
                    self.advance();
                    while let Some(c) = self.advance() {
                        if c == '*' && self.peek() == Some('/') {
                            self.advance();
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn read_string(&mut self, quote: char, line: usize, column: usize) -> Result<Token, ArdanError> {
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.advance() {
                Some(c) if c == quote => break,
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('\\') => s.push('\\'),
                    Some(other) => s.push(other),
                    None => return Err(self.error(line, column, "unterminated escape sequence")),
                },
                Some(c) => s.push(c),
                None => return Err(self.error(line, column, "unterminated string literal")),
            }
        }
        Ok(self.make(TokenKind::String(s), line, column))
    }

    fn read_number(&mut self, line: usize, column: usize) -> Token {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' {
                s.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let value = s.parse().unwrap_or(0.0);
        self.make(TokenKind::Number(value), line, column)
    }

    fn read_identifier(&mut self, line: usize, column: usize) -> Token {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                s.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if KEYWORDS.contains(&s.as_str()) {
            self.make(TokenKind::Keyword(s), line, column)
        } else {
            self.make(TokenKind::Identifier(s), line, column)
        }
    }

    fn read_operator(&mut self, line: usize, column: usize) -> Token {
        // Longest-match-first over the three-, two-, then one-character
        // operator tables.
        const THREE: &[&str] = &["===", "!==", ">>>", "..."];
        const TWO: &[&str] = &[
            "==", "!=", "<=", ">=", "&&", "||", "??", "=>", "++", "--", "+=", "-=", "*=", "/=", "%=", "<<", ">>",
        ];
        let mut lookahead = self.chars.clone();
        let c1 = lookahead.next();
        let c2 = lookahead.next();
        let c3 = lookahead.next();
        if let (Some(a), Some(b), Some(c)) = (c1, c2, c3) {
            let candidate: String = [a, b, c].iter().collect();
            if THREE.contains(&candidate.as_str()) {
                self.advance();
                self.advance();
                self.advance();
                return self.make(TokenKind::Punct(candidate), line, column);
            }
        }
        if let (Some(a), Some(b)) = (c1, c2) {
            let candidate: String = [a, b].iter().collect();
            if TWO.contains(&candidate.as_str()) {
                self.advance();
                self.advance();
                return self.make(TokenKind::Punct(candidate), line, column);
            }
        }
        let c = self.advance().unwrap();
        self.make(TokenKind::Punct(c.to_string()), line, column)
    }

    fn error(&self, line: usize, column: usize, message: impl Into<String>) -> ArdanError {
        ArdanError::new(ErrorKind::ParseError, message.into()).with_location(SourceLocation::new(line, column))
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, ArdanError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        lexer.skip_trivia();
        let (line, column) = (lexer.line, lexer.column);
        let Some(c) = lexer.peek() else {
            tokens.push(lexer.make(TokenKind::Eof, line, column));
            break;
        };
        let token = match c {
            '"' | '\'' => lexer.read_string(c, line, column)?,
            '0'..='9' => lexer.read_number(line, column),
            c if c.is_alphabetic() || c == '_' || c == '$' => lexer.read_identifier(line, column),
            '(' | ')' | '{' | '}' | '[' | ']' | ',' | ';' | ':' | '.' => {
                lexer.advance();
                lexer.make(TokenKind::Punct(c.to_string()), line, column)
            }
            _ => lexer.read_operator(line, column),
        };
        tokens.push(token);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_a_let_declaration() {
        let k = kinds("let x = 1;");
        assert_eq!(
            k,
            vec![
                TokenKind::Keyword("let".into()),
                TokenKind::Identifier("x".into()),
                TokenKind::Punct("=".into()),
                TokenKind::Number(1.0),
                TokenKind::Punct(";".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn distinguishes_strict_equality_from_equality() {
        let k = kinds("a === b; a == b;");
        assert!(k.contains(&TokenKind::Punct("===".into())));
        assert!(k.contains(&TokenKind::Punct("==".into())));
    }

    #[test]
    fn skips_line_and_block_comments() {
        let k = kinds("// hi\nlet x = 1; /* block */ let y = 2;");
        assert_eq!(k.iter().filter(|t| matches!(t, TokenKind::Keyword(kw) if kw == "let")).count(), 2);
    }

    #[test]
    fn reads_escaped_string_literals() {
        let k = kinds(r#""a\nb""#);
        assert_eq!(k[0], TokenKind::String("a\nb".to_string()));
    }
}
