// Axol compiler lexical scanner
//
// Changelog:
//      26-03-01: Initial version
//      26-03-04: Line comments, keyword trie
//      26-03-06: String tokens keep the opening quote in the lexeme, the
//                compiler strips it; the closing quote is never included

pub mod token;

use std::borrow::Cow;

use crate::frontend::scanner::token::{Token, TokenKind};

pub struct Scanner<'src> {
    source: &'src str,
    start: usize,
    current: usize,
    line: usize,
    column: usize,
}

fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Scanner<'src> {
        Scanner {
            source,
            start: 0,
            current: 0,
            line: 1,
            column: 1,
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> u8 {
        let c = self.source.as_bytes()[self.current];
        self.current += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            0
        } else {
            self.source.as_bytes()[self.current]
        }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.source.len() {
            0
        } else {
            self.source.as_bytes()[self.current + 1]
        }
    }

    fn match_char(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.peek() != expected {
            return false;
        }

        self.advance();
        true
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        // string 词素不含收尾引号
        let end = if kind == TokenKind::String {
            self.current - 1
        } else {
            self.current
        };

        Token {
            kind,
            lexeme: Cow::Borrowed(&self.source[self.start..end]),
            line: self.line,
            column: self.column,
        }
    }

    fn error_token(&self, message: String) -> Token<'src> {
        Token {
            kind: TokenKind::Error,
            lexeme: Cow::Owned(message),
            line: self.line,
            column: self.column,
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\n' | b'\t' => {
                    self.advance();
                }
                b'/' => {
                    if self.peek_next() == b'/' {
                        // A comment goes until the end of the line.
                        while self.peek() != b'\n' && !self.is_at_end() {
                            self.advance();
                        }
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn string(&mut self) -> Token<'src> {
        while self.peek() != b'"' && !self.is_at_end() {
            self.advance();
        }

        if self.is_at_end() {
            return self.error_token("Unterminated string".to_string());
        }

        // The closing quote.
        self.advance();
        self.make_token(TokenKind::String)
    }

    fn number(&mut self) -> Token<'src> {
        while is_digit(self.peek()) {
            self.advance();
        }

        if self.peek() == b'.' && is_digit(self.peek_next()) {
            self.advance();
            while is_digit(self.peek()) {
                self.advance();
            }
        }

        self.make_token(TokenKind::Number)
    }

    fn check_keyword(
        &self,
        start: usize,
        remain: &str,
        kind: TokenKind,
    ) -> TokenKind {
        let lexeme = &self.source[self.start..self.current];
        if lexeme.len() == start + remain.len() && &lexeme[start..] == remain {
            return kind;
        }

        TokenKind::Identifier
    }

    fn identifier_kind(&self) -> TokenKind {
        let bytes = &self.source.as_bytes()[self.start..self.current];
        match bytes[0] {
            b'a' => self.check_keyword(1, "nd", TokenKind::And),
            b'c' => self.check_keyword(1, "lass", TokenKind::Class),
            b'e' => self.check_keyword(1, "lse", TokenKind::Else),
            b'f' if bytes.len() > 1 => match bytes[1] {
                b'a' => self.check_keyword(2, "lse", TokenKind::False),
                b'o' => self.check_keyword(2, "r", TokenKind::For),
                b'u' => self.check_keyword(2, "n", TokenKind::Fun),
                _ => TokenKind::Identifier,
            },
            b'i' => self.check_keyword(1, "f", TokenKind::If),
            b'n' => self.check_keyword(1, "il", TokenKind::Nil),
            b'o' => self.check_keyword(1, "r", TokenKind::Or),
            b'p' => self.check_keyword(1, "rint", TokenKind::Print),
            b'r' => self.check_keyword(1, "eturn", TokenKind::Return),
            b's' => self.check_keyword(1, "uper", TokenKind::Super),
            b't' if bytes.len() > 1 => match bytes[1] {
                b'h' => self.check_keyword(2, "is", TokenKind::This),
                b'r' => self.check_keyword(2, "ue", TokenKind::True),
                _ => TokenKind::Identifier,
            },
            b'v' => self.check_keyword(1, "ar", TokenKind::Var),
            b'w' => self.check_keyword(1, "hile", TokenKind::While),
            _ => TokenKind::Identifier,
        }
    }

    fn identifier(&mut self) -> Token<'src> {
        while is_alpha(self.peek()) || is_digit(self.peek()) {
            self.advance();
        }

        self.make_token(self.identifier_kind())
    }

    pub fn scan_token(&mut self) -> Token<'src> {
        self.skip_whitespace();
        self.start = self.current;
        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();
        if is_alpha(c) {
            return self.identifier();
        }
        if is_digit(c) {
            return self.number();
        }

        match c {
            b'(' => self.make_token(TokenKind::LeftParen),
            b')' => self.make_token(TokenKind::RightParen),
            b'{' => self.make_token(TokenKind::LeftBrace),
            b'}' => self.make_token(TokenKind::RightBrace),
            b';' => self.make_token(TokenKind::Semicolon),
            b',' => self.make_token(TokenKind::Comma),
            b'.' => self.make_token(TokenKind::Dot),
            b'-' => self.make_token(TokenKind::Minus),
            b'+' => self.make_token(TokenKind::Plus),
            b'/' => self.make_token(TokenKind::Slash),
            b'*' => self.make_token(TokenKind::Star),
            b'!' => {
                let kind = if self.match_char(b'=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.make_token(kind)
            }
            b'=' => {
                let kind = if self.match_char(b'=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.make_token(kind)
            }
            b'<' => {
                let kind = if self.match_char(b'=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.make_token(kind)
            }
            b'>' => {
                let kind = if self.match_char(b'=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.make_token(kind)
            }
            b'"' => self.string(),
            _ => self.error_token(format!("Unexpected character {}", c as char)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut out = Vec::new();
        loop {
            let token = scanner.scan_token();
            let kind = token.kind;
            out.push(kind);
            if kind == TokenKind::Eof {
                return out;
            }
        }
    }

    #[test]
    fn punctuation_and_operators() {
        assert_eq!(
            kinds("( ) { } , . ; - + / * ! != = == < <= > >="),
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Semicolon,
                TokenKind::Minus,
                TokenKind::Plus,
                TokenKind::Slash,
                TokenKind::Star,
                TokenKind::Bang,
                TokenKind::BangEqual,
                TokenKind::Equal,
                TokenKind::EqualEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_versus_identifiers() {
        assert_eq!(
            kinds("and class fun classy fund variable var"),
            vec![
                TokenKind::And,
                TokenKind::Class,
                TokenKind::Fun,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Var,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_lexeme_excludes_closing_quote() {
        let mut scanner = Scanner::new("\"hello\"");
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::String);
        // 开引号保留，收尾引号剔除，由编译器去掉开头那一个
        assert_eq!(token.lexeme.as_ref(), "\"hello");
    }

    #[test]
    fn number_with_fraction() {
        let mut scanner = Scanner::new("3.25 7");
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Number);
        assert_eq!(token.lexeme.as_ref(), "3.25");
        assert_eq!(scanner.scan_token().lexeme.as_ref(), "7");
    }

    #[test]
    fn comments_and_lines() {
        let mut scanner = Scanner::new("// skip me\nvar");
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Var);
        assert_eq!(token.line, 2);
    }

    #[test]
    fn unterminated_string_is_error_token() {
        let mut scanner = Scanner::new("\"oops");
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.lexeme.as_ref(), "Unterminated string");
    }

    #[test]
    fn unknown_character_is_error_token() {
        let mut scanner = Scanner::new("@");
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Error);
        assert!(token.lexeme.contains('@'));
    }

    #[test]
    fn eof_is_idempotent() {
        let mut scanner = Scanner::new("");
        assert_eq!(scanner.scan_token().kind, TokenKind::Eof);
        assert_eq!(scanner.scan_token().kind, TokenKind::Eof);
        assert_eq!(scanner.scan_token().kind, TokenKind::Eof);
    }
}
