// File: src/lexer.rs
//
// Hand-rolled tokenizer feeding the single-pass compiler (§4.5). A
// char-by-char `Peekable<Chars>` state machine, line tracking, and
// bracket-depth-aware newline significance — the same shape as the
// teacher's `lexer.rs`, generalized to GavelScript's token set.

use std::iter::Peekable;
use std::str::Chars;

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Number(f64),
    Str(String),
    Char(u8),

    Local,
    Global,
    Var,
    If,
    Elseif,
    Else,
    End,
    While,
    Do,
    For,
    In,
    Function,
    Return,
    And,
    Or,
    True,
    False,
    Nil,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    DotDot,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Bang,
    Hash,
    PlusPlus,
    MinusMinus,
    Dot,
    Comma,
    Colon,
    Semicolon,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    Newline,
    Eof,
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

#[derive(Clone)]
pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
    bracket_depth: i32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            chars: source.chars().peekable(),
            line: 1,
            bracket_depth: 0,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_insignificant(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.advance();
                }
                Some('\n') if self.bracket_depth > 0 => {
                    self.advance();
                }
                Some('/') => {
                    // lookahead for a second '/' without consuming a real slash token
                    let mut clone = self.chars.clone();
                    clone.next();
                    if clone.peek() == Some(&'/') {
                        while let Some(c) = self.peek() {
                            if c == '\n' {
                                break;
                            }
                            self.advance();
                        }
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, String> {
        self.skip_insignificant();
        let line = self.line;
        let c = match self.advance() {
            Some(c) => c,
            None => return Ok(Token { kind: TokenKind::Eof, line }),
        };

        let kind = match c {
            '\n' => TokenKind::Newline,
            '+' => {
                if self.matches('+') {
                    TokenKind::PlusPlus
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if self.matches('-') {
                    TokenKind::MinusMinus
                } else {
                    TokenKind::Minus
                }
            }
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '.' => {
                if self.matches('.') {
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            '=' => {
                if self.matches('=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Eq
                }
            }
            '!' => {
                if self.matches('=') {
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.matches('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.matches('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '#' => TokenKind::Hash,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '(' => {
                self.bracket_depth += 1;
                TokenKind::LParen
            }
            ')' => {
                self.bracket_depth -= 1;
                TokenKind::RParen
            }
            '{' => {
                self.bracket_depth += 1;
                TokenKind::LBrace
            }
            '}' => {
                self.bracket_depth -= 1;
                TokenKind::RBrace
            }
            '[' => {
                self.bracket_depth += 1;
                TokenKind::LBracket
            }
            ']' => {
                self.bracket_depth -= 1;
                TokenKind::RBracket
            }
            '"' => TokenKind::Str(self.scan_string('"')?),
            '\'' => TokenKind::Char(self.scan_character()?),
            d if d.is_ascii_digit() => self.scan_number(d)?,
            a if a.is_alphabetic() || a == '_' => self.scan_identifier(a),
            other => return Err(format!("unexpected character '{}' on line {}", other, line)),
        };

        Ok(Token { kind, line })
    }

    fn scan_string(&mut self, quote: char) -> Result<String, String> {
        let mut s = String::new();
        loop {
            match self.advance() {
                None => return Err(format!("unterminated string on line {}", self.line)),
                Some(c) if c == quote => break,
                Some('\\') => s.push(self.scan_escape()?),
                Some(c) => s.push(c),
            }
        }
        Ok(s)
    }

    fn scan_character(&mut self) -> Result<u8, String> {
        let byte = match self.advance() {
            None => return Err(format!("unterminated character literal on line {}", self.line)),
            Some('\\') => self.scan_escape()? as u8,
            Some(c) => c as u8,
        };
        if self.advance() != Some('\'') {
            return Err(format!("character literal must be a single byte, line {}", self.line));
        }
        Ok(byte)
    }

    fn scan_escape(&mut self) -> Result<char, String> {
        match self.advance() {
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('\\') => Ok('\\'),
            Some('"') => Ok('"'),
            Some('\'') => Ok('\''),
            Some(d) if d.is_ascii_digit() => {
                let mut value = d.to_digit(10).unwrap();
                for _ in 0..2 {
                    if let Some(next) = self.peek() {
                        if next.is_ascii_digit() {
                            value = value * 10 + next.to_digit(10).unwrap();
                            self.advance();
                            continue;
                        }
                    }
                    break;
                }
                Ok(value as u8 as char)
            }
            Some(other) => Err(format!("unknown escape '\\{}' on line {}", other, self.line)),
            None => Err(format!("unterminated escape on line {}", self.line)),
        }
    }

    fn scan_number(&mut self, first: char) -> Result<TokenKind, String> {
        let mut text = String::new();
        text.push(first);
        if first == '0' && self.peek() == Some('x') {
            text.push(self.advance().unwrap());
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            let value = i64::from_str_radix(&text[2..], 16)
                .map_err(|_| format!("malformed hex literal '{}' on line {}", text, self.line))?;
            return Ok(TokenKind::Number(value as f64));
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') {
            let mut clone = self.chars.clone();
            clone.next();
            if clone.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                text.push(self.advance().unwrap());
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| format!("malformed number '{}' on line {}", text, self.line))
    }

    fn scan_identifier(&mut self, first: char) -> TokenKind {
        let mut text = String::new();
        text.push(first);
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        match text.as_str() {
            "local" => TokenKind::Local,
            "global" => TokenKind::Global,
            "var" => TokenKind::Var,
            "if" => TokenKind::If,
            "elseif" => TokenKind::Elseif,
            "else" => TokenKind::Else,
            "end" => TokenKind::End,
            "while" => TokenKind::While,
            "do" => TokenKind::Do,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "function" => TokenKind::Function,
            "return" => TokenKind::Return,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nil" => TokenKind::Nil,
            _ => TokenKind::Identifier(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token().unwrap();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn newline_is_significant_outside_brackets() {
        let toks = lex_all("x\ny");
        assert!(toks.contains(&TokenKind::Newline));
    }

    #[test]
    fn newline_is_swallowed_inside_parens() {
        let toks = lex_all("(x\ny)");
        assert!(!toks.contains(&TokenKind::Newline));
    }

    #[test]
    fn hex_and_decimal_numbers() {
        let toks = lex_all("0x1F 31");
        assert_eq!(toks[0], TokenKind::Number(31.0));
        assert_eq!(toks[1], TokenKind::Number(31.0));
    }

    #[test]
    fn string_escapes() {
        let toks = lex_all("\"a\\nb\"");
        assert_eq!(toks[0], TokenKind::Str("a\nb".to_string()));
    }

    #[test]
    fn increment_decrement_operators() {
        let toks = lex_all("x++ y--");
        assert!(toks.contains(&TokenKind::PlusPlus));
        assert!(toks.contains(&TokenKind::MinusMinus));
    }

    #[test]
    fn line_comment_is_skipped() {
        let toks = lex_all("x // trailing comment\ny");
        assert_eq!(
            toks,
            vec![
                TokenKind::Identifier("x".to_string()),
                TokenKind::Newline,
                TokenKind::Identifier("y".to_string()),
                TokenKind::Eof,
            ]
        );
    }
}
