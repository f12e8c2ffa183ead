//! Tokenizer for custom indicator source.
//!
//! Newlines are significant as statement separators, except inside `( )` and
//! `[ ]` where expressions may wrap freely. `#` starts a comment running to
//! the end of the line.

use std::fmt;

use crate::domain::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Name(String),

    Import,
    Def,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Return,
    Break,
    Continue,
    And,
    Or,
    Not,
    True,
    False,
    None,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,

    Newline,
    Semicolon,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Number(n) => return write!(f, "number {}", n),
            TokenKind::Str(s) => return write!(f, "string \"{}\"", s),
            TokenKind::Name(n) => return write!(f, "'{}'", n),
            TokenKind::Import => "'import'",
            TokenKind::Def => "'def'",
            TokenKind::If => "'if'",
            TokenKind::Elif => "'elif'",
            TokenKind::Else => "'else'",
            TokenKind::While => "'while'",
            TokenKind::For => "'for'",
            TokenKind::In => "'in'",
            TokenKind::Return => "'return'",
            TokenKind::Break => "'break'",
            TokenKind::Continue => "'continue'",
            TokenKind::And => "'and'",
            TokenKind::Or => "'or'",
            TokenKind::Not => "'not'",
            TokenKind::True => "'true'",
            TokenKind::False => "'false'",
            TokenKind::None => "'none'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Comma => "','",
            TokenKind::Dot => "'.'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::StarStar => "'**'",
            TokenKind::Slash => "'/'",
            TokenKind::Percent => "'%'",
            TokenKind::Assign => "'='",
            TokenKind::EqEq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::Lt => "'<'",
            TokenKind::Le => "'<='",
            TokenKind::Gt => "'>'",
            TokenKind::Ge => "'>='",
            TokenKind::Newline => "newline",
            TokenKind::Semicolon => "';'",
            TokenKind::Eof => "end of input",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character.
    pub position: usize,
}

fn keyword(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "import" => TokenKind::Import,
        "def" => TokenKind::Def,
        "if" => TokenKind::If,
        "elif" => TokenKind::Elif,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "return" => TokenKind::Return,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "true" | "True" => TokenKind::True,
        "false" | "False" => TokenKind::False,
        "none" | "None" => TokenKind::None,
        _ => return None,
    };
    Some(kind)
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    /// Open `(` / `[` count; newlines inside are not separators.
    depth: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
            tokens: Vec::new(),
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.remaining().chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn push(&mut self, kind: TokenKind, position: usize) {
        self.tokens.push(Token { kind, position });
    }

    fn error(&self, message: String, position: usize) -> ParseError {
        ParseError { message, position }
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(ch) = self.peek() {
            let start = self.pos;
            match ch {
                '\n' => {
                    self.advance();
                    if self.depth == 0 {
                        self.push(TokenKind::Newline, start);
                    }
                }
                c if c.is_whitespace() => {
                    self.advance();
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                '"' | '\'' => self.lex_string(ch)?,
                c if c.is_ascii_digit() => self.lex_number()?,
                '.' if self.peek_second().is_some_and(|c| c.is_ascii_digit()) => {
                    self.lex_number()?
                }
                c if c.is_alphabetic() || c == '_' => self.lex_word(),
                _ => self.lex_symbol()?,
            }
        }
        let end = self.input.len();
        self.push(TokenKind::Eof, end);
        Ok(self.tokens)
    }

    fn lex_word(&mut self) {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        let word = &self.input[start..self.pos];
        let kind = keyword(word).unwrap_or_else(|| TokenKind::Name(word.to_string()));
        self.push(kind, start);
    }

    fn lex_number(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let mut has_dot = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else if c == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mark = self.pos;
            self.advance();
            if matches!(self.peek(), Some('+' | '-')) {
                self.advance();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                self.pos = mark;
            }
        }

        let text = &self.input[start..self.pos];
        let value = text
            .parse::<f64>()
            .map_err(|_| self.error(format!("invalid number: {}", text), start))?;
        self.push(TokenKind::Number(value), start);
        Ok(())
    }

    fn lex_string(&mut self, quote: char) -> Result<(), ParseError> {
        let start = self.pos;
        self.advance();
        let mut out = String::new();
        loop {
            match self.advance() {
                None | Some('\n') => {
                    return Err(self.error("unterminated string literal".to_string(), start));
                }
                Some(c) if c == quote => break,
                Some('\\') => {
                    let escaped = match self.advance() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('\\') => '\\',
                        Some('"') => '"',
                        Some('\'') => '\'',
                        Some(other) => {
                            return Err(self.error(
                                format!("unknown escape sequence '\\{}'", other),
                                self.pos - other.len_utf8() - 1,
                            ));
                        }
                        None => {
                            return Err(self.error("unterminated string literal".to_string(), start));
                        }
                    };
                    out.push(escaped);
                }
                Some(c) => out.push(c),
            }
        }
        self.push(TokenKind::Str(out), start);
        Ok(())
    }

    fn lex_symbol(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let pair = match (self.peek(), self.peek_second()) {
            (Some('*'), Some('*')) => Some(TokenKind::StarStar),
            (Some('='), Some('=')) => Some(TokenKind::EqEq),
            (Some('!'), Some('=')) => Some(TokenKind::NotEq),
            (Some('<'), Some('=')) => Some(TokenKind::Le),
            (Some('>'), Some('=')) => Some(TokenKind::Ge),
            _ => None,
        };
        if let Some(kind) = pair {
            self.pos += 2;
            self.push(kind, start);
            return Ok(());
        }

        let kind = match self.peek() {
            Some(c) => {
                let kind = match c {
                    '(' => {
                        self.depth += 1;
                        TokenKind::LParen
                    }
                    ')' => {
                        self.depth = self.depth.saturating_sub(1);
                        TokenKind::RParen
                    }
                    '[' => {
                        self.depth += 1;
                        TokenKind::LBracket
                    }
                    ']' => {
                        self.depth = self.depth.saturating_sub(1);
                        TokenKind::RBracket
                    }
                    '{' => TokenKind::LBrace,
                    '}' => TokenKind::RBrace,
                    ',' => TokenKind::Comma,
                    '.' => TokenKind::Dot,
                    '+' => TokenKind::Plus,
                    '-' => TokenKind::Minus,
                    '*' => TokenKind::Star,
                    '/' => TokenKind::Slash,
                    '%' => TokenKind::Percent,
                    '=' => TokenKind::Assign,
                    '<' => TokenKind::Lt,
                    '>' => TokenKind::Gt,
                    ';' => TokenKind::Semicolon,
                    other => {
                        return Err(self.error(format!("unexpected character '{}'", other), start));
                    }
                };
                self.advance();
                kind
            }
            None => TokenKind::Eof,
        };
        self.push(kind, start);
        Ok(())
    }
}

/// Split source into tokens, ending with a single `Eof`.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(input).run()
}
