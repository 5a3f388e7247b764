//! Lexer for Micron source, built on `logos` with string interning.
//!
//! [`lex()`] turns a source string into a token vector; malformed input
//! produces LEX diagnostics and the lexer keeps going. [`TokenStream`]
//! wraps the result as the [`TokenSource`] the parser consumes, with
//! arbitrary lookahead and a trailing `Eof`.
//!
//! Keywords are upper case and case sensitive; `(* *)` comments nest;
//! `//` comments run to end of line. Integer literals are decimal or
//! `0x` hex (hex is typed unsigned), reals use `.` and an optional
//! exponent, strings and chars have no escape sequences, `$ 0A 0B $` is
//! a byte-array literal.

mod raw_token;

use logos::Logos;
use mic_diagnostic::{DiagnosticKind, DiagnosticSink};
use mic_ir::{RowCol, Symbols, Token, TokenKind, TokenPayload, TokenSource};
use raw_token::RawToken;

/// Byte-offset to (line, column) mapping.
struct LineIndex {
    starts: Vec<u32>,
}

impl LineIndex {
    fn new(src: &str) -> Self {
        let mut starts = vec![0u32];
        for (i, b) in src.bytes().enumerate() {
            if b == b'\n' {
                starts.push(i as u32 + 1);
            }
        }
        LineIndex { starts }
    }

    fn row_col(&self, offset: u32) -> RowCol {
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        RowCol::new(line as u32 + 1, offset - self.starts[line] + 1)
    }
}

fn decode_bytes(slice: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = slice[1..slice.len() - 1]
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(digits.len() / 2);
    for pair in digits.chunks_exact(2) {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        out.push((hi * 16 + lo) as u8);
    }
    Some(out)
}

/// Lex a whole source file. Errors are reported to `sink`; the returned
/// vector always ends with an `Eof` token.
pub fn lex(source: &str, path: &str, symbols: &Symbols, sink: &mut DiagnosticSink) -> Vec<Token> {
    let index = LineIndex::new(source);
    let mut out = Vec::new();
    let mut lexer = RawToken::lexer(source);

    while let Some(item) = lexer.next() {
        let span = lexer.span();
        let pos = index.row_col(span.start as u32);
        let slice = lexer.slice();
        let raw = match item {
            Ok(raw) => raw,
            Err(()) => {
                let msg = if slice.starts_with("(*") {
                    "unterminated comment".to_string()
                } else if slice.starts_with('"') {
                    "unterminated string literal".to_string()
                } else if slice.starts_with('\'') {
                    "unterminated character literal".to_string()
                } else if slice.starts_with('$') {
                    "unterminated byte-array literal".to_string()
                } else {
                    format!("unexpected character '{}'", slice.escape_default())
                };
                sink.error(DiagnosticKind::Lex, path, pos.line, pos.col, msg);
                out.push(Token::new(TokenKind::Invalid, pos));
                continue;
            }
        };

        let token = match raw {
            RawToken::BlockComment => continue,
            RawToken::Ident => match TokenKind::keyword(slice) {
                Some(kw) => Token::new(kw, pos),
                None => Token {
                    kind: TokenKind::Ident,
                    pos,
                    payload: TokenPayload::Ident(symbols.intern(slice)),
                },
            },
            RawToken::Int => match slice.parse::<u64>() {
                Ok(v) => Token {
                    kind: TokenKind::IntLit,
                    pos,
                    payload: TokenPayload::Int(v),
                },
                Err(_) => {
                    sink.error(
                        DiagnosticKind::Lex,
                        path,
                        pos.line,
                        pos.col,
                        "integer literal out of range",
                    );
                    Token::new(TokenKind::Invalid, pos)
                }
            },
            RawToken::HexInt => match u64::from_str_radix(&slice[2..], 16) {
                Ok(v) => Token {
                    kind: TokenKind::HexLit,
                    pos,
                    payload: TokenPayload::Int(v),
                },
                Err(_) => {
                    sink.error(
                        DiagnosticKind::Lex,
                        path,
                        pos.line,
                        pos.col,
                        "integer literal out of range",
                    );
                    Token::new(TokenKind::Invalid, pos)
                }
            },
            RawToken::Real => match slice.parse::<f64>() {
                Ok(v) => Token {
                    kind: TokenKind::RealLit,
                    pos,
                    payload: TokenPayload::Real(v),
                },
                Err(_) => {
                    sink.error(
                        DiagnosticKind::Lex,
                        path,
                        pos.line,
                        pos.col,
                        "malformed real literal",
                    );
                    Token::new(TokenKind::Invalid, pos)
                }
            },
            RawToken::Str => Token {
                kind: TokenKind::StrLit,
                pos,
                payload: TokenPayload::Str(slice[1..slice.len() - 1].to_string()),
            },
            RawToken::Char => {
                let inner = &slice[1..slice.len() - 1];
                if inner.len() == 1 && inner.is_ascii() {
                    Token {
                        kind: TokenKind::CharLit,
                        pos,
                        payload: TokenPayload::Char(inner.as_bytes()[0]),
                    }
                } else {
                    sink.error(
                        DiagnosticKind::Lex,
                        path,
                        pos.line,
                        pos.col,
                        "character literal must be a single ASCII character",
                    );
                    Token::new(TokenKind::Invalid, pos)
                }
            }
            RawToken::Bytes => match decode_bytes(slice) {
                Some(bytes) => Token {
                    kind: TokenKind::BytesLit,
                    pos,
                    payload: TokenPayload::Bytes(bytes),
                },
                None => {
                    sink.error(
                        DiagnosticKind::Lex,
                        path,
                        pos.line,
                        pos.col,
                        "byte-array literal needs an even number of hex digits",
                    );
                    Token::new(TokenKind::Invalid, pos)
                }
            },
            RawToken::Plus => Token::new(TokenKind::Plus, pos),
            RawToken::Minus => Token::new(TokenKind::Minus, pos),
            RawToken::Star => Token::new(TokenKind::Star, pos),
            RawToken::Slash => Token::new(TokenKind::Slash, pos),
            RawToken::Amp => Token::new(TokenKind::Amp, pos),
            RawToken::Tilde => Token::new(TokenKind::Tilde, pos),
            RawToken::Eq => Token::new(TokenKind::Eq, pos),
            RawToken::Neq => Token::new(TokenKind::Neq, pos),
            RawToken::Lt => Token::new(TokenKind::Lt, pos),
            RawToken::Leq => Token::new(TokenKind::Leq, pos),
            RawToken::Gt => Token::new(TokenKind::Gt, pos),
            RawToken::Geq => Token::new(TokenKind::Geq, pos),
            RawToken::Assign => Token::new(TokenKind::Assign, pos),
            RawToken::Colon => Token::new(TokenKind::Colon, pos),
            RawToken::Semi => Token::new(TokenKind::Semi, pos),
            RawToken::Comma => Token::new(TokenKind::Comma, pos),
            RawToken::Dot => Token::new(TokenKind::Dot, pos),
            RawToken::DotDot => Token::new(TokenKind::DotDot, pos),
            RawToken::LParen => Token::new(TokenKind::LParen, pos),
            RawToken::RParen => Token::new(TokenKind::RParen, pos),
            RawToken::LBrack => Token::new(TokenKind::LBrack, pos),
            RawToken::RBrack => Token::new(TokenKind::RBrack, pos),
            RawToken::LBrace => Token::new(TokenKind::LBrace, pos),
            RawToken::RBrace => Token::new(TokenKind::RBrace, pos),
            RawToken::Caret => Token::new(TokenKind::Caret, pos),
            RawToken::Bar => Token::new(TokenKind::Bar, pos),
        };
        out.push(token);
    }

    let end = index.row_col(source.len() as u32);
    out.push(Token::eof(end));
    out
}

/// Buffered token stream with lookahead.
pub struct TokenStream {
    tokens: Vec<Token>,
    cursor: usize,
    path: String,
}

impl TokenStream {
    /// Lex `source` and wrap the result.
    pub fn from_source(
        source: &str,
        path: impl Into<String>,
        symbols: &Symbols,
        sink: &mut DiagnosticSink,
    ) -> Self {
        let path = path.into();
        let tokens = lex(source, &path, symbols, sink);
        TokenStream {
            tokens,
            cursor: 0,
            path,
        }
    }
}

impl TokenSource for TokenStream {
    fn next(&mut self) -> Token {
        let tok = self.tokens[self.cursor.min(self.tokens.len() - 1)].clone();
        if self.cursor < self.tokens.len() - 1 {
            self.cursor += 1;
        }
        tok
    }

    fn peek(&mut self, k: usize) -> &Token {
        let idx = (self.cursor + k).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(src: &str) -> Vec<Token> {
        let symbols = Symbols::new();
        let mut sink = DiagnosticSink::new();
        let toks = lex(src, "t.mic", &symbols, &mut sink);
        assert!(!sink.has_errors(), "unexpected lex errors: {:?}", sink.take());
        toks
    }

    #[test]
    fn test_keywords_and_idents() {
        let toks = lex_ok("MODULE M; END M.");
        let kinds: Vec<TokenKind> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Module,
                TokenKind::Ident,
                TokenKind::Semi,
                TokenKind::End,
                TokenKind::Ident,
                TokenKind::Dot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_hex_is_distinct_from_decimal() {
        let toks = lex_ok("15 0x0F");
        assert_eq!(toks[0].kind, TokenKind::IntLit);
        assert_eq!(toks[1].kind, TokenKind::HexLit);
        match (&toks[0].payload, &toks[1].payload) {
            (TokenPayload::Int(a), TokenPayload::Int(b)) => assert_eq!(a, b),
            other => panic!("unexpected payloads: {other:?}"),
        }
    }

    #[test]
    fn test_ranges_do_not_eat_dots() {
        let toks = lex_ok("1..5");
        let kinds: Vec<TokenKind> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::IntLit, TokenKind::DotDot, TokenKind::IntLit, TokenKind::Eof]
        );
    }

    #[test]
    fn test_nested_comments() {
        let toks = lex_ok("a (* outer (* inner *) still *) b");
        assert_eq!(toks.len(), 3); // a, b, eof
    }

    #[test]
    fn test_unterminated_comment_reports() {
        let symbols = Symbols::new();
        let mut sink = DiagnosticSink::new();
        lex("a (* no end", "t.mic", &symbols, &mut sink);
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn test_positions_are_one_based() {
        let toks = lex_ok("a\n  b");
        assert_eq!(toks[0].pos, RowCol::new(1, 1));
        assert_eq!(toks[1].pos, RowCol::new(2, 3));
    }

    #[test]
    fn test_byte_array_literal() {
        let toks = lex_ok("$ 0A FF $");
        match &toks[0].payload {
            TokenPayload::Bytes(b) => assert_eq!(b, &vec![0x0A, 0xFF]),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_string_and_char() {
        let toks = lex_ok(r#""hi" 'x'"#);
        assert_eq!(toks[0].kind, TokenKind::StrLit);
        assert_eq!(toks[1].kind, TokenKind::CharLit);
    }
}
