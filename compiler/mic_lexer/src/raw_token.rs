//! Logos-derived raw tokenizer.
//!
//! Raw tokens carry no payload; the conversion layer in `lib.rs` decodes
//! slices, interns identifiers and attaches positions. `(* ... *)`
//! comments nest; the callback consumes the whole comment and skips it,
//! or fails at depth > 0 on end of input so the error surfaces as an
//! unterminated-comment diagnostic.

use logos::{FilterResult, Lexer, Logos};

fn block_comment(lex: &mut Lexer<RawToken>) -> FilterResult<(), ()> {
    let rest = lex.remainder();
    let mut depth = 1usize;
    let mut i = 0usize;
    let bytes = rest.as_bytes();
    while i < bytes.len() {
        if bytes[i] == b'(' && i + 1 < bytes.len() && bytes[i + 1] == b'*' {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'*' && i + 1 < bytes.len() && bytes[i + 1] == b')' {
            depth -= 1;
            i += 2;
            if depth == 0 {
                lex.bump(i);
                return FilterResult::Skip;
            }
        } else {
            i += 1;
        }
    }
    lex.bump(i);
    FilterResult::Error(())
}

#[derive(Logos, Copy, Clone, Debug, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
pub enum RawToken {
    #[token("(*", block_comment)]
    BlockComment,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
    #[regex(r"0[xX][0-9a-fA-F]+")]
    HexInt,
    #[regex(r"[0-9]+")]
    Int,
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?")]
    Real,
    #[regex(r#""[^"\n]*""#)]
    Str,
    #[regex(r"'[^'\n]*'")]
    Char,
    #[regex(r"\$[0-9a-fA-F \t\r\n]*\$")]
    Bytes,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("&")]
    Amp,
    #[token("~")]
    Tilde,
    #[token("=")]
    Eq,
    #[token("#")]
    Neq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Leq,
    #[token(">")]
    Gt,
    #[token(">=")]
    Geq,
    #[token(":=")]
    Assign,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("..")]
    DotDot,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBrack,
    #[token("]")]
    RBrack,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("^")]
    Caret,
    #[token("|")]
    Bar,
}
