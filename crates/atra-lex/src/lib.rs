//! atra-lex - Lexical analyzer for the Atra language.
//!
//! The lexer turns a source string into a finite token stream ending in
//! an end-of-stream token. It is deliberately total: there is no lexer
//! error type. Malformed input produces degenerate tokens (or is skipped
//! outright) and the parser rejects them with a located syntax error.
//!
//! Rules, in the order they are tried:
//!
//! - `!` starts a comment running to end-of-line; discarded.
//! - Whitespace and `;` are skipped.
//! - Numbers: `digits[.digits][e[+-]digits][_suffix]`, with the leading
//!   `.digits` form also valid. A `.` or exponent sets the float flag.
//!   Recognized suffixes: `_i32 _i64 _f32 _f64`.
//! - Identifiers: `[A-Za-z_][A-Za-z0-9_.]*`. A trailing dot is not
//!   consumed, so a half-typed `name.` in an editor stays parseable.
//!   Identifiers matching the reserved set become keywords; dotted names
//!   (`math.sin`, `Rec.id`, `wasm.div_u`) stay single identifiers.
//! - Two-character operators first (`** := += -= *= /= == <= >= << >>`),
//!   then single-character operators and punctuation.
//! - Anything else is silently skipped.

pub mod cursor;
pub mod reserved;
pub mod token;

pub use reserved::{is_native_builtin, Keyword, ValType, NATIVE_BUILTINS};
pub use token::{is_interp_name, Op, Punct, Token, TokenKind};

use atra_util::Span;
use cursor::Cursor;

/// Two-character operators, recognized before single-character ones.
const TWO_CHAR_OPS: &[(&str, Op)] = &[
    ("**", Op::Pow),
    (":=", Op::Assign),
    ("+=", Op::PlusAssign),
    ("-=", Op::MinusAssign),
    ("*=", Op::StarAssign),
    ("/=", Op::SlashEq),
    ("==", Op::EqEq),
    ("<=", Op::LtEq),
    (">=", Op::GtEq),
    ("<<", Op::Shl),
    (">>", Op::Shr),
];

/// The Atra lexer.
///
/// # Example
///
/// ```
/// use atra_lex::{Lexer, TokenKind};
///
/// let tokens = Lexer::tokenize("x := 1.5");
/// assert_eq!(tokens.len(), 4); // x, :=, 1.5, eof
/// assert!(matches!(tokens.last().unwrap().kind, TokenKind::Eof));
/// ```
pub struct Lexer<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer over `source`.
    pub fn new(source: &'a str) -> Self {
        Self {
            cursor: Cursor::new(source),
        }
    }

    /// Lexes the whole of `source` into a token vector ending in `Eof`.
    pub fn tokenize(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token();
            let done = matches!(token.kind, TokenKind::Eof);
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }

    /// Produces the next token, skipping trivia and unknown characters.
    pub fn next_token(&mut self) -> Token {
        loop {
            self.skip_trivia();

            let start = self.cursor.position();
            let line = self.cursor.line();
            let column = self.cursor.column();
            let span = |cursor: &Cursor| Span::new(start, cursor.position(), line, column);

            if self.cursor.is_at_end() {
                return Token::new(TokenKind::Eof, span(&self.cursor));
            }

            let c = self.cursor.current();

            if c.is_ascii_digit() || (c == '.' && self.cursor.peek(1).is_ascii_digit()) {
                let kind = self.number();
                return Token::new(kind, span(&self.cursor));
            }

            if c.is_ascii_alphabetic() || c == '_' {
                let kind = self.ident_or_keyword();
                return Token::new(kind, span(&self.cursor));
            }

            if let Some(op) = self.two_char_op() {
                return Token::new(TokenKind::Op(op), span(&self.cursor));
            }

            if let Some(kind) = self.single_char() {
                return Token::new(kind, span(&self.cursor));
            }

            // Unknown character: skip it and keep going.
            self.cursor.advance();
        }
    }

    /// Skips whitespace, `;`, and `!`-to-end-of-line comments.
    fn skip_trivia(&mut self) {
        loop {
            let c = self.cursor.current();
            if c.is_whitespace() || c == ';' {
                self.cursor.advance();
            } else if c == '!' {
                while !self.cursor.is_at_end() && self.cursor.current() != '\n' {
                    self.cursor.advance();
                }
            } else {
                return;
            }
        }
    }

    /// Scans a numeric literal. The cursor sits on a digit, or on a `.`
    /// followed by a digit.
    fn number(&mut self) -> TokenKind {
        let start = self.cursor.position();
        let mut is_float = false;

        while self.cursor.current().is_ascii_digit() {
            self.cursor.advance();
        }

        if self.cursor.current() == '.' && self.cursor.peek(1).is_ascii_digit() {
            is_float = true;
            self.cursor.advance();
            while self.cursor.current().is_ascii_digit() {
                self.cursor.advance();
            }
        }

        let c = self.cursor.current();
        if c == 'e' || c == 'E' {
            let next = self.cursor.peek(1);
            let signed_exp =
                (next == '+' || next == '-') && self.cursor.peek(2).is_ascii_digit();
            if next.is_ascii_digit() || signed_exp {
                is_float = true;
                self.cursor.advance();
                if signed_exp {
                    self.cursor.advance();
                }
                while self.cursor.current().is_ascii_digit() {
                    self.cursor.advance();
                }
            }
        }

        let text = self.cursor.slice_from(start).to_string();
        let suffix = self.number_suffix();

        TokenKind::Number {
            text,
            is_float,
            suffix,
        }
    }

    /// Consumes a `_i32|_i64|_f32|_f64` suffix if present.
    fn number_suffix(&mut self) -> Option<ValType> {
        const SUFFIXES: &[(&str, ValType)] = &[
            ("_i32", ValType::I32),
            ("_i64", ValType::I64),
            ("_f32", ValType::F32),
            ("_f64", ValType::F64),
        ];
        for (text, ty) in SUFFIXES {
            if self.cursor.starts_with(text) {
                for _ in 0..text.len() {
                    self.cursor.advance();
                }
                return Some(*ty);
            }
        }
        None
    }

    /// Scans an identifier, reclassifying reserved words. An interior dot
    /// is part of the name only when followed by another name character.
    fn ident_or_keyword(&mut self) -> TokenKind {
        let start = self.cursor.position();
        loop {
            let c = self.cursor.current();
            if c.is_ascii_alphanumeric() || c == '_' {
                self.cursor.advance();
            } else if c == '.' {
                let next = self.cursor.peek(1);
                if next.is_ascii_alphanumeric() || next == '_' {
                    self.cursor.advance();
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        let text = self.cursor.slice_from(start);
        match Keyword::from_str(text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident(text.to_string()),
        }
    }

    fn two_char_op(&mut self) -> Option<Op> {
        for (text, op) in TWO_CHAR_OPS {
            if self.cursor.starts_with(text) {
                self.cursor.advance();
                self.cursor.advance();
                return Some(*op);
            }
        }
        None
    }

    fn single_char(&mut self) -> Option<TokenKind> {
        let kind = match self.cursor.current() {
            '+' => TokenKind::Op(Op::Plus),
            '-' => TokenKind::Op(Op::Minus),
            '*' => TokenKind::Op(Op::Star),
            '/' => TokenKind::Op(Op::Slash),
            '<' => TokenKind::Op(Op::Lt),
            '>' => TokenKind::Op(Op::Gt),
            '=' => TokenKind::Op(Op::Eq),
            '&' => TokenKind::Op(Op::Amp),
            '|' => TokenKind::Op(Op::Pipe),
            '^' => TokenKind::Op(Op::Caret),
            '~' => TokenKind::Op(Op::Tilde),
            '@' => TokenKind::Op(Op::At),
            '(' => TokenKind::Punct(Punct::LParen),
            ')' => TokenKind::Punct(Punct::RParen),
            '[' => TokenKind::Punct(Punct::LBracket),
            ']' => TokenKind::Punct(Punct::RBracket),
            ',' => TokenKind::Punct(Punct::Comma),
            ':' => TokenKind::Punct(Punct::Colon),
            _ => return None,
        };
        self.cursor.advance();
        Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    fn ident(name: &str) -> TokenKind {
        TokenKind::Ident(name.to_string())
    }

    fn number(text: &str, is_float: bool) -> TokenKind {
        TokenKind::Number {
            text: text.to_string(),
            is_float,
            suffix: None,
        }
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
        assert_eq!(kinds("   \n\t ;; "), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_comment_to_end_of_line() {
        assert_eq!(
            kinds("a ! the rest is noise := 1\nb"),
            vec![ident("a"), ident("b"), TokenKind::Eof]
        );
    }

    #[test]
    fn test_keywords_and_idents() {
        assert_eq!(
            kinds("function add begin end"),
            vec![
                TokenKind::Keyword(Keyword::Function),
                ident("add"),
                TokenKind::Keyword(Keyword::Begin),
                TokenKind::Keyword(Keyword::End),
                TokenKind::Eof,
            ]
        );
        // Type names are plain identifiers.
        assert_eq!(kinds("f64"), vec![ident("f64"), TokenKind::Eof]);
    }

    #[test]
    fn test_dotted_identifier() {
        assert_eq!(kinds("math.sin"), vec![ident("math.sin"), TokenKind::Eof]);
        assert_eq!(
            kinds("physics.gravity.g0"),
            vec![ident("physics.gravity.g0"), TokenKind::Eof]
        );
    }

    #[test]
    fn test_trailing_dot_not_consumed() {
        // Mid-typing "name." must stay parseable.
        assert_eq!(kinds("name."), vec![ident("name"), TokenKind::Eof]);
        assert_eq!(kinds("a..b"), vec![ident("a"), ident("b"), TokenKind::Eof]);
    }

    #[test]
    fn test_integer_and_float_literals() {
        assert_eq!(kinds("42"), vec![number("42", false), TokenKind::Eof]);
        assert_eq!(kinds("3.25"), vec![number("3.25", true), TokenKind::Eof]);
        assert_eq!(kinds(".5"), vec![number(".5", true), TokenKind::Eof]);
        assert_eq!(kinds("1e10"), vec![number("1e10", true), TokenKind::Eof]);
        assert_eq!(
            kinds("2.5E-3"),
            vec![number("2.5E-3", true), TokenKind::Eof]
        );
    }

    #[test]
    fn test_exponent_requires_digits() {
        // "2e" is a number followed by the identifier `e`? No: the `e`
        // is not consumed by the number, so it lexes as its own ident.
        assert_eq!(kinds("2e"), vec![number("2", false), ident("e"), TokenKind::Eof]);
    }

    #[test]
    fn test_number_suffixes() {
        assert_eq!(
            kinds("7_i64"),
            vec![
                TokenKind::Number {
                    text: "7".into(),
                    is_float: false,
                    suffix: Some(ValType::I64),
                },
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds("1.5_f32"),
            vec![
                TokenKind::Number {
                    text: "1.5".into(),
                    is_float: true,
                    suffix: Some(ValType::F32),
                },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_two_char_operators() {
        assert_eq!(
            kinds("a := b ** c"),
            vec![
                ident("a"),
                TokenKind::Op(Op::Assign),
                ident("b"),
                TokenKind::Op(Op::Pow),
                ident("c"),
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds("x /= y"),
            vec![ident("x"), TokenKind::Op(Op::SlashEq), ident("y"), TokenKind::Eof]
        );
        assert_eq!(
            kinds("1 << 2 >> 3"),
            vec![
                number("1", false),
                TokenKind::Op(Op::Shl),
                number("2", false),
                TokenKind::Op(Op::Shr),
                number("3", false),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_single_char_operators_and_punct() {
        assert_eq!(
            kinds("@f(x, y[i]): ~z"),
            vec![
                TokenKind::Op(Op::At),
                ident("f"),
                TokenKind::Punct(Punct::LParen),
                ident("x"),
                TokenKind::Punct(Punct::Comma),
                ident("y"),
                TokenKind::Punct(Punct::LBracket),
                ident("i"),
                TokenKind::Punct(Punct::RBracket),
                TokenKind::Punct(Punct::RParen),
                TokenKind::Punct(Punct::Colon),
                TokenKind::Op(Op::Tilde),
                ident("z"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unknown_characters_skipped() {
        // Braces are not part of the language; they vanish.
        assert_eq!(
            kinds("layout Rec { id: i32 }"),
            vec![
                TokenKind::Keyword(Keyword::Layout),
                ident("Rec"),
                ident("id"),
                TokenKind::Punct(Punct::Colon),
                ident("i32"),
                TokenKind::Eof,
            ]
        );
        assert_eq!(kinds("a $ # b"), vec![ident("a"), ident("b"), TokenKind::Eof]);
    }

    #[test]
    fn test_line_column_reporting() {
        let tokens = Lexer::tokenize("a\n  b");
        assert_eq!(tokens[0].line(), 1);
        assert_eq!(tokens[0].column(), 1);
        assert_eq!(tokens[1].line(), 2);
        assert_eq!(tokens[1].column(), 3);
    }

    #[test]
    fn test_interp_marker_flag() {
        let tokens = Lexer::tokenize("__INTERP_3__ other");
        assert!(tokens[0].is_interp_marker());
        assert!(!tokens[1].is_interp_marker());
    }

    #[test]
    fn test_relex_stability() {
        // Concatenating token text with separating whitespace must relex
        // to the same stream.
        let sources = [
            "function add(a, b: f64): f64 begin add := a + b end",
            "for i := 1, n fact := fact * i end for",
            "x := a ** 0.5 + sin(1.5_f32) ! comment",
            "if (b == 0) then g := a else tailcall gcd(b, a mod b) end if",
        ];
        for source in sources {
            let first = Lexer::tokenize(source);
            let text: Vec<String> = first.iter().map(|t| t.kind.text()).collect();
            let rejoined = text.join(" ");
            let second = Lexer::tokenize(&rejoined);
            let first_kinds: Vec<_> = first.into_iter().map(|t| t.kind).collect();
            let second_kinds: Vec<_> = second.into_iter().map(|t| t.kind).collect();
            assert_eq!(first_kinds, second_kinds, "relex mismatch for: {source}");
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn lexing_never_panics(source in "\\PC*") {
                let tokens = Lexer::tokenize(&source);
                prop_assert!(matches!(tokens.last().unwrap().kind, TokenKind::Eof));
            }

            #[test]
            fn ascii_relex_is_stable(source in "[a-z0-9_.+*:=<>() ,]{0,64}") {
                let first = Lexer::tokenize(&source);
                let rejoined = first
                    .iter()
                    .map(|t| t.kind.text())
                    .collect::<Vec<_>>()
                    .join(" ");
                let second = Lexer::tokenize(&rejoined);
                let a: Vec<_> = first.into_iter().map(|t| t.kind).collect();
                let b: Vec<_> = second.into_iter().map(|t| t.kind).collect();
                prop_assert_eq!(a, b);
            }
        }
    }
}
