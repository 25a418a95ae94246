//! tinycalc-lexer — analyse lexicale des expressions TinyCalc
//!
//! - Nombres décimaux `DIGITS ('.' DIGITS)?` (le texte est conservé tel quel)
//! - Opérateurs `+ - * /`, parenthèses, espaces ignorés
//! - `Span`/`Spanned`/`SourceId` + **LineMap** pour `(ligne, colonne)`
//! - Arrêt à la première erreur (`LexError`)
//!
//! Exemple éclair :
//! ```
//! use tinycalc_core::SourceId;
//! use tinycalc_lexer::{Lexer, TokenKind};
//!
//! let toks = Lexer::new("1 + (2.5*3)", SourceId(0)).tokenize().unwrap();
//! assert_eq!(toks[0].value, TokenKind::Number("1"));
//! assert_eq!(toks.last().unwrap().value, TokenKind::Eof);
//! ```

#![deny(missing_docs)]

use std::fmt;

use tinycalc_core::{Pos, SourceId, Span, Spanned};

/* ─────────────────────────── LineMap ─────────────────────────── */

/// Table des lignes pour (byte offset) → (ligne, colonne).
#[derive(Debug, Clone)]
pub struct LineMap {
    /// Offsets des débuts de lignes (toujours contient 0).
    pub line_starts: Vec<u32>,
}

impl LineMap {
    /// Construit la table à partir d’un `&str`.
    pub fn new(src: &str) -> Self {
        let mut ls = vec![0];
        for (i, b) in src.bytes().enumerate() {
            if b == b'\n' {
                ls.push((i as u32) + 1);
            }
        }
        Self { line_starts: ls }
    }

    /// Convertit un `Pos` en (ligne, colonne), 1-based.
    pub fn line_col(&self, pos: Pos) -> (u32, u32) {
        let off = pos.0;
        let idx = match self.line_starts.binary_search(&off) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts[idx];
        ((idx as u32) + 1, off.saturating_sub(line_start) + 1)
    }
}

/* ─────────────────────────── Tokens ─────────────────────────── */

/// Genre de jeton lexical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind<'a> {
    /// Fin de source.
    Eof,
    /// Littéral décimal, texte brut (`12`, `3.25`).
    Number(&'a str),
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `(`
    LParen,
    /// `)`
    RParen,
}

impl fmt::Display for TokenKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eof => f.write_str("end of input"),
            Self::Number(n) => write!(f, "number `{n}`"),
            Self::Plus => f.write_str("`+`"),
            Self::Minus => f.write_str("`-`"),
            Self::Star => f.write_str("`*`"),
            Self::Slash => f.write_str("`/`"),
            Self::LParen => f.write_str("`(`"),
            Self::RParen => f.write_str("`)`"),
        }
    }
}

/// Jeton avec span.
pub type Token<'a> = Spanned<TokenKind<'a>>;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Genre d’erreur lexicale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexErrorKind {
    /// Caractère hors de l’alphabet.
    UnexpectedChar(char),
    /// `.` sans chiffre après (ex. `1.`).
    MissingFraction,
}

/// Erreur lexicale avec localisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    /// Localisation.
    pub span: Span,
    /// Genre d’erreur.
    pub kind: LexErrorKind,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LexErrorKind::UnexpectedChar(c) => write!(f, "unexpected character {c:?} at offset {}", self.span.start.0),
            LexErrorKind::MissingFraction => {
                write!(f, "expected digits after '.' at offset {}", self.span.end.0)
            }
        }
    }
}

impl std::error::Error for LexError {}

/* ─────────────────────────── Lexer ─────────────────────────── */

/// Analyseur lexical (itératif).
pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    /// Position courante en bytes.
    off: usize,
    /// Id de la source.
    source: SourceId,
    /// Table des lignes (exposée pour diagnostics).
    pub lines: LineMap,
}

impl<'a> Lexer<'a> {
    /// Crée un lexer.
    pub fn new(src: &'a str, source: SourceId) -> Self {
        Self { src, bytes: src.as_bytes(), off: 0, source, lines: LineMap::new(src) }
    }

    /// Prochain jeton ; `Eof` est émis à chaque appel une fois la source épuisée.
    pub fn next(&mut self) -> Result<Token<'a>, LexError> {
        self.consume_while(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'));
        let start = self.off;
        let Some(b) = self.bump() else {
            return Ok(Spanned::new(TokenKind::Eof, self.span_from(start)));
        };

        let kind = match b {
            b'0'..=b'9' => self.lex_number(start)?,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            _ => {
                // rembobine pour décoder le scalaire UTF-8 complet
                self.off = start;
                let c = self.src[start..].chars().next().unwrap_or(char::REPLACEMENT_CHARACTER);
                self.off += c.len_utf8();
                return Err(self.err_from(start, LexErrorKind::UnexpectedChar(c)));
            }
        };

        Ok(Spanned::new(kind, self.span_from(start)))
    }

    /// Tokenise toute la source (ajoute `Eof` final).
    pub fn tokenize(mut self) -> Result<Vec<Token<'a>>, LexError> {
        let mut out = Vec::new();
        loop {
            let t = self.next()?;
            let is_eof = t.value == TokenKind::Eof;
            out.push(t);
            if is_eof {
                return Ok(out);
            }
        }
    }

    fn lex_number(&mut self, start: usize) -> Result<TokenKind<'a>, LexError> {
        self.consume_while(|b| b.is_ascii_digit());
        if self.peek() == Some(b'.') {
            self.off += 1;
            let frac = self.off;
            self.consume_while(|b| b.is_ascii_digit());
            if self.off == frac {
                return Err(self.err_from(start, LexErrorKind::MissingFraction));
            }
        }
        Ok(TokenKind::Number(&self.src[start..self.off]))
    }

    /* ────────── Primitives internes ────────── */

    #[inline] fn peek(&self) -> Option<u8> { self.bytes.get(self.off).copied() }
    #[inline] fn bump(&mut self) -> Option<u8> { let b = self.peek(); if b.is_some() { self.off += 1; } b }

    fn consume_while(&mut self, mut p: impl FnMut(u8) -> bool) {
        while let Some(b) = self.peek() {
            if p(b) { self.off += 1; } else { break; }
        }
    }

    #[inline] fn span_from(&self, start: usize) -> Span {
        Span::new(self.source, Pos(start as u32), Pos(self.off as u32))
    }
    #[inline] fn err_from(&self, start: usize, kind: LexErrorKind) -> LexError { LexError { span: self.span_from(start), kind } }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn toks(src: &str) -> Vec<TokenKind<'_>> {
        Lexer::new(src, SourceId(0)).tokenize().unwrap().into_iter().map(|t| t.value).collect()
    }

    fn lex_err(src: &str) -> LexError {
        Lexer::new(src, SourceId(0)).tokenize().unwrap_err()
    }

    #[test]
    fn operators_and_numbers() {
        use TokenKind::*;
        assert_eq!(
            toks("1+(3*12)*(5-6)"),
            vec![Number("1"), Plus, LParen, Number("3"), Star, Number("12"), RParen, Star, LParen, Number("5"), Minus, Number("6"), RParen, Eof]
        );
        assert_eq!(toks(" 2.50 /\t0.1\n"), vec![Number("2.50"), Slash, Number("0.1"), Eof]);
        assert_eq!(toks(""), vec![Eof]);
    }

    #[test]
    fn spans_cover_lexemes() {
        let t = Lexer::new("  12.5 *", SourceId(3)).tokenize().unwrap();
        assert_eq!(t[0].span, Span::new(SourceId(3), Pos(2), Pos(6)));
        assert_eq!(t[1].span, Span::new(SourceId(3), Pos(7), Pos(8)));
        assert_eq!(t[2].span, Span::new(SourceId(3), Pos(8), Pos(8)));
    }

    #[test]
    fn unexpected_characters() {
        let e = lex_err("|");
        assert_eq!(e.kind, LexErrorKind::UnexpectedChar('|'));
        assert_eq!(e.span, Span::new(SourceId(0), Pos(0), Pos(1)));

        assert_eq!(lex_err("1 + x").kind, LexErrorKind::UnexpectedChar('x'));
        assert_eq!(lex_err("2 × 3").kind, LexErrorKind::UnexpectedChar('×'));
        assert_eq!(lex_err(".5").kind, LexErrorKind::UnexpectedChar('.'));
        assert_eq!(lex_err("1e3").kind, LexErrorKind::UnexpectedChar('e'));
    }

    #[test]
    fn dangling_dot_is_rejected() {
        let e = lex_err("1.+2");
        assert_eq!(e.kind, LexErrorKind::MissingFraction);
        assert_eq!(e.to_string(), "expected digits after '.' at offset 2");
    }

    #[test]
    fn linemap_basic() {
        let lm = LineMap::new("1\n+2\n\n*3");
        assert_eq!(lm.line_col(Pos(0)), (1, 1));
        assert_eq!(lm.line_col(Pos(3)), (2, 2));
        assert_eq!(lm.line_col(Pos(6)), (4, 1));
    }

    proptest::proptest! {
        #[test]
        fn decimal_numbers_lex_as_one_token(int in "[0-9]{1,12}", frac in proptest::option::of("[0-9]{1,6}")) {
            let text = match &frac {
                Some(f) => format!("{int}.{f}"),
                None => int.clone(),
            };
            let v = toks(&text);
            proptest::prop_assert_eq!(v, vec![TokenKind::Number(&text), TokenKind::Eof]);
        }
    }
}
