//! tinycalc-parser — parseur des expressions TinyCalc
//!
//! Branches :
//! - `tinycalc-lexer` pour la tokenisation (toute la source est lexée d’abord)
//! - `tinycalc-core` pour `Span/Spanned`
//! - `tinycalc-ast` pour l’AST cible
//!
//! Grammaire :
//! ```text
//! expression     := additive EOF
//! additive       := multiplicative (("+" | "-") multiplicative)*
//! multiplicative := primary (("*" | "/") primary)*
//! primary        := NUMBER | "(" additive ")"
//! ```
//!
//! Pas de reprise sur erreur : la première erreur (lexicale ou syntaxique)
//! interrompt l’analyse.

#![deny(missing_docs)]

/* ─────────────────────────── Imports ─────────────────────────── */

use std::fmt;

use tinycalc_ast as ast;
use tinycalc_core::{SourceId, Span};
use tinycalc_lexer::{LexError, Lexer, LineMap, Token, TokenKind};

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreur de syntaxe avec span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Localisation.
    pub span: Span,
    /// Message humain.
    pub message: String,
}

impl ParseError {
    fn new(span: Span, message: impl Into<String>) -> Self {
        Self { span, message: message.into() }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.span.start.0)
    }
}

impl std::error::Error for ParseError {}

/// Échec de l’analyse : lexical ou syntaxique, toujours distincts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Caractère hors alphabet, littéral mal formé.
    #[error("lex error: {0}")]
    Lex(#[from] LexError),
    /// Suite de jetons non conforme à la grammaire.
    #[error("parse error: {0}")]
    Syntax(#[from] ParseError),
}

type PResult<T> = Result<T, ParseError>;

/* ─────────────────────────── Options ─────────────────────────── */

/// Profondeur d’imbrication des parenthèses par défaut.
///
/// Parseur, générateur et libération de l’arbre récursent une fois par
/// parenthèse ouverte (les chaînes `a + b + …` sont parcourues à plat) :
/// la limite tient dans la pile par défaut d’un thread (2 MiB), build debug
/// compris.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Options du parseur.
#[derive(Debug, Clone, Copy)]
pub struct ParserOptions {
    /// Nombre maximal de parenthèses ouvertes simultanément.
    pub max_depth: usize,
}

impl Default for ParserOptions {
    fn default() -> Self { Self { max_depth: DEFAULT_MAX_DEPTH } }
}

/* ─────────────────────────── API ─────────────────────────── */

/// Parse une expression complète avec les options par défaut.
pub fn parse_str(src: &str) -> Result<ast::Expression, Error> {
    parse_with_options(src, SourceId(0), ParserOptions::default())
}

/// Parse une expression complète.
pub fn parse_with_options(src: &str, source: SourceId, opts: ParserOptions) -> Result<ast::Expression, Error> {
    let mut p = Parser::new(src, source, opts)?;
    Ok(p.parse_expression()?)
}

/* ─────────────────────────── Parser ─────────────────────────── */

/// Parser TinyCalc (descente récursive, un niveau par précédence).
pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    /// Parenthèses actuellement ouvertes.
    depth: usize,
    opts: ParserOptions,
    lines: LineMap,
}

impl<'a> Parser<'a> {
    /// Lexe toute la source ; une erreur lexicale est renvoyée immédiatement.
    pub fn new(src: &'a str, source: SourceId, opts: ParserOptions) -> Result<Self, LexError> {
        let lexer = Lexer::new(src, source);
        let lines = lexer.lines.clone();
        let tokens = lexer.tokenize()?;
        Ok(Self { tokens, pos: 0, depth: 0, opts, lines })
    }

    /// Parse `additive EOF`.
    pub fn parse_expression(&mut self) -> PResult<ast::Expression> {
        let expr = self.expression()?;
        let t = self.peek();
        if t.value != TokenKind::Eof {
            return Err(err_here(&t, format!("unexpected {} after a complete expression", t.value)));
        }
        Ok(expr)
    }

    /* ─────────── Niveaux de précédence ─────────── */

    fn expression(&mut self) -> PResult<ast::Expression> {
        Ok(ast::Expression::new(self.additive()?))
    }

    fn additive(&mut self) -> PResult<ast::Additive> {
        let mut node = ast::Additive::one(self.multiplicative()?);
        loop {
            let op = match self.peek().value {
                TokenKind::Plus => ast::AddOp::Plus,
                TokenKind::Minus => ast::AddOp::Minus,
                _ => return Ok(node),
            };
            let tok = self.bump();
            let right = self.multiplicative()?;
            node = ast::Additive::Many { left: Box::new(node), op, right, span: Some(self.ast_span(tok.span)) };
        }
    }

    fn multiplicative(&mut self) -> PResult<ast::Multiplicative> {
        let mut node = ast::Multiplicative::one(self.primary()?);
        loop {
            let op = match self.peek().value {
                TokenKind::Star => ast::MulOp::Times,
                TokenKind::Slash => ast::MulOp::Divide,
                _ => return Ok(node),
            };
            let tok = self.bump();
            let right = self.primary()?;
            node = ast::Multiplicative::Many { left: Box::new(node), op, right, span: Some(self.ast_span(tok.span)) };
        }
    }

    fn primary(&mut self) -> PResult<ast::Primary> {
        let t = self.peek();
        match t.value {
            TokenKind::Number(text) => {
                self.bump();
                let literal = ast::Numeral::parse(text).map_err(|e| err_here(&t, e.to_string()))?;
                Ok(ast::Primary::Atomic { literal, span: Some(self.ast_span(t.span)) })
            }
            TokenKind::LParen => {
                if self.depth >= self.opts.max_depth {
                    return Err(too_deep(&t, self.opts.max_depth));
                }
                self.bump();
                self.depth += 1;
                let inner = self.expression()?;
                let close = self.peek();
                if close.value != TokenKind::RParen {
                    return Err(unclosed(&close, self.lines.line_col(t.span.start)));
                }
                self.bump();
                self.depth -= 1;
                Ok(ast::Primary::Block { inner: Box::new(inner), span: Some(self.ast_span(t.span)) })
            }
            _ => Err(expected_operand(&t)),
        }
    }

    /* ─────────── Utilitaires ─────────── */

    #[inline]
    fn peek(&self) -> Token<'a> {
        // `tokenize` garantit un `Eof` final ; on ne dépasse jamais ce jeton
        let ix = self.pos.min(self.tokens.len().saturating_sub(1));
        self.tokens.get(ix).cloned().unwrap_or_else(|| Token::new(TokenKind::Eof, Span::default()))
    }

    #[inline]
    fn bump(&mut self) -> Token<'a> {
        let t = self.peek();
        if t.value != TokenKind::Eof {
            self.pos += 1;
        }
        t
    }

    fn ast_span(&self, span: Span) -> ast::Span {
        let (line, column) = self.lines.line_col(span.start);
        ast::Span::new(line, column, span.start.0)
    }
}

fn err_here(tok: &Token<'_>, message: impl Into<String>) -> ParseError {
    ParseError::new(tok.span, message)
}

// Formatage hors des fonctions récursives : leurs cadres de pile restent petits.

#[cold]
#[inline(never)]
fn too_deep(tok: &Token<'_>, limit: usize) -> ParseError {
    err_here(tok, format!("nesting too deep (limit {limit})"))
}

#[cold]
#[inline(never)]
fn unclosed(found: &Token<'_>, (line, col): (u32, u32)) -> ParseError {
    err_here(found, format!("expected `)` to close `(` opened at {line}:{col}, found {}", found.value))
}

#[cold]
#[inline(never)]
fn expected_operand(tok: &Token<'_>) -> ParseError {
    err_here(tok, format!("expected a number or `(`, found {}", tok.value))
}

/* ─────────────────────────── Tests ─────────────────────────── */
