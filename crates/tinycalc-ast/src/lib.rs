// src/lib.rs
//! TinyCalc AST (Abstract Syntax Tree)
//!
//! Structures produites par `tinycalc-parser` et consommées par
//! `tinycalc-compiler`. Une variante par niveau de précédence :
//!
//! ```text
//! Expression
//!   └─ Additive        One(Multiplicative) | Many(Additive, + | -, Multiplicative)
//!        └─ Multiplicative  One(Primary) | Many(Multiplicative, * | /, Primary)
//!             └─ Primary    Atomic(Numeral) | Block(Expression)
//! ```
//!
//! Les chaînes `a - b - c` sont penchées à gauche : `Many(Many(a, -, b), -, c)`.
//!
//! # Features
//! - `serde` : permet la sérialisation/désérialisation de l’AST
//!
//! # Exemple
//! ```rust
//! use tinycalc_ast::{AddOp, Additive, Expression, Multiplicative, Numeral, Primary};
//!
//! let one = |t: &str| Multiplicative::one(Primary::atomic(Numeral::parse(t).unwrap()));
//! let e = Expression::new(Additive::many(Additive::one(one("1")), AddOp::Plus, one("2")));
//! assert_eq!(e.to_string(), "(1 + 2)");
//! ```

#![deny(missing_docs)]

use std::{fmt, str::FromStr};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Localisation dans le code source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Span {
    /// Ligne de début (1-based)
    pub line: u32,
    /// Colonne de début (1-based)
    pub column: u32,
    /// Offset en bytes depuis le début de la source
    pub offset: u32,
}

impl Span {
    /// Construit un nouveau `Span` à partir d'une position (ligne, colonne, offset).
    pub const fn new(line: u32, column: u32, offset: u32) -> Self {
        Self { line, column, offset }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/* ─────────────────────────── Littéraux ─────────────────────────── */

/// Littéral décimal `DIGITS ('.' DIGITS)?`, valide par construction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct Numeral {
    text: String,
    value: f64,
}

/// Texte refusé par [`Numeral::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumeralError {
    /// Texte fautif.
    pub text: String,
}

impl fmt::Display for NumeralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed numeral `{}`", self.text)
    }
}

impl std::error::Error for NumeralError {}

impl Numeral {
    /// Valide `text` et calcule sa valeur décimale `f64`.
    pub fn parse(text: &str) -> Result<Self, NumeralError> {
        let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        let well_formed = match text.split_once('.') {
            Some((int, frac)) => digits(int) && digits(frac),
            None => digits(text),
        };
        if !well_formed {
            return Err(NumeralError { text: text.to_owned() });
        }
        let value = text.parse::<f64>().map_err(|_| NumeralError { text: text.to_owned() })?;
        Ok(Self { text: text.to_owned(), value })
    }

    /// Texte source tel qu’écrit.
    pub fn text(&self) -> &str { &self.text }

    /// Valeur décimale.
    pub const fn value(&self) -> f64 { self.value }
}

impl FromStr for Numeral {
    type Err = NumeralError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl TryFrom<String> for Numeral {
    type Error = NumeralError;
    fn try_from(s: String) -> Result<Self, Self::Error> { Self::parse(&s) }
}

impl From<Numeral> for String {
    fn from(n: Numeral) -> Self { n.text }
}

/* ─────────────────────────── Opérateurs ─────────────────────────── */

/// Opérateur additif.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AddOp {
    /// `+`
    Plus,
    /// `-`
    Minus,
}

/// Opérateur multiplicatif.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MulOp {
    /// `*`
    Times,
    /// `/`
    Divide,
}

impl AddOp {
    /// Symbole source.
    pub const fn symbol(self) -> char {
        match self {
            Self::Plus => '+',
            Self::Minus => '-',
        }
    }
}

impl MulOp {
    /// Symbole source.
    pub const fn symbol(self) -> char {
        match self {
            Self::Times => '*',
            Self::Divide => '/',
        }
    }
}

/* ─────────────────────────── Nœuds ─────────────────────────── */

/// Racine : une expression complète.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Expression {
    /// Niveau additif.
    pub additive: Additive,
}

/// Niveau additif (`+`, `-`).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Additive {
    /// Pas d’opérateur à ce niveau.
    One {
        /// Opérande unique.
        multiplicative: Multiplicative,
    },
    /// `left op right`
    Many {
        /// Partie gauche (chaîne déjà construite).
        left: Box<Additive>,
        /// Opérateur.
        op: AddOp,
        /// Partie droite.
        right: Multiplicative,
        /// Position de l’opérateur.
        span: Option<Span>,
    },
}

/// Niveau multiplicatif (`*`, `/`).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Multiplicative {
    /// Pas d’opérateur à ce niveau.
    One {
        /// Opérande unique.
        primary: Primary,
    },
    /// `left op right`
    Many {
        /// Partie gauche (chaîne déjà construite).
        left: Box<Multiplicative>,
        /// Opérateur.
        op: MulOp,
        /// Partie droite.
        right: Primary,
        /// Position de l’opérateur.
        span: Option<Span>,
    },
}

/// Niveau primaire : littéral ou sous-expression parenthésée.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Primary {
    /// Littéral numérique.
    Atomic {
        /// Le littéral.
        literal: Numeral,
        /// Position du littéral.
        span: Option<Span>,
    },
    /// `( expression )`
    Block {
        /// Expression entre parenthèses.
        inner: Box<Expression>,
        /// Position de la parenthèse ouvrante.
        span: Option<Span>,
    },
}

impl Expression {
    /// Construit une expression.
    pub const fn new(additive: Additive) -> Self { Self { additive } }
}

impl Additive {
    /// `One`
    pub const fn one(multiplicative: Multiplicative) -> Self { Self::One { multiplicative } }
    /// `Many` sans position.
    pub fn many(left: Self, op: AddOp, right: Multiplicative) -> Self {
        Self::Many { left: Box::new(left), op, right, span: None }
    }

    /// Chaîne mise à plat dans l’ordre d’évaluation : l’opérande le plus à
    /// gauche, puis chaque `(op, droite)` en remontant l’épine gauche.
    ///
    /// Parcours itératif : la longueur d’une chaîne `a + b + …` ne coûte
    /// pas de pile d’appels.
    pub fn chain(&self) -> (&Multiplicative, Vec<(AddOp, &Multiplicative)>) {
        let mut rest = Vec::new();
        let mut node = self;
        loop {
            match node {
                Self::One { multiplicative } => {
                    rest.reverse();
                    return (multiplicative, rest);
                }
                Self::Many { left, op, right, .. } => {
                    rest.push((*op, right));
                    node = &**left;
                }
            }
        }
    }

    fn hole() -> Self { Self::One { multiplicative: Multiplicative::hole() } }
}

impl Multiplicative {
    /// `One`
    pub const fn one(primary: Primary) -> Self { Self::One { primary } }
    /// `Many` sans position.
    pub fn many(left: Self, op: MulOp, right: Primary) -> Self {
        Self::Many { left: Box::new(left), op, right, span: None }
    }

    /// Équivalent de [`Additive::chain`] pour `*` et `/`.
    pub fn chain(&self) -> (&Primary, Vec<(MulOp, &Primary)>) {
        let mut rest = Vec::new();
        let mut node = self;
        loop {
            match node {
                Self::One { primary } => {
                    rest.reverse();
                    return (primary, rest);
                }
                Self::Many { left, op, right, .. } => {
                    rest.push((*op, right));
                    node = &**left;
                }
            }
        }
    }

    // feuille sans allocation, le temps de démonter une chaîne
    fn hole() -> Self {
        Self::One { primary: Primary::Atomic { literal: Numeral { text: String::new(), value: 0.0 }, span: None } }
    }
}

/* ─────────────────────────── Libération ─────────────────────────── */

// Les chaînes penchent à gauche : le `Drop` dérivé récurserait une fois par
// opérateur. On détache l’épine gauche maillon par maillon.

impl Drop for Additive {
    fn drop(&mut self) {
        let Self::Many { left, .. } = self else { return };
        let mut next = std::mem::replace(left.as_mut(), Self::hole());
        while let Self::Many { left, .. } = &mut next {
            let inner = std::mem::replace(left.as_mut(), Self::hole());
            next = inner;
        }
    }
}

impl Drop for Multiplicative {
    fn drop(&mut self) {
        let Self::Many { left, .. } = self else { return };
        let mut next = std::mem::replace(left.as_mut(), Self::hole());
        while let Self::Many { left, .. } = &mut next {
            let inner = std::mem::replace(left.as_mut(), Self::hole());
            next = inner;
        }
    }
}

impl Primary {
    /// Littéral sans position.
    pub const fn atomic(literal: Numeral) -> Self { Self::Atomic { literal, span: None } }
    /// Bloc parenthésé sans position.
    pub fn block(inner: Expression) -> Self { Self::Block { inner: Box::new(inner), span: None } }
}

/* ─────────────────────────── Affichage ─────────────────────────── */

// Forme entièrement parenthésée : chaque `Many` s’affiche `(l op r)`.

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.additive.fmt(f) }
}

impl fmt::Display for Additive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (first, rest) = self.chain();
        for _ in &rest {
            f.write_str("(")?;
        }
        first.fmt(f)?;
        for (op, right) in rest {
            write!(f, " {} {right})", op.symbol())?;
        }
        Ok(())
    }
}

impl fmt::Display for Multiplicative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (first, rest) = self.chain();
        for _ in &rest {
            f.write_str("(")?;
        }
        first.fmt(f)?;
        for (op, right) in rest {
            write!(f, " {} {right})", op.symbol())?;
        }
        Ok(())
    }
}

impl fmt::Display for Primary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atomic { literal, .. } => f.write_str(literal.text()),
            Self::Block { inner, .. } => inner.fmt(f),
        }
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn num(t: &str) -> Primary { Primary::atomic(Numeral::parse(t).expect("numeral")) }

    #[test]
    fn numerals_are_validated() {
        assert_eq!(Numeral::parse("12").map(|n| n.value()), Ok(12.0));
        assert_eq!(Numeral::parse("3.25").map(|n| n.value()), Ok(3.25));
        assert_eq!(Numeral::parse("007").map(|n| n.text().to_owned()), Ok("007".to_owned()));
        for bad in ["", ".", "1.", ".5", "1.2.3", "-1", "1e3", "x"] {
            assert!(Numeral::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn display_is_fully_parenthesized() {
        // (1 - 2) - 3, penché à gauche
        let chain = Additive::many(
            Additive::many(Additive::one(Multiplicative::one(num("1"))), AddOp::Minus, Multiplicative::one(num("2"))),
            AddOp::Minus,
            Multiplicative::one(num("3")),
        );
        assert_eq!(Expression::new(chain).to_string(), "((1 - 2) - 3)");

        let block = Primary::block(Expression::new(Additive::one(Multiplicative::one(num("4.5")))));
        let prod = Multiplicative::many(Multiplicative::one(block), MulOp::Divide, num("2"));
        assert_eq!(Expression::new(Additive::one(prod)).to_string(), "(4.5 / 2)");
    }

    #[test]
    fn chain_lists_operands_in_evaluation_order() {
        let chain = Additive::many(
            Additive::many(Additive::one(Multiplicative::one(num("1"))), AddOp::Plus, Multiplicative::one(num("2"))),
            AddOp::Minus,
            Multiplicative::one(num("3")),
        );
        let (first, rest) = chain.chain();
        assert_eq!(first.to_string(), "1");
        let ops: Vec<_> = rest.iter().map(|(op, r)| format!("{}{r}", op.symbol())).collect();
        assert_eq!(ops, vec!["+2", "-3"]);
    }

    #[test]
    fn long_chains_print_and_drop_without_deep_recursion() {
        // 200 000 maillons : le parcours récursif déborderait un thread standard
        let n = 200_000;
        let handle = std::thread::spawn(move || {
            let mut add = Additive::one(Multiplicative::one(num("1")));
            let mut mul = Multiplicative::one(num("2"));
            for _ in 0..n {
                add = Additive::many(add, AddOp::Plus, Multiplicative::one(num("1")));
                mul = Multiplicative::many(mul, MulOp::Times, num("2"));
            }
            let text = add.to_string();
            assert!(text.starts_with("(((("));
            assert!(text.ends_with(" + 1)"));
            assert_eq!(text.matches('+').count(), n);
            assert_eq!(mul.to_string().matches('*').count(), n);
            drop(add);
            drop(mul);
        });
        handle.join().expect("no stack overflow");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_keeps_numeral_invariant() {
        let e = Expression::new(Additive::one(Multiplicative::one(num("1.5"))));
        let json = serde_json::to_string(&e).expect("serialize");
        let back: Expression = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, e);
        assert!(serde_json::from_str::<Numeral>("\"1..5\"").is_err());
    }
}
