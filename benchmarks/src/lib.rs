//! Corpus synthétique partagé par les benchmarks TinyCalc (voir `benches/`).

use std::fmt::Write as _;

const OPS: [char; 4] = ['+', '-', '*', '/'];

/// Expression plate de `terms` littéraux, opérateurs en rotation,
/// une parenthèse toutes les 8 opérandes.
pub fn synthetic_expression(terms: usize) -> String {
    let mut s = String::with_capacity(terms * 6);
    for i in 0..terms.max(1) {
        if i > 0 {
            s.push(' ');
            s.push(OPS[i % OPS.len()]);
            s.push(' ');
        }
        if i % 8 == 7 {
            let _ = write!(s, "({}.5 - {})", i % 97 + 1, i % 13);
        } else {
            let _ = write!(s, "{}", i % 997 + 1);
        }
    }
    s
}

/// `depth` parenthèses imbriquées autour de `1+2`.
pub fn nested_expression(depth: usize) -> String {
    format!("{}1+2{}", "(".repeat(depth), ")".repeat(depth))
}
