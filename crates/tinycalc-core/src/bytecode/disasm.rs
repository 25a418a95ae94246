//! Textual disassembly used by the CLI tooling.

use std::fmt::Write;

use crate::bytecode::{
    module::{Method, Module, Op, Returns},
    runtime::eval::format_f64,
};

/// Produce a multi-line, human readable disassembly with metadata.
pub fn disassemble_full(module: &Module, title: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "== {title} == (module={}, version={}, stripped={}, consts={}, methods={}, ops={})",
        module.name,
        module.version(),
        module.flags().stripped,
        module.consts.len(),
        module.methods.len(),
        module.op_count()
    );

    if let Some(src) = &module.debug.source {
        let _ = writeln!(out, ";; source: {}", preview(src));
    }

    if !module.consts.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, ";; constants");
        for (idx, value) in module.consts.iter() {
            let _ = writeln!(out, "const[{idx:04}] = {}", format_f64(value));
        }
    }

    for (idx, method) in module.methods.iter().enumerate() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            ";; method #{idx} `{}` -> {} (max_stack={})",
            method.name,
            returns_name(method.returns),
            method.max_stack
        );
        for (pc, op) in method.ops.iter().enumerate() {
            match annotate(module, *op) {
                Some(note) => {
                    let _ = writeln!(out, "{pc:04} | {op:?} ;; {note}");
                }
                None => {
                    let _ = writeln!(out, "{pc:04} | {op:?}");
                }
            }
        }
    }

    out
}

/// One-line-per-op variant used by quick CLI previews.
pub fn disassemble_compact(module: &Module) -> String {
    let mut out = String::new();
    for method in &module.methods {
        for (pc, op) in method.ops.iter().enumerate() {
            let _ = write!(out, "{}:{pc:04}: {op:?}", method.name);
            if let Some(note) = annotate(module, *op) {
                let _ = write!(out, " ;; {note}");
            }
            out.push('\n');
        }
    }
    out
}

fn annotate(module: &Module, op: Op) -> Option<String> {
    match op {
        Op::LoadConst(ix) => module.consts.get(ix).map(format_f64),
        Op::Invoke(ix) => module.method_at(ix).map(|m: &Method| format!("{}()", m.name)),
        _ => None,
    }
}

const fn returns_name(r: Returns) -> &'static str {
    match r {
        Returns::F64 => "f64",
        Returns::Void => "void",
    }
}

fn preview(src: &str) -> String {
    let line = src.lines().next().unwrap_or_default();
    match line.char_indices().nth(64) {
        Some((cut, _)) => format!("{}…", &line[..cut]),
        None => line.to_owned(),
    }
}
