//! Compilation complète : texte → fichier `.tcbc` → exécution.

use std::fs;

use pretty_assertions::assert_eq;
use tempfile::tempdir;
use tinycalc_compiler::{CompileError, CompilerOptions, TinyCalcCompiler, VALUE_METHOD};
use tinycalc_core::{
    bytecode::Module,
    helpers::validate_module,
    runtime::eval::{eval_module, invoke, EvalOptions},
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn run_file(path: &std::path::Path) -> Result<String, Box<dyn std::error::Error>> {
    let module = Module::from_bytes(&fs::read(path)?)?;
    validate_module(&module)?;
    Ok(eval_module(&module, EvalOptions { capture_stdout: true })?.stdout)
}

#[test]
fn mixed_precedence_prints_minus_35() -> TestResult {
    let dir = tempdir()?;
    let path = TinyCalcCompiler::new("Calc", dir.path()).compile("1+(3*12)*(5-6)")?;
    assert_eq!(path, dir.path().join("Calc.tcbc"));
    assert_eq!(run_file(&path)?, "-35.0\n");
    Ok(())
}

#[test]
fn long_chains_fold_left() -> TestResult {
    let dir = tempdir()?;
    let path = TinyCalcCompiler::new("Zero", dir.path()).compile("(1+2+3+4+5+6)*(6-1-2-3)")?;
    assert_eq!(run_file(&path)?, "0.0\n");
    Ok(())
}

#[test]
fn get_returns_the_value() -> TestResult {
    let c = TinyCalcCompiler::new("Seven", ".");
    let module = c.build_module("1+2*3")?;
    assert_eq!(invoke(&module, VALUE_METHOD)?, 7.0);
    assert_eq!(invoke(&c.build_module("(1+2)*3")?, VALUE_METHOD)?, 9.0);
    assert_eq!(invoke(&c.build_module("6-1-2-3")?, VALUE_METHOD)?, 0.0);
    assert_eq!(invoke(&c.build_module("1/0")?, VALUE_METHOD)?, f64::INFINITY);
    Ok(())
}

#[test]
fn parse_error_writes_nothing() -> TestResult {
    let dir = tempdir()?;
    let c = TinyCalcCompiler::new("Broken", dir.path());
    assert!(matches!(c.compile("1*"), Err(CompileError::Parse(_))));
    assert!(!c.output_path().exists());
    assert_eq!(fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn lex_error_writes_nothing() -> TestResult {
    let dir = tempdir()?;
    let c = TinyCalcCompiler::new("Broken", dir.path());
    assert!(matches!(c.compile("|"), Err(CompileError::Lex(_))));
    assert_eq!(fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn failed_recompile_keeps_previous_module() -> TestResult {
    let dir = tempdir()?;
    let c = TinyCalcCompiler::new("Keep", dir.path());
    let path = c.compile("2*2")?;
    let before = fs::read(&path)?;
    assert!(c.compile("2*").is_err());
    assert_eq!(fs::read(&path)?, before);
    Ok(())
}

#[test]
fn overwrite_and_mkdir_options() -> TestResult {
    let dir = tempdir()?;
    let nested = dir.path().join("a").join("b");

    let plain = TinyCalcCompiler::new("Opt", &nested);
    assert!(matches!(plain.compile("1"), Err(CompileError::Io { .. })));

    let opts = CompilerOptions { mkdir: true, overwrite: false, ..CompilerOptions::default() };
    let c = TinyCalcCompiler::new("Opt", &nested).with_options(opts);
    let path = c.compile("1")?;
    assert!(path.exists());
    assert!(matches!(c.compile("2"), Err(CompileError::AlreadyExists { .. })));
    assert_eq!(run_file(&path)?, "1.0\n");
    Ok(())
}

#[test]
fn source_is_embedded_unless_disabled() -> TestResult {
    let with = TinyCalcCompiler::new("Src", ".").build_module("4 / 8")?;
    assert_eq!(with.debug.source.as_deref(), Some("4 / 8"));

    let opts = CompilerOptions { embed_source: false, ..CompilerOptions::default() };
    let without = TinyCalcCompiler::new("Src", ".").with_options(opts).build_module("4 / 8")?;
    assert_eq!(without.debug.source, None);
    assert!(without.flags().stripped);
    Ok(())
}

#[test]
fn invalid_class_name_is_rejected() {
    let c = TinyCalcCompiler::new("../escape", ".");
    assert!(matches!(c.build_module("1"), Err(CompileError::InvalidName(_))));
}
