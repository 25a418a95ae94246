// src/lib.rs
//! TinyCalc Compiler — arbre syntaxique → instructions → module `.tcbc`
//!
//! - Entrée : `tinycalc_ast::Expression` (ou directement le texte source)
//! - Cœur : une fonction par niveau de grammaire, qui ajoute des
//!   [`Instruction`]s à un [`InstructionSink`] (gauche, droite, puis opérateur)
//! - Sortie : un [`Module`] avec `get()` (la valeur) et `main()` (l’affiche),
//!   en mémoire ou écrit atomiquement dans `<dossier>/<Classe>.tcbc`
//!
//! API principale :
//! ```no_run
//! use tinycalc_compiler::TinyCalcCompiler;
//!
//! let c = TinyCalcCompiler::new("Calc", "out");
//! let path = c.compile("1+(3*12)*(5-6)")?;
//! assert!(path.ends_with("Calc.tcbc"));
//! # Ok::<(), tinycalc_compiler::CompileError>(())
//! ```

#![deny(missing_docs)]

use std::{
    ffi::OsStr,
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, info, log_enabled, trace, Level};

use tinycalc_ast as ast;
use tinycalc_core::{
    bytecode::{module::ENTRY_POINT, MethodBuilder, Module, Op, Returns},
    helpers, CoreError, SourceId, MODULE_EXTENSION,
};
use tinycalc_lexer::LexError;
use tinycalc_parser::{ParseError, ParserOptions};
pub use tinycalc_parser::DEFAULT_MAX_DEPTH;

pub use tinycalc_core::bytecode::{Instruction, InstructionSink};

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Nom de la méthode qui calcule la valeur.
pub const VALUE_METHOD: &str = "get";

/// Options du compilateur
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Embarquer le texte source dans la section `SRCE`
    pub embed_source: bool,
    /// Valider le module (indices, pile, point d’entrée) avant écriture
    pub validate: bool,
    /// Autoriser l’écrasement d’un module existant
    pub overwrite: bool,
    /// Créer le dossier cible s’il manque
    pub mkdir: bool,
    /// Profondeur maximale de parenthèses acceptée par le parseur
    pub max_depth: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self { embed_source: true, validate: true, overwrite: true, mkdir: false, max_depth: DEFAULT_MAX_DEPTH }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
/* Erreurs */
// ─────────────────────────────────────────────────────────────────────────────

/// Échec de compilation. Aucun fichier n’est écrit dans ce cas.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// Erreur lexicale dans le texte source.
    #[error("lex error: {0}")]
    Lex(LexError),
    /// Erreur de syntaxe dans le texte source.
    #[error("parse error: {0}")]
    Parse(ParseError),
    /// Module mal formé (ne devrait pas arriver pour un arbre valide).
    #[error("invalid module: {0}")]
    Module(#[from] CoreError),
    /// Nom de classe inutilisable comme nom de fichier / de module.
    #[error("invalid class name `{0}`")]
    InvalidName(String),
    /// Le module existe déjà et l’écrasement est interdit.
    #[error("{} already exists", path.display())]
    AlreadyExists {
        /// Chemin visé.
        path: PathBuf,
    },
    /// Erreur d’E/S à l’écriture.
    #[error("cannot write {}: {source}", path.display())]
    Io {
        /// Chemin visé.
        path: PathBuf,
        /// Cause.
        #[source]
        source: io::Error,
    },
}

impl From<tinycalc_parser::Error> for CompileError {
    fn from(e: tinycalc_parser::Error) -> Self {
        match e {
            tinycalc_parser::Error::Lex(e) => Self::Lex(e),
            tinycalc_parser::Error::Syntax(e) => Self::Parse(e),
        }
    }
}

/// Résultat de compilation
pub type CompileResult<T> = Result<T, CompileError>;

// ─────────────────────────────────────────────────────────────────────────────
/* Génération de code */
// ─────────────────────────────────────────────────────────────────────────────

// Chaque fonction laisse exactement une valeur de plus sur la pile. Les
// chaînes d’un même niveau sont parcourues à plat (`chain`) : seule
// l’imbrication des parenthèses consomme de la pile d’appels.

/// Compile la racine.
pub fn compile_expression<S: InstructionSink + ?Sized>(node: &ast::Expression, sink: &mut S) {
    compile_additive(&node.additive, sink);
}

/// Niveau additif : gauche, droite, puis `Add`/`Subtract`.
pub fn compile_additive<S: InstructionSink + ?Sized>(node: &ast::Additive, sink: &mut S) {
    let (first, rest) = node.chain();
    compile_multiplicative(first, sink);
    for (op, right) in rest {
        compile_multiplicative(right, sink);
        sink.emit(match op {
            ast::AddOp::Plus => Instruction::Add,
            ast::AddOp::Minus => Instruction::Subtract,
        });
    }
}

/// Niveau multiplicatif : gauche, droite, puis `Multiply`/`Divide`.
pub fn compile_multiplicative<S: InstructionSink + ?Sized>(node: &ast::Multiplicative, sink: &mut S) {
    let (first, rest) = node.chain();
    compile_primary(first, sink);
    for (op, right) in rest {
        compile_primary(right, sink);
        sink.emit(match op {
            ast::MulOp::Times => Instruction::Multiply,
            ast::MulOp::Divide => Instruction::Divide,
        });
    }
}

/// Littéral → `PushConstant` ; les parenthèses n’émettent rien.
pub fn compile_primary<S: InstructionSink + ?Sized>(node: &ast::Primary, sink: &mut S) {
    match node {
        ast::Primary::Atomic { literal, .. } => sink.emit(Instruction::PushConstant(literal.value())),
        ast::Primary::Block { inner, .. } => compile_expression(inner, sink),
    }
}

/// Suite complète d’instructions pour `root`, **sans** `Return` final.
pub fn compile(root: &ast::Expression) -> Vec<Instruction> {
    let mut out = Vec::new();
    compile_expression(root, &mut out);
    debug!(target: "tinycalc::codegen", "{} instruction(s) for {root}", out.len());
    if log_enabled!(target: "tinycalc::codegen", Level::Trace) {
        for (pc, insn) in out.iter().enumerate() {
            trace!(target: "tinycalc::codegen", "{pc:04} {insn}");
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
/* Backend : émetteur de module */
// ─────────────────────────────────────────────────────────────────────────────

/// Enveloppe le corps compilé dans un module chargeable :
/// `get()` renvoie la valeur, `main()` l’affiche.
pub struct ModuleEmitter {
    module: Module,
}

impl ModuleEmitter {
    /// Module vide nommé `class_name`.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self { module: Module::new(class_name) }
    }

    /// Ouvre `get`, laisse `body` le remplir, ajoute `Return`, ferme la
    /// méthode puis crée `main = [Invoke(get), Print, Return]`.
    ///
    /// Tout ou rien : en cas d’échec le module reste tel qu’avant l’appel.
    pub fn define_get(&mut self, body: impl FnOnce(&mut MethodBuilder<'_>)) -> Result<u32, CoreError> {
        let (methods_mark, consts_mark) = (self.module.methods.len(), self.module.consts.len());
        let mut get = self.module.begin_method(VALUE_METHOD, Returns::F64);
        body(&mut get);
        get.emit(Instruction::Return);
        debug!(target: "tinycalc::codegen", "`{VALUE_METHOD}`: {} op(s)", get.ops().len());
        let get = get.finish()?;

        let mut main = self.module.begin_method(ENTRY_POINT, Returns::Void);
        main.push(Op::Invoke(get));
        main.push(Op::Print);
        main.push(Op::Return);
        if let Err(err) = main.finish() {
            self.module.methods.truncate(methods_mark);
            self.module.consts.truncate(consts_mark);
            return Err(err);
        }
        Ok(get)
    }

    /// Module terminé.
    pub fn finish(self) -> Module { self.module }
}

// ─────────────────────────────────────────────────────────────────────────────
/* Compiler façade */
// ─────────────────────────────────────────────────────────────────────────────

/// Compile un texte source en module `<target_dir>/<class_name>.tcbc`.
#[derive(Debug, Clone)]
pub struct TinyCalcCompiler {
    class_name: String,
    target_dir: PathBuf,
    /// Options
    pub options: CompilerOptions,
}

impl TinyCalcCompiler {
    /// Crée un compilateur avec les options par défaut.
    pub fn new(class_name: impl Into<String>, target_dir: impl Into<PathBuf>) -> Self {
        Self { class_name: class_name.into(), target_dir: target_dir.into(), options: CompilerOptions::default() }
    }

    /// Remplace les options.
    #[must_use]
    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    /// Nom du module produit.
    pub fn class_name(&self) -> &str { &self.class_name }

    /// Chemin du fichier produit.
    pub fn output_path(&self) -> PathBuf {
        self.target_dir.join(format!("{}.{MODULE_EXTENSION}", self.class_name))
    }

    /// Parse, génère et (optionnellement) valide le module, sans E/S.
    pub fn build_module(&self, computation: &str) -> CompileResult<Module> {
        check_class_name(&self.class_name)?;
        let expr = tinycalc_parser::parse_with_options(
            computation,
            SourceId(0),
            ParserOptions { max_depth: self.options.max_depth },
        )?;

        let mut emitter = ModuleEmitter::new(self.class_name.as_str());
        emitter.define_get(|sink| compile_expression(&expr, sink))?;
        let mut module = emitter.finish();

        if self.options.embed_source {
            module.set_source(Some(computation.to_owned()));
        }
        if self.options.validate {
            helpers::validate_module(&module)?;
        }
        Ok(module)
    }

    /// Module encodé.
    pub fn compile_to_bytes(&self, computation: &str) -> CompileResult<Vec<u8>> {
        Ok(self.build_module(computation)?.to_bytes()?)
    }

    /// Compile et écrit le module. Tout échec de lexing/parsing survient
    /// avant le moindre accès disque.
    pub fn compile(&self, computation: &str) -> CompileResult<PathBuf> {
        let bytes = self.compile_to_bytes(computation)?;
        let path = self.output_path();

        if self.options.mkdir {
            fs::create_dir_all(&self.target_dir)
                .map_err(|source| CompileError::Io { path: self.target_dir.clone(), source })?;
        }
        if !self.options.overwrite && path.exists() {
            return Err(CompileError::AlreadyExists { path });
        }
        write_bytes_atomic(&path, &bytes).map_err(|source| CompileError::Io { path: path.clone(), source })?;
        info!(target: "tinycalc::compiler", "wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}

/// Un nom de classe : lettre ou `_`, puis lettres, chiffres, `_`.
fn check_class_name(name: &str) -> CompileResult<()> {
    let mut chars = name.chars();
    let ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok { Ok(()) } else { Err(CompileError::InvalidName(name.to_owned())) }
}

// ─────────────────────────────────────────────────────────────────────────────
// Utilitaires E/S
// ─────────────────────────────────────────────────────────────────────────────

/// Écrit `bytes` via un fichier temporaire voisin puis `rename` : la cible
/// est soit l’ancienne version complète, soit la nouvelle.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = unique_tmp_path(parent, path.file_name().unwrap_or_else(|| OsStr::new("out")));
    let written = (|| {
        let mut w = BufWriter::new(File::create(&tmp)?);
        w.write_all(bytes)?;
        w.into_inner().map_err(io::IntoInnerError::into_error)?.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

fn unique_tmp_path(dir: &Path, base: &OsStr) -> PathBuf {
    let mut i = 0u32;
    loop {
        let candidate = dir.join(format!(".{}.tmp{i}", base.to_string_lossy()));
        if !candidate.exists() {
            return candidate;
        }
        i = i.wrapping_add(1);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tinycalc_core::runtime::eval::{eval_instructions, invoke};
    use Instruction::{Add, Divide, Multiply, PushConstant, Return, Subtract};

    fn insns(src: &str) -> Vec<Instruction> {
        compile(&tinycalc_parser::parse_str(src).expect("parse ok"))
    }

    #[test]
    fn precedence_order() {
        assert_eq!(insns("1+2*3"), vec![PushConstant(1.0), PushConstant(2.0), PushConstant(3.0), Multiply, Add]);
    }

    #[test]
    fn left_operand_first() {
        assert_eq!(
            insns("6-1-2"),
            vec![PushConstant(6.0), PushConstant(1.0), Subtract, PushConstant(2.0), Subtract]
        );
        assert_eq!(insns("8/4"), vec![PushConstant(8.0), PushConstant(4.0), Divide]);
    }

    #[test]
    fn parentheses_emit_nothing() {
        assert_eq!(insns("((7))"), vec![PushConstant(7.0)]);
        assert_eq!(insns("(1+2)*3"), vec![PushConstant(1.0), PushConstant(2.0), Add, PushConstant(3.0), Multiply]);
    }

    #[test]
    fn no_trailing_return() {
        assert!(!insns("1+1").contains(&Return));
    }

    #[test]
    fn literal_values_are_decimal() -> Result<(), CoreError> {
        assert_eq!(insns("0.1"), vec![PushConstant(0.1)]);
        assert_eq!(eval_instructions(&insns("0.1+0.2"))?, 0.1 + 0.2);
        Ok(())
    }

    #[test]
    fn emitter_closes_get_with_return() -> CompileResult<()> {
        let expr = tinycalc_parser::parse_str("2*21")?;
        let mut em = ModuleEmitter::new("Answer");
        let get = em.define_get(|sink| compile_expression(&expr, sink))?;
        let module = em.finish();
        let ops = &module.methods[get as usize].ops;
        assert_eq!(ops.last(), Some(&Op::ReturnValue));
        let (_, main) = module.method(ENTRY_POINT).expect("main defined");
        assert_eq!(main.ops, vec![Op::Invoke(get), Op::Print, Op::Return]);
        assert_eq!(invoke(&module, VALUE_METHOD)?, 42.0);
        Ok(())
    }

    #[test]
    fn get_can_only_be_defined_once() {
        let mut em = ModuleEmitter::new("Twice");
        assert!(em.define_get(|s| s.emit(PushConstant(1.0))).is_ok());
        assert!(em.define_get(|s| s.emit(PushConstant(2.0))).is_err());
        let module = em.finish();
        assert_eq!(module.consts.iter().map(|(_, v)| v).collect::<Vec<_>>(), vec![1.0]);
        assert_eq!(module.methods.len(), 2);
    }

    #[test]
    fn failed_main_leaves_no_get_behind() -> Result<(), CoreError> {
        let mut em = ModuleEmitter::new("Clash");
        let mut main = em.module.begin_method(ENTRY_POINT, Returns::Void);
        main.push(Op::Return);
        main.finish()?;

        assert!(em.define_get(|s| s.emit(PushConstant(5.0))).is_err());
        let module = em.finish();
        assert_eq!(module.methods.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(), vec![ENTRY_POINT]);
        assert!(module.consts.is_empty());
        Ok(())
    }

    #[test]
    fn class_names() {
        for ok in ["Calc", "_x", "A1_b"] {
            assert!(check_class_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "1A", "a/b", "..", "a.b", "é"] {
            assert!(matches!(check_class_name(bad), Err(CompileError::InvalidName(_))), "{bad}");
        }
    }

    #[test]
    fn errors_are_classified() {
        let c = TinyCalcCompiler::new("E", ".");
        assert!(matches!(c.build_module("1*"), Err(CompileError::Parse(_))));
        assert!(matches!(c.build_module("|"), Err(CompileError::Lex(_))));
        let shallow = c.clone().with_options(CompilerOptions { max_depth: 1, ..CompilerOptions::default() });
        assert!(matches!(shallow.build_module("((1))"), Err(CompileError::Parse(_))));
    }
}
