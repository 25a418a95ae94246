//! tinycalc-cli — bibliothèque interne du binaire `tinycalc`
//!
//! Le parsing d'arguments reste dans `main.rs` ; ici on trouve :
//! - les tâches (`Command`) et leur exécution (`execute` / `execute_to`)
//! - les utilitaires d'E/S (stdin, écriture atomique, chargement de module)
//! - les traces (`feature = "trace"`) et couleurs (`feature = "color"`) optionnelles
//!
//! Toute sortie "programme" (résultat, désassemblage, inspection) passe par
//! un `Write` fourni par l'appelant ; les statuts vont sur stderr.

#![deny(unused_must_use)]
#![forbid(unsafe_code)]

use std::{
    fmt::Write as _,
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{bail, Context, Result};

#[cfg(feature = "color")]
use owo_colors::{OwoColorize, Stream, Style};

use tinycalc_compiler::{compile, CompilerOptions, TinyCalcCompiler};
use tinycalc_core::{
    bytecode::Module,
    disasm::disassemble_full,
    helpers::validate_module,
    runtime::eval::{eval_instructions, eval_module, format_f64, EvalOptions},
    ByteReader, CoreError, CoreResult, SectionTag, MAGIC_TCBC,
};

// ───────────────────────────── Types publics ─────────────────────────────

/// Commande haut-niveau (sans parsing CLI — réservé à main.rs).
#[derive(Clone, Debug)]
pub enum Command {
    /// Compile une expression vers `<out_dir>/<name>.tcbc`.
    Compile(CompileTask),
    /// Charge un module et exécute son point d'entrée.
    Run(RunTask),
    /// Évalue une expression sans rien écrire sur disque.
    Eval(EvalTask),
    /// Désassemble un module.
    Disasm(DisasmTask),
    /// En-tête, sections, CRC et validation d'un module.
    Inspect(InspectTask),
    /// Affiche l'arbre parenthésé d'une expression.
    Parse(ParseTask),
}

/// Origine du texte d'une expression.
#[derive(Clone, Debug, Default)]
pub enum Input {
    /// Texte passé directement sur la ligne de commande.
    Inline(String),
    /// Fichier à lire.
    Path(PathBuf),
    /// Entrée standard.
    #[default]
    Stdin,
}

/// Destination d'un texte produit.
#[derive(Clone, Debug, Default)]
pub enum Output {
    /// Écrit dans le flux de l'appelant.
    #[default]
    Stdout,
    /// Écrit (atomiquement) dans un fichier.
    Path(PathBuf),
}

#[derive(Clone, Debug)]
pub struct CompileTask {
    pub input: Input,
    pub class_name: String,
    pub out_dir: PathBuf,
    pub options: CompilerOptions,
    pub time: bool,
}

#[derive(Clone, Debug)]
pub struct RunTask {
    pub module: PathBuf,
    pub time: bool,
}

#[derive(Clone, Debug, Default)]
pub struct EvalTask {
    pub input: Input,
}

#[derive(Clone, Debug)]
pub struct DisasmTask {
    pub module: PathBuf,
    pub output: Output,
}

#[derive(Clone, Debug)]
pub struct InspectTask {
    pub module: PathBuf,
    pub summary: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ParseTask {
    pub input: Input,
}

// ───────────────────────────── Initialisation ─────────────────────────────

/// Initialise le logger selon la feature `trace`.
pub fn init_logger() {
    #[cfg(feature = "trace")]
    {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
            .format_timestamp_secs()
            .try_init();
    }
}

// ───────────────────────────── Exécution ─────────────────────────────

/// Exécute une commande, sortie programme sur stdout.
pub fn execute(cmd: Command) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    execute_to(cmd, &mut out)?;
    out.flush()?;
    Ok(())
}

/// Exécute une commande en écrivant la sortie programme dans `out`.
pub fn execute_to(cmd: Command, out: &mut dyn Write) -> Result<()> {
    match cmd {
        Command::Compile(t) => compile_entry(t),
        Command::Run(t) => run_entry(&t, out),
        Command::Eval(t) => eval_entry(&t, out),
        Command::Disasm(t) => disasm_entry(&t, out),
        Command::Inspect(t) => inspect_entry(&t, out),
        Command::Parse(t) => parse_entry(&t, out),
    }
}

fn compile_entry(task: CompileTask) -> Result<()> {
    let CompileTask { input, class_name, out_dir, options, time } = task;
    let src = read_source(&input).context("lecture de l'expression")?;

    let compiler = TinyCalcCompiler::new(class_name, out_dir).with_options(options);
    let start = Instant::now();
    let path = compiler.compile(&src).context("échec de compilation")?;
    let elapsed = start.elapsed();

    status_ok("COMPILE", &display(&path));
    if time {
        status_info("TIME", &format!("compile: {} µs", elapsed.as_micros()));
    }
    Ok(())
}

fn run_entry(task: &RunTask, out: &mut dyn Write) -> Result<()> {
    let module = load_module(&task.module)?;
    let start = Instant::now();
    let result = eval_module(&module, EvalOptions { capture_stdout: true })
        .with_context(|| format!("exécution de {}", display(&task.module)))?;
    let elapsed = start.elapsed();
    out.write_all(result.stdout.as_bytes())?;
    if task.time {
        status_info("TIME", &format!("run: {} µs", elapsed.as_micros()));
    }
    Ok(())
}

fn eval_entry(task: &EvalTask, out: &mut dyn Write) -> Result<()> {
    let src = read_source(&task.input).context("lecture de l'expression")?;
    let expr = tinycalc_parser::parse_str(&src)?;
    let value = eval_instructions(&compile(&expr))?;
    writeln!(out, "{}", format_f64(value))?;
    Ok(())
}

fn disasm_entry(task: &DisasmTask, out: &mut dyn Write) -> Result<()> {
    let module = load_module(&task.module)?;
    let text = disassemble_full(&module, &display(&task.module));
    match &task.output {
        Output::Stdout => out.write_all(text.as_bytes())?,
        Output::Path(p) => {
            tinycalc_compiler::write_bytes_atomic(p, text.as_bytes())
                .with_context(|| format!("écriture de {}", display(p)))?;
            status_ok("DISASM", &display(p));
        }
    }
    Ok(())
}

fn inspect_entry(task: &InspectTask, out: &mut dyn Write) -> Result<()> {
    let bytes = fs::read(&task.module).with_context(|| format!("lecture module: {}", display(&task.module)))?;
    let report = if task.summary { inspect_summary(&bytes)? } else { inspect_report(&bytes)? };
    out.write_all(report.as_bytes())?;
    Ok(())
}

fn parse_entry(task: &ParseTask, out: &mut dyn Write) -> Result<()> {
    let src = read_source(&task.input).context("lecture de l'expression")?;
    let expr = tinycalc_parser::parse_str(&src)?;
    writeln!(out, "{expr}")?;
    Ok(())
}

// ───────────────────────────── Inspection ─────────────────────────────

/// Section brute telle qu'écrite sur disque.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectionInfo {
    /// Fourcc.
    pub tag: SectionTag,
    /// Offset de l'en-tête de section.
    pub offset: usize,
    /// Taille du contenu.
    pub len: u32,
}

/// En-tête et sections lisibles d'un fichier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionScan {
    /// Version déclarée.
    pub version: u16,
    /// Octet de flags.
    pub flags: u8,
    /// Sections lues avant la première avarie.
    pub sections: Vec<SectionInfo>,
    /// Première en-tête de section illisible (tag inconnu, longueur hors fichier).
    pub damage: Option<CoreError>,
}

/// Parcourt l'en-tête et la table des sections sans décoder leur contenu.
///
/// Seuls un magic invalide ou un en-tête tronqué sont des erreurs : une
/// section abîmée arrête le parcours et se retrouve dans `damage`.
pub fn scan_sections(bytes: &[u8]) -> Result<SectionScan> {
    let mut r = ByteReader::new(bytes);
    if r.read_bytes(MAGIC_TCBC.len()).ok() != Some(MAGIC_TCBC.as_slice()) {
        bail!("pas un module TCBC (magic invalide)");
    }
    let version = r.read_u16_le()?;
    let flags = r.read_u8()?;
    let _reserved = r.read_u8()?;

    let mut sections = Vec::new();
    let mut damage = None;
    while !r.is_at_end() {
        match next_section(&mut r) {
            Ok(sec) => sections.push(sec),
            Err(e) => {
                damage = Some(e);
                break;
            }
        }
    }
    Ok(SectionScan { version, flags, sections, damage })
}

fn next_section(r: &mut ByteReader<'_>) -> CoreResult<SectionInfo> {
    let offset = r.offset();
    let tag = r.read_tag()?;
    let len = r.read_u32_le()?;
    r.read_bytes(len as usize)?;
    Ok(SectionInfo { tag, offset, len })
}

fn inspect_report(bytes: &[u8]) -> Result<String> {
    let SectionScan { version, flags, sections, damage } = scan_sections(bytes)?;
    let mut s = String::new();
    writeln!(s, "magic    : TCBC")?;
    writeln!(s, "version  : {version}")?;
    writeln!(s, "flags    : 0x{flags:02x}{}", if flags & 1 != 0 { " (stripped)" } else { "" })?;
    writeln!(s, "size     : {} bytes", bytes.len())?;
    match &damage {
        Some(e) => writeln!(s, "sections : truncated ({e})")?,
        None => writeln!(s, "sections :")?,
    }
    for sec in &sections {
        writeln!(s, "  {:<4} @ {:>6}  len {}", sec.tag, sec.offset, sec.len)?;
    }
    match sections.iter().find(|sec| sec.tag == SectionTag::CRCC) {
        Some(sec) => {
            let stored = bytes
                .get(sec.offset + 8..sec.offset + 12)
                .and_then(|b| b.try_into().ok())
                .map(u32::from_le_bytes);
            let computed = tinycalc_core::crc32_ieee(&bytes[..sec.offset]);
            let verdict = if stored == Some(computed) { "ok" } else { "MISMATCH" };
            writeln!(s, "crc32    : 0x{computed:08x} ({verdict})")?;
        }
        None if damage.is_some() => writeln!(s, "crc32    : unavailable")?,
        None => writeln!(s, "crc32    : missing")?,
    }

    match Module::from_bytes(bytes).map_err(anyhow::Error::from).and_then(|m| {
        validate_module(&m)?;
        Ok(m)
    }) {
        Ok(m) => {
            writeln!(s, "module   : {}", m.name)?;
            writeln!(s, "consts   : {}", m.consts.len())?;
            for method in &m.methods {
                writeln!(
                    s,
                    "method   : {} ({:?}, max_stack={}, ops={})",
                    method.name,
                    method.returns,
                    method.max_stack,
                    method.ops.len()
                )?;
            }
            writeln!(s, "valid    : yes")?;
        }
        Err(e) => writeln!(s, "valid    : no ({e})")?,
    }
    Ok(s)
}

fn inspect_summary(bytes: &[u8]) -> Result<String> {
    let m = Module::from_bytes(bytes)?;
    validate_module(&m)?;
    Ok(format!(
        "module={} version={} stripped={} consts={} methods={} ops={} bytes={}\n",
        m.name,
        m.version(),
        m.flags().stripped,
        m.consts.len(),
        m.methods.len(),
        m.op_count(),
        bytes.len()
    ))
}

// ───────────────────────────── Utilitaires E/S ─────────────────────────────

/// Lit, décode et valide un module `.tcbc`.
pub fn load_module(path: &Path) -> Result<Module> {
    let bytes = fs::read(path).with_context(|| format!("lecture module: {}", display(path)))?;
    let module = Module::from_bytes(&bytes).with_context(|| format!("module invalide: {}", display(path)))?;
    validate_module(&module).with_context(|| format!("module incohérent: {}", display(path)))?;
    Ok(module)
}

fn read_source(input: &Input) -> Result<String> {
    match input {
        Input::Inline(s) => Ok(s.clone()),
        Input::Stdin => {
            let mut s = String::new();
            io::stdin().read_to_string(&mut s)?;
            Ok(s)
        }
        Input::Path(p) => fs::read_to_string(p).with_context(|| format!("ouverture: {}", display(p))),
    }
}

fn display(p: &Path) -> String {
    p.to_string_lossy().to_string()
}

// ───────────────────────────── Sorties jolies ─────────────────────────────

fn status_ok(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.if_supports_color(Stream::Stderr, |t| t.style(Style::new().green().bold())), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{tag} {msg}");
    }
}

fn status_info(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.if_supports_color(Stream::Stderr, |t| t.style(Style::new().blue().bold())), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{tag} {msg}");
    }
}

// ───────────────────────────── Tests ─────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn run(cmd: Command) -> Result<String> {
        let mut buf = Vec::new();
        execute_to(cmd, &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    fn compile_task(dir: &Path, name: &str, expr: &str) -> Command {
        Command::Compile(CompileTask {
            input: Input::Inline(expr.into()),
            class_name: name.into(),
            out_dir: dir.to_path_buf(),
            options: CompilerOptions::default(),
            time: false,
        })
    }

    #[test]
    fn compile_then_run() -> Result<()> {
        let dir = tempdir()?;
        run(compile_task(dir.path(), "Calc", "1+(3*12)*(5-6)"))?;
        let module = dir.path().join("Calc.tcbc");
        assert_eq!(run(Command::Run(RunTask { module, time: false }))?, "-35.0\n");
        Ok(())
    }

    #[test]
    fn eval_and_parse_in_memory() -> Result<()> {
        let eval = |e: &str| run(Command::Eval(EvalTask { input: Input::Inline(e.into()) }));
        assert_eq!(eval("1+2*3")?, "7.0\n");
        assert_eq!(eval("(1+2+3+4+5+6)*(6-1-2-3)")?, "0.0\n");
        assert_eq!(eval("1/0")?, "Infinity\n");
        let parsed = run(Command::Parse(ParseTask { input: Input::Inline("6-1-2".into()) }))?;
        assert_eq!(parsed, "((6 - 1) - 2)\n");
        Ok(())
    }

    #[test]
    fn errors_surface_as_err() {
        assert!(run(Command::Eval(EvalTask { input: Input::Inline("1*".into()) })).is_err());
        assert!(run(Command::Eval(EvalTask { input: Input::Inline("#".into()) })).is_err());
        let missing = Command::Run(RunTask { module: PathBuf::from("/nonexistent/X.tcbc"), time: false });
        assert!(run(missing).is_err());
    }

    #[test]
    fn disasm_to_file_and_stdout() -> Result<()> {
        let dir = tempdir()?;
        run(compile_task(dir.path(), "Dis", "2*3"))?;
        let module = dir.path().join("Dis.tcbc");

        let text = run(Command::Disasm(DisasmTask { module: module.clone(), output: Output::Stdout }))?;
        assert!(text.contains("method #0 `get`"), "{text}");
        assert!(text.contains("Mul"), "{text}");

        let target = dir.path().join("dis.txt");
        let none = run(Command::Disasm(DisasmTask { module, output: Output::Path(target.clone()) }))?;
        assert_eq!(none, "");
        assert_eq!(fs::read_to_string(target)?, text);
        Ok(())
    }

    #[test]
    fn inspect_reports_sections_and_crc() -> Result<()> {
        let dir = tempdir()?;
        run(compile_task(dir.path(), "Insp", "4/2"))?;
        let module = dir.path().join("Insp.tcbc");

        let full = run(Command::Inspect(InspectTask { module: module.clone(), summary: false }))?;
        for needle in ["version  : 1", "NAME", "FLTS", "CODE", "SRCE", "CRCC", "(ok)", "valid    : yes"] {
            assert!(full.contains(needle), "missing {needle:?} in\n{full}");
        }

        let summary = run(Command::Inspect(InspectTask { module: module.clone(), summary: true }))?;
        assert!(summary.starts_with("module=Insp version=1 stripped=false consts=2 methods=2"), "{summary}");

        // un octet altéré : le rapport complet le signale, le résumé échoue
        let mut bytes = fs::read(&module)?;
        bytes[17] ^= 0xFF;
        fs::write(&module, bytes)?;
        let full = run(Command::Inspect(InspectTask { module: module.clone(), summary: false }))?;
        assert!(full.contains("valid    : no"), "{full}");
        assert!(run(Command::Inspect(InspectTask { module, summary: true })).is_err());
        Ok(())
    }

    /// Compile `4/2`, altère le fichier puis renvoie (rapport complet, résumé).
    fn inspect_damaged(corrupt: impl FnOnce(&mut Vec<u8>)) -> Result<(String, Result<String>)> {
        let dir = tempdir()?;
        run(compile_task(dir.path(), "Insp", "4/2"))?;
        let module = dir.path().join("Insp.tcbc");
        let mut bytes = fs::read(&module)?;
        corrupt(&mut bytes);
        fs::write(&module, bytes)?;
        let full = run(Command::Inspect(InspectTask { module: module.clone(), summary: false }))?;
        let summary = run(Command::Inspect(InspectTask { module, summary: true }));
        Ok((full, summary))
    }

    #[test]
    fn inspect_reports_a_damaged_section_tag() -> Result<()> {
        // premier octet du tag NAME
        let (full, summary) = inspect_damaged(|b| b[8] ^= 0xFF)?;
        assert!(full.contains("version  : 1"), "{full}");
        assert!(full.contains("sections : truncated (invalid section tag"), "{full}");
        assert!(full.contains("crc32    : unavailable"), "{full}");
        assert!(full.contains("valid    : no ("), "{full}");
        assert!(summary.is_err());
        Ok(())
    }

    #[test]
    fn inspect_reports_a_section_length_past_the_end() -> Result<()> {
        // octet de poids fort de la longueur de NAME
        let (full, summary) = inspect_damaged(|b| b[15] = 0x7F)?;
        assert!(full.contains("sections : truncated (unexpected EOF"), "{full}");
        assert!(!full.contains("NAME @"), "{full}");
        assert!(full.contains("valid    : no ("), "{full}");
        assert!(summary.is_err());
        Ok(())
    }

    #[test]
    fn scan_keeps_sections_read_before_the_damage() -> Result<()> {
        let module = TinyCalcCompiler::new("Scan", ".").build_module("1+2")?;
        let mut bytes = module.to_bytes()?;
        let clean = scan_sections(&bytes)?;
        assert_eq!(clean.damage, None);
        let tags: Vec<_> = clean.sections.iter().map(|sec| sec.tag).collect();
        assert_eq!(tags, [SectionTag::NAME, SectionTag::FLTS, SectionTag::CODE, SectionTag::SRCE, SectionTag::CRCC]);

        let code = clean.sections[2].offset;
        bytes[code] = b'?';
        let scan = scan_sections(&bytes)?;
        assert_eq!(scan.sections, &clean.sections[..2]);
        assert!(matches!(scan.damage, Some(CoreError::InvalidSectionTag { .. })), "{:?}", scan.damage);
        Ok(())
    }

    #[test]
    fn scan_rejects_foreign_files() {
        assert!(scan_sections(b"not a module").is_err());
        assert!(scan_sections(b"").is_err());
    }
}
