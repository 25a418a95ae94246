//! `tinycalc` — CLI de TinyCalc
//!
//! Ici on fait uniquement : parsing d'arguments, initialisation (logger,
//! couleur), et délégation à `tinycalc_cli` (lib).

#![forbid(unsafe_code)]

use std::{path::PathBuf, process::ExitCode};

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use tinycalc_cli as cli;
use tinycalc_compiler::CompilerOptions;

// ──────────────────────────── CLI (clap) ────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "tinycalc", version, about = "TinyCalc — compiler, exécuter, inspecter des modules TCBC", long_about = None)]
struct Opt {
    /// Augmente la verbosité (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Mode silencieux (casse la verbosité)
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,

    /// Force la couleur (si la feature `color` est compilée)
    #[arg(long = "color", value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compiler une expression vers <OUT_DIR>/<NAME>.tcbc
    Compile {
        /// Nom du module ([A-Za-z_][A-Za-z0-9_]*)
        name: String,
        /// Dossier de sortie
        out_dir: PathBuf,
        /// Expression (- pour stdin)
        expr: Option<String>,
        /// Lire l'expression depuis un fichier
        #[arg(short, long, conflicts_with = "expr")]
        file: Option<PathBuf>,
        /// Créer le dossier de sortie si nécessaire
        #[arg(long)]
        mkdir: bool,
        /// Refuser d'écraser un module existant
        #[arg(long = "no-overwrite")]
        no_overwrite: bool,
        /// Ne pas embarquer le texte source (module "stripped")
        #[arg(long = "no-source")]
        no_source: bool,
        /// Afficher le temps de compilation
        #[arg(long)]
        time: bool,
    },

    /// Exécuter un module : affiche la valeur calculée
    Run {
        /// Module (.tcbc)
        module: PathBuf,
        /// Afficher le temps d'exécution
        #[arg(long)]
        time: bool,
    },

    /// Évaluer une expression en mémoire
    Eval {
        /// Expression (- pour stdin)
        expr: Option<String>,
        /// Lire l'expression depuis un fichier
        #[arg(short, long, conflicts_with = "expr")]
        file: Option<PathBuf>,
    },

    /// Désassembler un module vers du texte
    Disasm {
        /// Module (.tcbc)
        module: PathBuf,
        /// Sortie texte (stdout si omis)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspecter un module (en-tête, sections, CRC, validation)
    Inspect {
        /// Module (.tcbc)
        module: PathBuf,
        /// Résumé sur une ligne
        #[arg(long)]
        summary: bool,
    },

    /// Afficher l'arbre parenthésé d'une expression
    Parse {
        /// Expression (- pour stdin)
        expr: Option<String>,
        /// Lire l'expression depuis un fichier
        #[arg(short, long, conflicts_with = "expr")]
        file: Option<PathBuf>,
    },
}

// ──────────────────────────── Entrée / Sortie ────────────────────────────

fn input_from_opt(expr: Option<String>, file: Option<PathBuf>) -> cli::Input {
    match (expr, file) {
        (_, Some(path)) => cli::Input::Path(path),
        (Some(e), None) if e == "-" => cli::Input::Stdin,
        (Some(e), None) => cli::Input::Inline(e),
        (None, None) => cli::Input::Stdin,
    }
}

fn output_from_opt(output: Option<PathBuf>) -> cli::Output {
    output.map_or(cli::Output::Stdout, cli::Output::Path)
}

// ──────────────────────────── Init (log / couleur) ────────────────────────────

fn init_telemetry(verbose: u8, quiet: bool) {
    // RUST_LOG explicite gagne toujours
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if quiet {
            "error"
        } else {
            match verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            }
        };
        std::env::set_var("RUST_LOG", level);
    }
    cli::init_logger();
}

fn init_color(choice: ColorChoice) {
    match choice {
        ColorChoice::Auto => {}
        ColorChoice::Always => std::env::set_var("CLICOLOR_FORCE", "1"),
        ColorChoice::Never => std::env::set_var("NO_COLOR", "1"),
    }
}

// ──────────────────────────── main ────────────────────────────

fn main() -> ExitCode {
    match real_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn real_main() -> Result<()> {
    let opt = Opt::parse();
    init_color(opt.color);
    init_telemetry(opt.verbose, opt.quiet);

    let cmd = match opt.cmd {
        Command::Compile { name, out_dir, expr, file, mkdir, no_overwrite, no_source, time } => {
            let options = CompilerOptions {
                embed_source: !no_source,
                overwrite: !no_overwrite,
                mkdir,
                ..CompilerOptions::default()
            };
            cli::Command::Compile(cli::CompileTask {
                input: input_from_opt(expr, file),
                class_name: name,
                out_dir,
                options,
                time,
            })
        }
        Command::Run { module, time } => cli::Command::Run(cli::RunTask { module, time }),
        Command::Eval { expr, file } => cli::Command::Eval(cli::EvalTask { input: input_from_opt(expr, file) }),
        Command::Disasm { module, output } => {
            cli::Command::Disasm(cli::DisasmTask { module, output: output_from_opt(output) })
        }
        Command::Inspect { module, summary } => cli::Command::Inspect(cli::InspectTask { module, summary }),
        Command::Parse { expr, file } => cli::Command::Parse(cli::ParseTask { input: input_from_opt(expr, file) }),
    };

    cli::execute(cmd)
}
