//! `lunaire` : CLI de la frontière hôte ↔ Luau
//!
//! Ici on fait uniquement : parsing d'arguments, initialisation (logger,
//! couleur, configuration VM), et délégation à `lunaire_cli` (lib).

#![forbid(unsafe_code)]

use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use lunaire_cli as cli;
use lunaire_core::{VmConfig, BYTECODE_EXTENSION};

// ──────────────────────────── CLI (clap) ────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "lunaire", version, about = "lunaire : compiler, exécuter et inspecter du Luau", long_about = None)]
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

    /// Configuration VM (JSON : niveaux du compilateur, sandbox)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Sous-commandes
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
    /// Compiler une source Luau vers du bytecode
    Compile {
        /// Fichier source (ou - pour stdin)
        input: Option<PathBuf>,
        /// Fichier de sortie (stdout si omis et pas --auto)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Niveau d'optimisation (0..=2), prioritaire sur --config
        #[arg(short = 'O', long = "opt-level")]
        opt_level: Option<u8>,
        /// Niveau d'infos de debug (0..=2), prioritaire sur --config
        #[arg(long = "debug-level")]
        debug_level: Option<u8>,
        /// Créer les dossiers parents si nécessaire
        #[arg(long = "mkdir")]
        auto_mkdir: bool,
        /// Écraser le fichier de sortie
        #[arg(long)]
        overwrite: bool,
        /// Afficher le temps de compilation
        #[arg(long)]
        time: bool,
        /// Sortie auto : même nom + .luauc
        #[arg(long)]
        auto: bool,
    },

    /// Charger puis exécuter un programme (source, ou bytecode .luauc)
    Run {
        /// Programme (source, .luauc, ou - / omis pour une source sur stdin)
        program: Option<PathBuf>,
        /// Afficher le temps d'exécution
        #[arg(long)]
        time: bool,
    },

    /// Inspecter l'en-tête d'un bytecode
    Inspect {
        /// Bytecode (.luauc, ou - pour stdin)
        input: Option<PathBuf>,
        /// Sortie JSON
        #[arg(long)]
        json: bool,
    },
}

// ──────────────────────────── Entrée / Sortie ────────────────────────────

fn input_from_opt(p: Option<PathBuf>) -> cli::Input {
    match p {
        Some(path) if path.as_os_str() == "-" => cli::Input::Stdin,
        Some(path) => cli::Input::Path(path),
        None => cli::Input::Stdin,
    }
}

fn program_from_opt(p: Option<PathBuf>) -> cli::InputKind {
    match p {
        Some(path) if path.as_os_str() == "-" => cli::InputKind::SourceStdin,
        Some(path) => {
            // heuristique simple : .luauc = bytecode, sinon source
            if path.extension().and_then(|e| e.to_str()) == Some(BYTECODE_EXTENSION) {
                cli::InputKind::BytecodePath(path)
            } else {
                cli::InputKind::SourcePath(path)
            }
        },
        None => cli::InputKind::SourceStdin,
    }
}

fn output_from_opt(output: Option<PathBuf>, auto: bool) -> cli::Output {
    if auto {
        return cli::Output::Auto;
    }
    output.map_or(cli::Output::Stdout, cli::Output::Path)
}

fn load_config(path: Option<&PathBuf>) -> Result<VmConfig> {
    match path {
        Some(p) => VmConfig::from_file(p).with_context(|| format!("configuration {}", p.display())),
        None => Ok(VmConfig::default()),
    }
}

// ──────────────────────────── Logger / Verbosité ────────────────────────────

fn init_telemetry(verbose: u8, quiet: bool) {
    #[cfg(feature = "trace")]
    {
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
        std::env::set_var(
            "RUST_LOG",
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string()),
        );
        cli::init_logger();
    }
    #[cfg(not(feature = "trace"))]
    {
        let _ = (verbose, quiet);
    }
}

fn init_color(choice: ColorChoice) {
    // `owo-colors` détecte le TTY ; on ne force que sur demande.
    match choice {
        ColorChoice::Auto => {},
        ColorChoice::Always => {
            std::env::set_var("CLICOLOR_FORCE", "1");
            std::env::remove_var("NO_COLOR");
        },
        ColorChoice::Never => {
            std::env::set_var("NO_COLOR", "1");
            std::env::remove_var("CLICOLOR_FORCE");
        },
    }
}

// ──────────────────────────── main ────────────────────────────

fn main() -> ExitCode {
    match real_main() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        },
    }
}

fn real_main() -> Result<i32> {
    let opt = Opt::parse();

    init_color(opt.color);
    init_telemetry(opt.verbose, opt.quiet);

    let mut config = load_config(opt.config.as_ref())?;

    use cli::{Command as C, CompileTask, InspectTask, RunTask};

    let command = match opt.cmd {
        Command::Compile {
            input,
            output,
            opt_level,
            debug_level,
            auto_mkdir,
            overwrite,
            time,
            auto,
        } => {
            if let Some(level) = opt_level {
                config.compile.optimization_level = level;
            }
            if let Some(level) = debug_level {
                config.compile.debug_level = level;
            }
            config.validate().context("options de compilation")?;
            C::Compile(CompileTask {
                input: input_from_opt(input),
                output: output_from_opt(output, auto),
                auto_mkdir,
                overwrite,
                time,
            })
        },
        Command::Run { program, time } => C::Run(RunTask { program: program_from_opt(program), time }),
        Command::Inspect { input, json } => {
            let path = input.unwrap_or_else(|| PathBuf::from("-"));
            C::Inspect(InspectTask { input: cli::InputKind::BytecodePath(path), json })
        },
    };

    cli::execute(command, &config).context("échec d'exécution de la commande")
}
