//! lunaire-cli : bibliothèque interne du binaire `lunaire`
//!
//! But : garder la logique des commandes testable, séparée du parsing
//! d'arguments (laissé à `main.rs`).
//!
//! Points clés :
//! - `compile` : source → bytecode Luau, écriture atomique (`.luauc` par défaut)
//! - `run` : source (DoFile / stdin) ou bytecode (DoCompiled), puis Execute ;
//!   code de sortie 1 si le chargement échoue ou si le sink `error` a parlé
//! - `inspect` : en-tête d'un bytecode, texte ou JSON
//! - Traces (`feature = "trace"`) et couleurs (`feature = "color"`) optionnelles

#![deny(unused_must_use)]
#![forbid(unsafe_code)]

use std::{
    cell::Cell,
    fs,
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
    rc::Rc,
    time::Instant,
};

use anyhow::{anyhow, Context, Result};
use lunaire_core::{bytecode, VmConfig, BYTECODE_EXTENSION};
use lunaire_runtime::{Channel, HostError, OutputSinks, Vm};

#[cfg(feature = "trace")]
use log::debug;

#[cfg(feature = "color")]
use owo_colors::OwoColorize;

// ───────────────────────────── Types publics ─────────────────────────────

/// Commande haut-niveau (sans parsing CLI : réservé à main.rs).
#[derive(Clone, Debug)]
pub enum Command {
    /// Compile une source Luau vers du bytecode.
    Compile(CompileTask),
    /// Charge puis exécute un programme (source ou bytecode).
    Run(RunTask),
    /// Inspecte l'en-tête d'un bytecode.
    Inspect(InspectTask),
}

/// Paramètres de `compile`.
#[derive(Clone, Debug, Default)]
pub struct CompileTask {
    /// Source (chemin ou stdin).
    pub input: Input,
    /// Chemin, stdout ou auto (même dossier, `.luauc`).
    pub output: Output,
    /// Crée les dossiers parents si besoin.
    pub auto_mkdir: bool,
    /// Autorise l'écrasement.
    pub overwrite: bool,
    /// Affiche le timing.
    pub time: bool,
}

/// Paramètres de `run`.
#[derive(Clone, Debug, Default)]
pub struct RunTask {
    /// Programme à charger.
    pub program: InputKind,
    /// Affiche le timing.
    pub time: bool,
}

/// Paramètres de `inspect`.
#[derive(Clone, Debug, Default)]
pub struct InspectTask {
    /// Bytecode à inspecter.
    pub input: InputKind,
    /// Sortie JSON au lieu du texte.
    pub json: bool,
}

/// Entrée texte (source) : fichier ou `-` (=stdin).
#[derive(Clone, Debug, Default)]
pub enum Input {
    /// Fichier.
    Path(PathBuf),
    /// Entrée standard.
    #[default]
    Stdin,
}

/// Entrée typée.
#[derive(Clone, Debug, Default)]
pub enum InputKind {
    /// Fichier de bytecode (`-` = stdin).
    BytecodePath(PathBuf),
    /// Bytecode déjà en mémoire.
    BytecodeBytes(Vec<u8>),
    /// Fichier source.
    SourcePath(PathBuf),
    /// Source sur stdin.
    #[default]
    SourceStdin,
}

/// Sortie de `compile`.
#[derive(Clone, Debug, Default)]
pub enum Output {
    /// Fichier.
    Path(PathBuf),
    /// Sortie standard (octets bruts).
    #[default]
    Stdout,
    /// Même nom que la source + `.luauc`.
    Auto,
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

/// Exécute une commande (sinks sur stdout/stderr). Retourne un code de sortie.
pub fn execute(cmd: Command, config: &VmConfig) -> Result<i32> {
    execute_with(cmd, config, OutputSinks::stdio())
}

/// Comme [`execute`], avec des sinks fournis par l'appelant.
pub fn execute_with(cmd: Command, config: &VmConfig, sinks: OutputSinks) -> Result<i32> {
    match cmd {
        Command::Compile(t) => compile_entry(t, config, sinks),
        Command::Run(t) => run_entry(t, config, sinks),
        Command::Inspect(t) => {
            inspect_entry(t)?;
            Ok(0)
        },
    }
}

fn compile_entry(task: CompileTask, config: &VmConfig, sinks: OutputSinks) -> Result<i32> {
    let CompileTask { input, output, auto_mkdir, overwrite, time } = task;

    let src = read_source(&input).context("lecture de la source")?;
    let mut vm = Vm::with_config(sinks, config).context("création de la VM")?;

    let start = Instant::now();
    let bc = match vm.compile(&src) {
        Ok(bc) => bc,
        // le diagnostic est déjà parti vers le sink `error`
        Err(HostError::Compile { .. }) => return Ok(1),
        Err(e) => return Err(e).context("échec de compilation"),
    };
    let elapsed = start.elapsed();
    vm.dispose();
    #[cfg(feature = "trace")]
    debug!("bytecode : {} octets en {} ms", bc.len(), elapsed.as_millis());

    let out_path = match (&output, &input) {
        (Output::Auto, Input::Path(p)) => default_bytecode_path(p),
        (Output::Auto, Input::Stdin) => PathBuf::from(format!("out.{BYTECODE_EXTENSION}")),
        (Output::Path(p), _) => p.clone(),
        (Output::Stdout, _) => PathBuf::new(),
    };

    if let Output::Stdout = output {
        let mut w = BufWriter::new(io::stdout().lock());
        w.write_all(&bc)?;
        w.flush()?;
    } else {
        if auto_mkdir {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        if out_path.exists() && !overwrite {
            return Err(anyhow!("fichier de sortie existe déjà: {}", display(&out_path)));
        }
        write_bytes_atomic(&out_path, &bc)
            .with_context(|| format!("écriture de {}", display(&out_path)))?;
        status_ok("COMPILE", &display(&out_path));
    }

    if time {
        status_info("TIME", &format!("compile: {} ms", elapsed.as_millis()));
    }
    Ok(0)
}

fn run_entry(task: RunTask, config: &VmConfig, sinks: OutputSinks) -> Result<i32> {
    let failed = Rc::new(Cell::new(false));
    let mut vm = Vm::with_config(flag_errors(sinks, Rc::clone(&failed)), config)
        .context("création de la VM")?;

    let start = Instant::now();
    let loaded = match task.program {
        InputKind::SourcePath(p) => vm.do_file(&p),
        InputKind::SourceStdin => {
            let src = read_source(&Input::Stdin)?;
            vm.do_text("stdin", &src)
        },
        InputKind::BytecodePath(p) => {
            let bytes = read_bytes(&p)?;
            vm.do_compiled(&chunk_name(&p), &bytes)
        },
        InputKind::BytecodeBytes(b) => vm.do_compiled("bytecode", &b),
    };
    let loaded = match loaded {
        Ok(loaded) => loaded,
        Err(HostError::Compile { .. }) => false,
        Err(e) => return Err(e).context("chargement du programme"),
    };
    #[cfg(feature = "trace")]
    debug!("programme chargé : {loaded}");
    if loaded {
        vm.execute().context("exécution")?;
    }
    let elapsed = start.elapsed();
    vm.dispose();

    if task.time {
        status_info("TIME", &format!("run: {} ms", elapsed.as_millis()));
    }
    Ok(if loaded && !failed.get() { 0 } else { 1 })
}

fn inspect_entry(task: InspectTask) -> Result<()> {
    let bytes = match task.input {
        InputKind::BytecodePath(p) => read_bytes(&p)?,
        InputKind::BytecodeBytes(b) => b,
        InputKind::SourcePath(p) => {
            anyhow::bail!("'inspect' attend un bytecode, pas une source : {}", display(&p))
        },
        InputKind::SourceStdin => anyhow::bail!("'inspect' attend un bytecode sur stdin"),
    };
    let text = render_inspect(&bytes, task.json)?;
    let mut w = BufWriter::new(io::stdout().lock());
    w.write_all(text.as_bytes())?;
    w.flush()?;
    Ok(())
}

/// Rendu de l'en-tête d'un bytecode (texte aligné ou JSON).
pub fn render_inspect(bytes: &[u8], json: bool) -> Result<String> {
    let info = bytecode::inspect(bytes).context("bytecode illisible")?;
    if json {
        return Ok(format!("{}\n", serde_json::to_string_pretty(&info)?));
    }
    let types = info.types_version.map_or_else(|| "-".to_string(), |v| v.to_string());
    Ok(format!(
        "version        {}{}\ntypes_version  {}\ntaille         {} octets\n",
        info.version,
        if info.known_version { "" } else { " (inconnue)" },
        types,
        info.len,
    ))
}

/// Enveloppe `sinks` : le sink `error` lève `flag` avant de transmettre.
fn flag_errors(sinks: OutputSinks, flag: Rc<Cell<bool>>) -> OutputSinks {
    let (p, w, e) = (sinks.clone(), sinks.clone(), sinks);
    OutputSinks::new(
        move |v| p.emit(Channel::Print, v),
        move |v| w.emit(Channel::Warn, v),
        move |v| {
            flag.set(true);
            e.emit(Channel::Error, v);
        },
    )
}

// ───────────────────────────── Utilitaires E/S ─────────────────────────────

fn read_source(input: &Input) -> Result<String> {
    match input {
        Input::Stdin => {
            let mut s = String::new();
            io::stdin().read_to_string(&mut s)?;
            Ok(s)
        },
        Input::Path(p) => {
            let f = File::open(p).with_context(|| format!("ouverture: {}", display(p)))?;
            let mut r = BufReader::new(f);
            let mut s = String::new();
            r.read_to_string(&mut s)?;
            Ok(s)
        },
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut b = Vec::new();
        io::stdin().read_to_end(&mut b)?;
        return Ok(b);
    }
    fs::read(path).with_context(|| format!("lecture bytecode: {}", display(path)))
}

fn chunk_name(path: &Path) -> String {
    path.file_name().map_or_else(|| "stdin".to_string(), |n| n.to_string_lossy().into_owned())
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("chemin de sortie sans parent: {}", display(path)))?;
    let tmp = unique_tmp_path(parent, path.file_name().unwrap_or_default());
    {
        let mut w = BufWriter::new(File::create(&tmp)?);
        w.write_all(bytes)?;
        w.flush()?;
    }
    if path.exists() {
        // Windows : rename sur cible existante peut échouer
        let _ = fs::remove_file(path);
    }
    fs::rename(&tmp, path).or_else(|_| {
        fs::copy(&tmp, path).map(|_| ()).and_then(|()| fs::remove_file(&tmp))
    })?;
    Ok(())
}

fn unique_tmp_path(dir: &Path, base: &std::ffi::OsStr) -> PathBuf {
    let mut i = 0u32;
    loop {
        let candidate = dir.join(format!("{}.tmp{}", base.to_string_lossy(), i));
        if !candidate.exists() {
            return candidate;
        }
        i = i.wrapping_add(1);
    }
}

fn default_bytecode_path(src: &Path) -> PathBuf {
    let stem = src.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
    let mut p = src.with_file_name(stem);
    p.set_extension(BYTECODE_EXTENSION);
    p
}

fn display(p: &Path) -> String { p.to_string_lossy().to_string() }

// ───────────────────────────── Sorties jolies ─────────────────────────────

fn status_ok(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.green().bold(), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{tag} {msg}");
    }
}

fn status_info(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.blue().bold(), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{tag} {msg}");
    }
}

// ───────────────────────────── Tests ─────────────────────────────
