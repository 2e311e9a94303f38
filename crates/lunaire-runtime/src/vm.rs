//! `Vm` : une instance d'interpréteur Luau et son cycle de vie.
//!
//! ```text
//! Vm::new(print, warn, error)
//!   └─ compile(src) ─► bytecode ─► load(name, bytecode) ─► execute()*
//!                 ╲ échec : config libérée  ╲ échec : sink `error` + tout libéré
//! dispose() : depuis n'importe quel état, idempotent (aussi appelé par Drop)
//! ```
//!
//! Contrat d'usage :
//! - `load` une seule fois par instance (`AlreadyLoaded` ensuite) ;
//! - `execute` seulement après un `load` réussi (`NotLoaded` sinon) ;
//! - les erreurs script pendant `execute` vont au sink `error`, jamais en `Err`.
//!
//! La VM détient la seule référence forte vers l'interpréteur ; le pont et
//! les `CallableHandle` n'en ont qu'une faible. `Vm` n'est pas `Send`.

use std::path::Path;
use std::rc::Rc;

use log::{debug, warn};
use lunaire_core::{
    bytecode, CompileConfig, HostError, HostResult, Lifecycle, Releases, VmConfig, VmState,
    LOAD_ERROR_DIAGNOSTIC, UNKNOWN_ERROR_DIAGNOSTIC,
};
use mlua::{ChunkMode, Compiler, Lua, MultiValue};

use crate::bridge::{error_message, IntoHost, ValueBridge};
use crate::callable::CallableHandle;
use crate::sink::{Channel, OutputSinks};
use crate::value::Value;

struct LoadedChunk {
    name: String,
    function: mlua::Function,
}

/// Instance de VM Luau.
pub struct Vm {
    interpreter: Option<Rc<Lua>>,
    compiler: Option<Compiler>,
    bridge: ValueBridge,
    sinks: OutputSinks,
    chunk: Option<LoadedChunk>,
    lifecycle: Lifecycle,
}

fn compiler_for(cfg: &CompileConfig) -> Compiler {
    Compiler::new()
        .set_optimization_level(cfg.optimization_level)
        .set_debug_level(cfg.debug_level)
        .set_coverage_level(cfg.coverage_level)
        .set_mutable_globals(cfg.mutable_globals.clone())
}

impl Vm {
    /* ---------------------------- Construction ---------------------------- */

    /// Crée une VM (configuration par défaut, mode sandbox) avec trois sinks.
    pub fn new(
        print: impl Fn(Value) + 'static,
        warn: impl Fn(Value) + 'static,
        error: impl Fn(Value) + 'static,
    ) -> HostResult<Self> {
        Self::with_sinks(OutputSinks::new(print, warn, error))
    }

    /// Crée une VM avec des sinks déjà assemblés.
    pub fn with_sinks(sinks: OutputSinks) -> HostResult<Self> { Self::with_config(sinks, &VmConfig::default()) }

    /// Crée une VM avec une configuration explicite.
    ///
    /// Installe `print`/`warn`/`error` comme globales (un argument converti
    /// chacune), puis active le mode sandbox si demandé.
    pub fn with_config(sinks: OutputSinks, config: &VmConfig) -> HostResult<Self> {
        config.validate()?;
        let lua = Rc::new(Lua::new());
        let bridge = ValueBridge::new(Rc::downgrade(&lua));

        for (channel, sink) in sinks.channels() {
            let conv = bridge.clone();
            let forward = lua
                .create_function(move |_, args: MultiValue| {
                    let first = args.into_iter().next().unwrap_or(mlua::Value::Nil);
                    let type_name = first.type_name();
                    let value = conv
                        .from_lua(first, 0)
                        .unwrap_or_else(|_| Value::String(format!("<{type_name}>")));
                    sink(value);
                    Ok(())
                })
                .map_err(IntoHost::into_host)?;
            lua.globals().set(channel.global_name(), forward).map_err(IntoHost::into_host)?;
        }
        if config.sandbox {
            lua.sandbox(true).map_err(IntoHost::into_host)?;
        }
        debug!("VM créée (sandbox = {})", config.sandbox);

        Ok(Self {
            interpreter: Some(lua),
            compiler: Some(compiler_for(&config.compile)),
            bridge,
            sinks,
            chunk: None,
            lifecycle: Lifecycle::new(),
        })
    }

    /* ------------------------------ Accès ------------------------------ */

    /// Pont d'enregistrement (fonctions, objets, types hôte).
    ///
    /// Les globales doivent être installées avant `load` : le bytecode
    /// résout ses imports de globales au chargement.
    pub const fn bridge(&self) -> &ValueBridge { &self.bridge }

    /// État courant.
    pub const fn state(&self) -> VmState { self.lifecycle.state() }

    /// Comptabilité du cycle de vie.
    pub const fn lifecycle(&self) -> &Lifecycle { &self.lifecycle }

    /// Nom du chunk chargé.
    pub fn chunk_name(&self) -> Option<&str> { self.chunk.as_ref().map(|c| c.name.as_str()) }

    fn interpreter(&self) -> HostResult<&Rc<Lua>> {
        if self.lifecycle.is_disposed() {
            return Err(HostError::Disposed);
        }
        self.interpreter.as_ref().ok_or(HostError::Released)
    }

    /* ------------------------------ Compile ------------------------------ */

    /// Compile `source` en bytecode.
    ///
    /// En cas d'échec, le diagnostic part aussi vers le sink `error` et le
    /// bloc de configuration est libéré : l'instance ne chargera plus rien.
    pub fn compile(&mut self, source: &str) -> HostResult<Vec<u8>> {
        self.lifecycle.begin_compile()?;
        let compiled = match &self.compiler {
            Some(compiler) => compiler.compile(source).map_err(IntoHost::into_host),
            None => return Err(HostError::Released),
        };
        let failure = match compiled {
            Ok(bytes) => match bytecode::inspect(&bytes) {
                Ok(info) => {
                    debug!("compilé : {} octets, bytecode v{}", info.len, info.version);
                    return Ok(bytes);
                }
                Err(err) => err,
            },
            Err(err) => err,
        };
        let message = match &failure {
            HostError::Compile { message } => message.clone(),
            other => other.to_string(),
        };
        warn!("échec de compilation : {message}");
        self.sinks.emit(Channel::Error, Value::String(message.clone()));
        let released = self.lifecycle.fail_compile();
        self.release(released);
        Err(HostError::Compile { message })
    }

    /* ------------------------------- Load ------------------------------- */

    /// Charge `bytecode` sous le nom de chunk `name`.
    ///
    /// `Ok(false)` si l'interpréteur refuse le bytecode : le sink `error`
    /// reçoit `"Error loading bytecode"` et toutes les ressources natives sont
    /// libérées. Un second appel échoue avec `AlreadyLoaded`.
    pub fn load(&mut self, name: &str, bytecode: &[u8]) -> HostResult<bool> {
        self.lifecycle.begin_load()?;
        let lua = Rc::clone(self.interpreter()?);

        let loaded = match bytecode::inspect(bytecode) {
            Ok(_) => lua
                .load(bytecode)
                .set_name(name)
                .set_mode(ChunkMode::Binary)
                .into_function()
                .map_err(IntoHost::into_host),
            Err(err) => Err(err),
        };
        drop(lua);

        match loaded {
            Ok(function) => {
                self.chunk = Some(LoadedChunk { name: name.to_string(), function });
                self.lifecycle.finish_load();
                debug!("chunk `{name}` chargé");
                Ok(true)
            }
            Err(err) => {
                warn!("chargement de `{name}` refusé : {err}");
                self.sinks.emit(Channel::Error, Value::from(LOAD_ERROR_DIAGNOSTIC));
                let released = self.lifecycle.fail_load();
                self.release(released);
                Ok(false)
            }
        }
    }

    /// Charge du bytecode déjà compilé.
    pub fn do_compiled(&mut self, name: &str, bytecode: &[u8]) -> HostResult<bool> { self.load(name, bytecode) }

    /// Compile puis charge `source`.
    pub fn do_text(&mut self, name: &str, source: &str) -> HostResult<bool> {
        let bytecode = self.compile(source)?;
        self.load(name, &bytecode)
    }

    /// Lit un fichier source et le charge ; le chunk prend le nom de base du
    /// fichier. `FileNotFound` avant toute compilation si le chemin n'existe pas.
    pub fn do_file<P: AsRef<Path>>(&mut self, path: P) -> HostResult<bool> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(HostError::FileNotFound { path: path.to_path_buf() });
        }
        let source = std::fs::read_to_string(path)?;
        let name = path.file_name().map_or_else(
            || path.display().to_string(),
            |n| n.to_string_lossy().into_owned(),
        );
        self.do_text(&name, &source)
    }

    /* ------------------------------ Execute ------------------------------ */

    /// Exécute le chunk chargé jusqu'au bout.
    ///
    /// Une erreur script est envoyée au sink `error` (`"unknown error"` si
    /// elle n'a pas de texte) ; l'appel reste `Ok`. Peut être répété.
    pub fn execute(&mut self) -> HostResult<()> {
        self.lifecycle.begin_execute()?;
        let chunk = self.chunk.as_ref().ok_or(HostError::NotLoaded)?;
        let outcome = chunk.function.call::<()>(());
        self.lifecycle.finish_execute();

        if let Err(err) = outcome {
            let message = error_message(&err).unwrap_or_else(|| UNKNOWN_ERROR_DIAGNOSTIC.to_string());
            warn!("erreur d'exécution dans `{}` : {message}", chunk.name);
            self.sinks.emit(Channel::Error, Value::String(message));
        }
        Ok(())
    }

    /* ----------------------------- Globales ----------------------------- */

    /// Lit la globale `name`.
    pub fn global(&self, name: &str) -> HostResult<Value> {
        let lua = self.interpreter()?;
        let raw = lua.globals().get::<mlua::Value>(name).map_err(IntoHost::into_host)?;
        self.bridge.from_lua(raw, 0)
    }

    /// Handle vers la fonction script globale `name` (`None` si absente).
    pub fn global_callable(&self, name: &str) -> HostResult<Option<CallableHandle>> {
        match self.global(name)? {
            Value::Nil => Ok(None),
            Value::Callable(handle) => Ok(Some(handle)),
            other => Err(HostError::type_mismatch("function", other.type_name())),
        }
    }

    /* ------------------------------ Dispose ------------------------------ */

    /// Libère interpréteur et configuration ; idempotent.
    pub fn dispose(&mut self) -> Releases {
        let released = self.lifecycle.dispose();
        self.release(released);
        if !released.is_empty() {
            debug!("VM disposée");
        }
        released
    }

    fn release(&mut self, released: Releases) {
        if released.config > 0 {
            self.compiler = None;
        }
        if released.interpreter > 0 {
            self.chunk = None;
            if let Some(lua) = self.interpreter.take() {
                let handles = self.bridge.release_retained(&lua);
                debug!("interpréteur libéré ({handles} handle(s) retenu(s))");
            }
        }
    }
}

impl Drop for Vm {
    fn drop(&mut self) { self.dispose(); }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("state", &self.state())
            .field("chunk", &self.chunk_name())
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

/* --------------------------------- Tests --------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Captured;
    use pretty_assertions::assert_eq;

    fn vm() -> (Vm, Captured) {
        let cap = Captured::new();
        (Vm::with_sinks(cap.sinks()).unwrap(), cap)
    }

    #[test]
    fn sinks_are_globals() {
        let (mut vm, cap) = vm();
        assert!(vm.do_text("sinks", "print('a') warn(2) error('e')").unwrap());
        vm.execute().unwrap();
        assert_eq!(cap.lines(Channel::Print), vec!["a".to_string()]);
        assert_eq!(cap.values(Channel::Warn), vec![Value::Integer(2)]);
        assert_eq!(cap.lines(Channel::Error), vec!["e".to_string()]);
    }

    #[test]
    fn compile_failure_reports_and_releases_config() {
        let (mut vm, cap) = vm();
        let err = vm.compile("local = 1").unwrap_err();
        assert!(matches!(err, HostError::Compile { .. }));
        assert_eq!(cap.values(Channel::Error).len(), 1);
        assert_eq!(vm.state(), VmState::Released);
        assert_eq!(vm.lifecycle().releases(), Releases { interpreter: 0, config: 1 });
        assert!(matches!(vm.compile("return 1"), Err(HostError::Released)));
    }

    #[test]
    fn repeated_execute_runs_chunk_again() {
        let (mut vm, cap) = vm();
        vm.do_text("again", "print('tick')").unwrap();
        vm.execute().unwrap();
        vm.execute().unwrap();
        assert_eq!(cap.lines(Channel::Print).len(), 2);
        assert_eq!(vm.lifecycle().executions(), 2);
    }

    #[test]
    fn global_callable_rejects_non_functions() {
        let (mut vm, _cap) = vm();
        vm.do_text("g", "answer = 42").unwrap();
        vm.execute().unwrap();
        assert_eq!(vm.global("answer").unwrap(), Value::Integer(42));
        assert!(vm.global_callable("missing").unwrap().is_none());
        assert!(matches!(vm.global_callable("answer"), Err(HostError::TypeMismatch { .. })));
    }

    #[test]
    fn chunk_name_in_runtime_errors() {
        let (mut vm, cap) = vm();
        vm.do_text("boom.luau", "local t = nil\nlocal _ = t.x").unwrap();
        assert_eq!(vm.chunk_name(), Some("boom.luau"));
        vm.execute().unwrap();
        assert_eq!(
            cap.lines(Channel::Error),
            vec![r#"[string "boom.luau"]:2: attempt to index nil with 'x'"#.to_string()]
        );
    }

    #[test]
    fn config_is_validated() {
        let cfg = VmConfig {
            compile: CompileConfig { optimization_level: 7, ..CompileConfig::default() },
            sandbox: true,
        };
        assert!(matches!(Vm::with_config(Captured::new().sinks(), &cfg), Err(HostError::Config(_))));
    }
}
