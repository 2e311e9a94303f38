//! Configuration de compilation et options de VM.
//!
//! `CompileConfig` est le « bloc de configuration » passé au compilateur Luau :
//! une VM en possède exactement un, alloué à la construction et libéré une
//! seule fois (dispose ou échec de compile/load).

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "serde")]
use std::path::Path;

use crate::{HostError, HostResult};

/// Niveau maximal accepté par le compilateur Luau (optimisation, debug, couverture).
pub const MAX_LEVEL: u8 = 2;

/// Options du compilateur Luau.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct CompileConfig {
    /// 0 = aucune, 1 = sûre pour le debug (défaut), 2 = agressive.
    pub optimization_level: u8,
    /// 0 = aucune info, 1 = lignes + noms de fonctions (défaut), 2 = + locals.
    pub debug_level: u8,
    /// 0 = pas de couverture (défaut), 1 = instructions, 2 = expressions.
    pub coverage_level: u8,
    /// Globales que le compilateur ne doit pas supposer immuables.
    pub mutable_globals: Vec<String>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self { optimization_level: 1, debug_level: 1, coverage_level: 0, mutable_globals: Vec::new() }
    }
}

impl CompileConfig {
    /// Vérifie que chaque niveau reste dans `0..=MAX_LEVEL`.
    pub fn validate(&self) -> HostResult<()> {
        for (name, level) in [
            ("optimization_level", self.optimization_level),
            ("debug_level", self.debug_level),
            ("coverage_level", self.coverage_level),
        ] {
            if level > MAX_LEVEL {
                return Err(HostError::Config(format!("{name} = {level} (max {MAX_LEVEL})")));
            }
        }
        if let Some(bad) = self.mutable_globals.iter().find(|g| g.is_empty()) {
            return Err(HostError::Config(format!("nom de globale mutable vide : {bad:?}")));
        }
        Ok(())
    }
}

/// Options de construction d'une VM.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct VmConfig {
    /// Bloc de configuration transmis au compilateur.
    pub compile: CompileConfig,
    /// Mode « safe » de l'interpréteur (globales de base en lecture seule,
    /// environnement isolé pour le code de premier niveau).
    pub sandbox: bool,
}

impl Default for VmConfig {
    fn default() -> Self { Self { compile: CompileConfig::default(), sandbox: true } }
}

impl VmConfig {
    /// Valide la configuration complète.
    pub fn validate(&self) -> HostResult<()> { self.compile.validate() }

    /// Lit une configuration JSON (champs absents = valeurs par défaut).
    #[cfg(feature = "serde")]
    pub fn from_json(text: &str) -> HostResult<Self> {
        let cfg: Self = serde_json::from_str(text).map_err(|e| HostError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Lit une configuration JSON depuis un fichier.
    #[cfg(feature = "serde")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> HostResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(HostError::FileNotFound { path: path.to_path_buf() });
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}
