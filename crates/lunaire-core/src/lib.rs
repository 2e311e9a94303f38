//! lunaire-core : primitives partagées, indépendantes de l'interpréteur
//!
//! Fournit :
//! - `HostError` + alias `HostResult<T>` : taxonomie d'erreurs côté hôte
//! - `CompileConfig`, `VmConfig` : bloc de configuration de compilation + options VM
//! - `Lifecycle`, `VmState` : machine d'états compile → load → execute → dispose
//! - `bytecode` : lecture de l'en-tête d'un bytecode Luau (version, payload d'erreur)
//!
//! Aucune dépendance sur la VM elle-même : `lunaire-runtime` branche ces pièces
//! sur l'interpréteur Luau.
//!
//! Features :
//! - `serde` (par défaut) : derive (dé)sérialisation + chargement JSON de la config

#![deny(missing_docs)]
#![forbid(unsafe_code)]

/* ─────────────────────────── Modules publics ─────────────────────────── */

/// Inspection de l'en-tête d'un bytecode Luau.
pub mod bytecode;
mod config;
mod error;
mod lifecycle;

pub use config::{CompileConfig, VmConfig, MAX_LEVEL};
pub use error::{HostError, HostResult};
pub use lifecycle::{Lifecycle, Releases, VmState};

/* ─────────────────────────── Diagnostics fixes ─────────────────────────── */

/// Message envoyé au sink `error` quand le chargement du bytecode échoue.
pub const LOAD_ERROR_DIAGNOSTIC: &str = "Error loading bytecode";

/// Message de repli quand une erreur d'exécution n'a pas de texte lisible.
pub const UNKNOWN_ERROR_DIAGNOSTIC: &str = "unknown error";

/// Extension conventionnelle des fichiers de bytecode produits par `lunaire`.
pub const BYTECODE_EXTENSION: &str = "luauc";

/* ─────────────────────────── Prélude (reexports utiles) ─────────────────────────── */

/// Prélude pratique pour importer les types clés du crate.
pub mod prelude {
    /// Réexports utiles pour une importation rapide.
    pub use super::{
        bytecode::{inspect, BytecodeInfo},
        CompileConfig, HostError, HostResult, Lifecycle, Releases, VmConfig, VmState,
        LOAD_ERROR_DIAGNOSTIC, UNKNOWN_ERROR_DIAGNOSTIC,
    };
}

/* ─────────────────────────── Tests ─────────────────────────── */
