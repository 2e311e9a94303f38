//! Erreurs côté hôte.
//!
//! Deux familles cohabitent :
//! - violations du contrat hôte (`AlreadyLoaded`, `NotLoaded`, `FileNotFound`,
//!   `Released`, `Disposed`) : mauvaise utilisation de l'API ;
//! - erreurs de données (`Compile`, `TypeMismatch`, `Script`, …) remontées au
//!   code hôte qui a initié l'opération.
//!
//! Les erreurs d'exécution *script* (levées pendant `Execute`) ne passent
//! jamais par ce type : elles partent vers le sink `error`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Résultat de l'API hôte.
pub type HostResult<T> = std::result::Result<T, HostError>;

/// Erreurs hôte.
#[derive(Debug, Error)]
pub enum HostError {
    /// `Load` appelé une seconde fois sur la même instance.
    #[error("VM déjà chargée : disposez cette VM et créez-en une nouvelle")]
    AlreadyLoaded,

    /// `Execute` appelé sans chunk chargé avec succès.
    #[error("exécution impossible : aucun chunk chargé")]
    NotLoaded,

    /// `DoFile` sur un chemin inexistant.
    #[error("fichier introuvable : {}", .path.display())]
    FileNotFound {
        /// Chemin demandé.
        path: PathBuf,
    },

    /// Le compilateur n'a produit aucun bytecode exploitable.
    #[error("erreur de compilation : {message}")]
    Compile {
        /// Diagnostic du compilateur.
        message: String,
    },

    /// Les ressources natives ont déjà été libérées (compile/load en échec).
    #[error("ressources de la VM déjà libérées (échec de compilation ou de chargement)")]
    Released,

    /// VM (ou handle) disposé.
    #[error("VM disposée")]
    Disposed,

    /// Valeur script incompatible avec le type hôte demandé.
    #[error("type incompatible : attendu {expected}, reçu {found}")]
    TypeMismatch {
        /// Type hôte demandé.
        expected: &'static str,
        /// Type (ou valeur) effectivement obtenu.
        found: String,
    },

    /// Valeur script que le pont ne sait pas convertir.
    #[error("type non pris en charge par le pont : {type_name}")]
    Unsupported {
        /// Nom du type côté script.
        type_name: String,
    },

    /// Bytecode refusé avant même d'atteindre l'interpréteur.
    #[error("bytecode invalide : {0}")]
    InvalidBytecode(String),

    /// Erreur levée par l'interpréteur pendant un appel initié par l'hôte.
    #[error("erreur script : {0}")]
    Script(String),

    /// Configuration invalide.
    #[error("configuration invalide : {0}")]
    Config(String),

    /// I/O hôte.
    #[error("io : {0}")]
    Io(#[from] io::Error),
}

impl HostError {
    /// Construit une erreur `TypeMismatch`.
    pub fn type_mismatch(expected: &'static str, found: impl Into<String>) -> Self {
        Self::TypeMismatch { expected, found: found.into() }
    }

    /// Construit une erreur `Script`.
    pub fn script(msg: impl Into<String>) -> Self { Self::Script(msg.into()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_path() {
        let err = HostError::FileNotFound { path: PathBuf::from("nope/script.luau") };
        assert!(err.to_string().contains("nope/script.luau"));
    }

    #[test]
    fn io_converts() {
        let err: HostError = io::Error::new(io::ErrorKind::Other, "disque plein").into();
        assert!(matches!(err, HostError::Io(_)));
    }
}
