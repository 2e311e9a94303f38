//! Lecture de l'en-tête d'un bytecode Luau.
//!
//! Format (début de buffer) :
//! ```text
//! version u8            (0 = payload d'erreur du compilateur)
//! [types_version u8]    (présent à partir de la version 4)
//! ...                   (corps opaque, interprété par luau_load)
//! ```
//! Quand la compilation échoue, le compilateur Luau renvoie quand même un
//! buffer : un octet `0` suivi du message (`":<ligne>: <texte>"`).

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{HostError, HostResult};

/// Plus ancienne version de bytecode acceptée par les VM Luau actuelles.
pub const MIN_VERSION: u8 = 3;
/// Plus récente version connue de ce crate.
pub const MAX_KNOWN_VERSION: u8 = 6;

/// Résumé d'un buffer de bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BytecodeInfo {
    /// Octet de version.
    pub version: u8,
    /// Version de l'encodage des types (versions ≥ 4).
    pub types_version: Option<u8>,
    /// Taille totale en octets.
    pub len: usize,
    /// Version dans l'intervalle connu `MIN_VERSION..=MAX_KNOWN_VERSION`.
    pub known_version: bool,
}

/// Décode l'en-tête. Un payload d'erreur devient `HostError::Compile`.
pub fn inspect(bytes: &[u8]) -> HostResult<BytecodeInfo> {
    let (&version, rest) =
        bytes.split_first().ok_or_else(|| HostError::InvalidBytecode("buffer vide".into()))?;
    if version == 0 {
        return Err(HostError::Compile { message: error_payload_message(rest) });
    }
    let types_version = if version >= 4 { rest.first().copied() } else { None };
    Ok(BytecodeInfo {
        version,
        types_version,
        len: bytes.len(),
        known_version: (MIN_VERSION..=MAX_KNOWN_VERSION).contains(&version),
    })
}

fn error_payload_message(rest: &[u8]) -> String {
    let text = String::from_utf8_lossy(rest);
    let text = text.strip_prefix(':').unwrap_or(&text).trim();
    if text.is_empty() { "erreur de compilation sans message".to_string() } else { text.to_string() }
}
