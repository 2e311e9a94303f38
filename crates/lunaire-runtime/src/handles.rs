//! Handles natifs : ancres de registre qui gardent une valeur hôte
//! joignable depuis l'interpréteur.
//!
//! Un `NativeHandles` appartient soit à un `CallableHandle` (handles créés
//! pour ses arguments), soit à la VM (enregistrements d'installation). Il est
//! vidé d'un coup, jamais élément par élément.

use log::{trace, warn};
use mlua::{Lua, RegistryKey};

/// Collection possédée de handles natifs.
#[derive(Debug, Default)]
pub struct NativeHandles {
    keys: Vec<RegistryKey>,
    allocated: usize,
}

impl NativeHandles {
    /// Collection vide.
    pub fn new() -> Self { Self::default() }

    /// Ancre `value` dans le registre de `lua` et garde la clé.
    pub fn pin(&mut self, lua: &Lua, value: mlua::Value) -> mlua::Result<()> {
        let key = lua.create_registry_value(value)?;
        self.keys.push(key);
        self.allocated += 1;
        Ok(())
    }

    /// Handles actuellement détenus.
    pub fn len(&self) -> usize { self.keys.len() }

    /// Vrai si aucun handle n'est détenu.
    pub fn is_empty(&self) -> bool { self.keys.is_empty() }

    /// Total alloué depuis la création (libérés compris).
    pub const fn allocated(&self) -> usize { self.allocated }

    /// Libère tout via l'interpréteur ; renvoie le nombre de handles vidés.
    pub fn release_all(&mut self, lua: &Lua) -> usize {
        let count = self.keys.len();
        for key in self.keys.drain(..) {
            if let Err(err) = lua.remove_registry_value(key) {
                warn!("handle natif non libéré : {err}");
            }
        }
        trace!("{count} handle(s) natif(s) libéré(s)");
        count
    }

    /// L'interpréteur a déjà disparu : on lâche les clés sans lui.
    pub fn abandon(&mut self) -> usize {
        let count = self.keys.len();
        self.keys.clear();
        if count > 0 {
            trace!("{count} handle(s) natif(s) abandonné(s), interpréteur déjà fermé");
        }
        count
    }
}
