//! `CallableHandle` : référence hôte vers une fonction script.
//!
//! Chaque appel convertit ses arguments via le pont ; les handles natifs
//! créés au passage (fonctions hôte, objets) s'accumulent dans le handle et
//! ne sont libérés qu'au `dispose` (ou au `Drop`), tous d'un coup.
//!
//! Le handle ne garde la VM que par référence faible : après le démontage de
//! la VM, tout appel renvoie `HostError::Disposed`.

use std::fmt;

use log::{debug, trace};
use lunaire_core::{HostError, HostResult};
use mlua::{FromLuaMulti, MultiValue};

use crate::bridge::{IntoHost, ValueBridge};
use crate::handles::NativeHandles;
use crate::value::{FromValue, Value};

/// Fonction script appelable depuis l'hôte.
pub struct CallableHandle {
    bridge: ValueBridge,
    function: mlua::Function,
    handles: NativeHandles,
    disposed: bool,
}

impl CallableHandle {
    pub(crate) fn new(bridge: ValueBridge, function: mlua::Function) -> Self {
        Self { bridge, function, handles: NativeHandles::new(), disposed: false }
    }

    pub(crate) const fn function(&self) -> &mlua::Function { &self.function }

    /// Même fonction script que `other`.
    pub fn same_function(&self, other: &Self) -> bool { self.function == other.function }

    /// Appel sans résultat.
    pub fn call(&mut self, args: &[Value]) -> HostResult<()> { self.invoke::<()>(args) }

    /// Appel avec un résultat converti en `T`.
    ///
    /// `nil` côté script donne `Ok(None)` ; un type incompatible donne
    /// `TypeMismatch` (les primitifs numériques sont convertis entre eux).
    pub fn call_typed<T: FromValue>(&mut self, args: &[Value]) -> HostResult<Option<T>> {
        let result = self.invoke::<mlua::Value>(args)?;
        match self.bridge.get_value(result)? {
            Value::Nil => Ok(None),
            value => T::from_value(value).map(Some),
        }
    }

    fn invoke<R: FromLuaMulti>(&mut self, args: &[Value]) -> HostResult<R> {
        if self.disposed {
            return Err(HostError::Disposed);
        }
        let lua = self.bridge.lua()?;
        let before = self.handles.len();
        let mut pushed = Vec::with_capacity(args.len());
        for arg in args {
            pushed.push(self.bridge.to_lua(&lua, arg, &mut self.handles).map_err(IntoHost::into_host)?);
        }
        trace!(
            "appel script : {} arg(s), {} handle(s) natif(s) ajouté(s)",
            args.len(),
            self.handles.len() - before
        );
        self.function.call::<R>(pushed.into_iter().collect::<MultiValue>()).map_err(IntoHost::into_host)
    }

    /// Handles natifs actuellement détenus.
    pub fn handle_count(&self) -> usize { self.handles.len() }

    /// Handles natifs alloués depuis la création.
    pub const fn allocated_handles(&self) -> usize { self.handles.allocated() }

    /// Vrai après `dispose`.
    pub const fn is_disposed(&self) -> bool { self.disposed }

    /// Libère tous les handles accumulés ; renvoie leur nombre. Idempotent.
    ///
    /// Si la VM a déjà disparu, les handles sont abandonnés (leur registre
    /// est parti avec l'interpréteur) et comptés quand même.
    pub fn dispose(&mut self) -> usize {
        if self.disposed {
            return 0;
        }
        self.disposed = true;
        let count = match self.bridge.lua() {
            Ok(lua) => self.handles.release_all(&lua),
            Err(_) => self.handles.abandon(),
        };
        if count > 0 {
            debug!("CallableHandle disposé : {count} handle(s) natif(s)");
        }
        count
    }
}

/// Un clone vise la même fonction mais démarre avec ses propres handles.
impl Clone for CallableHandle {
    fn clone(&self) -> Self { Self::new(self.bridge.clone(), self.function.clone()) }
}

impl Drop for CallableHandle {
    fn drop(&mut self) { self.dispose(); }
}

impl fmt::Debug for CallableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableHandle")
            .field("handles", &self.handles.len())
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}
