//! lunaire-runtime : frontière hôte ↔ VM Luau
//!
//! - `Vm` : une instance d'interpréteur, compile → load → execute → dispose
//! - `CallableHandle` : fonction script appelée depuis l'hôte, avec ses
//!   handles natifs libérés en bloc au `dispose`
//! - `ValueBridge` : conversions hôte ↔ VM, installation de globales,
//!   fonctions/objets/types hôte
//! - `Value`, `FromValue` : valeurs échangées et conversions typées
//! - `OutputSinks`, `Captured` : destinations de `print`/`warn`/`error`
//!
//! Modèle mono-thread : rien ici n'est `Send`, aucune synchronisation interne.
//!
//! ```no_run
//! use lunaire_runtime::prelude::*;
//!
//! let mut vm = Vm::with_sinks(OutputSinks::stdio())?;
//! vm.do_text("demo", "counter = 41 function bump() counter += 1 return counter end")?;
//! vm.execute()?;
//! let mut bump = vm.global_callable("bump")?.expect("fonction `bump`");
//! assert_eq!(bump.call_typed::<i64>(&[])?, Some(42));
//! bump.dispose();
//! vm.dispose();
//! # Ok::<(), HostError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]
#![cfg_attr(not(debug_assertions), warn(missing_docs))]

mod bridge;
mod callable;
mod handles;
mod sink;
mod value;
mod vm;

pub use bridge::{error_message, HostType, IntoHost, ValueBridge, MAX_DEPTH};
pub use callable::CallableHandle;
pub use handles::NativeHandles;
pub use sink::{Captured, Channel, OutputSinks};
pub use value::{FromValue, HostFunction, Value};
pub use vm::Vm;

pub use lunaire_core::{HostError, HostResult, VmConfig, VmState};

/// Réexport de l'interpréteur (implémenter `UserData`, manipuler des valeurs brutes).
pub use mlua;

/* -------------------------------- Prelude -------------------------------- */

/// Prelude pratique pour importer d'un coup.
pub mod prelude {
    pub use crate::{
        Captured, CallableHandle, Channel, FromValue, HostError, HostFunction, HostResult,
        HostType, OutputSinks, Value, ValueBridge, Vm, VmConfig, VmState,
    };
    pub use mlua::{UserData, UserDataFields, UserDataMethods};
}
