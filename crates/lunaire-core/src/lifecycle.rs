//! lifecycle.rs : Machine d'états d'une instance de VM
//!
//! ```text
//! Created ──compile*──► Created ──load ok──► Loaded ──execute*──► Loaded
//!    │                     │
//!    │ compile ko          │ load ko
//!    ▼                     ▼
//! Released ◄───────────────┘          (dispose depuis n'importe quel état → Disposed)
//! ```
//!
//! Ce module ne touche à aucune ressource native : il tient la comptabilité
//! (qui a été libéré, combien de fois) et tranche les préconditions. La VM
//! consulte `begin_*` avant chaque opération et applique les libérations que
//! `fail_compile` / `fail_load` / `dispose` lui renvoient.

use crate::{HostError, HostResult};

/// État observable d'une VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmState {
    /// Construite, rien de chargé.
    Created,
    /// Un chunk est chargé et prêt à être exécuté.
    Loaded,
    /// Compile ou load a échoué : ressources libérées, instance inutilisable.
    Released,
    /// `dispose` a été appelé (terminal).
    Disposed,
}

/// Compteur de libérations par ressource (jamais plus de 1 chacune).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Releases {
    /// Libérations de l'interpréteur natif.
    pub interpreter: u32,
    /// Libérations du bloc de configuration.
    pub config: u32,
}

impl Releases {
    /// Aucune libération.
    pub const NONE: Self = Self { interpreter: 0, config: 0 };

    /// Vrai si rien n'est à libérer.
    pub const fn is_empty(&self) -> bool { self.interpreter == 0 && self.config == 0 }
}

/// Comptabilité du cycle de vie d'une VM.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    loaded: bool,
    disposed: bool,
    interpreter_released: bool,
    config_released: bool,
    releases: Releases,
    compilations: u64,
    executions: u64,
}

impl Lifecycle {
    /// Instance neuve (état `Created`).
    pub fn new() -> Self { Self::default() }

    /// État courant.
    pub const fn state(&self) -> VmState {
        if self.disposed {
            VmState::Disposed
        } else if self.interpreter_released {
            VmState::Released
        } else if self.loaded {
            VmState::Loaded
        } else if self.config_released {
            VmState::Released
        } else {
            VmState::Created
        }
    }

    /// Un chunk a été chargé avec succès (ne revient jamais à `false`).
    pub const fn is_loaded(&self) -> bool { self.loaded }
    /// `dispose` a déjà eu lieu.
    pub const fn is_disposed(&self) -> bool { self.disposed }
    /// Libérations cumulées.
    pub const fn releases(&self) -> Releases { self.releases }
    /// Nombre de compilations tentées.
    pub const fn compilations(&self) -> u64 { self.compilations }
    /// Nombre d'exécutions menées jusqu'à l'interpréteur.
    pub const fn executions(&self) -> u64 { self.executions }

    /* ------------------------------ Compile ------------------------------ */

    /// Précondition de `Compile` ; compte la tentative.
    pub fn begin_compile(&mut self) -> HostResult<()> {
        if self.disposed {
            return Err(HostError::Disposed);
        }
        if self.config_released || self.interpreter_released {
            return Err(HostError::Released);
        }
        self.compilations += 1;
        Ok(())
    }

    /// Le compilateur n'a rien produit : le bloc de configuration part.
    pub fn fail_compile(&mut self) -> Releases {
        Releases { interpreter: 0, config: u32::from(self.release_config()) }
    }

    /* ------------------------------- Load -------------------------------- */

    /// Précondition de `Load`.
    pub fn begin_load(&self) -> HostResult<()> {
        if self.loaded {
            return Err(HostError::AlreadyLoaded);
        }
        if self.disposed {
            return Err(HostError::Disposed);
        }
        if self.config_released || self.interpreter_released {
            return Err(HostError::Released);
        }
        Ok(())
    }

    /// Chargement réussi.
    pub fn finish_load(&mut self) { self.loaded = true; }

    /// Chargement raté : interpréteur et configuration partent ensemble.
    pub fn fail_load(&mut self) -> Releases {
        Releases {
            interpreter: u32::from(self.release_interpreter()),
            config: u32::from(self.release_config()),
        }
    }

    /* ------------------------------ Execute ------------------------------ */

    /// Précondition de `Execute`.
    pub fn begin_execute(&self) -> HostResult<()> {
        if !self.loaded {
            return Err(HostError::NotLoaded);
        }
        if self.disposed {
            return Err(HostError::Disposed);
        }
        if self.interpreter_released {
            return Err(HostError::Released);
        }
        Ok(())
    }

    /// L'interpréteur a été invoqué (succès ou erreur script).
    pub fn finish_execute(&mut self) { self.executions += 1; }

    /* ------------------------------ Dispose ------------------------------ */

    /// Passe en `Disposed` et renvoie ce qui reste à libérer. Idempotent :
    /// un second appel renvoie `Releases::NONE`.
    pub fn dispose(&mut self) -> Releases {
        if self.disposed {
            return Releases::NONE;
        }
        self.disposed = true;
        Releases {
            interpreter: u32::from(self.release_interpreter()),
            config: u32::from(self.release_config()),
        }
    }

    fn release_interpreter(&mut self) -> bool {
        if self.interpreter_released {
            return false;
        }
        self.interpreter_released = true;
        self.releases.interpreter += 1;
        true
    }

    fn release_config(&mut self) -> bool {
        if self.config_released {
            return false;
        }
        self.config_released = true;
        self.releases.config += 1;
        true
    }
}

/* --------------------------------- Tests --------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn happy_path() {
        let mut life = Lifecycle::new();
        life.begin_compile().unwrap();
        life.begin_load().unwrap();
        life.finish_load();
        assert_eq!(life.state(), VmState::Loaded);
        life.begin_execute().unwrap();
        life.finish_execute();
        life.begin_execute().unwrap();
        life.finish_execute();
        assert_eq!(life.executions(), 2);

        let released = life.dispose();
        assert_eq!(released, Releases { interpreter: 1, config: 1 });
        assert_eq!(life.state(), VmState::Disposed);
    }

    #[test]
    fn second_load_is_rejected() {
        let mut life = Lifecycle::new();
        life.finish_load();
        assert!(matches!(life.begin_load(), Err(HostError::AlreadyLoaded)));
        assert!(life.is_loaded());
    }

    #[test]
    fn execute_before_load() {
        let life = Lifecycle::new();
        assert!(matches!(life.begin_execute(), Err(HostError::NotLoaded)));
        assert_eq!(life.executions(), 0);
    }

    #[test]
    fn failed_compile_releases_config_once() {
        let mut life = Lifecycle::new();
        life.begin_compile().unwrap();
        assert_eq!(life.fail_compile(), Releases { interpreter: 0, config: 1 });
        assert_eq!(life.state(), VmState::Released);
        assert!(matches!(life.begin_compile(), Err(HostError::Released)));
        assert!(matches!(life.begin_load(), Err(HostError::Released)));

        assert_eq!(life.dispose(), Releases { interpreter: 1, config: 0 });
        assert!(life.dispose().is_empty());
        assert_eq!(life.releases(), Releases { interpreter: 1, config: 1 });
    }

    #[test]
    fn failed_load_then_dispose() {
        let mut life = Lifecycle::new();
        life.begin_load().unwrap();
        assert_eq!(life.fail_load(), Releases { interpreter: 1, config: 1 });
        assert!(matches!(life.begin_execute(), Err(HostError::NotLoaded)));
        assert!(life.dispose().is_empty());
        assert_eq!(life.releases(), Releases { interpreter: 1, config: 1 });
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Compile { ok: bool },
        Load { ok: bool },
        Execute,
        Dispose,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<bool>().prop_map(|ok| Op::Compile { ok }),
            any::<bool>().prop_map(|ok| Op::Load { ok }),
            Just(Op::Execute),
            Just(Op::Dispose),
        ]
    }

    proptest! {
        #[test]
        fn every_resource_is_released_at_most_once(ops in prop::collection::vec(op(), 0..24)) {
            let mut life = Lifecycle::new();
            let mut was_loaded = false;
            for op in ops {
                match op {
                    Op::Compile { ok } => {
                        if life.begin_compile().is_ok() && !ok {
                            life.fail_compile();
                        }
                    }
                    Op::Load { ok } => {
                        let before = life.is_loaded();
                        match life.begin_load() {
                            Ok(()) if ok => life.finish_load(),
                            Ok(()) => { life.fail_load(); }
                            Err(HostError::AlreadyLoaded) => { prop_assert!(before); }
                            Err(_) => {}
                        }
                    }
                    Op::Execute => {
                        if life.begin_execute().is_ok() {
                            life.finish_execute();
                        }
                    }
                    Op::Dispose => { life.dispose(); }
                }
                if was_loaded {
                    prop_assert!(life.is_loaded());
                }
                was_loaded = life.is_loaded();
                let r = life.releases();
                prop_assert!(r.interpreter <= 1 && r.config <= 1);
            }
            life.dispose();
            prop_assert_eq!(life.releases(), Releases { interpreter: 1, config: 1 });
            prop_assert!(life.begin_execute().is_err());
        }
    }
}
