//! Sinks de sortie : destinations hôte de `print`, `warn` et `error`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::value::Value;

type SinkFn = dyn Fn(Value);

/// Les trois sinks installés à la construction d'une VM.
#[derive(Clone)]
pub struct OutputSinks {
    print: Rc<SinkFn>,
    warn: Rc<SinkFn>,
    error: Rc<SinkFn>,
}

impl OutputSinks {
    /// Sinks fournis par l'hôte.
    pub fn new(
        print: impl Fn(Value) + 'static,
        warn: impl Fn(Value) + 'static,
        error: impl Fn(Value) + 'static,
    ) -> Self {
        Self { print: Rc::new(print), warn: Rc::new(warn), error: Rc::new(error) }
    }

    /// `print`/`warn` sur stdout, `error` sur stderr.
    pub fn stdio() -> Self {
        Self::new(|v| println!("{v}"), |v| println!("{v}"), |v| eprintln!("{v}"))
    }

    /// Envoie `value` vers le sink de `channel`.
    pub fn emit(&self, channel: Channel, value: Value) {
        match channel {
            Channel::Print => (self.print)(value),
            Channel::Warn => (self.warn)(value),
            Channel::Error => (self.error)(value),
        }
    }

    pub(crate) fn channels(&self) -> [(Channel, Rc<SinkFn>); 3] {
        [
            (Channel::Print, Rc::clone(&self.print)),
            (Channel::Warn, Rc::clone(&self.warn)),
            (Channel::Error, Rc::clone(&self.error)),
        ]
    }
}

impl fmt::Debug for OutputSinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("OutputSinks { .. }") }
}

/// Canal de sortie (et nom de la globale script correspondante).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// `print(x)`.
    Print,
    /// `warn(x)`.
    Warn,
    /// `error(x)`, diagnostics de chargement et erreurs d'exécution.
    Error,
}

impl Channel {
    /// Nom de la globale script.
    pub const fn global_name(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/* ------------------------ Outil de capture (tests) ------------------------ */

/// Enregistre chaque appel de sink, par canal (utile en tests/outillage).
#[derive(Debug, Default, Clone)]
pub struct Captured(Rc<RefCell<Vec<(Channel, Value)>>>);

impl Captured {
    /// Capture vide.
    pub fn new() -> Self { Self::default() }

    /// Sinks qui alimentent cette capture.
    pub fn sinks(&self) -> OutputSinks {
        let (p, w, e) = (self.clone(), self.clone(), self.clone());
        OutputSinks::new(
            move |v| p.push(Channel::Print, v),
            move |v| w.push(Channel::Warn, v),
            move |v| e.push(Channel::Error, v),
        )
    }

    fn push(&self, channel: Channel, value: Value) { self.0.borrow_mut().push((channel, value)); }

    /// Valeurs reçues sur `channel`, dans l'ordre.
    pub fn values(&self, channel: Channel) -> Vec<Value> {
        self.0.borrow().iter().filter(|(c, _)| *c == channel).map(|(_, v)| v.clone()).collect()
    }

    /// Rendu texte des valeurs reçues sur `channel`.
    pub fn lines(&self, channel: Channel) -> Vec<String> {
        self.values(channel).iter().map(ToString::to_string).collect()
    }

    /// Nombre total d'appels, tous canaux confondus.
    pub fn len(&self) -> usize { self.0.borrow().len() }

    /// Aucun appel reçu.
    pub fn is_empty(&self) -> bool { self.0.borrow().is_empty() }
}
