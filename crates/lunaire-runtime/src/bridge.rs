//! Pont de valeurs hôte ↔ VM.
//!
//! Le pont ne possède pas l'interpréteur (`Weak<Lua>`) : il convertit,
//! installe des globales, et range les handles natifs qu'il crée dans le
//! puits qu'on lui donne. Les enregistrements faits par le code d'installation
//! vont dans le puits retenu par la VM, libéré au démontage ; les valeurs de
//! retour des fonctions hôte ne sont pas retenues.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use log::{debug, trace};
use lunaire_core::{HostError, HostResult};
use mlua::{AnyUserData, Lua, MultiValue, UserData};

use crate::callable::CallableHandle;
use crate::handles::NativeHandles;
use crate::value::{format_number, HostFunction, Value};

/// Profondeur maximale de tables imbriquées converties vers l'hôte.
pub const MAX_DEPTH: usize = 64;

/// Plus grand entier représentable exactement par un nombre de la VM (2^53).
pub const MAX_EXACT_INTEGER: u64 = 1 << 53;

/* ------------------------------ Erreurs ------------------------------ */

/// Conversion d'une erreur de l'interpréteur en erreur hôte.
pub trait IntoHost {
    /// `SyntaxError` → `Compile`, erreurs de conversion du pont telles
    /// quelles, le reste → `Script`.
    fn into_host(self) -> HostError;
}

impl IntoHost for mlua::Error {
    fn into_host(self) -> HostError {
        match self {
            mlua::Error::SyntaxError { message, .. } => HostError::Compile { message },
            other => forwarded(&other).unwrap_or_else(|| {
                HostError::Script(
                    error_message(&other).unwrap_or_else(|| lunaire_core::UNKNOWN_ERROR_DIAGNOSTIC.into()),
                )
            }),
        }
    }
}

/// Erreur de conversion levée par le pont lui-même et remontée par mlua.
fn forwarded(err: &mlua::Error) -> Option<HostError> {
    let mlua::Error::ExternalError(inner) = err else { return None };
    match inner.downcast_ref::<HostError>()? {
        HostError::Unsupported { type_name } => Some(HostError::Unsupported { type_name: type_name.clone() }),
        HostError::TypeMismatch { expected, found } => {
            Some(HostError::TypeMismatch { expected: *expected, found: found.clone() })
        }
        _ => None,
    }
}

/// Marqueur de la trace de pile que mlua ajoute aux erreurs d'exécution.
const TRACEBACK_MARKER: &str = "\nstack traceback:";

/// Texte lisible d'une erreur de l'interpréteur (`None` si vide).
///
/// Seule la valeur d'erreur est gardée : la trace de pile est coupée.
pub fn error_message(err: &mlua::Error) -> Option<String> {
    let text = match err {
        mlua::Error::RuntimeError(msg) | mlua::Error::MemoryError(msg) => msg.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::CallbackError { cause, .. } => return error_message(cause),
        mlua::Error::ExternalError(inner) => inner.to_string(),
        other => other.to_string(),
    };
    let text = text.split_once(TRACEBACK_MARKER).map_or(text.as_str(), |(head, _)| head).trim();
    (!text.is_empty()).then(|| text.to_string())
}

/* ------------------------------ Types hôte ------------------------------ */

/// Type hôte exposable au script par [`ValueBridge::forward_type`].
///
/// Le script voit une table globale `NAME` avec un constructeur `new(...)`
/// et les membres statiques de [`HostType::statics`] ; les instances sont
/// des userdata portant les champs/méthodes déclarés par `UserData`.
pub trait HostType: UserData + Sized + 'static {
    /// Nom de la table globale.
    const NAME: &'static str;

    /// Construit une instance depuis les arguments de `NAME.new(...)`.
    fn construct(args: Vec<Value>) -> HostResult<Self>;

    /// Membres statiques (constantes, fonctions hôte).
    fn statics() -> Vec<(&'static str, Value)> { Vec::new() }
}

/* ------------------------------- Pont ------------------------------- */

/// Pont de conversion attaché à une VM.
#[derive(Clone)]
pub struct ValueBridge {
    lua: Weak<Lua>,
    retained: Rc<RefCell<NativeHandles>>,
}

impl std::fmt::Debug for ValueBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueBridge")
            .field("alive", &(self.lua.strong_count() > 0))
            .field("retained", &self.retained.try_borrow().map_or(0, |h| h.len()))
            .finish()
    }
}

impl ValueBridge {
    pub(crate) fn new(lua: Weak<Lua>) -> Self {
        Self { lua, retained: Rc::new(RefCell::new(NativeHandles::new())) }
    }

    /// Interpréteur vivant, sinon `Disposed`.
    pub(crate) fn lua(&self) -> HostResult<Rc<Lua>> { self.lua.upgrade().ok_or(HostError::Disposed) }

    /// Handles retenus par la VM (installation : fonctions, objets, types).
    pub fn retained_count(&self) -> usize { self.retained.borrow().len() }

    pub(crate) fn release_retained(&self, lua: &Lua) -> usize {
        self.retained.borrow_mut().release_all(lua)
    }

    /* ----------------------------- Hôte → VM ----------------------------- */

    /// Convertit `value` en valeur de la VM ; chaque handle alloué part dans `sink`.
    pub fn push_value(&self, value: &Value, sink: &mut NativeHandles) -> HostResult<mlua::Value> {
        let lua = self.lua()?;
        self.to_lua(&lua, value, sink).map_err(IntoHost::into_host)
    }

    pub(crate) fn to_lua(
        &self,
        lua: &Lua,
        value: &Value,
        sink: &mut NativeHandles,
    ) -> mlua::Result<mlua::Value> {
        Ok(match value {
            Value::Nil => mlua::Value::Nil,
            Value::Boolean(b) => mlua::Value::Boolean(*b),
            Value::Integer(i) if i.unsigned_abs() > MAX_EXACT_INTEGER => {
                return Err(mlua::Error::external(HostError::Unsupported {
                    type_name: format!("entier {i} (au-delà de 2^53)"),
                }));
            }
            #[allow(clippy::cast_precision_loss)]
            Value::Integer(i) => mlua::Value::Number(*i as f64),
            Value::Number(n) => mlua::Value::Number(*n),
            Value::String(s) => mlua::Value::String(lua.create_string(s)?),
            Value::List(items) => {
                let table = lua.create_table_with_capacity(items.len(), 0)?;
                for (i, item) in items.iter().enumerate() {
                    table.raw_set(i + 1, self.to_lua(lua, item, sink)?)?;
                }
                mlua::Value::Table(table)
            }
            Value::Map(entries) => {
                let table = lua.create_table_with_capacity(0, entries.len())?;
                for (key, item) in entries {
                    table.raw_set(key.as_str(), self.to_lua(lua, item, sink)?)?;
                }
                mlua::Value::Table(table)
            }
            Value::Function(func) => {
                let pushed = mlua::Value::Function(self.wrap_function(lua, func.clone())?);
                sink.pin(lua, pushed.clone())?;
                pushed
            }
            Value::Callable(handle) => mlua::Value::Function(handle.function().clone()),
            Value::Object(ud) => {
                let pushed = mlua::Value::UserData(ud.clone());
                sink.pin(lua, pushed.clone())?;
                pushed
            }
        })
    }

    fn wrap_function(&self, lua: &Lua, func: HostFunction) -> mlua::Result<mlua::Function> {
        let bridge = self.clone();
        lua.create_function(move |lua, args: MultiValue| {
            let args = args
                .into_iter()
                .map(|v| bridge.from_lua(v, 0))
                .collect::<HostResult<Vec<_>>>()
                .map_err(mlua::Error::external)?;
            trace!("appel hôte `{}` ({} arg(s))", func.name(), args.len());
            let ret = func.call(args).map_err(mlua::Error::external)?;
            // la valeur de retour vit par la pile de l'interpréteur : ancre rendue aussitôt
            let mut scratch = NativeHandles::new();
            let pushed = bridge.to_lua(lua, &ret, &mut scratch)?;
            scratch.release_all(lua);
            Ok(pushed)
        })
    }

    /* ----------------------------- VM → hôte ----------------------------- */

    /// Convertit une valeur de la VM en valeur hôte.
    pub fn get_value(&self, value: mlua::Value) -> HostResult<Value> {
        self.lua()?;
        self.from_lua(value, 0)
    }

    pub(crate) fn from_lua(&self, value: mlua::Value, depth: usize) -> HostResult<Value> {
        Ok(match value {
            mlua::Value::Nil => Value::Nil,
            mlua::Value::Boolean(b) => Value::Boolean(b),
            mlua::Value::Integer(i) => Value::Integer(i64::from(i)),
            mlua::Value::Number(n) => Value::Number(n),
            mlua::Value::String(s) => Value::String(s.to_string_lossy().to_string()),
            mlua::Value::Table(table) => {
                if depth >= MAX_DEPTH {
                    return Err(HostError::Unsupported {
                        type_name: format!("table (profondeur > {MAX_DEPTH})"),
                    });
                }
                let len = table.raw_len();
                let mut list = Vec::with_capacity(len);
                let mut map = BTreeMap::new();
                let mut count = 0usize;
                for pair in table.pairs::<mlua::Value, mlua::Value>() {
                    let (key, item) = pair.map_err(IntoHost::into_host)?;
                    let key = self
                        .read_string(&key)
                        .ok_or_else(|| HostError::Unsupported { type_name: format!("clé {}", key.type_name()) })?;
                    // `1` et `"1"` donnent la même clé hôte
                    if map.contains_key(&key) {
                        return Err(HostError::Unsupported { type_name: format!("clé `{key}` en double") });
                    }
                    map.insert(key, self.from_lua(item, depth + 1)?);
                    count += 1;
                }
                if count == len {
                    for i in 1..=len {
                        list.push(map.remove(&i.to_string()).unwrap_or_default());
                    }
                    Value::List(list)
                } else {
                    Value::Map(map)
                }
            }
            mlua::Value::Function(f) => Value::Callable(CallableHandle::new(self.clone(), f)),
            mlua::Value::UserData(ud) => Value::Object(ud),
            other => return Err(HostError::Unsupported { type_name: other.type_name().to_string() }),
        })
    }

    /// Vue texte d'une valeur (chaînes et nombres uniquement).
    pub fn read_string(&self, value: &mlua::Value) -> Option<String> {
        match value {
            mlua::Value::String(s) => Some(s.to_string_lossy().to_string()),
            mlua::Value::Integer(i) => Some(i.to_string()),
            mlua::Value::Number(n) => Some(format_number(*n)),
            _ => None,
        }
    }

    /* --------------------------- Enregistrement --------------------------- */

    /// Installe `func` comme globale `name`.
    pub fn push_function(&self, name: &str, func: HostFunction) -> HostResult<()> {
        self.push_object(name, &Value::Function(func))
    }

    /// Installe une valeur hôte comme globale `name`.
    pub fn push_object(&self, name: &str, value: &Value) -> HostResult<()> {
        let lua = self.lua()?;
        let pushed = {
            let mut retained = self.retained.borrow_mut();
            self.to_lua(&lua, value, &mut retained).map_err(IntoHost::into_host)?
        };
        lua.globals().set(name, pushed).map_err(IntoHost::into_host)?;
        debug!("globale `{name}` installée ({})", value.type_name());
        Ok(())
    }

    /// Expose le type `T` au script sous la globale `T::NAME`.
    pub fn forward_type<T: HostType>(&self) -> HostResult<()> {
        let lua = self.lua()?;
        let table = lua.create_table().map_err(IntoHost::into_host)?;
        let bridge = self.clone();
        let ctor = lua
            .create_function(move |lua, args: MultiValue| {
                let args = args
                    .into_iter()
                    .map(|v| bridge.from_lua(v, 0))
                    .collect::<HostResult<Vec<_>>>()
                    .map_err(mlua::Error::external)?;
                let obj = T::construct(args).map_err(mlua::Error::external)?;
                lua.create_userdata(obj)
            })
            .map_err(IntoHost::into_host)?;
        {
            let mut retained = self.retained.borrow_mut();
            retained.pin(&lua, mlua::Value::Function(ctor.clone())).map_err(IntoHost::into_host)?;
            table.raw_set("new", ctor).map_err(IntoHost::into_host)?;
            for (name, value) in T::statics() {
                let pushed = self.to_lua(&lua, &value, &mut retained).map_err(IntoHost::into_host)?;
                table.raw_set(name, pushed).map_err(IntoHost::into_host)?;
            }
        }
        lua.globals().set(T::NAME, table).map_err(IntoHost::into_host)?;
        debug!("type hôte `{}` exposé", T::NAME);
        Ok(())
    }

    /// Enveloppe un objet hôte dans un userdata de cette VM.
    pub fn create_object<T: UserData + 'static>(&self, obj: T) -> HostResult<Value> {
        let lua = self.lua()?;
        let ud: AnyUserData = lua.create_userdata(obj).map_err(IntoHost::into_host)?;
        Ok(Value::Object(ud))
    }
}

/* --------------------------------- Tests --------------------------------- */
