//! Modèle de valeurs côté hôte.
//!
//! `Value` est ce qui traverse la frontière : scalaires copiés, tables
//! converties en `List`/`Map`, fonctions hôte (`Function`), fonctions script
//! (`Callable`) et userdata (`Object`) passés par référence.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use lunaire_core::{HostError, HostResult};
use mlua::AnyUserData;

use crate::callable::CallableHandle;

/* --------------------------- Fonctions hôte --------------------------- */

type HostFn = dyn Fn(Vec<Value>) -> HostResult<Value>;

/// Fonction hôte exposable au script.
#[derive(Clone)]
pub struct HostFunction {
    name: Rc<str>,
    func: Rc<HostFn>,
}

impl HostFunction {
    /// Enveloppe une closure hôte.
    pub fn new<F>(name: impl Into<Rc<str>>, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> HostResult<Value> + 'static,
    {
        Self { name: name.into(), func: Rc::new(func) }
    }

    /// Nom de diagnostic.
    pub fn name(&self) -> &str { &self.name }

    /// Appel direct (sans passer par l'interpréteur).
    pub fn call(&self, args: Vec<Value>) -> HostResult<Value> { (self.func)(args) }
}

impl PartialEq for HostFunction {
    fn eq(&self, other: &Self) -> bool { Rc::ptr_eq(&self.func, &other.func) }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostFunction").field(&self.name).finish()
    }
}

/* --------------------------- Types de valeur --------------------------- */

/// Valeur dynamique échangée avec la VM.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// `nil`.
    #[default]
    Nil,
    /// Booléen.
    Boolean(bool),
    /// Nombre entier (Luau n'a que des doubles ; un nombre entier côté
    /// script arrive ici).
    Integer(i64),
    /// Nombre flottant.
    Number(f64),
    /// Chaîne (UTF-8, conversion avec perte si besoin).
    String(String),
    /// Table séquence `{a, b, c}`.
    List(Vec<Value>),
    /// Table à clés texte.
    Map(BTreeMap<String, Value>),
    /// Fonction hôte.
    Function(HostFunction),
    /// Fonction script vue depuis l'hôte.
    Callable(CallableHandle),
    /// Objet hôte résidant dans la VM (userdata).
    Object(AnyUserData),
}

impl Value {
    /// Nom court du type (diagnostics, `TypeMismatch`).
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Function(_) => "function",
            Self::Callable(_) => "callable",
            Self::Object(_) => "object",
        }
    }

    /// Conversion typée (voir [`FromValue`]).
    pub fn into_typed<T: FromValue>(self) -> HostResult<T> { T::from_value(self) }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a == b,
            (Self::Callable(a), Self::Callable(b)) => a.same_function(b),
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }
}

/// Rendu façon `tostring` pour les scalaires.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::String(s) => f.write_str(s),
            Self::List(_) | Self::Map(_) => f.write_str("table"),
            Self::Function(h) => write!(f, "function: {}", h.name()),
            Self::Callable(_) => f.write_str("function"),
            Self::Object(_) => f.write_str("userdata"),
        }
    }
}

/// `%.14g` simplifié : entiers exacts sans partie décimale, `inf`/`nan` nus.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "nan".into()
    } else if n.is_infinite() {
        if n > 0.0 { "inf".into() } else { "-inf".into() }
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/* Conversions hôte → Value */
impl From<()> for Value { fn from((): ()) -> Self { Self::Nil } }
impl From<bool> for Value { fn from(v: bool) -> Self { Self::Boolean(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Self::Integer(i64::from(v)) } }
impl From<u32> for Value { fn from(v: u32) -> Self { Self::Integer(i64::from(v)) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Self::Integer(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Self::Number(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Self::String(v.to_owned()) } }
impl From<String> for Value { fn from(v: String) -> Self { Self::String(v) } }
impl From<Vec<Value>> for Value { fn from(v: Vec<Self>) -> Self { Self::List(v) } }
impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Self>) -> Self { Self::Map(v) }
}
impl From<HostFunction> for Value { fn from(v: HostFunction) -> Self { Self::Function(v) } }
impl From<CallableHandle> for Value { fn from(v: CallableHandle) -> Self { Self::Callable(v) } }
impl From<AnyUserData> for Value { fn from(v: AnyUserData) -> Self { Self::Object(v) } }

/* ------------------------- Conversions typées ------------------------- */

/// Conversion `Value` → type hôte, utilisée par `CallableHandle::call_typed`.
///
/// Les primitifs numériques s'élargissent/se rétrécissent entre eux
/// (arrondi au pair le plus proche depuis un flottant, hors bornes →
/// `TypeMismatch`) ; tout le reste exige le type exact.
pub trait FromValue: Sized {
    /// Nom du type attendu, repris dans `TypeMismatch`.
    const EXPECTED: &'static str;

    /// Convertit ou échoue avec `TypeMismatch`.
    fn from_value(value: Value) -> HostResult<Self>;
}

fn mismatch<T: FromValue>(found: &Value) -> HostError {
    let found = match found {
        Value::Integer(_) | Value::Number(_) | Value::Boolean(_) => {
            format!("{} {found}", found.type_name())
        }
        other => other.type_name().to_string(),
    };
    HostError::type_mismatch(T::EXPECTED, found)
}

impl FromValue for Value {
    const EXPECTED: &'static str = "value";
    fn from_value(value: Value) -> HostResult<Self> { Ok(value) }
}

macro_rules! from_value_int {
    ($($t:ty),* $(,)?) => {$(
        impl FromValue for $t {
            const EXPECTED: &'static str = stringify!($t);

            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_lossless)]
            fn from_value(value: Value) -> HostResult<Self> {
                match value {
                    Value::Integer(i) => <$t>::try_from(i).map_err(|_| mismatch::<Self>(&value)),
                    Value::Number(n) => {
                        let r = n.round_ties_even();
                        if r >= <$t>::MIN as f64 && r < <$t>::MAX as f64 + 1.0 {
                            Ok(r as $t)
                        } else {
                            Err(mismatch::<Self>(&value))
                        }
                    }
                    other => Err(mismatch::<Self>(&other)),
                }
            }
        }
    )*};
}

from_value_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! from_value_float {
    ($($t:ty),* $(,)?) => {$(
        impl FromValue for $t {
            const EXPECTED: &'static str = stringify!($t);

            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_lossless)]
            fn from_value(value: Value) -> HostResult<Self> {
                match value {
                    Value::Number(n) => Ok(n as $t),
                    Value::Integer(i) => Ok(i as $t),
                    other => Err(mismatch::<Self>(&other)),
                }
            }
        }
    )*};
}

from_value_float!(f32, f64);

macro_rules! from_value_exact {
    ($t:ty, $expected:literal, $variant:ident) => {
        impl FromValue for $t {
            const EXPECTED: &'static str = $expected;
            fn from_value(value: Value) -> HostResult<Self> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(mismatch::<Self>(&other)),
                }
            }
        }
    };
}

from_value_exact!(bool, "bool", Boolean);
from_value_exact!(String, "String", String);
from_value_exact!(Vec<Value>, "list", List);
from_value_exact!(BTreeMap<String, Value>, "map", Map);
from_value_exact!(HostFunction, "host function", Function);
from_value_exact!(CallableHandle, "callable", Callable);
from_value_exact!(AnyUserData, "object", Object);

/* --------------------------------- Tests --------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn numeric_widening() {
        assert_eq!(i64::from_value(Value::Integer(42)).unwrap(), 42);
        assert_eq!(f64::from_value(Value::Integer(7)).unwrap(), 7.0);
        assert_eq!(u8::from_value(Value::Number(2.5)).unwrap(), 2);
        assert_eq!(u8::from_value(Value::Number(3.5)).unwrap(), 4);
        assert_eq!(i32::from_value(Value::Number(-1.5)).unwrap(), -2);
    }

    #[test]
    fn numeric_out_of_range() {
        assert!(matches!(u8::from_value(Value::Integer(256)), Err(HostError::TypeMismatch { .. })));
        assert!(matches!(u32::from_value(Value::Number(-1.0)), Err(HostError::TypeMismatch { .. })));
        assert!(i64::from_value(Value::Number(f64::NAN)).is_err());
        assert!(i64::from_value(Value::Number(9.3e18)).is_err());
    }

    #[test]
    fn exact_types_do_not_coerce() {
        let err = String::from_value(Value::Integer(1)).unwrap_err();
        match err {
            HostError::TypeMismatch { expected, found } => {
                assert_eq!(expected, "String");
                assert_eq!(found, "integer 1");
            }
            other => panic!("attendu TypeMismatch, reçu {other:?}"),
        }
        assert!(bool::from_value(Value::Integer(0)).is_err());
        assert!(Vec::<Value>::from_value(Value::Map(BTreeMap::new())).is_err());
    }

    #[test]
    fn display_like_tostring() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(0.5).to_string(), "0.5");
        assert_eq!(Value::Number(f64::INFINITY).to_string(), "inf");
        assert_eq!(Value::from("salut").to_string(), "salut");
        assert_eq!(Value::List(vec![]).to_string(), "table");
    }

    #[test]
    fn host_function_identity() {
        let f = HostFunction::new("double", |args| {
            let x = args.into_iter().next().unwrap_or_default().into_typed::<i64>()?;
            Ok(Value::Integer(x * 2))
        });
        let g = f.clone();
        assert_eq!(Value::Function(f.clone()), Value::Function(g));
        assert_eq!(f.call(vec![Value::Integer(21)]).unwrap(), Value::Integer(42));
        assert_ne!(
            Value::Function(f),
            Value::Function(HostFunction::new("double", |_| Ok(Value::Nil)))
        );
    }

    proptest! {
        #[test]
        fn integers_survive_every_wider_type(i in any::<i32>()) {
            prop_assert_eq!(i64::from_value(Value::Integer(i64::from(i))).unwrap(), i64::from(i));
            prop_assert_eq!(i32::from_value(Value::Number(f64::from(i))).unwrap(), i);
            prop_assert_eq!(f64::from_value(Value::Integer(i64::from(i))).unwrap(), f64::from(i));
        }
    }
}
