//! Engine-neutral values and typed result coercion.
//!
//! Engines exchange [`ScriptValue`]s (JSON values) with the manager. Typed
//! results are produced through [`FromScriptValue`]:
//!
//! - primitive targets (integers, floats, `bool`, `char`) go through a string
//!   round-trip, so loosely typed engine results such as `"7"` or `7.0` still
//!   convert into `i32`;
//! - every other target uses a direct type check and fails on mismatch.

use crate::error::{ScriptError, ScriptResult};
use serde::de::DeserializeOwned;

/// The value type engines accept as arguments and return as results.
pub type ScriptValue = serde_json::Value;

/// Primitive kinds that are converted via their text representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Integer,
    Float,
    Boolean,
    Character,
}

impl PrimitiveKind {
    /// Text used for the round-trip, or `None` when the value has no scalar form.
    fn render(value: &ScriptValue) -> Option<String> {
        match value {
            ScriptValue::Number(n) => Some(n.to_string()),
            ScriptValue::String(s) => Some(s.trim().to_string()),
            ScriptValue::Bool(b) => Some(b.to_string()),
            ScriptValue::Null | ScriptValue::Array(_) | ScriptValue::Object(_) => None,
        }
    }

    /// Parses the rendered text of `value` into the requested primitive.
    pub fn coerce<T>(self, value: &ScriptValue, expected: &'static str) -> ScriptResult<T>
    where
        T: std::str::FromStr + TryFromIntegral,
    {
        let text = Self::render(value).ok_or_else(|| mismatch(expected, value))?;
        if let Ok(parsed) = text.parse::<T>() {
            return Ok(parsed);
        }
        // "5.0" is a valid integer result for engines that only have doubles
        if self == PrimitiveKind::Integer {
            if let Some(parsed) = text.parse::<f64>().ok().and_then(T::try_from_integral) {
                return Ok(parsed);
            }
        }
        Err(mismatch(expected, value))
    }
}

/// Conversion from an integral `f64` for integer targets.
pub trait TryFromIntegral: Sized {
    fn try_from_integral(value: f64) -> Option<Self>;
}

fn mismatch(expected: &'static str, value: &ScriptValue) -> ScriptError {
    ScriptError::Coercion {
        expected,
        found: value.to_string(),
    }
}

/// Types a script result can be converted into.
pub trait FromScriptValue: Sized {
    /// Name reported in coercion errors.
    const TYPE_NAME: &'static str;

    fn from_script_value(value: ScriptValue) -> ScriptResult<Self>;
}

macro_rules! integer_targets {
    ($($ty:ty),* $(,)?) => {$(
        impl TryFromIntegral for $ty {
            fn try_from_integral(value: f64) -> Option<Self> {
                if value.is_finite()
                    && value.fract() == 0.0
                    && value >= <$ty>::MIN as f64
                    // `MAX as f64` rounds up for wide types; compare against
                    // the exact power of two above MAX instead
                    && value < ((<$ty>::MAX / 2 + 1) as f64) * 2.0
                {
                    Some(value as $ty)
                } else {
                    None
                }
            }
        }

        impl FromScriptValue for $ty {
            const TYPE_NAME: &'static str = stringify!($ty);

            fn from_script_value(value: ScriptValue) -> ScriptResult<Self> {
                PrimitiveKind::Integer.coerce(&value, Self::TYPE_NAME)
            }
        }
    )*};
}

macro_rules! scalar_targets {
    ($($ty:ty => $kind:expr),* $(,)?) => {$(
        impl TryFromIntegral for $ty {
            fn try_from_integral(_value: f64) -> Option<Self> {
                None
            }
        }

        impl FromScriptValue for $ty {
            const TYPE_NAME: &'static str = stringify!($ty);

            fn from_script_value(value: ScriptValue) -> ScriptResult<Self> {
                $kind.coerce(&value, Self::TYPE_NAME)
            }
        }
    )*};
}

integer_targets!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
scalar_targets!(
    f32 => PrimitiveKind::Float,
    f64 => PrimitiveKind::Float,
    bool => PrimitiveKind::Boolean,
    char => PrimitiveKind::Character,
);

impl FromScriptValue for String {
    const TYPE_NAME: &'static str = "String";

    fn from_script_value(value: ScriptValue) -> ScriptResult<Self> {
        match value {
            ScriptValue::String(s) => Ok(s),
            other => Err(mismatch(Self::TYPE_NAME, &other)),
        }
    }
}

impl FromScriptValue for ScriptValue {
    const TYPE_NAME: &'static str = "Value";

    fn from_script_value(value: ScriptValue) -> ScriptResult<Self> {
        Ok(value)
    }
}

impl<T: FromScriptValue> FromScriptValue for Option<T> {
    const TYPE_NAME: &'static str = "Option";

    fn from_script_value(value: ScriptValue) -> ScriptResult<Self> {
        match value {
            ScriptValue::Null => Ok(None),
            other => T::from_script_value(other).map(Some),
        }
    }
}

impl<T: FromScriptValue> FromScriptValue for Vec<T> {
    const TYPE_NAME: &'static str = "Vec";

    fn from_script_value(value: ScriptValue) -> ScriptResult<Self> {
        match value {
            ScriptValue::Array(items) => items.into_iter().map(T::from_script_value).collect(),
            other => Err(mismatch(Self::TYPE_NAME, &other)),
        }
    }
}

/// Wrapper for any `Deserialize` type; the value must match its shape exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: DeserializeOwned> FromScriptValue for Json<T> {
    const TYPE_NAME: &'static str = "Json";

    fn from_script_value(value: ScriptValue) -> ScriptResult<Self> {
        let found = value.to_string();
        serde_json::from_value(value)
            .map(Json)
            .map_err(|_| ScriptError::Coercion {
                expected: std::any::type_name::<T>(),
                found,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_integer_round_trip_coercion() {
        assert_eq!(i32::from_script_value(json!(5)).unwrap(), 5);
        assert_eq!(i32::from_script_value(json!("12")).unwrap(), 12);
        assert_eq!(i64::from_script_value(json!(10.0)).unwrap(), 10);
        assert_eq!(u8::from_script_value(json!(" 7 ")).unwrap(), 7);

        assert!(i32::from_script_value(json!(1.5)).unwrap_err().is_coercion());
        assert!(u8::from_script_value(json!(300)).unwrap_err().is_coercion());
        assert!(i32::from_script_value(json!(null)).unwrap_err().is_coercion());
        assert!(i32::from_script_value(json!([1])).unwrap_err().is_coercion());
    }

    #[test]
    fn test_integer_bounds_are_exact() {
        assert_eq!(u8::from_script_value(json!(255.0)).unwrap(), 255);
        assert!(u8::from_script_value(json!(256.0)).unwrap_err().is_coercion());
        assert_eq!(i64::from_script_value(json!(-9223372036854775808.0)).unwrap(), i64::MIN);

        assert!(
            i64::from_script_value(json!(9223372036854775808.0))
                .unwrap_err()
                .is_coercion()
        );
        assert!(
            u64::from_script_value(json!(18446744073709551616.0))
                .unwrap_err()
                .is_coercion()
        );
        assert!(
            i64::from_script_value(json!("9223372036854775808.0"))
                .unwrap_err()
                .is_coercion()
        );
    }

    #[test]
    fn test_float_bool_char_coercion() {
        assert_eq!(f64::from_script_value(json!(2)).unwrap(), 2.0);
        assert_eq!(f32::from_script_value(json!("0.5")).unwrap(), 0.5);
        assert!(bool::from_script_value(json!(true)).unwrap());
        assert!(!bool::from_script_value(json!("false")).unwrap());
        assert_eq!(char::from_script_value(json!("x")).unwrap(), 'x');
        assert_eq!(char::from_script_value(json!(7)).unwrap(), '7');

        assert!(bool::from_script_value(json!(1)).is_err());
        assert!(char::from_script_value(json!("xy")).is_err());
    }

    #[test]
    fn test_direct_type_check_for_non_primitives() {
        assert_eq!(
            String::from_script_value(json!("Example")).unwrap(),
            "Example"
        );
        let err = String::from_script_value(json!(5)).unwrap_err();
        assert!(matches!(
            err,
            ScriptError::Coercion {
                expected: "String",
                ..
            }
        ));

        assert_eq!(
            Vec::<i64>::from_script_value(json!([1, "2", 3.0])).unwrap(),
            vec![1, 2, 3]
        );
        assert_eq!(Option::<i32>::from_script_value(json!(null)).unwrap(), None);
        assert_eq!(Option::<i32>::from_script_value(json!(4)).unwrap(), Some(4));
    }

    #[test]
    fn test_json_wrapper_checks_shape() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Point {
            x: i64,
            y: i64,
        }

        let Json(point) = Json::<Point>::from_script_value(json!({"x": 1, "y": 2})).unwrap();
        assert_eq!(point, Point { x: 1, y: 2 });

        assert!(Json::<Point>::from_script_value(json!({"x": 1}))
            .unwrap_err()
            .is_coercion());
    }
}
