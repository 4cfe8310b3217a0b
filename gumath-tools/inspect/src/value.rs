//! Conversion between JSON literals and arrays.
//!
//! Regular nested lists become fixed arrays, a list of lists with differing
//! lengths becomes a two-level ragged array. Outputs are rendered back by
//! walking their views, so records and optional values print as JSON objects
//! and `null`.

use anyhow::{anyhow, bail, Context, Result};
use gumath::{Array, Scalar, ScalarKind, Type, View};
use serde_json::{Map, Value};

/// Run `$body` with `$t` bound to the Rust type of a scalar kind.
macro_rules! with_scalar {
    ($kind:expr, $t:ident => $body:expr) => {
        match $kind {
            ScalarKind::Bool => {
                type $t = bool;
                $body
            }
            ScalarKind::Int8 => {
                type $t = i8;
                $body
            }
            ScalarKind::Int16 => {
                type $t = i16;
                $body
            }
            ScalarKind::Int32 => {
                type $t = i32;
                $body
            }
            ScalarKind::Int64 => {
                type $t = i64;
                $body
            }
            ScalarKind::Uint8 => {
                type $t = u8;
                $body
            }
            ScalarKind::Uint16 => {
                type $t = u16;
                $body
            }
            ScalarKind::Uint32 => {
                type $t = u32;
                $body
            }
            ScalarKind::Uint64 => {
                type $t = u64;
                $body
            }
            ScalarKind::Float32 => {
                type $t = f32;
                $body
            }
            ScalarKind::Float64 => {
                type $t = f64;
                $body
            }
        }
    };
}

trait JsonScalar: Scalar + Into<Value> {
    fn from_json(value: &Value) -> Option<Self>;
}

macro_rules! json_int {
    ($($t:ty),*) => {
        $(impl JsonScalar for $t {
            fn from_json(value: &Value) -> Option<Self> {
                value
                    .as_i64()
                    .and_then(|n| <$t>::try_from(n).ok())
                    .or_else(|| value.as_u64().and_then(|n| <$t>::try_from(n).ok()))
            }
        })*
    };
}

json_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl JsonScalar for f32 {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_f64().map(|f| f as f32)
    }
}

impl JsonScalar for f64 {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl JsonScalar for bool {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

/// Split a `VALUE:DTYPE` argument, e.g. `[[1,2],[3]]:int64`.
pub fn parse_argument(text: &str) -> Result<(Value, ScalarKind)> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    let value = stream
        .next()
        .ok_or_else(|| anyhow!("missing value in `{text}`"))?
        .with_context(|| format!("invalid JSON value in `{text}`"))?;
    let rest = &text[stream.byte_offset()..];
    let dtype = rest
        .strip_prefix(':')
        .ok_or_else(|| anyhow!("expected `VALUE:TYPE`, got `{text}`"))?
        .trim();
    let kind = ScalarKind::from_name(dtype).ok_or_else(|| anyhow!("unknown element type `{dtype}`"))?;
    Ok((value, kind))
}

pub fn to_array(value: &Value, kind: ScalarKind) -> Result<Array> {
    with_scalar!(kind, T => build::<T>(value))
}

fn leaf<T: JsonScalar>(value: &Value) -> Result<T> {
    T::from_json(value).ok_or_else(|| anyhow!("`{value}` is not a valid {}", T::KIND.name()))
}

/// Shape of a regularly nested list, `None` if it is ragged.
fn regular_shape(value: &Value) -> Option<Vec<i64>> {
    let Value::Array(items) = value else {
        return Some(Vec::new());
    };
    let mut inner: Option<Vec<i64>> = None;
    for item in items {
        let shape = regular_shape(item)?;
        match &inner {
            Some(expected) if *expected != shape => return None,
            _ => inner = Some(shape),
        }
    }
    let mut shape = vec![items.len() as i64];
    shape.extend(inner.unwrap_or_default());
    Some(shape)
}

fn flatten<T: JsonScalar>(value: &Value, out: &mut Vec<T>) -> Result<()> {
    match value {
        Value::Array(items) => items.iter().try_for_each(|item| flatten(item, out)),
        _ => {
            out.push(leaf(value)?);
            Ok(())
        }
    }
}

fn build<T: JsonScalar>(value: &Value) -> Result<Array> {
    match regular_shape(value) {
        Some(shape) if shape.is_empty() => Ok(Array::scalar(leaf::<T>(value)?)),
        Some(shape) => {
            let mut data: Vec<T> = Vec::new();
            flatten(value, &mut data)?;
            Ok(Array::from_slice(&shape, &data)?)
        }
        None => {
            let Value::Array(rows) = value else {
                bail!("`{value}` is not a list");
            };
            let rows = rows
                .iter()
                .map(|row| match row {
                    Value::Array(items) => items.iter().map(leaf::<T>).collect::<Result<Vec<T>>>(),
                    other => bail!("ragged input must be a list of rows, found `{other}`"),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Array::ragged(&rows))
        }
    }
}

/// Render an array as JSON.
pub fn to_json(array: &Array) -> Result<Value> {
    view_to_json(&mut array.view())
}

fn view_to_json(view: &mut View<'_>) -> Result<Value> {
    let value = match view.ty() {
        Type::FixedDim { shape, .. } => {
            let mut items = Vec::new();
            for i in 0..*shape {
                items.push(view_to_json(&mut view.fixed_dim_next(i)?)?);
            }
            Value::Array(items)
        }
        Type::VarDim { .. } => {
            let idx = view.var_indices()?;
            let mut items = Vec::new();
            for i in 0..idx.shape {
                items.push(view_to_json(&mut view.var_dim_next(idx.start, idx.step, i)?)?);
            }
            Value::Array(items)
        }
        Type::Scalar(kind) => with_scalar!(*kind, T => Value::from(view.read::<T>()?)),
        Type::Option(inner) => match **inner {
            Type::Scalar(kind) => {
                with_scalar!(kind, T => view.read_option::<T>()?.map_or(Value::Null, Into::into))
            }
            ref other => bail!("cannot render optional `{other}`"),
        },
        Type::String => Value::String(view.read_str()?.to_string()),
        Type::Record(fields) => {
            let mut map = Map::new();
            for (i, field) in fields.iter().enumerate() {
                map.insert(field.name.clone(), view_to_json(&mut view.record_next(i)?)?);
            }
            Value::Object(map)
        }
        other => bail!("cannot render `{other}`"),
    };
    Ok(value)
}
