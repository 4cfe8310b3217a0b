//! Datashape-style type expressions.
//!
//! Types describe both concrete array arguments and kernel signatures:
//!
//! ```text
//! 3 * 2 * float64                       fixed dimensions
//! var * var * int32                     ragged dimensions (offsets carried by the type)
//! ... * N * int64, ... * int64 -> ... * N * int64
//! var... * var * float64 -> var... * var * float64
//! ```
//!
//! Concrete fixed dimensions carry a `step` measured in elements of the
//! innermost element type; concrete ragged dimensions carry the offsets of
//! their level. Signature types use symbolic dimensions (`N`), ellipses and
//! type variables, resolved against concrete types by [`typecheck`].

mod lexer;
mod parser;
mod unify;

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

pub use unify::{typecheck, ApplySpec, Bindings, Layout, TypeMismatch};

/// Named element types available to the signature parser.
pub type Typedefs = FxHashMap<String, Type>;

/// Primitive element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
}

impl ScalarKind {
    pub const ALL: [ScalarKind; 11] = [
        ScalarKind::Bool,
        ScalarKind::Int8,
        ScalarKind::Int16,
        ScalarKind::Int32,
        ScalarKind::Int64,
        ScalarKind::Uint8,
        ScalarKind::Uint16,
        ScalarKind::Uint32,
        ScalarKind::Uint64,
        ScalarKind::Float32,
        ScalarKind::Float64,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int8 => "int8",
            ScalarKind::Int16 => "int16",
            ScalarKind::Int32 => "int32",
            ScalarKind::Int64 => "int64",
            ScalarKind::Uint8 => "uint8",
            ScalarKind::Uint16 => "uint16",
            ScalarKind::Uint32 => "uint32",
            ScalarKind::Uint64 => "uint64",
            ScalarKind::Float32 => "float32",
            ScalarKind::Float64 => "float64",
        }
    }

    /// Size in bytes.
    pub fn size(self) -> usize {
        match self {
            ScalarKind::Bool | ScalarKind::Int8 | ScalarKind::Uint8 => 1,
            ScalarKind::Int16 | ScalarKind::Uint16 => 2,
            ScalarKind::Int32 | ScalarKind::Uint32 | ScalarKind::Float32 => 4,
            ScalarKind::Int64 | ScalarKind::Uint64 | ScalarKind::Float64 => 8,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }
}

/// Memory order of a fixed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    C,
    Fortran,
}

/// A named record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

/// A type expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    /// `5 * T`
    FixedDim { shape: i64, step: i64, elem: Box<Type> },
    /// `var * T`; `offsets` is `None` in signatures.
    VarDim { offsets: Option<Arc<[i64]>>, elem: Box<Type> },
    /// `N * T`
    SymbolicDim { name: String, elem: Box<Type> },
    /// `... * T`, `var... * T` or `Dims... * T`
    Ellipsis { name: Option<String>, var: bool, elem: Box<Type> },
    Scalar(ScalarKind),
    /// `?T`
    Option(Box<Type>),
    String,
    Record(Vec<Field>),
    /// Element type variable `T`.
    Typevar(String),
}

impl Type {
    pub fn scalar(kind: ScalarKind) -> Type {
        Type::Scalar(kind)
    }

    /// Fixed dimension with the C-order step for `elem`.
    pub fn fixed(shape: i64, elem: Type) -> Type {
        let step = match &elem {
            Type::FixedDim { shape, step, .. } => shape.saturating_mul(*step),
            _ => 1,
        };
        Type::FixedDim {
            shape,
            step,
            elem: Box::new(elem),
        }
    }

    pub fn fixed_with_step(shape: i64, step: i64, elem: Type) -> Type {
        Type::FixedDim {
            shape,
            step,
            elem: Box::new(elem),
        }
    }

    /// Ragged dimension whose rows are delimited by `offsets`.
    pub fn var(offsets: Vec<i64>, elem: Type) -> Type {
        Type::VarDim {
            offsets: Some(offsets.into()),
            elem: Box::new(elem),
        }
    }

    /// A fixed array of `shape` laid out contiguously in `order`.
    pub fn fixed_array(shape: &[i64], dtype: Type, order: Order) -> Type {
        let steps = contiguous_steps(shape, order);
        shape
            .iter()
            .zip(steps)
            .rev()
            .fold(dtype, |elem, (&shape, step)| Type::fixed_with_step(shape, step, elem))
    }

    pub fn is_dim(&self) -> bool {
        matches!(
            self,
            Type::FixedDim { .. } | Type::VarDim { .. } | Type::SymbolicDim { .. } | Type::Ellipsis { .. }
        )
    }

    /// The element type of a dimension node.
    pub fn elem(&self) -> Option<&Type> {
        match self {
            Type::FixedDim { elem, .. }
            | Type::VarDim { elem, .. }
            | Type::SymbolicDim { elem, .. }
            | Type::Ellipsis { elem, .. } => Some(elem),
            _ => None,
        }
    }

    /// The innermost non-dimension type.
    pub fn dtype(&self) -> &Type {
        let mut t = self;
        while let Some(elem) = t.elem() {
            t = elem;
        }
        t
    }

    pub fn ndim(&self) -> usize {
        let mut n = 0;
        let mut t = self;
        while let Some(elem) = t.elem() {
            n += 1;
            t = elem;
        }
        n
    }

    /// Size in bytes of one element of an element type; zero for dimensions
    /// and type variables.
    pub fn datasize(&self) -> usize {
        match self {
            Type::Scalar(kind) => kind.size(),
            Type::Option(inner) => 1 + inner.datasize(),
            Type::String => 8,
            Type::Record(fields) => fields.iter().map(|f| f.ty.datasize()).sum(),
            _ => 0,
        }
    }

    /// True if the type contains no symbols, ellipses, type variables or
    /// offset-less ragged dimensions.
    pub fn is_concrete(&self) -> bool {
        match self {
            Type::FixedDim { elem, .. } => elem.is_concrete(),
            Type::VarDim { offsets, elem } => offsets.is_some() && elem.is_concrete(),
            Type::SymbolicDim { .. } | Type::Ellipsis { .. } | Type::Typevar(_) => false,
            Type::Scalar(_) | Type::String => true,
            Type::Option(inner) => inner.is_concrete(),
            Type::Record(fields) => fields.iter().all(|f| f.ty.is_concrete()),
        }
    }

    /// `(shape, step)` of every dimension if all dimensions are fixed.
    pub fn fixed_dims(&self) -> Option<Vec<(i64, i64)>> {
        let mut dims = Vec::new();
        let mut t = self;
        loop {
            match t {
                Type::FixedDim { shape, step, elem } => {
                    dims.push((*shape, *step));
                    t = elem;
                }
                _ if t.is_dim() => return None,
                _ => return Some(dims),
            }
        }
    }

    /// An array of fixed dimensions over a scalar element type.
    pub fn is_ndarray(&self) -> bool {
        matches!(self.dtype(), Type::Scalar(_)) && self.fixed_dims().is_some()
    }

    pub fn is_c_contiguous(&self) -> bool {
        self.is_contiguous(Order::C)
    }

    pub fn is_f_contiguous(&self) -> bool {
        self.is_contiguous(Order::Fortran)
    }

    fn is_contiguous(&self, order: Order) -> bool {
        let Some(dims) = self.fixed_dims() else {
            return false;
        };
        let shape: Vec<i64> = dims.iter().map(|d| d.0).collect();
        let expected = contiguous_steps(&shape, order);
        dims.iter()
            .zip(expected)
            .all(|(&(shape, step), expected)| shape <= 1 || step == expected)
    }
}

/// Element steps of a contiguous array of `shape`.
pub fn contiguous_steps(shape: &[i64], order: Order) -> Vec<i64> {
    let mut steps = vec![0; shape.len()];
    let mut acc: i64 = 1;
    match order {
        Order::C => {
            for (i, &n) in shape.iter().enumerate().rev() {
                steps[i] = acc;
                acc = acc.saturating_mul(n.max(1));
            }
        }
        Order::Fortran => {
            for (i, &n) in shape.iter().enumerate() {
                steps[i] = acc;
                acc = acc.saturating_mul(n.max(1));
            }
        }
    }
    steps
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::FixedDim { shape, elem, .. } => write!(f, "{shape} * {elem}"),
            Type::VarDim { elem, .. } => write!(f, "var * {elem}"),
            Type::SymbolicDim { name, elem } => write!(f, "{name} * {elem}"),
            Type::Ellipsis { name, var, elem } => {
                if *var {
                    f.write_str("var")?;
                }
                if let Some(name) = name {
                    f.write_str(name)?;
                }
                write!(f, "... * {elem}")
            }
            Type::Scalar(kind) => f.write_str(kind.name()),
            Type::Option(inner) => write!(f, "?{inner}"),
            Type::String => f.write_str("string"),
            Type::Record(fields) => {
                f.write_str("{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.ty)?;
                }
                f.write_str("}")
            }
            Type::Typevar(name) => f.write_str(name),
        }
    }
}

/// A kernel signature: `in, ... -> out, ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSig {
    pub ins: Vec<Type>,
    pub outs: Vec<Type>,
}

impl FunctionSig {
    /// Parse and validate signature text.
    pub fn parse(text: &str, typedefs: &Typedefs) -> Result<Self, ParseError> {
        let sig = parser::parse_signature(text, typedefs)?;
        sig.validate(text)?;
        Ok(sig)
    }

    pub fn nin(&self) -> usize {
        self.ins.len()
    }

    pub fn nout(&self) -> usize {
        self.outs.len()
    }

    pub fn nargs(&self) -> usize {
        self.ins.len() + self.outs.len()
    }

    /// True if both signatures are equal up to a consistent renaming of
    /// symbolic dimensions, type variables and named ellipses. Such
    /// signatures unify with exactly the same calls.
    pub fn equivalent(&self, other: &FunctionSig) -> bool {
        self.canonical() == other.canonical()
    }

    fn canonical(&self) -> FunctionSig {
        let mut renamer = Renamer::default();
        FunctionSig {
            ins: self.ins.iter().map(|t| renamer.rename(t)).collect(),
            outs: self.outs.iter().map(|t| renamer.rename(t)).collect(),
        }
    }

    fn validate(&self, text: &str) -> Result<(), ParseError> {
        let mut fixed_ellipsis = false;
        let mut var_ellipsis = false;
        for t in self.ins.iter().chain(&self.outs) {
            if let Type::Ellipsis { var, .. } = t {
                if *var {
                    var_ellipsis = true;
                } else {
                    fixed_ellipsis = true;
                }
            }
        }
        if fixed_ellipsis && var_ellipsis {
            return Err(ParseError::new(text, "cannot mix fixed and var ellipses"));
        }

        let mut bound = Symbols::default();
        for t in &self.ins {
            bound.collect(t);
        }
        let input_ellipsis = self.ins.iter().any(|t| matches!(t, Type::Ellipsis { .. }));
        let input_var = self.ins.iter().any(has_var_dims);

        for t in &self.outs {
            let mut used = Symbols::default();
            used.collect(t);
            if let Some(name) = used.names.iter().find(|n| !bound.names.contains(n)) {
                return Err(ParseError::new(
                    text,
                    format!("output symbol `{name}` does not appear in the inputs"),
                ));
            }
            if matches!(t, Type::Ellipsis { .. }) && !input_ellipsis {
                return Err(ParseError::new(text, "output ellipsis requires an input ellipsis"));
            }
            if has_var_dims(t) && !input_var {
                return Err(ParseError::new(
                    text,
                    "var dimension in output requires a var input",
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for FunctionSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |types: &[Type]| {
            types.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ")
        };
        write!(f, "{} -> {}", join(&self.ins), join(&self.outs))
    }
}

fn has_var_dims(t: &Type) -> bool {
    match t {
        Type::VarDim { .. } | Type::Ellipsis { var: true, .. } => true,
        _ => t.elem().is_some_and(has_var_dims),
    }
}

#[derive(Default)]
struct Symbols {
    names: Vec<String>,
}

impl Symbols {
    fn collect(&mut self, t: &Type) {
        match t {
            Type::SymbolicDim { name, elem } => {
                self.names.push(name.clone());
                self.collect(elem);
            }
            Type::Ellipsis { name, elem, .. } => {
                if let Some(name) = name {
                    self.names.push(name.clone());
                }
                self.collect(elem);
            }
            Type::FixedDim { elem, .. } | Type::VarDim { elem, .. } => self.collect(elem),
            Type::Option(inner) => self.collect(inner),
            Type::Record(fields) => fields.iter().for_each(|f| self.collect(&f.ty)),
            Type::Typevar(name) => self.names.push(name.clone()),
            Type::Scalar(_) | Type::String => {}
        }
    }
}

#[derive(Default)]
struct Renamer {
    dims: FxHashMap<String, String>,
    vars: FxHashMap<String, String>,
    ellipses: FxHashMap<String, String>,
}

impl Renamer {
    fn rename(&mut self, t: &Type) -> Type {
        match t {
            Type::SymbolicDim { name, elem } => Type::SymbolicDim {
                name: fresh(&mut self.dims, name, "D"),
                elem: Box::new(self.rename(elem)),
            },
            Type::Ellipsis { name, var, elem } => Type::Ellipsis {
                name: name.as_ref().map(|n| fresh(&mut self.ellipses, n, "E")),
                var: *var,
                elem: Box::new(self.rename(elem)),
            },
            Type::FixedDim { shape, step, elem } => Type::FixedDim {
                shape: *shape,
                step: *step,
                elem: Box::new(self.rename(elem)),
            },
            Type::VarDim { offsets, elem } => Type::VarDim {
                offsets: offsets.clone(),
                elem: Box::new(self.rename(elem)),
            },
            Type::Option(inner) => Type::Option(Box::new(self.rename(inner))),
            Type::Record(fields) => Type::Record(
                fields
                    .iter()
                    .map(|f| Field {
                        name: f.name.clone(),
                        ty: self.rename(&f.ty),
                    })
                    .collect(),
            ),
            Type::Typevar(name) => Type::Typevar(fresh(&mut self.vars, name, "T")),
            Type::Scalar(_) | Type::String => t.clone(),
        }
    }
}

fn fresh(map: &mut FxHashMap<String, String>, name: &str, prefix: &str) -> String {
    let next = map.len();
    map.entry(name.to_string())
        .or_insert_with(|| format!("{prefix}{next}"))
        .clone()
}
