//! Matching concrete argument types against kernel signatures.
//!
//! [`typecheck`] binds symbolic dimensions, type variables and ellipses,
//! broadcasts fixed outer dimensions NumPy-style and infers the output
//! types of the call. The result is an [`ApplySpec`] that the executor uses
//! to build the argument stack and to walk the outer dimensions.

use rustc_hash::FxHashMap;
use thiserror::Error;

use super::{Field, FunctionSig, Order, Type};

/// Reason a signature does not apply to a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TypeMismatch(pub String);

fn mismatch(message: impl Into<String>) -> TypeMismatch {
    TypeMismatch(message.into())
}

/// Values bound while matching a signature.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    dims: FxHashMap<String, i64>,
    types: FxHashMap<String, Type>,
    ellipses: FxHashMap<String, Vec<i64>>,
    /// Symbolic dimensions in order of first appearance.
    order: Vec<String>,
}

impl Bindings {
    pub fn dim(&self, name: &str) -> Option<i64> {
        self.dims.get(name).copied()
    }

    pub fn typevar(&self, name: &str) -> Option<&Type> {
        self.types.get(name)
    }

    pub fn ellipsis(&self, name: &str) -> Option<&[i64]> {
        self.ellipses.get(name).map(Vec::as_slice)
    }

    /// Bound symbolic dimensions in order of first appearance.
    pub fn core_dims(&self) -> Vec<i64> {
        self.order.iter().filter_map(|n| self.dim(n)).collect()
    }

    fn bind_dim(&mut self, name: &str, value: i64) -> Result<(), TypeMismatch> {
        match self.dims.get(name) {
            Some(&bound) if bound != value => Err(mismatch(format!(
                "dimension `{name}` bound to {bound}, found {value}"
            ))),
            Some(_) => Ok(()),
            None => {
                self.dims.insert(name.to_string(), value);
                self.order.push(name.to_string());
                Ok(())
            }
        }
    }

    fn bind_type(&mut self, name: &str, ty: &Type) -> Result<(), TypeMismatch> {
        match self.types.get(name) {
            Some(bound) if bound != ty => Err(mismatch(format!(
                "type variable `{name}` bound to `{bound}`, found `{ty}`"
            ))),
            Some(_) => Ok(()),
            None => {
                self.types.insert(name.to_string(), ty.clone());
                Ok(())
            }
        }
    }

    fn bind_ellipsis(&mut self, name: &str, shape: Vec<i64>) -> Result<(), TypeMismatch> {
        match self.ellipses.get(name) {
            Some(bound) if *bound != shape => Err(mismatch(format!(
                "ellipsis `{name}...` bound to {bound:?}, found {shape:?}"
            ))),
            Some(_) => Ok(()),
            None => {
                self.ellipses.insert(name.to_string(), shape);
                Ok(())
            }
        }
    }
}

/// NumPy-style calling conventions the argument layout permits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layout {
    /// Every argument is a C-contiguous fixed array of scalars.
    pub c: bool,
    /// Every argument is a Fortran-contiguous fixed array of scalars.
    pub fortran: bool,
    /// Every argument is a fixed array of scalars.
    pub strided: bool,
}

/// Result of a successful [`typecheck`].
#[derive(Debug, Clone)]
pub struct ApplySpec {
    /// Number of leading dimensions not consumed by the signature.
    pub outer_dims: usize,
    /// The outer dimensions are ragged.
    pub outer_var: bool,
    /// Broadcast outer shape (fixed outer dimensions only).
    pub outer_shape: Vec<i64>,
    /// Input types after broadcasting; broadcast dimensions have step 0.
    pub in_types: Vec<Type>,
    pub out_types: Vec<Type>,
    pub bindings: Bindings,
    pub layout: Layout,
}

impl ApplySpec {
    pub fn core_dims(&self) -> Vec<i64> {
        self.bindings.core_dims()
    }
}

#[derive(Debug, Clone, Copy)]
enum DimPattern<'t> {
    Fixed(i64),
    Symbolic(&'t str),
    Var,
}

struct Pattern<'t> {
    /// `(name, var)` of the leading ellipsis.
    ellipsis: Option<(Option<&'t str>, bool)>,
    dims: Vec<DimPattern<'t>>,
    dtype: &'t Type,
}

fn split_pattern(t: &Type) -> Pattern<'_> {
    let mut ellipsis = None;
    let mut dims = Vec::new();
    let mut cur = t;
    loop {
        match cur {
            Type::Ellipsis { name, var, elem } => {
                ellipsis = Some((name.as_deref(), *var));
                cur = elem;
            }
            Type::FixedDim { shape, elem, .. } => {
                dims.push(DimPattern::Fixed(*shape));
                cur = elem;
            }
            Type::SymbolicDim { name, elem } => {
                dims.push(DimPattern::Symbolic(name));
                cur = elem;
            }
            Type::VarDim { elem, .. } => {
                dims.push(DimPattern::Var);
                cur = elem;
            }
            _ => break,
        }
    }
    Pattern { ellipsis, dims, dtype: cur }
}

/// A concrete argument split at the signature's inner dimensions.
struct Matched<'t> {
    ellipsis: bool,
    outer: Vec<&'t Type>,
    inner: Vec<&'t Type>,
    dtype: &'t Type,
}

fn split_concrete(t: &Type) -> (Vec<&Type>, &Type) {
    let mut dims = Vec::new();
    let mut cur = t;
    while let Some(elem) = cur.elem() {
        dims.push(cur);
        cur = elem;
    }
    (dims, cur)
}

fn match_arg<'t>(
    pat: &Type,
    actual: &'t Type,
    bindings: &mut Bindings,
) -> Result<Matched<'t>, TypeMismatch> {
    if !actual.is_concrete() {
        return Err(mismatch(format!("argument type `{actual}` is not concrete")));
    }
    let pattern = split_pattern(pat);
    let (dims, dtype) = split_concrete(actual);
    let ninner = pattern.dims.len();
    if dims.len() < ninner || (pattern.ellipsis.is_none() && dims.len() != ninner) {
        return Err(mismatch(format!("expected `{pat}`, found `{actual}`")));
    }

    let (outer, inner) = dims.split_at(dims.len() - ninner);
    for (p, c) in pattern.dims.iter().zip(inner) {
        match (p, c) {
            (DimPattern::Fixed(n), Type::FixedDim { shape, .. }) if n == shape => {}
            (DimPattern::Symbolic(name), Type::FixedDim { shape, .. }) => {
                bindings.bind_dim(name, *shape)?;
            }
            (DimPattern::Var, Type::VarDim { .. }) => {}
            _ => return Err(mismatch(format!("expected `{pat}`, found `{actual}`"))),
        }
    }

    if let Some((name, var)) = pattern.ellipsis {
        let kinds_match = outer.iter().all(|d| match d {
            Type::VarDim { .. } => var,
            Type::FixedDim { .. } => !var,
            _ => false,
        });
        if !kinds_match {
            return Err(mismatch(format!("expected `{pat}`, found `{actual}`")));
        }
        if let (Some(name), false) = (name, var) {
            bindings.bind_ellipsis(name, fixed_shape(outer))?;
        }
    }

    unify_dtype(pattern.dtype, dtype, bindings)?;

    Ok(Matched {
        ellipsis: pattern.ellipsis.is_some(),
        outer: outer.to_vec(),
        inner: inner.to_vec(),
        dtype,
    })
}

fn fixed_shape(dims: &[&Type]) -> Vec<i64> {
    dims.iter()
        .filter_map(|d| match d {
            Type::FixedDim { shape, .. } => Some(*shape),
            _ => None,
        })
        .collect()
}

fn unify_dtype(pat: &Type, actual: &Type, bindings: &mut Bindings) -> Result<(), TypeMismatch> {
    match (pat, actual) {
        (Type::Typevar(name), _) => bindings.bind_type(name, actual),
        (Type::Scalar(a), Type::Scalar(b)) if a == b => Ok(()),
        (Type::String, Type::String) => Ok(()),
        (Type::Option(p), Type::Option(a)) => unify_dtype(p, a, bindings),
        (Type::Record(pf), Type::Record(af)) if pf.len() == af.len() => {
            for (p, a) in pf.iter().zip(af) {
                if p.name != a.name {
                    return Err(mismatch(format!(
                        "expected field `{}`, found `{}`",
                        p.name, a.name
                    )));
                }
                unify_dtype(&p.ty, &a.ty, bindings)?;
            }
            Ok(())
        }
        _ => Err(mismatch(format!(
            "expected element type `{pat}`, found `{actual}`"
        ))),
    }
}

fn substitute(t: &Type, bindings: &Bindings) -> Result<Type, TypeMismatch> {
    match t {
        Type::Typevar(name) => bindings
            .typevar(name)
            .cloned()
            .ok_or_else(|| mismatch(format!("unbound type variable `{name}`"))),
        Type::Option(inner) => Ok(Type::Option(Box::new(substitute(inner, bindings)?))),
        Type::Record(fields) => fields
            .iter()
            .map(|f| {
                Ok(Field {
                    name: f.name.clone(),
                    ty: substitute(&f.ty, bindings)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Type::Record),
        _ => Ok(t.clone()),
    }
}

/// NumPy broadcasting of right-aligned shapes.
fn broadcast_shapes(shapes: &[Vec<i64>]) -> Result<Vec<i64>, TypeMismatch> {
    let ndim = shapes.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = vec![1; ndim];
    for shape in shapes {
        let offset = ndim - shape.len();
        for (i, &n) in shape.iter().enumerate() {
            let cur = &mut out[offset + i];
            if *cur == 1 {
                *cur = n;
            } else if n != 1 && n != *cur {
                return Err(mismatch(format!(
                    "cannot broadcast outer dimensions {shapes:?}"
                )));
            }
        }
    }
    Ok(out)
}

fn broadcast_input(m: &Matched<'_>, shape: &[i64]) -> Type {
    let offset = shape.len() - m.outer.len();
    let mut dims: Vec<(i64, i64)> = shape
        .iter()
        .enumerate()
        .map(|(j, &n)| {
            let step = match j.checked_sub(offset).map(|i| m.outer[i]) {
                Some(Type::FixedDim { shape, step, .. }) if *shape == n => *step,
                _ => 0,
            };
            (n, step)
        })
        .collect();
    dims.extend(m.inner.iter().filter_map(|d| match d {
        Type::FixedDim { shape, step, .. } => Some((*shape, *step)),
        _ => None,
    }));
    dims.iter()
        .rev()
        .fold(m.dtype.clone(), |elem, &(shape, step)| {
            Type::fixed_with_step(shape, step, elem)
        })
}

struct OutputContext<'a> {
    bindings: &'a Bindings,
    var_mode: bool,
    outer_dims: usize,
    outer_shape: &'a [i64],
    /// Ragged dimensions of the first ragged input, outermost first.
    reference: Vec<&'a Type>,
    order: Order,
}

fn build_output(pat: &Type, ctx: &OutputContext<'_>) -> Result<Type, TypeMismatch> {
    let pattern = split_pattern(pat);
    let dtype = substitute(pattern.dtype, ctx.bindings)?;

    if ctx.var_mode {
        let outer = if pattern.ellipsis.is_some() { ctx.outer_dims } else { 0 };
        let ndims = outer + pattern.dims.len();
        if ndims > ctx.reference.len() {
            return Err(mismatch(format!(
                "output `{pat}` has more var dimensions than the inputs"
            )));
        }
        return ctx.reference[..ndims]
            .iter()
            .rev()
            .try_fold(dtype, |elem, dim| match dim {
                Type::VarDim { offsets, .. } => Ok(Type::VarDim {
                    offsets: offsets.clone(),
                    elem: Box::new(elem),
                }),
                _ => Err(mismatch("expected a var dimension in the reference input")),
            });
    }

    let mut shape = Vec::new();
    match pattern.ellipsis {
        Some((Some(name), _)) => match ctx.bindings.ellipsis(name) {
            Some(bound) => shape.extend_from_slice(bound),
            None => return Err(mismatch(format!("unbound ellipsis `{name}...`"))),
        },
        Some((None, _)) => shape.extend_from_slice(ctx.outer_shape),
        None => {}
    }
    for dim in &pattern.dims {
        match dim {
            DimPattern::Fixed(n) => shape.push(*n),
            DimPattern::Symbolic(name) => match ctx.bindings.dim(name) {
                Some(n) => shape.push(n),
                None => return Err(mismatch(format!("unbound dimension `{name}`"))),
            },
            DimPattern::Var => {
                return Err(mismatch(format!("output `{pat}` mixes var and fixed dimensions")))
            }
        }
    }
    Ok(Type::fixed_array(&shape, dtype, ctx.order))
}

/// Match `in_types` against `sig` and infer the call's output types.
pub fn typecheck(sig: &FunctionSig, in_types: &[&Type]) -> Result<ApplySpec, TypeMismatch> {
    if sig.nin() != in_types.len() {
        return Err(mismatch(format!(
            "expected {} argument(s), got {}",
            sig.nin(),
            in_types.len()
        )));
    }

    let mut bindings = Bindings::default();
    let mut matched = Vec::with_capacity(in_types.len());
    for (k, (pat, actual)) in sig.ins.iter().zip(in_types).enumerate() {
        let m = match_arg(pat, actual, &mut bindings)
            .map_err(|e| mismatch(format!("argument {k}: {e}")))?;
        matched.push(m);
    }

    let var_mode = sig
        .ins
        .iter()
        .chain(&sig.outs)
        .any(|t| matches!(t, Type::Ellipsis { var: true, .. }));
    let with_ellipsis: Vec<&Matched<'_>> = matched.iter().filter(|m| m.ellipsis).collect();

    let (outer_dims, outer_shape) = if var_mode {
        let n = with_ellipsis.first().map_or(0, |m| m.outer.len());
        if with_ellipsis.iter().any(|m| m.outer.len() != n) {
            return Err(mismatch("var dimensions cannot be broadcast"));
        }
        (n, Vec::new())
    } else {
        let shapes: Vec<Vec<i64>> = with_ellipsis.iter().map(|m| fixed_shape(&m.outer)).collect();
        let shape = broadcast_shapes(&shapes)?;
        (shape.len(), shape)
    };
    if outer_dims > 0
        && sig
            .ins
            .iter()
            .chain(&sig.outs)
            .any(|t| !matches!(t, Type::Ellipsis { .. }))
    {
        return Err(mismatch(
            "outer dimensions require an ellipsis on every argument",
        ));
    }

    let in_types: Vec<Type> = matched
        .iter()
        .zip(in_types)
        .map(|(m, actual)| {
            if !var_mode && m.ellipsis {
                broadcast_input(m, &outer_shape)
            } else {
                (*actual).clone()
            }
        })
        .collect();

    let strided_in = in_types.iter().all(Type::is_ndarray);
    let c_in = strided_in && in_types.iter().all(Type::is_c_contiguous);
    let f_in = strided_in && in_types.iter().all(Type::is_f_contiguous);
    let order = if f_in && !c_in { Order::Fortran } else { Order::C };

    let reference = in_types
        .iter()
        .find(|t| matches!(t, Type::VarDim { .. }))
        .map(|t| split_concrete(t).0)
        .unwrap_or_default();
    let ctx = OutputContext {
        bindings: &bindings,
        var_mode,
        outer_dims,
        outer_shape: &outer_shape,
        reference,
        order,
    };
    let out_types = sig
        .outs
        .iter()
        .map(|pat| build_output(pat, &ctx))
        .collect::<Result<Vec<_>, _>>()?;

    let strided = strided_in && out_types.iter().all(Type::is_ndarray);
    let layout = Layout {
        c: strided && c_in && out_types.iter().all(Type::is_c_contiguous),
        fortran: strided && f_in && out_types.iter().all(Type::is_f_contiguous),
        strided,
    };

    Ok(ApplySpec {
        outer_dims,
        outer_var: var_mode,
        outer_shape,
        in_types,
        out_types,
        bindings,
        layout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndtypes::{ScalarKind, Typedefs};
    use pretty_assertions::assert_eq;

    fn sig(text: &str) -> FunctionSig {
        FunctionSig::parse(text, &Typedefs::default()).unwrap()
    }

    fn ty(text: &str) -> Type {
        Type::parse(text, &Typedefs::default()).unwrap()
    }

    #[test]
    fn test_binds_symbolic_dimension() {
        let spec = typecheck(&sig("N * int32 -> N * int32"), &[&ty("5 * int32")]).unwrap();
        assert_eq!(spec.outer_dims, 0);
        assert_eq!(spec.bindings.dim("N"), Some(5));
        assert_eq!(spec.out_types, vec![ty("5 * int32")]);
        assert!(spec.layout.c);
    }

    #[test]
    fn test_ellipsis_collects_outer_dims() {
        let spec = typecheck(&sig("... * N * float64 -> ... * N * float64"), &[&ty("2 * 3 * 4 * float64")])
            .unwrap();
        assert_eq!(spec.outer_dims, 2);
        assert_eq!(spec.outer_shape, vec![2, 3]);
        assert_eq!(spec.core_dims(), vec![4]);
        assert_eq!(spec.out_types[0].fixed_dims(), Some(vec![(2, 12), (3, 4), (4, 1)]));
    }

    #[test]
    fn test_scalar_broadcast_against_array() {
        let s = sig("... * N * int64, ... * int64 -> ... * N * int64");
        let spec = typecheck(&s, &[&ty("2 * 3 * int64"), &ty("int64")]).unwrap();
        assert_eq!(spec.outer_shape, vec![2]);
        // The scalar is stretched along the outer dimension with step 0.
        assert_eq!(spec.in_types[1].fixed_dims(), Some(vec![(2, 0)]));
        assert_eq!(spec.out_types[0].fixed_dims(), Some(vec![(2, 3), (3, 1)]));
        assert!(spec.layout.strided);
        assert!(!spec.layout.c);
    }

    #[test]
    fn test_incompatible_broadcast() {
        let s = sig("... * int64, ... * int64 -> ... * int64");
        let err = typecheck(&s, &[&ty("3 * int64"), &ty("4 * int64")]).unwrap_err();
        assert!(err.0.contains("broadcast"));
    }

    #[test]
    fn test_symbol_conflict() {
        let s = sig("N * int64, N * int64 -> N * int64");
        assert!(typecheck(&s, &[&ty("3 * int64"), &ty("3 * int64")]).is_ok());
        let err = typecheck(&s, &[&ty("3 * int64"), &ty("4 * int64")]).unwrap_err();
        assert!(err.0.contains("argument 1"));
    }

    #[test]
    fn test_element_type_mismatch() {
        let err = typecheck(&sig("... * int32 -> ... * int32"), &[&ty("3 * float64")]).unwrap_err();
        assert!(err.0.contains("element type"));
    }

    #[test]
    fn test_fixed_ellipsis_rejects_var_argument() {
        let arg = Type::var(vec![0, 2], Type::scalar(ScalarKind::Float64));
        assert!(typecheck(&sig("... * float64 -> ... * float64"), &[&arg]).is_err());
    }

    #[test]
    fn test_var_output_copies_offsets() {
        let arg = Type::var(
            vec![0, 3],
            Type::var(vec![0, 2, 5, 6], Type::scalar(ScalarKind::Float64)),
        );
        let spec = typecheck(&sig("var... * var * float64 -> var... * var * float64"), &[&arg]).unwrap();
        assert_eq!(spec.outer_dims, 1);
        assert!(spec.outer_var);
        assert_eq!(spec.out_types[0], arg);
        assert!(!spec.layout.strided);
    }

    #[test]
    fn test_var_ellipsis_accepts_scalar() {
        let spec = typecheck(&sig("var... * float64 -> var... * float64"), &[&ty("float64")]).unwrap();
        assert_eq!(spec.outer_dims, 0);
        assert_eq!(spec.out_types, vec![ty("float64")]);
    }

    #[test]
    fn test_typevar_substitution() {
        let spec = typecheck(&sig("... * T -> ... * T"), &[&ty("2 * uint16")]).unwrap();
        assert_eq!(spec.out_types, vec![ty("2 * uint16")]);
    }

    #[test]
    fn test_record_output() {
        let s = sig(
            "... * N * {index: int64, name: string, value: ?int64} -> ... * {valid: int64, missing: int64}",
        );
        let arg = ty("4 * {index: int64, name: string, value: ?int64}");
        let spec = typecheck(&s, &[&arg]).unwrap();
        assert_eq!(spec.out_types, vec![ty("{valid: int64, missing: int64}")]);
        assert!(!spec.layout.strided);
    }

    #[test]
    fn test_fortran_inputs_produce_fortran_outputs() {
        let arg = Type::fixed_array(&[2, 3], Type::scalar(ScalarKind::Int32), Order::Fortran);
        let spec = typecheck(&sig("... * int32 -> ... * int32"), &[&arg]).unwrap();
        assert!(spec.layout.fortran);
        assert!(!spec.layout.c);
        assert!(spec.out_types[0].is_f_contiguous());
    }

    #[test]
    fn test_named_ellipsis_must_agree() {
        let s = sig("Dims... * int64, Dims... * int64 -> Dims... * int64");
        assert!(typecheck(&s, &[&ty("2 * int64"), &ty("2 * int64")]).is_ok());
        assert!(typecheck(&s, &[&ty("2 * int64"), &ty("1 * int64")]).is_err());
    }

    #[test]
    fn test_arity() {
        let err = typecheck(&sig("int64 -> int64"), &[]).unwrap_err();
        assert!(err.0.contains("expected 1 argument"));
    }
}
