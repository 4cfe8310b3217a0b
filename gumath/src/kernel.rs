//! Kernel bodies and kernel sets.
//!
//! A kernel set bundles one signature with up to four implementations of it,
//! one per calling convention:
//!
//! - **C** / **Fortran**: contiguous NumPy-style loops receiving the loop
//!   dimensions `[n, core dims...]`.
//! - **Strided**: NumPy generalized-ufunc loops receiving dimensions and
//!   byte steps.
//! - **Xnd**: bodies that navigate typed [`View`]s themselves; the only
//!   convention that handles ragged arrays, optional values and records.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::ndtypes::{Bindings, FunctionSig};
use crate::xnd::{Array, Scalar, View};

/// Calling convention of a kernel body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Convention {
    C,
    Fortran,
    Strided,
    Xnd,
}

impl Convention {
    pub const ALL: [Convention; 4] = [
        Convention::C,
        Convention::Fortran,
        Convention::Strided,
        Convention::Xnd,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Convention::C => "c",
            Convention::Fortran => "fortran",
            Convention::Strided => "strided",
            Convention::Xnd => "xnd",
        }
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Body of a C- or Fortran-contiguous loop: `(args, dimensions)`.
pub type ContiguousKernel = fn(&mut LoopArgs<'_, '_>, &[i64]) -> KernelResult;

/// Body of a strided loop: `(args, dimensions, steps)`.
pub type StridedKernel = fn(&mut LoopArgs<'_, '_>, &[i64], &[i64]) -> KernelResult;

/// Body operating on typed views: inputs followed by outputs.
pub type XndKernel = fn(&mut [View<'_>]) -> KernelResult;

/// One implementation of a kernel signature.
#[derive(Clone, Copy)]
pub enum KernelBody {
    C(ContiguousKernel),
    Fortran(ContiguousKernel),
    Strided(StridedKernel),
    Xnd(XndKernel),
}

impl KernelBody {
    pub fn convention(&self) -> Convention {
        match self {
            KernelBody::C(_) => Convention::C,
            KernelBody::Fortran(_) => Convention::Fortran,
            KernelBody::Strided(_) => Convention::Strided,
            KernelBody::Xnd(_) => Convention::Xnd,
        }
    }
}

impl fmt::Debug for KernelBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KernelBody::{:?}", self.convention())
    }
}

/// Loop arguments handed to NumPy-style bodies.
///
/// `ptrs[k]` is the byte offset of argument `k` at the start of the loop;
/// bodies address elements by a byte displacement from it, computed from
/// the dimensions and steps they receive.
pub struct LoopArgs<'s, 'a> {
    stack: &'s mut [View<'a>],
    ptrs: Vec<i64>,
}

impl<'s, 'a> LoopArgs<'s, 'a> {
    pub(crate) fn new(stack: &'s mut [View<'a>]) -> Self {
        let ptrs = stack.iter().map(|v| v.offset() as i64).collect();
        Self { stack, ptrs }
    }

    pub fn nargs(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn set_ptr(&mut self, arg: usize, value: i64) {
        self.ptrs[arg] = value;
    }

    pub(crate) fn ptrs(&self) -> &[i64] {
        &self.ptrs
    }

    pub(crate) fn restore(&mut self, ptrs: &[i64]) {
        self.ptrs.copy_from_slice(ptrs);
    }

    fn arg_index(&self, arg: usize) -> Result<usize, KernelError> {
        if arg < self.stack.len() {
            Ok(arg)
        } else {
            Err(KernelError::Arity {
                expected: arg + 1,
                found: self.stack.len(),
            })
        }
    }

    /// Read argument `arg` at `delta` bytes from its loop pointer.
    pub fn read<T: Scalar>(&self, arg: usize, delta: i64) -> Result<T, KernelError> {
        let k = self.arg_index(arg)?;
        self.stack[k].load(self.ptrs[k], delta)
    }

    /// Write argument `arg` at `delta` bytes from its loop pointer.
    pub fn write<T: Scalar>(&mut self, arg: usize, delta: i64, value: T) -> KernelResult {
        let k = self.arg_index(arg)?;
        let base = self.ptrs[k];
        self.stack[k].store(base, delta, value)
    }
}

/// What a constraint gets to look at.
pub struct ConstraintInput<'c> {
    /// Symbolic dimensions and type variables bound by the signature.
    pub bindings: &'c Bindings,
    /// The argument values, when the caller supplied them.
    pub args: &'c [&'c Array],
}

type ConstraintFn = dyn Fn(&ConstraintInput<'_>) -> bool + Send + Sync;

/// A named predicate that must hold for a structurally matching kernel set
/// to be selected.
#[derive(Clone)]
pub struct Constraint {
    name: String,
    check: Arc<ConstraintFn>,
}

impl Constraint {
    pub fn new(
        name: impl Into<String>,
        check: impl Fn(&ConstraintInput<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check(&self, input: &ConstraintInput<'_>) -> bool {
        (self.check)(input)
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constraint").field("name", &self.name).finish()
    }
}

/// A registered signature with its implementations. Immutable once added
/// to a function.
#[derive(Clone)]
pub struct KernelSet {
    pub sig: FunctionSig,
    pub constraint: Option<Constraint>,
    /// The strided body absorbs the innermost outer dimension; contiguous
    /// bodies absorb all outer dimensions.
    pub vectorize: bool,
    pub(crate) c: Option<ContiguousKernel>,
    pub(crate) fortran: Option<ContiguousKernel>,
    pub(crate) strided: Option<StridedKernel>,
    pub(crate) xnd: Option<XndKernel>,
}

impl KernelSet {
    pub fn body(&self, convention: Convention) -> Option<KernelBody> {
        match convention {
            Convention::C => self.c.map(KernelBody::C),
            Convention::Fortran => self.fortran.map(KernelBody::Fortran),
            Convention::Strided => self.strided.map(KernelBody::Strided),
            Convention::Xnd => self.xnd.map(KernelBody::Xnd),
        }
    }

    /// Conventions this set has a body for, in canonical order.
    pub fn conventions(&self) -> Vec<Convention> {
        Convention::ALL
            .into_iter()
            .filter(|&c| self.body(c).is_some())
            .collect()
    }
}

impl fmt::Debug for KernelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelSet")
            .field("sig", &self.sig.to_string())
            .field("constraint", &self.constraint)
            .field("vectorize", &self.vectorize)
            .field("conventions", &self.conventions())
            .finish()
    }
}

/// Registration request for one kernel set.
///
/// ```ignore
/// registry.add_kernel(
///     KernelInit::new("add_scalar", "... * N * int64, ... * int64 -> ... * N * int64")
///         .vectorize()
///         .strided(add_scalar_strided)
///         .xnd(add_scalar_xnd),
/// )?;
/// ```
#[derive(Clone)]
pub struct KernelInit {
    pub name: String,
    pub sig: String,
    pub(crate) constraint: Option<Constraint>,
    pub(crate) vectorize: bool,
    pub(crate) c: Option<ContiguousKernel>,
    pub(crate) fortran: Option<ContiguousKernel>,
    pub(crate) strided: Option<StridedKernel>,
    pub(crate) xnd: Option<XndKernel>,
}

impl KernelInit {
    pub fn new(name: impl Into<String>, sig: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sig: sig.into(),
            constraint: None,
            vectorize: false,
            c: None,
            fortran: None,
            strided: None,
            xnd: None,
        }
    }

    pub fn vectorize(mut self) -> Self {
        self.vectorize = true;
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn c(mut self, body: ContiguousKernel) -> Self {
        self.c = Some(body);
        self
    }

    pub fn fortran(mut self, body: ContiguousKernel) -> Self {
        self.fortran = Some(body);
        self
    }

    pub fn strided(mut self, body: StridedKernel) -> Self {
        self.strided = Some(body);
        self
    }

    pub fn xnd(mut self, body: XndKernel) -> Self {
        self.xnd = Some(body);
        self
    }

    fn conventions(&self) -> Vec<Convention> {
        let present = [
            self.c.is_some(),
            self.fortran.is_some(),
            self.strided.is_some(),
            self.xnd.is_some(),
        ];
        Convention::ALL
            .into_iter()
            .zip(present)
            .filter_map(|(c, p)| p.then_some(c))
            .collect()
    }

    pub(crate) fn has_body(&self) -> bool {
        self.c.is_some() || self.fortran.is_some() || self.strided.is_some() || self.xnd.is_some()
    }

    pub(crate) fn into_set(self, sig: FunctionSig) -> KernelSet {
        KernelSet {
            sig,
            constraint: self.constraint,
            vectorize: self.vectorize,
            c: self.c,
            fortran: self.fortran,
            strided: self.strided,
            xnd: self.xnd,
        }
    }
}

impl fmt::Debug for KernelInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelInit")
            .field("name", &self.name)
            .field("sig", &self.sig)
            .field("constraint", &self.constraint)
            .field("vectorize", &self.vectorize)
            .field("conventions", &self.conventions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndtypes::Typedefs;

    fn noop_xnd(_: &mut [View<'_>]) -> KernelResult {
        Ok(())
    }

    fn noop_strided(_: &mut LoopArgs<'_, '_>, _: &[i64], _: &[i64]) -> KernelResult {
        Ok(())
    }

    #[test]
    fn test_builder_records_bodies() {
        let init = KernelInit::new("f", "... * int64 -> ... * int64")
            .vectorize()
            .strided(noop_strided)
            .xnd(noop_xnd);
        assert!(init.has_body());
        let sig = FunctionSig::parse(&init.sig, &Typedefs::default()).unwrap();
        let set = init.into_set(sig);
        assert!(set.vectorize);
        assert_eq!(set.conventions(), vec![Convention::Strided, Convention::Xnd]);
        assert!(set.body(Convention::C).is_none());
        assert_eq!(set.body(Convention::Xnd).map(|b| b.convention()), Some(Convention::Xnd));
    }

    #[test]
    fn test_constraint_sees_bindings() {
        let c = Constraint::new("n_even", |input| {
            input.bindings.dim("N").is_some_and(|n| n % 2 == 0)
        });
        assert_eq!(c.name(), "n_even");
        assert_eq!(format!("{c:?}"), "Constraint { name: \"n_even\" }");
        assert!(!c.check(&ConstraintInput {
            bindings: &Bindings::default(),
            args: &[],
        }));
    }

    #[test]
    fn test_loop_args_bounds() {
        let a = Array::from_slice(&[2], &[1.0f64, 2.0]).unwrap();
        let mut stack = vec![a.view()];
        let mut args = LoopArgs::new(&mut stack);
        assert_eq!(args.read::<f64>(0, 8).unwrap(), 2.0);
        assert!(matches!(args.read::<f64>(0, 16), Err(KernelError::BufferOverrun { .. })));
        assert!(matches!(args.read::<f64>(1, 0), Err(KernelError::Arity { .. })));
        assert_eq!(args.write(0, 0, 3.0f64), Err(KernelError::ReadOnly));
    }
}
