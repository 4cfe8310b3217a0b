//! Multimethod dispatch and execution of kernels over typed arrays.
//!
//! A [`Registry`] maps function names to ordered lists of kernel sets. Each
//! set carries a signature in a datashape-like type language, an optional
//! constraint and up to four bodies, one per calling convention:
//!
//! - C and Fortran: contiguous loops over raw element pointers
//! - Strided: generalized ufunc inner loops with byte steps
//! - Xnd: typed [`View`]s, the only convention that handles ragged data
//!
//! Calling a function selects the first set whose signature unifies with the
//! argument types, then walks the outer dimensions the signature left open,
//! fixed or ragged, and invokes the body at each leaf.
//!
//! ```text
//! lookup(name) ──► select(kernel sets, arg types) ──► apply(body, stack)
//!                    first match wins                  outer dims walked
//! ```
//!
//! # Example
//!
//! ```
//! use gumath::{Array, EngineConfig, Registry};
//!
//! let registry = Registry::new(EngineConfig::default())?;
//! let x = Array::from_slice(&[3], &[10i64, 20, 30])?;
//! let y = Array::scalar(5i64);
//! let out = registry.call("add_scalar", &[&x, &y])?;
//! assert_eq!(out[0].to_vec::<i64>()?, vec![15, 25, 35]);
//! # Ok::<(), gumath::GumathError>(())
//! ```

pub mod apply;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod kernel;
mod kernels;
pub mod ndtypes;
pub mod registry;
pub mod xnd;

pub use apply::apply;
pub use config::{EngineConfig, MAX_KERNELS};
pub use dispatch::ResolvedKernel;
pub use error::{GumathError, KernelError, KernelResult, ParseError, Result};
pub use kernel::{
    Constraint, ConstraintInput, ContiguousKernel, Convention, KernelBody, KernelInit, KernelSet, LoopArgs,
    StridedKernel, XndKernel,
};
pub use ndtypes::{FunctionSig, ScalarKind, Type};
pub use registry::{Function, Registry};
pub use xnd::{Array, Scalar, Slot, View};
