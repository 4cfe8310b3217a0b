//! Kernel selection.
//!
//! Selection is first match wins: kernel sets are tried in registration
//! order and the first one whose signature unifies with the call, whose
//! constraint accepts it and which has a body usable for the argument
//! layout is chosen. There is no specificity ranking.

use tracing::{debug, trace};

use crate::error::{GumathError, Result};
use crate::kernel::{ConstraintInput, Convention, KernelBody, KernelSet};
use crate::ndtypes::{typecheck, ApplySpec, Type};
use crate::registry::Registry;
use crate::xnd::{Array, Slot, View};

/// A kernel chosen for one call.
#[derive(Debug)]
pub struct ResolvedKernel<'r> {
    /// The function name.
    pub name: &'r str,
    /// Calling convention of the chosen body.
    pub tag: Convention,
    /// The kernel set the body belongs to.
    pub set: &'r KernelSet,
    /// Number of outer dimensions the executor iterates over.
    pub outer_dims: usize,
    /// The body absorbs outer dimensions itself: all of them for C and
    /// Fortran bodies, the innermost one for strided and Xnd bodies.
    pub vectorized: bool,
    /// Broadcast inputs, inferred outputs and bound dimensions.
    pub spec: ApplySpec,
    body: KernelBody,
}

impl<'r> ResolvedKernel<'r> {
    pub fn body(&self) -> KernelBody {
        self.body
    }

    /// Build the argument stack for this kernel: read-only views of
    /// `inputs` (as broadcast by the signature) followed by writable views
    /// of `outputs`.
    pub fn stack<'a>(&'a self, inputs: &[&'a Array], outputs: &'a mut [Array]) -> Result<Vec<View<'a>>> {
        let spec = &self.spec;
        if inputs.len() != spec.in_types.len() || outputs.len() != spec.out_types.len() {
            return Err(GumathError::InvalidArgument(format!(
                "{}: expected {} input(s) and {} output(s), got {} and {}",
                self.name,
                spec.in_types.len(),
                spec.out_types.len(),
                inputs.len(),
                outputs.len()
            )));
        }

        let mut stack = Vec::with_capacity(inputs.len() + outputs.len());
        for (k, (input, ty)) in inputs.iter().zip(&spec.in_types).enumerate() {
            if !broadcasts_to(input.ty(), ty) {
                return Err(GumathError::InvalidArgument(format!(
                    "{}: input {k} of type `{}` does not match `{ty}`",
                    self.name,
                    input.ty()
                )));
            }
            stack.push(View::new(ty, Slot::Shared(input.buffer())));
        }
        for (k, (output, expected)) in outputs.iter_mut().zip(&spec.out_types).enumerate() {
            let (ty, buffer) = output.split_mut();
            if !output_compatible(ty, expected) {
                return Err(GumathError::InvalidArgument(format!(
                    "{}: output {k} of type `{ty}` does not match `{expected}`",
                    self.name
                )));
            }
            stack.push(View::new(ty, Slot::Exclusive(buffer)));
        }
        Ok(stack)
    }
}

/// True if `target` is `actual` or a broadcast of it: extra leading
/// dimensions and stretched length-1 dimensions have step 0.
fn broadcasts_to(actual: &Type, target: &Type) -> bool {
    if actual == target {
        return true;
    }
    let (Some(a), Some(t)) = (actual.fixed_dims(), target.fixed_dims()) else {
        return false;
    };
    if actual.dtype() != target.dtype() || a.len() > t.len() {
        return false;
    }
    let lead = t.len() - a.len();
    t[..lead].iter().all(|&(_, step)| step == 0)
        && a.iter().zip(&t[lead..]).all(|(&(ashape, astep), &(tshape, tstep))| {
            (ashape == tshape && (astep == tstep || ashape <= 1)) || (ashape == 1 && tstep == 0)
        })
}

/// Fixed outputs must have exactly the inferred type. Ragged outputs need
/// the same dimension structure and element type; their row lengths are
/// checked by the executor.
fn output_compatible(actual: &Type, expected: &Type) -> bool {
    if actual == expected {
        return true;
    }
    fn all_var(t: &Type) -> bool {
        let mut cur = t;
        while let Some(elem) = cur.elem() {
            if !matches!(cur, Type::VarDim { .. }) {
                return false;
            }
            cur = elem;
        }
        true
    }
    actual.ndim() == expected.ndim()
        && actual.dtype() == expected.dtype()
        && all_var(actual)
        && all_var(expected)
}

fn format_call(in_types: &[&Type]) -> String {
    in_types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Registry {
    /// Select the kernel for calling `name` with arguments of `in_types`.
    ///
    /// `args` are the argument values handed to constraints; pass an empty
    /// slice when only types are known.
    pub fn select(&self, name: &str, in_types: &[&Type], args: &[&Array]) -> Result<ResolvedKernel<'_>> {
        let func = self
            .lookup(name)
            .ok_or_else(|| GumathError::UnknownFunction(name.to_string()))?;

        for (index, set) in func.kernels().iter().enumerate() {
            let spec = match typecheck(&set.sig, in_types) {
                Ok(spec) => spec,
                Err(reason) => {
                    trace!(function = name, candidate = index, signature = %set.sig, %reason, "signature rejected");
                    continue;
                }
            };

            if let Some(constraint) = &set.constraint {
                let input = ConstraintInput {
                    bindings: &spec.bindings,
                    args,
                };
                if !constraint.check(&input) {
                    trace!(function = name, candidate = index, constraint = constraint.name(), "constraint rejected");
                    continue;
                }
            }

            let Some((tag, body)) = self.choose_convention(set, &spec) else {
                trace!(function = name, candidate = index, "no body eligible for argument layout");
                continue;
            };

            let vectorized = set.vectorize && spec.outer_dims > 0;
            debug!(
                function = name,
                candidate = index,
                signature = %set.sig,
                convention = %tag,
                outer_dims = spec.outer_dims,
                vectorized,
                "selected kernel"
            );
            return Ok(ResolvedKernel {
                name: func.name(),
                tag,
                set,
                outer_dims: spec.outer_dims,
                vectorized,
                spec,
                body,
            });
        }

        Err(GumathError::NoApplicableKernel {
            name: name.to_string(),
            call: format_call(in_types),
            examined: func.len(),
            candidates: func.kernels().iter().map(|k| k.sig.to_string()).collect(),
        })
    }

    fn choose_convention(&self, set: &KernelSet, spec: &ApplySpec) -> Option<(Convention, KernelBody)> {
        self.config().conventions.iter().find_map(|&tag| {
            let eligible = match tag {
                Convention::C => spec.layout.c,
                Convention::Fortran => spec.layout.fortran,
                Convention::Strided => spec.layout.strided,
                Convention::Xnd => true,
            };
            if eligible {
                set.body(tag).map(|body| (tag, body))
            } else {
                None
            }
        })
    }
}
