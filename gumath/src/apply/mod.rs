//! The dimensional executor.
//!
//! [`apply`] runs a [`ResolvedKernel`] over an argument stack, walking the
//! outer dimensions the signature left unconsumed and invoking the body in
//! its calling convention. The first failing leaf aborts the call; output
//! written before the failure stays as written.

mod numpy;
mod xnd_loop;

use tracing::trace;

use crate::dispatch::ResolvedKernel;
use crate::error::{GumathError, KernelError, Result};
use crate::kernel::KernelBody;
use crate::ndtypes::{Order, Type};
use crate::registry::Registry;
use crate::xnd::{Array, View};

/// Execute `kernel` over `stack` (inputs followed by outputs).
pub fn apply(kernel: &ResolvedKernel<'_>, stack: &mut [View<'_>]) -> Result<()> {
    let nargs = kernel.set.sig.nargs();
    if stack.len() != nargs {
        return Err(GumathError::InvalidArgument(format!(
            "{}: expected a stack of {nargs} argument(s), got {}",
            kernel.name,
            stack.len()
        )));
    }
    trace!(
        function = kernel.name,
        convention = %kernel.tag,
        outer_dims = kernel.outer_dims,
        vectorized = kernel.vectorized,
        "apply"
    );

    match kernel.body() {
        KernelBody::Xnd(body) => xnd_loop::xnd_map(body, stack, kernel.outer_dims, kernel.vectorized),
        KernelBody::C(body) => numpy::contiguous(body, Order::C, stack, kernel),
        KernelBody::Fortran(body) => numpy::contiguous(body, Order::Fortran, stack, kernel),
        KernelBody::Strided(body) => numpy::strided(body, stack, kernel),
    }
}

fn run(kernel: &ResolvedKernel<'_>, inputs: &[&Array], outputs: &mut [Array]) -> Result<()> {
    let mut stack = kernel.stack(inputs, outputs)?;
    apply(kernel, &mut stack)
}

impl Registry {
    /// Select a kernel for `inputs`, allocate the inferred outputs and
    /// execute it.
    pub fn call(&self, name: &str, inputs: &[&Array]) -> Result<Vec<Array>> {
        let in_types: Vec<&Type> = inputs.iter().map(|a| a.ty()).collect();
        let kernel = self.select(name, &in_types, inputs)?;
        let mut outputs = kernel
            .spec
            .out_types
            .iter()
            .map(|ty| Array::zeros(ty.clone()))
            .collect::<std::result::Result<Vec<_>, KernelError>>()?;
        run(&kernel, inputs, &mut outputs)?;
        Ok(outputs)
    }

    /// Like [`Registry::call`], writing into caller-provided outputs.
    pub fn call_into(&self, name: &str, inputs: &[&Array], outputs: &mut [Array]) -> Result<()> {
        let in_types: Vec<&Type> = inputs.iter().map(|a| a.ty()).collect();
        let kernel = self.select(name, &in_types, inputs)?;
        run(&kernel, inputs, outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::KernelResult;
    use crate::kernel::{Convention, KernelInit, LoopArgs};
    use pretty_assertions::assert_eq;

    fn registry() -> Registry {
        Registry::new(EngineConfig {
            builtin_kernels: false,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    /// Doubles `n` contiguous int32 values.
    fn double_c(args: &mut LoopArgs<'_, '_>, dims: &[i64]) -> KernelResult {
        for i in 0..dims[0] {
            let x: i32 = args.read(0, i * 4)?;
            args.write(1, i * 4, x * 2)?;
        }
        Ok(())
    }

    /// Writes the loop length it was called with.
    fn loop_len_c(args: &mut LoopArgs<'_, '_>, dims: &[i64]) -> KernelResult {
        for i in 0..dims[0] {
            args.write(1, i * 8, dims[0])?;
        }
        Ok(())
    }

    /// Fails on negative input.
    fn checked_xnd(stack: &mut [View<'_>]) -> KernelResult {
        let x: i64 = stack[0].read()?;
        if x < 0 {
            return Err(KernelError::Value(format!("negative input {x}")));
        }
        stack[1].write(x)
    }

    /// Negates a one-dimensional row.
    fn negate_row_xnd(stack: &mut [View<'_>]) -> KernelResult {
        let (x, y) = stack.split_at_mut(1);
        for i in 0..x[0].fixed_shape()? {
            let v: i64 = x[0].fixed_dim_next(i)?.read()?;
            y[0].fixed_dim_next(i)?.write(-v)?;
        }
        Ok(())
    }

    /// Sums each row.
    fn row_sum_strided(args: &mut LoopArgs<'_, '_>, dims: &[i64], steps: &[i64]) -> KernelResult {
        let (n, m) = (dims[0], dims[1]);
        for i in 0..n {
            let mut acc = 0i64;
            for j in 0..m {
                acc += args.read::<i64>(0, i * steps[0] + j * steps[2])?;
            }
            args.write(1, i * steps[1], acc)?;
        }
        Ok(())
    }

    #[test]
    fn test_vectorized_contiguous_flattens_outer_dims() {
        let mut reg = registry();
        reg.add_kernel(KernelInit::new("len", "... * int64 -> ... * int64").vectorize().c(loop_len_c))
            .unwrap();
        let x = Array::from_slice(&[2, 3], &[0i64; 6]).unwrap();
        let out = reg.call("len", &[&x]).unwrap();
        assert_eq!(out[0].to_vec::<i64>().unwrap(), vec![6; 6]);
    }

    #[test]
    fn test_unvectorized_contiguous_calls_each_leaf() {
        let mut reg = registry();
        reg.add_kernel(KernelInit::new("len", "... * int64 -> ... * int64").c(loop_len_c))
            .unwrap();
        let x = Array::from_slice(&[2, 3], &[0i64; 6]).unwrap();
        let out = reg.call("len", &[&x]).unwrap();
        assert_eq!(out[0].to_vec::<i64>().unwrap(), vec![1; 6]);
    }

    #[test]
    fn test_vectorized_xnd_body_iterates_innermost_dim() {
        let mut reg = registry();
        reg.add_kernel(KernelInit::new("neg", "... * int64 -> ... * int64").vectorize().xnd(negate_row_xnd))
            .unwrap();
        let x = Array::from_slice(&[3], &[1i64, 2, 3]).unwrap();
        let kernel = reg.select("neg", &[x.ty()], &[&x]).unwrap();
        assert_eq!(kernel.tag, Convention::Xnd);
        assert_eq!(kernel.outer_dims, 1);
        assert!(kernel.vectorized);
        assert_eq!(reg.call("neg", &[&x]).unwrap()[0].to_vec::<i64>().unwrap(), vec![-1, -2, -3]);

        let x = Array::from_slice(&[2, 2], &[1i64, 2, 3, 4]).unwrap();
        let out = reg.call("neg", &[&x]).unwrap();
        assert_eq!(out[0].to_rows::<i64>().unwrap(), vec![vec![-1, -2], vec![-3, -4]]);
    }

    #[test]
    fn test_fortran_body_on_fortran_arrays() {
        let mut reg = registry();
        reg.add_kernel(KernelInit::new("double", "... * int32 -> ... * int32").vectorize().fortran(double_c))
            .unwrap();
        let x = Array::from_slice_fortran(&[2, 2], &[1i32, 3, 2, 4]).unwrap();
        let out = reg.call("double", &[&x]).unwrap();
        assert!(out[0].ty().is_f_contiguous());
        assert_eq!(out[0].to_vec::<i32>().unwrap(), vec![2, 4, 6, 8]);
    }

    #[test]
    fn test_strided_core_steps() {
        let mut reg = registry();
        reg.add_kernel(
            KernelInit::new("row_sum", "... * N * int64 -> ... * int64")
                .vectorize()
                .strided(row_sum_strided),
        )
        .unwrap();
        let x = Array::from_slice(&[2, 3], &[1i64, 2, 3, 4, 5, 6]).unwrap();
        let out = reg.call("row_sum", &[&x]).unwrap();
        assert_eq!(out[0].to_vec::<i64>().unwrap(), vec![6, 15]);

        // Three outer levels: the executor walks two, the body absorbs one.
        let x = Array::from_slice(&[2, 2, 1, 2], &[1i64, 1, 2, 2, 3, 3, 4, 4]).unwrap();
        let out = reg.call("row_sum", &[&x]).unwrap();
        assert_eq!(out[0].to_vec::<i64>().unwrap(), vec![2, 4, 6, 8]);
    }

    #[test]
    fn test_leaf_error_reports_path() {
        let mut reg = registry();
        reg.add_kernel(KernelInit::new("checked", "... * int64 -> ... * int64").xnd(checked_xnd))
            .unwrap();
        let x = Array::from_slice(&[3], &[5i64, -1, 7]).unwrap();
        let in_types = [x.ty()];
        let kernel = reg.select("checked", &in_types, &[&x]).unwrap();
        let mut outputs = vec![Array::zeros(kernel.spec.out_types[0].clone()).unwrap()];
        let err = run(&kernel, &[&x], &mut outputs).unwrap_err();
        match err {
            GumathError::LeafExecution { path, source } => {
                assert_eq!(path, vec![1]);
                assert_eq!(source, KernelError::Value("negative input -1".into()));
            }
            other => panic!("unexpected error {other:?}"),
        }
        // The first leaf ran, the third did not.
        assert_eq!(outputs[0].to_vec::<i64>().unwrap(), vec![5, 0, 0]);
    }

    #[test]
    fn test_stack_length_is_checked() {
        let mut reg = registry();
        reg.add_kernel(KernelInit::new("checked", "int64 -> int64").xnd(checked_xnd))
            .unwrap();
        let x = Array::scalar(1i64);
        let kernel = reg.select("checked", &[x.ty()], &[&x]).unwrap();
        let mut stack = vec![x.view()];
        assert!(matches!(apply(&kernel, &mut stack), Err(GumathError::InvalidArgument(_))));
    }
}
