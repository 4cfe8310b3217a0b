//! `add_scalar`: add an int64 scalar to every element of a row.

use crate::error::{KernelError, KernelResult, Result};
use crate::kernel::{KernelInit, LoopArgs};
use crate::registry::Registry;
use crate::xnd::View;

const SIGNATURE: &str = "... * N * int64, ... * int64 -> ... * N * int64";

fn add(x: i64, y: i64) -> std::result::Result<i64, KernelError> {
    x.checked_add(y)
        .ok_or_else(|| KernelError::Value(format!("integer overflow in {x} + {y}")))
}

/// `dims = [n, N]`; `steps = [x, y, z loop steps, x core step, z core step]`.
fn add_scalar_strided(args: &mut LoopArgs<'_, '_>, dims: &[i64], steps: &[i64]) -> KernelResult {
    let (n, len) = (dims[0], dims[1]);
    for i in 0..n {
        let y: i64 = args.read(1, i * steps[1])?;
        for j in 0..len {
            let x: i64 = args.read(0, i * steps[0] + j * steps[3])?;
            args.write(2, i * steps[2] + j * steps[4], add(x, y)?)?;
        }
    }
    Ok(())
}

fn add_row(x: &mut View<'_>, y: &View<'_>, z: &mut View<'_>) -> KernelResult {
    let yy: i64 = y.read()?;
    for i in 0..x.fixed_shape()? {
        let xx: i64 = x.fixed_dim_next(i)?.read()?;
        z.fixed_dim_next(i)?.write(add(xx, yy)?)?;
    }
    Ok(())
}

/// Vectorized calls keep the innermost outer dimension on every view.
fn add_scalar_xnd(stack: &mut [View<'_>]) -> KernelResult {
    let found = stack.len();
    let [x, y, z] = stack else {
        return Err(KernelError::Arity { expected: 3, found });
    };
    if x.ty().ndim() < 2 {
        return add_row(x, y, z);
    }
    for i in 0..x.fixed_shape()? {
        add_row(&mut x.fixed_dim_next(i)?, &y.fixed_dim_next(i)?, &mut z.fixed_dim_next(i)?)?;
    }
    Ok(())
}

pub(super) fn register(registry: &mut Registry) -> Result<()> {
    registry.add_kernel(
        KernelInit::new("add_scalar", SIGNATURE)
            .vectorize()
            .strided(add_scalar_strided)
            .xnd(add_scalar_xnd),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::GumathError;
    use crate::kernel::Convention;
    use crate::xnd::Array;
    use pretty_assertions::assert_eq;

    fn registry(conventions: Vec<Convention>) -> Registry {
        let mut reg = Registry::new(EngineConfig {
            builtin_kernels: false,
            conventions,
            ..EngineConfig::default()
        })
        .unwrap();
        register(&mut reg).unwrap();
        reg
    }

    #[test]
    fn test_broadcast_scalar_over_rows() {
        for conventions in [Convention::ALL.to_vec(), vec![Convention::Xnd]] {
            let reg = registry(conventions);
            let x = Array::from_slice(&[2, 3], &[1i64, 2, 3, 4, 5, 6]).unwrap();
            let y = Array::scalar(10i64);
            let out = reg.call("add_scalar", &[&x, &y]).unwrap();
            assert_eq!(out[0].to_rows::<i64>().unwrap(), vec![vec![11, 12, 13], vec![14, 15, 16]]);
        }
    }

    #[test]
    fn test_per_row_scalars() {
        let reg = registry(Convention::ALL.to_vec());
        let x = Array::from_slice(&[2, 2], &[1i64, 1, 1, 1]).unwrap();
        let y = Array::from_slice(&[2], &[100i64, 200]).unwrap();
        let out = reg.call("add_scalar", &[&x, &y]).unwrap();
        assert_eq!(out[0].to_vec::<i64>().unwrap(), vec![101, 101, 201, 201]);
    }

    #[test]
    fn test_xnd_body_receives_innermost_outer_dim() {
        let reg = registry(vec![Convention::Xnd]);
        let x = Array::from_slice(&[2, 2, 2], &[1i64, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let y = Array::from_slice(&[2, 2], &[10i64, 20, 30, 40]).unwrap();
        let kernel = reg.select("add_scalar", &[x.ty(), y.ty()], &[&x, &y]).unwrap();
        assert_eq!((kernel.tag, kernel.outer_dims, kernel.vectorized), (Convention::Xnd, 2, true));
        let out = reg.call("add_scalar", &[&x, &y]).unwrap();
        assert_eq!(out[0].to_vec::<i64>().unwrap(), vec![11, 12, 23, 24, 35, 36, 47, 48]);
    }

    #[test]
    fn test_overflow_is_a_leaf_error() {
        let reg = registry(Convention::ALL.to_vec());
        let x = Array::from_slice(&[2], &[1i64, i64::MAX]).unwrap();
        let y = Array::scalar(1i64);
        let err = reg.call("add_scalar", &[&x, &y]).unwrap_err();
        assert!(matches!(
            err,
            GumathError::LeafExecution { source: KernelError::Value(_), .. }
        ));
    }
}
