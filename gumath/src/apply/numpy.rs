//! Outer-dimension loops for NumPy-style bodies.
//!
//! Contiguous bodies either receive all outer dimensions flattened into one
//! loop (vectorized) or are called once per outer index with a loop length
//! of 1. Strided bodies are driven like generalized ufunc inner loops: the
//! executor walks the outer dimensions, and a vectorized body absorbs the
//! innermost one through its loop steps.

use tracing::trace;

use crate::dispatch::ResolvedKernel;
use crate::error::{GumathError, Result};
use crate::kernel::{ContiguousKernel, LoopArgs, StridedKernel};
use crate::ndtypes::Order;
use crate::xnd::View;

/// `(shape, byte step)` of every dimension of every argument.
fn byte_layouts(stack: &[View<'_>], outer: usize) -> Result<Vec<Vec<(i64, i64)>>> {
    stack
        .iter()
        .enumerate()
        .map(|(k, view)| {
            let ty = view.ty();
            let dims = ty
                .fixed_dims()
                .filter(|dims| ty.is_ndarray() && dims.len() >= outer)
                .ok_or_else(|| {
                    GumathError::InvalidArgument(format!(
                        "argument {k} of type `{ty}` is not a fixed array with {outer} outer dimension(s)"
                    ))
                })?;
            let itemsize = ty.dtype().datasize() as i64;
            Ok(dims.into_iter().map(|(shape, step)| (shape, step * itemsize)).collect())
        })
        .collect()
}

/// Iterate the outer dimensions `level..depth`, advancing every argument's
/// loop pointer by its byte step, and call `leaf` at each index.
fn walk<'s, 'a, F>(
    args: &mut LoopArgs<'s, 'a>,
    layouts: &[Vec<(i64, i64)>],
    shape: &[i64],
    level: usize,
    depth: usize,
    path: &mut Vec<i64>,
    leaf: &mut F,
) -> Result<()>
where
    F: FnMut(&mut LoopArgs<'s, 'a>, &[i64]) -> Result<()>,
{
    if level == depth {
        return leaf(args, path);
    }
    let saved = args.ptrs().to_vec();
    for i in 0..shape[level] {
        for (k, dims) in layouts.iter().enumerate() {
            args.set_ptr(k, saved[k] + i * dims[level].1);
        }
        path.push(i);
        let result = walk(args, layouts, shape, level + 1, depth, path, leaf);
        path.pop();
        result?;
    }
    args.restore(&saved);
    Ok(())
}

pub(crate) fn contiguous(
    body: ContiguousKernel,
    order: Order,
    stack: &mut [View<'_>],
    kernel: &ResolvedKernel<'_>,
) -> Result<()> {
    let in_order = stack.iter().all(|v| match order {
        Order::C => v.ty().is_c_contiguous(),
        Order::Fortran => v.ty().is_f_contiguous(),
    });
    if !in_order {
        return Err(GumathError::InvalidArgument(format!(
            "{}: arguments are not {order:?}-contiguous",
            kernel.name
        )));
    }

    let outer = kernel.outer_dims;
    let shape = &kernel.spec.outer_shape;
    let core = kernel.spec.core_dims();
    let layouts = byte_layouts(stack, outer)?;
    let mut args = LoopArgs::new(stack);

    if kernel.vectorized {
        let mut dims = vec![shape.iter().product::<i64>()];
        dims.extend_from_slice(&core);
        trace!(function = kernel.name, ?dims, "contiguous loop");
        return body(&mut args, &dims).map_err(|e| GumathError::from_leaf(&[], e));
    }

    let mut dims = vec![1];
    dims.extend_from_slice(&core);
    let mut path = Vec::with_capacity(outer);
    walk(&mut args, &layouts, shape, 0, outer, &mut path, &mut |args, path| {
        body(args, &dims).map_err(|e| GumathError::from_leaf(path, e))
    })
}

pub(crate) fn strided(body: StridedKernel, stack: &mut [View<'_>], kernel: &ResolvedKernel<'_>) -> Result<()> {
    let outer = kernel.outer_dims;
    let shape = &kernel.spec.outer_shape;
    let layouts = byte_layouts(stack, outer)?;

    let (depth, loop_len, mut steps) = if kernel.vectorized && outer > 0 {
        let inner = outer - 1;
        let loop_steps: Vec<i64> = layouts.iter().map(|dims| dims[inner].1).collect();
        (inner, shape[inner], loop_steps)
    } else {
        (outer, 1, vec![0; layouts.len()])
    };
    for dims in &layouts {
        steps.extend(dims[outer..].iter().map(|&(_, step)| step));
    }
    let mut dims = vec![loop_len];
    dims.extend_from_slice(&kernel.spec.core_dims());
    trace!(function = kernel.name, ?dims, ?steps, depth, "strided loop");

    let mut args = LoopArgs::new(stack);
    let mut path = Vec::with_capacity(depth);
    walk(&mut args, &layouts, shape, 0, depth, &mut path, &mut |args, path| {
        body(args, &dims, &steps).map_err(|e| GumathError::from_leaf(path, e))
    })
}
