//! Outer-dimension recursion for Xnd bodies.
//!
//! At every level each argument reports its own dimension kind: a fixed
//! dimension iterates `0..shape` by offset arithmetic, a ragged dimension
//! iterates the current row given by its offsets. All arguments must agree
//! on the length of the level; the first disagreement aborts the call.

use tracing::trace;

use crate::error::{GumathError, KernelError, Result};
use crate::kernel::XndKernel;
use crate::ndtypes::Type;
use crate::xnd::{VarIndices, View};

#[derive(Debug, Clone, Copy)]
enum DimCursor {
    Fixed { shape: i64 },
    Var(VarIndices),
}

impl DimCursor {
    fn resolve(view: &View<'_>) -> std::result::Result<Self, KernelError> {
        match view.ty() {
            Type::FixedDim { shape, .. } => Ok(DimCursor::Fixed { shape: *shape }),
            Type::VarDim { .. } => view.var_indices().map(DimCursor::Var),
            other => Err(KernelError::TypeMismatch {
                expected: "an outer dimension".to_string(),
                found: other.to_string(),
            }),
        }
    }

    fn shape(&self) -> i64 {
        match self {
            DimCursor::Fixed { shape } => *shape,
            DimCursor::Var(indices) => indices.shape,
        }
    }

    fn next<'v>(&self, view: &'v mut View<'_>, i: i64) -> std::result::Result<View<'v>, KernelError> {
        match self {
            DimCursor::Fixed { .. } => view.fixed_dim_next(i),
            DimCursor::Var(VarIndices { start, step, .. }) => view.var_dim_next(*start, *step, i),
        }
    }
}

/// Walk `outer_dims` levels, or one fewer when the body is vectorized and
/// iterates the innermost outer dimension itself.
pub(crate) fn xnd_map(body: XndKernel, stack: &mut [View<'_>], outer_dims: usize, vectorize: bool) -> Result<()> {
    let depth = if vectorize { outer_dims.saturating_sub(1) } else { outer_dims };
    let mut path = Vec::with_capacity(depth);
    map_level(body, stack, depth, &mut path)
}

fn map_level(body: XndKernel, stack: &mut [View<'_>], remaining: usize, path: &mut Vec<i64>) -> Result<()> {
    if remaining == 0 {
        return body(stack).map_err(|e| GumathError::from_leaf(path, e));
    }

    let cursors = stack
        .iter()
        .map(DimCursor::resolve)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GumathError::from_leaf(path, e))?;
    let Some(shape) = cursors.first().map(DimCursor::shape) else {
        return Ok(());
    };
    if let Some(other) = cursors.iter().find(|c| c.shape() != shape) {
        return Err(GumathError::ShapeMismatch {
            path: path.clone(),
            row: path.last().copied(),
            expected: shape,
            found: other.shape(),
        });
    }
    trace!(level = path.len(), shape, "xnd outer loop");

    for i in 0..shape {
        let mut next = stack
            .iter_mut()
            .zip(&cursors)
            .map(|(view, cursor)| cursor.next(view, i))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| GumathError::from_leaf(path, e))?;
        path.push(i);
        let result = map_level(body, &mut next, remaining - 1, path);
        path.pop();
        result?;
    }
    Ok(())
}
