//! Elementwise kernel families: `copy` and `sin`.
//!
//! Every `(function, source, destination)` triple registers four kernel
//! sets, tried in this order:
//!
//! 1. `... * S -> ... * D`, vectorized, with C, Fortran and strided bodies;
//! 2. `... * N * S -> ... * N * D`, an Xnd loop over a fixed dimension;
//! 3. `var... * var * S -> var... * var * D`, an Xnd loop over a ragged row;
//! 4. `var... * S -> var... * D`, an Xnd body on single elements.

use crate::error::{KernelError, KernelResult, Result};
use crate::kernel::{KernelInit, LoopArgs};
use crate::registry::Registry;
use crate::xnd::{Scalar, View};

type Pair<'s, 'a> = (&'s mut View<'a>, &'s mut View<'a>);

fn pair<'s, 'a>(stack: &'s mut [View<'a>]) -> std::result::Result<Pair<'s, 'a>, KernelError> {
    let found = stack.len();
    match stack {
        [x, y] => Ok((x, y)),
        _ => Err(KernelError::Arity { expected: 2, found }),
    }
}

macro_rules! elementwise {
    ($module:ident, $src:ty => $dst:ty, |$x:ident| $op:expr) => {
        pub(super) mod $module {
            use super::*;

            fn op($x: $src) -> $dst {
                $op
            }

            fn contiguous(args: &mut LoopArgs<'_, '_>, dims: &[i64]) -> KernelResult {
                let (ss, ds) = (<$src>::SIZE as i64, <$dst>::SIZE as i64);
                for i in 0..dims[0] {
                    let x: $src = args.read(0, i * ss)?;
                    args.write(1, i * ds, op(x))?;
                }
                Ok(())
            }

            fn strided(args: &mut LoopArgs<'_, '_>, dims: &[i64], steps: &[i64]) -> KernelResult {
                for i in 0..dims[0] {
                    let x: $src = args.read(0, i * steps[0])?;
                    args.write(1, i * steps[1], op(x))?;
                }
                Ok(())
            }

            fn fixed_1d(stack: &mut [View<'_>]) -> KernelResult {
                let (x, y) = pair(stack)?;
                for i in 0..x.fixed_shape()? {
                    let v: $src = x.fixed_dim_next(i)?.read()?;
                    y.fixed_dim_next(i)?.write(op(v))?;
                }
                Ok(())
            }

            fn var_1d(stack: &mut [View<'_>]) -> KernelResult {
                let (x, y) = pair(stack)?;
                let xi = x.var_indices()?;
                let yi = y.var_indices()?;
                if xi.shape != yi.shape {
                    return Err(KernelError::ShapeMismatch {
                        expected: xi.shape,
                        found: yi.shape,
                    });
                }
                for i in 0..xi.shape {
                    let v: $src = x.var_dim_next(xi.start, xi.step, i)?.read()?;
                    y.var_dim_next(yi.start, yi.step, i)?.write(op(v))?;
                }
                Ok(())
            }

            fn var_0d(stack: &mut [View<'_>]) -> KernelResult {
                let (x, y) = pair(stack)?;
                let v: $src = x.read()?;
                y.write(op(v))
            }

            pub(crate) fn kernels(name: &str) -> Vec<KernelInit> {
                let s = <$src>::KIND.name();
                let d = <$dst>::KIND.name();
                vec![
                    KernelInit::new(name, format!("... * {s} -> ... * {d}"))
                        .vectorize()
                        .c(contiguous)
                        .fortran(contiguous)
                        .strided(strided),
                    KernelInit::new(name, format!("... * N * {s} -> ... * N * {d}")).xnd(fixed_1d),
                    KernelInit::new(name, format!("var... * var * {s} -> var... * var * {d}")).xnd(var_1d),
                    KernelInit::new(name, format!("var... * {s} -> var... * {d}")).xnd(var_0d),
                ]
            }
        }
    };
}

elementwise!(copy_int8, i8 => i8, |x| x);
elementwise!(copy_int16, i16 => i16, |x| x);
elementwise!(copy_int32, i32 => i32, |x| x);
elementwise!(copy_int64, i64 => i64, |x| x);
elementwise!(copy_uint8, u8 => u8, |x| x);
elementwise!(copy_uint16, u16 => u16, |x| x);
elementwise!(copy_uint32, u32 => u32, |x| x);
elementwise!(copy_uint64, u64 => u64, |x| x);
elementwise!(copy_float32, f32 => f32, |x| x);
elementwise!(copy_float64, f64 => f64, |x| x);

elementwise!(sin_float32, f32 => f32, |x| x.sin());
elementwise!(sin_uint8, u8 => f32, |x| f32::from(x).sin());
elementwise!(sin_uint16, u16 => f32, |x| f32::from(x).sin());
elementwise!(sin_int8, i8 => f32, |x| f32::from(x).sin());
elementwise!(sin_int16, i16 => f32, |x| f32::from(x).sin());
elementwise!(sin_float64, f64 => f64, |x| x.sin());
elementwise!(sin_uint32, u32 => f64, |x| f64::from(x).sin());
elementwise!(sin_int32, i32 => f64, |x| f64::from(x).sin());

pub(super) fn register(registry: &mut Registry) -> Result<()> {
    let copy = [
        copy_int8::kernels,
        copy_int16::kernels,
        copy_int32::kernels,
        copy_int64::kernels,
        copy_uint8::kernels,
        copy_uint16::kernels,
        copy_uint32::kernels,
        copy_uint64::kernels,
        copy_float32::kernels,
        copy_float64::kernels,
    ];
    for family in copy {
        registry.add_kernels(family("copy"))?;
    }

    let sin = [
        sin_float32::kernels,
        sin_uint8::kernels,
        sin_uint16::kernels,
        sin_int8::kernels,
        sin_int16::kernels,
        sin_float64::kernels,
        sin_uint32::kernels,
        sin_int32::kernels,
    ];
    for family in sin {
        registry.add_kernels(family("sin"))?;
    }
    Ok(())
}
