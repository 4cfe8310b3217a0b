//! Kernels over records with optional fields.

use crate::error::{KernelError, KernelResult, Result};
use crate::kernel::KernelInit;
use crate::registry::Registry;
use crate::xnd::View;

const VALUE_FIELD: usize = 2;

/// Count present and missing `value` fields in a row of records.
fn count_valid_missing(stack: &mut [View<'_>]) -> KernelResult {
    let found = stack.len();
    let [records, out] = stack else {
        return Err(KernelError::Arity { expected: 2, found });
    };
    let (mut valid, mut missing) = (0i64, 0i64);
    for i in 0..records.fixed_shape()? {
        let mut record = records.fixed_dim_next(i)?;
        if record.record_next(VALUE_FIELD)?.is_missing()? {
            missing += 1;
        } else {
            valid += 1;
        }
    }
    out.record_next(0)?.write(valid)?;
    out.record_next(1)?.write(missing)
}

pub(super) fn register(registry: &mut Registry) -> Result<()> {
    registry.add_kernel(
        KernelInit::new(
            "count_valid_missing",
            "... * N * {index: int64, name: string, value: ?int64} -> ... * {valid: int64, missing: int64}",
        )
        .xnd(count_valid_missing),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ndtypes::{Type, Typedefs};
    use crate::xnd::Array;
    use pretty_assertions::assert_eq;

    fn people(values: &[&[Option<i64>]]) -> Array {
        let rows = values.len();
        let cols = values.first().map_or(0, |r| r.len());
        let ty = Type::parse(
            &format!("{rows} * {cols} * {{index: int64, name: string, value: ?int64}}"),
            &Typedefs::default(),
        )
        .unwrap();
        let mut a = Array::zeros(ty).unwrap();
        let mut v = a.view_mut();
        for (i, row) in values.iter().enumerate() {
            let mut r = v.fixed_dim_next(i as i64).unwrap();
            for (j, value) in row.iter().enumerate() {
                let mut rec = r.fixed_dim_next(j as i64).unwrap();
                rec.record_next(0).unwrap().write(j as i64).unwrap();
                rec.record_next(1).unwrap().write_str("x").unwrap();
                rec.record_next(2).unwrap().write_option(*value).unwrap();
            }
        }
        a
    }

    fn counts(out: &Array) -> Vec<(i64, i64)> {
        let mut v = out.view();
        let n = v.fixed_shape().unwrap();
        (0..n)
            .map(|i| {
                let mut rec = v.fixed_dim_next(i).unwrap();
                let valid: i64 = rec.record_next(0).unwrap().read().unwrap();
                let missing: i64 = rec.record_next(1).unwrap().read().unwrap();
                (valid, missing)
            })
            .collect()
    }

    #[test]
    fn test_counts_per_row() {
        let mut reg = Registry::new(EngineConfig {
            builtin_kernels: false,
            ..EngineConfig::default()
        })
        .unwrap();
        register(&mut reg).unwrap();
        let a = people(&[&[Some(1), None, Some(3)], &[None, None, None]]);
        let out = reg.call("count_valid_missing", &[&a]).unwrap();
        assert_eq!(counts(&out[0]), vec![(2, 1), (0, 3)]);
    }

    #[test]
    fn test_arity_is_checked() {
        let a = Array::scalar(1i64);
        let mut stack = vec![a.view()];
        assert_eq!(
            count_valid_missing(&mut stack),
            Err(KernelError::Arity { expected: 2, found: 1 })
        );
    }
}
