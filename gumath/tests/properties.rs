//! Property tests: elementwise kernels agree with their scalar operation
//! across layouts and calling conventions.

use gumath::{Array, Convention, EngineConfig, Registry};
use proptest::prelude::*;

fn registry(conventions: Vec<Convention>) -> Registry {
    Registry::new(EngineConfig {
        conventions,
        ..EngineConfig::default()
    })
    .expect("registry")
}

fn matrix() -> impl Strategy<Value = (i64, i64, Vec<i32>)> {
    (1i64..5, 1i64..5).prop_flat_map(|(rows, cols)| {
        prop::collection::vec(-1000i32..1000, (rows * cols) as usize).prop_map(move |data| (rows, cols, data))
    })
}

proptest! {
    #[test]
    fn prop_sin_matches_scalar_sin((rows, cols, data) in matrix()) {
        let reg = registry(Convention::ALL.to_vec());
        let x = Array::from_slice(&[rows, cols], &data).unwrap();
        let out = reg.call("sin", &[&x]).unwrap();
        let got = out[0].to_vec::<f64>().unwrap();
        for (i, (&v, &y)) in data.iter().zip(&got).enumerate() {
            prop_assert_eq!(y, f64::from(v).sin(), "element {}", i);
        }
    }

    #[test]
    fn prop_fixed_and_ragged_agree(
        rows in prop::collection::vec(prop::collection::vec(-1.0e3f64..1.0e3, 0..6), 1..6),
    ) {
        let reg = registry(Convention::ALL.to_vec());
        let ragged = Array::ragged(&rows);
        let ragged_out = reg.call("sin", &[&ragged]).unwrap()[0].to_rows::<f64>().unwrap();

        for (row, got) in rows.iter().zip(&ragged_out) {
            let fixed = Array::from_slice(&[row.len() as i64], row).unwrap();
            let fixed_out = reg.call("sin", &[&fixed]).unwrap()[0].to_vec::<f64>().unwrap();
            prop_assert_eq!(&fixed_out, got);
        }
    }

    #[test]
    fn prop_conventions_agree((rows, cols, data) in matrix(), scalar in -1000i64..1000) {
        let x = Array::from_slice(&[rows, cols], &data.iter().map(|&v| i64::from(v)).collect::<Vec<_>>()).unwrap();
        let y = Array::scalar(scalar);
        let mut results = Vec::new();
        for conventions in [
            vec![Convention::C],
            vec![Convention::Strided],
            vec![Convention::Xnd],
        ] {
            let reg = registry(conventions);
            let copied = reg.call("copy", &[&x]).unwrap()[0].to_vec::<i64>().unwrap();
            prop_assert_eq!(&copied, &x.to_vec::<i64>().unwrap());
            results.push(copied);
        }
        prop_assert_eq!(&results[0], &results[1]);
        prop_assert_eq!(&results[1], &results[2]);

        let strided = registry(vec![Convention::Strided]).call("add_scalar", &[&x, &y]).unwrap();
        let xnd = registry(vec![Convention::Xnd]).call("add_scalar", &[&x, &y]).unwrap();
        prop_assert_eq!(strided[0].to_vec::<i64>().unwrap(), xnd[0].to_vec::<i64>().unwrap());
    }
}
