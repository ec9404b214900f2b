//! Numeric core: the actual product the simulated array would deliver

use rayon::prelude::*;

use crate::error::{SimError, SimResult};
use crate::hardware::{max_value, min_value, quantize, DatatypeConfig, NumericMode};
use crate::tiling::GemmShape;

/// C = A @ B for row-major A (MxK) and B (KxN)
pub fn matmul(
    gemm: GemmShape,
    activations: &[f32],
    weights: &[f32],
    numeric: NumericMode,
    datatypes: &DatatypeConfig,
) -> SimResult<Vec<f32>> {
    gemm.validate()?;
    let GemmShape { m, k, n } = gemm;
    if activations.len() != m * k {
        return Err(SimError::mismatch(
            format!("{}x{} activation matrix", m, k),
            format!("{} activations", activations.len()),
        ));
    }
    if weights.len() != k * n {
        return Err(SimError::mismatch(
            format!("{}x{} weight matrix", k, n),
            format!("{} weights", weights.len()),
        ));
    }

    let result = match numeric {
        NumericMode::Float => matmul_float(gemm, activations, weights),
        NumericMode::FixedPoint => matmul_fixed(gemm, activations, weights, datatypes),
    };
    Ok(result)
}

fn matmul_float(gemm: GemmShape, a: &[f32], b: &[f32]) -> Vec<f32> {
    let GemmShape { k, n, .. } = gemm;
    let mut c = vec![0.0f32; gemm.m * n];

    c.par_chunks_mut(n).enumerate().for_each(|(row, out)| {
        let a_row = &a[row * k..(row + 1) * k];
        for (kk, &a_val) in a_row.iter().enumerate() {
            let b_row = &b[kk * n..(kk + 1) * n];
            for (o, &w) in out.iter_mut().zip(b_row) {
                *o += a_val * w;
            }
        }
    });

    c
}

fn matmul_fixed(gemm: GemmShape, a: &[f32], b: &[f32], datatypes: &DatatypeConfig) -> Vec<f32> {
    let GemmShape { k, n, .. } = gemm;
    let a = quantize(a, datatypes.activations_datatype_size_byte);
    let b = quantize(b, datatypes.weights_datatype_size_byte);
    let hi = max_value(datatypes.results_datatype_size_byte);
    let lo = min_value(datatypes.results_datatype_size_byte);

    let mut c = vec![0.0f32; gemm.m * n];
    c.par_chunks_mut(n).enumerate().for_each(|(row, out)| {
        let a_row = &a[row * k..(row + 1) * k];
        for (col, o) in out.iter_mut().enumerate() {
            // A single product of 8 byte operands fits in i128, their sum may not
            let acc = a_row
                .iter()
                .enumerate()
                .map(|(kk, &a_val)| a_val * b[kk * n + col])
                .fold(0i128, |acc, product| acc.saturating_add(product));
            *o = acc.clamp(lo, hi) as f32;
        }
    });

    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_float_matmul() {
        // [[1,2],[3,4]] @ [[5,6],[7,8]]
        let c = matmul(
            GemmShape::new(2, 2, 2),
            &[1.0, 2.0, 3.0, 4.0],
            &[5.0, 6.0, 7.0, 8.0],
            NumericMode::Float,
            &DatatypeConfig::default(),
        )
        .unwrap();
        assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_fixed_point_rounds_operands() {
        let c = matmul(
            GemmShape::new(1, 2, 1),
            &[1.4, 2.6],
            &[2.0, 1.0],
            NumericMode::FixedPoint,
            &DatatypeConfig::default(),
        )
        .unwrap();
        // round(1.4) * 2 + round(2.6) * 1
        assert_eq!(c, vec![5.0]);
    }

    #[test]
    fn test_fixed_point_saturates_result() {
        let datatypes = DatatypeConfig::new(1, 1, 1);
        let c = matmul(
            GemmShape::new(1, 4, 1),
            &[100.0; 4],
            &[100.0; 4],
            NumericMode::FixedPoint,
            &datatypes,
        )
        .unwrap();
        assert_eq!(c, vec![127.0]);
    }

    #[test]
    fn test_fixed_point_wide_operands_saturate() {
        let datatypes = DatatypeConfig::new(8, 8, 8);
        let c = matmul(
            GemmShape::new(1, 2, 1),
            &[-1e30; 2],
            &[-1e30; 2],
            NumericMode::FixedPoint,
            &datatypes,
        )
        .unwrap();
        assert_eq!(c, vec![i64::MAX as f32]);

        let c = matmul(
            GemmShape::new(1, 3, 1),
            &[1e30; 3],
            &[-1e30; 3],
            NumericMode::FixedPoint,
            &datatypes,
        )
        .unwrap();
        assert_eq!(c, vec![i64::MIN as f32]);
    }

    #[test]
    fn test_rejects_wrong_lengths() {
        let result = matmul(
            GemmShape::new(2, 2, 2),
            &[1.0; 3],
            &[1.0; 4],
            NumericMode::Float,
            &DatatypeConfig::default(),
        );
        assert!(result.is_err());
    }
}
