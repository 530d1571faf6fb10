//! Row-wise softmax over the `(N, CHW)` view, max-shifted for numerical
//! stability.

use ndarray::Zip;

use crate::errors::NeuriteResult;
use crate::tensor::{Tensor, TensorPool};
use crate::types::AllocMode;

pub fn forward(pool: &TensorPool, x: &Tensor) -> NeuriteResult<Tensor> {
    let mut out = Tensor::like(pool, x, AllocMode::Default)?;
    {
        let xm = x.as_matrix();
        let mut om = out.as_matrix_mut();
        Zip::from(om.rows_mut())
            .and(xm.rows())
            .par_for_each(|mut o, r| {
                let max = r.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let mut total = 0.0;
                for (dst, &v) in o.iter_mut().zip(r.iter()) {
                    let e = (v - max).exp();
                    *dst = e;
                    total += e;
                }
                o.iter_mut().for_each(|v| *v /= total);
            });
    }
    Ok(out)
}
