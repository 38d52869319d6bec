use crate::error::{NnError, Result};
use crate::tensor::Tensor;

/// `a @ b` for 2-D tensors.
pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (m, k) = a.dims2()?;
    let (k2, n) = b.dims2()?;
    if k != k2 {
        return Err(NnError::shape(format!(
            "matmul: {:?} @ {:?}",
            a.shape, b.shape
        )));
    }
    let mut out = vec![0.0; m * n];
    for i in 0..m {
        let a_row = &a.data[i * k..(i + 1) * k];
        let out_row = &mut out[i * n..(i + 1) * n];
        for (kk, &a_val) in a_row.iter().enumerate() {
            if a_val == 0.0 {
                continue;
            }
            let b_row = &b.data[kk * n..(kk + 1) * n];
            for (o, &bv) in out_row.iter_mut().zip(b_row) {
                *o += a_val * bv;
            }
        }
    }
    Tensor::new(out, vec![m, n])
}

/// `a @ bᵀ` without materialising the transpose.
pub fn matmul_nt(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (m, k) = a.dims2()?;
    let (n, k2) = b.dims2()?;
    if k != k2 {
        return Err(NnError::shape(format!(
            "matmul_nt: {:?} @ {:?}ᵀ",
            a.shape, b.shape
        )));
    }
    let mut out = vec![0.0; m * n];
    for i in 0..m {
        let a_row = &a.data[i * k..(i + 1) * k];
        for j in 0..n {
            let b_row = &b.data[j * k..(j + 1) * k];
            out[i * n + j] = a_row.iter().zip(b_row).map(|(x, y)| x * y).sum();
        }
    }
    Tensor::new(out, vec![m, n])
}

/// `aᵀ @ b` without materialising the transpose.
pub fn matmul_tn(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (k, m) = a.dims2()?;
    let (k2, n) = b.dims2()?;
    if k != k2 {
        return Err(NnError::shape(format!(
            "matmul_tn: {:?}ᵀ @ {:?}",
            a.shape, b.shape
        )));
    }
    let mut out = vec![0.0; m * n];
    for kk in 0..k {
        let a_row = &a.data[kk * m..(kk + 1) * m];
        let b_row = &b.data[kk * n..(kk + 1) * n];
        for (i, &a_val) in a_row.iter().enumerate() {
            if a_val == 0.0 {
                continue;
            }
            let out_row = &mut out[i * n..(i + 1) * n];
            for (o, &bv) in out_row.iter_mut().zip(b_row) {
                *o += a_val * bv;
            }
        }
    }
    Tensor::new(out, vec![m, n])
}

/// Sum a 2-D tensor over its rows, producing one value per column.
pub fn sum_rows(x: &Tensor) -> Result<Tensor> {
    let (rows, cols) = x.dims2()?;
    let mut out = vec![0.0; cols];
    for r in 0..rows {
        for (o, v) in out.iter_mut().zip(&x.data[r * cols..(r + 1) * cols]) {
            *o += v;
        }
    }
    Tensor::new(out, vec![cols])
}

/// Numerically stable softmax along the last axis.
pub fn softmax_last_axis(x: &Tensor) -> Result<Tensor> {
    let cols = *x
        .shape
        .last()
        .ok_or_else(|| NnError::shape("softmax of a scalar tensor"))?;
    let mut out = x.clone();
    if cols == 0 {
        return Ok(out);
    }
    for row in out.data.chunks_mut(cols) {
        // subtract the row max so exp never overflows
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut sum = 0.0;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
    Ok(out)
}

/// Stable log-softmax over the rows of a `(N, C)` tensor: `z - logsumexp(z)`.
pub fn log_softmax_rows(x: &Tensor) -> Result<Tensor> {
    let (_, cols) = x.dims2()?;
    let mut out = x.clone();
    if cols == 0 {
        return Ok(out);
    }
    for row in out.data.chunks_mut(cols) {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let lse = row.iter().map(|v| (v - max).exp()).sum::<f64>().ln();
        for v in row.iter_mut() {
            *v = *v - max - lse;
        }
    }
    Ok(out)
}

/// Index of the largest value (first one on ties).
pub fn argmax(v: &[f64]) -> usize {
    let mut best = 0usize;
    let mut best_val = f64::NEG_INFINITY;
    for (i, &x) in v.iter().enumerate() {
        if x > best_val {
            best_val = x;
            best = i;
        }
    }
    best
}

/// Row-wise argmax of a `(N, C)` tensor.
pub fn argmax_rows(x: &Tensor) -> Result<Vec<usize>> {
    let (_, cols) = x.dims2()?;
    if cols == 0 {
        return Err(NnError::shape("argmax over zero classes"));
    }
    Ok(x.data.chunks(cols).map(argmax).collect())
}

/// One-hot encode integer labels into a `(N, num_classes)` tensor.
pub fn one_hot(labels: &[usize], num_classes: usize) -> Result<Tensor> {
    let mut out = Tensor::zeros(&[labels.len(), num_classes]);
    for (i, &y) in labels.iter().enumerate() {
        if y >= num_classes {
            return Err(NnError::shape(format!(
                "label {y} out of range for {num_classes} classes"
            )));
        }
        out.data[i * num_classes + y] = 1.0;
    }
    Ok(out)
}

/// Yield `(start, end)` slices covering `n_samples` in steps of `batch_size`.
pub fn make_batches(n_samples: usize, batch_size: usize) -> impl Iterator<Item = (usize, usize)> {
    let step = batch_size.max(1);
    (0..n_samples)
        .step_by(step)
        .map(move |start| (start, (start + step).min(n_samples)))
}

/// Output extent of a sliding window: `(size + 2*pad - kernel) / stride + 1`.
///
/// A window that does not fit even once is a shape error, raised before any
/// computation happens.
pub fn conv_output_size(size: usize, kernel: usize, stride: usize, pad: usize) -> Result<usize> {
    if stride == 0 {
        return Err(NnError::shape("stride must be >= 1"));
    }
    let padded = size + 2 * pad;
    if kernel == 0 || padded < kernel {
        return Err(NnError::shape(format!(
            "invalid output size: input {size}, kernel {kernel}, stride {stride}, padding {pad}"
        )));
    }
    Ok((padded - kernel) / stride + 1)
}

/// Expand receptive-field windows of an NCHW batch into matrix rows.
///
/// Returns a `(N * out_h * out_w, C * KH * KW)` tensor. Row `(n, oh, ow)`
/// holds the window anchored at that output cell; within a row the columns
/// run over channel, then kernel row, then kernel column. Padding cells are
/// zero.
pub fn im2col(x: &Tensor, kernel: (usize, usize), stride: usize, pad: usize) -> Result<Tensor> {
    let (n, c, h, w) = x.dims4()?;
    let (kh, kw) = kernel;
    let out_h = conv_output_size(h, kh, stride, pad)?;
    let out_w = conv_output_size(w, kw, stride, pad)?;
    let cols_per_row = c * kh * kw;
    let mut cols = vec![0.0; n * out_h * out_w * cols_per_row];

    let mut row = 0;
    for b in 0..n {
        for oh in 0..out_h {
            for ow in 0..out_w {
                let dst = &mut cols[row * cols_per_row..(row + 1) * cols_per_row];
                let mut col_idx = 0;
                for ic in 0..c {
                    let plane = (b * c + ic) * h * w;
                    for ki in 0..kh {
                        let ihp = (oh * stride + ki) as isize - pad as isize;
                        for kj in 0..kw {
                            let iwp = (ow * stride + kj) as isize - pad as isize;
                            if ihp >= 0 && ihp < h as isize && iwp >= 0 && iwp < w as isize {
                                dst[col_idx] = x.data[plane + ihp as usize * w + iwp as usize];
                            }
                            col_idx += 1;
                        }
                    }
                }
                row += 1;
            }
        }
    }
    Tensor::new(cols, vec![n * out_h * out_w, cols_per_row])
}

/// Adjoint of [`im2col`]: scatter-add column entries back into an NCHW tensor
/// of shape `x_shape`.
///
/// Overlapping windows accumulate, and entries that fall into the padding
/// border are dropped.
pub fn col2im(
    cols: &Tensor,
    x_shape: (usize, usize, usize, usize),
    kernel: (usize, usize),
    stride: usize,
    pad: usize,
) -> Result<Tensor> {
    let (n, c, h, w) = x_shape;
    let (kh, kw) = kernel;
    let out_h = conv_output_size(h, kh, stride, pad)?;
    let out_w = conv_output_size(w, kw, stride, pad)?;
    let cols_per_row = c * kh * kw;
    cols.ensure_shape(&[n * out_h * out_w, cols_per_row], "col2im")?;

    let mut img = vec![0.0; n * c * h * w];
    let mut row = 0;
    for b in 0..n {
        for oh in 0..out_h {
            for ow in 0..out_w {
                let src = &cols.data[row * cols_per_row..(row + 1) * cols_per_row];
                let mut col_idx = 0;
                for ic in 0..c {
                    let plane = (b * c + ic) * h * w;
                    for ki in 0..kh {
                        let ihp = (oh * stride + ki) as isize - pad as isize;
                        for kj in 0..kw {
                            let iwp = (ow * stride + kj) as isize - pad as isize;
                            if ihp >= 0 && ihp < h as isize && iwp >= 0 && iwp < w as isize {
                                img[plane + ihp as usize * w + iwp as usize] += src[col_idx];
                            }
                            col_idx += 1;
                        }
                    }
                }
                row += 1;
            }
        }
    }
    Tensor::new(img, vec![n, c, h, w])
}
