use crate::error::{NnError, Result};
use serde::{Deserialize, Serialize};

/// N-dimensional tensor backed by a flat `Vec<f64>`.
///
/// Elements are stored contiguously in row-major ("C") order. Image layers
/// expect `(batch, channels, height, width)` and dense layers expect
/// `(batch, features)`; operations check ranks and dimensions up front and
/// return [`NnError::Shape`] instead of coercing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    /// Tensor elements in row-major order.
    pub data: Vec<f64>,
    /// Sizes for each dimension.
    pub shape: Vec<usize>,
}

/// Unchecked serialized form; converted through [`Tensor::new`] so a
/// deserialized tensor always has a consistent shape.
#[derive(Deserialize)]
struct RawTensor {
    data: Vec<f64>,
    shape: Vec<usize>,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = NnError;

    fn try_from(raw: RawTensor) -> Result<Self> {
        Tensor::new(raw.data, raw.shape)
    }
}

impl Tensor {
    /// Create a new tensor from raw parts. The number of elements in `data`
    /// must match the product of `shape`.
    pub fn new(data: Vec<f64>, shape: Vec<usize>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(NnError::shape(format!(
                "{} elements cannot fill shape {:?} ({} expected)",
                data.len(),
                shape,
                expected
            )));
        }
        Ok(Tensor { data, shape })
    }

    /// Create a tensor of zeros with the given shape.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    /// Create a tensor filled with `value`.
    pub fn full(shape: &[usize], value: f64) -> Self {
        let len: usize = shape.iter().product();
        Tensor {
            data: vec![value; len],
            shape: shape.to_vec(),
        }
    }

    /// Create a tensor of zeros matching the shape of `other`.
    pub fn zeros_like(other: &Tensor) -> Self {
        Self::zeros(&other.shape)
    }

    /// Create a tensor of ones matching the shape of `other`.
    pub fn ones_like(other: &Tensor) -> Self {
        Self::ones(&other.shape)
    }

    /// Build a tensor by evaluating `f` for every flat index.
    pub fn from_fn(shape: &[usize], f: impl FnMut(usize) -> f64) -> Self {
        let len: usize = shape.iter().product();
        Tensor {
            data: (0..len).map(f).collect(),
            shape: shape.to_vec(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Compute the flat index for a multi-dimensional coordinate.
    fn offset(&self, idx: &[usize]) -> Result<usize> {
        if idx.len() != self.shape.len() {
            return Err(NnError::shape(format!(
                "index of rank {} used on tensor of shape {:?}",
                idx.len(),
                self.shape
            )));
        }
        let mut stride = 1;
        let mut off = 0usize;
        for (&id, &dim) in idx.iter().zip(self.shape.iter()).rev() {
            if id >= dim {
                return Err(NnError::shape(format!(
                    "index {:?} out of bounds for shape {:?}",
                    idx, self.shape
                )));
            }
            off += id * stride;
            stride *= dim;
        }
        Ok(off)
    }

    /// Basic immutable indexing.
    pub fn get(&self, idx: &[usize]) -> Result<f64> {
        let off = self.offset(idx)?;
        Ok(self.data[off])
    }

    /// Mutable indexing support.
    pub fn set(&mut self, idx: &[usize], value: f64) -> Result<()> {
        let off = self.offset(idx)?;
        self.data[off] = value;
        Ok(())
    }

    /// Return a copy viewed under a new shape with the same element count.
    pub fn reshape(&self, new_shape: &[usize]) -> Result<Tensor> {
        self.clone().into_shape(new_shape)
    }

    /// Change the view of the underlying data without modifying order.
    pub fn into_shape(mut self, new_shape: &[usize]) -> Result<Tensor> {
        let len: usize = new_shape.iter().product();
        if len != self.data.len() {
            return Err(NnError::shape(format!(
                "cannot reshape {:?} into {:?}",
                self.shape, new_shape
            )));
        }
        self.shape = new_shape.to_vec();
        Ok(self)
    }

    /// Dimensions of a rank-2 tensor.
    pub fn dims2(&self) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            &[a, b] => Ok((a, b)),
            _ => Err(NnError::shape(format!(
                "expected 2D tensor, got {}D with shape {:?}",
                self.ndim(),
                self.shape
            ))),
        }
    }

    /// Dimensions of a rank-4 tensor.
    pub fn dims4(&self) -> Result<(usize, usize, usize, usize)> {
        match self.shape.as_slice() {
            &[n, c, h, w] => Ok((n, c, h, w)),
            _ => Err(NnError::shape(format!(
                "expected 4D tensor, got {}D with shape {:?}",
                self.ndim(),
                self.shape
            ))),
        }
    }

    pub fn ensure_shape(&self, expected: &[usize], what: &str) -> Result<()> {
        if self.shape != expected {
            return Err(NnError::shape(format!(
                "{what}: shape mismatch {:?} vs {:?}",
                self.shape, expected
            )));
        }
        Ok(())
    }

    /// Reorder axes, materialising the result in row-major order.
    pub fn permute(&self, axes: &[usize]) -> Result<Tensor> {
        let rank = self.ndim();
        let mut seen = vec![false; rank];
        if axes.len() != rank || axes.iter().any(|&a| a >= rank || std::mem::replace(&mut seen[a], true)) {
            return Err(NnError::shape(format!(
                "invalid permutation {:?} for shape {:?}",
                axes, self.shape
            )));
        }
        let mut src_strides = vec![1usize; rank];
        for d in (0..rank.saturating_sub(1)).rev() {
            src_strides[d] = src_strides[d + 1] * self.shape[d + 1];
        }
        let out_shape: Vec<usize> = axes.iter().map(|&a| self.shape[a]).collect();
        let strides: Vec<usize> = axes.iter().map(|&a| src_strides[a]).collect();

        let mut out = Vec::with_capacity(self.data.len());
        let mut idx = vec![0usize; rank];
        let mut src = 0usize;
        for _ in 0..self.data.len() {
            out.push(self.data[src]);
            // advance the output coordinate like an odometer
            for d in (0..rank).rev() {
                idx[d] += 1;
                src += strides[d];
                if idx[d] < out_shape[d] {
                    break;
                }
                src -= strides[d] * out_shape[d];
                idx[d] = 0;
            }
        }
        Ok(Tensor {
            data: out,
            shape: out_shape,
        })
    }

    /// Transpose a 2-D tensor.
    pub fn transpose(&self) -> Result<Tensor> {
        self.dims2()?;
        self.permute(&[1, 0])
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Tensor {
        Tensor {
            data: self.data.iter().map(|&v| f(v)).collect(),
            shape: self.shape.clone(),
        }
    }

    /// Elementwise combination of two tensors of identical shape.
    pub fn zip_map(&self, other: &Tensor, f: impl Fn(f64, f64) -> f64) -> Result<Tensor> {
        other.ensure_shape(&self.shape, "zip_map")?;
        Ok(Tensor {
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
            shape: self.shape.clone(),
        })
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return f64::NAN;
        }
        self.sum() / self.data.len() as f64
    }

    /// Sum of the elementwise product with `other`.
    pub fn dot(&self, other: &Tensor) -> Result<f64> {
        other.ensure_shape(&self.shape, "dot")?;
        Ok(self.data.iter().zip(other.data.iter()).map(|(a, b)| a * b).sum())
    }

    pub fn sum_squares(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum()
    }

    /// Euclidean norm of all elements.
    pub fn norm_l2(&self) -> f64 {
        self.sum_squares().sqrt()
    }

    pub fn scale_inplace(&mut self, s: f64) {
        for v in self.data.iter_mut() {
            *v *= s;
        }
    }

    /// `self += s * other`
    pub fn add_scaled_inplace(&mut self, other: &Tensor, s: f64) -> Result<()> {
        other.ensure_shape(&self.shape, "add_scaled")?;
        for (a, &b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += s * b;
        }
        Ok(())
    }

    /// Overwrite the values in place, keeping the same storage.
    pub fn copy_from(&mut self, other: &Tensor) -> Result<()> {
        other.ensure_shape(&self.shape, "copy_from")?;
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    /// Gather entries along the leading axis.
    pub fn select_rows(&self, rows: &[usize]) -> Result<Tensor> {
        let n = *self
            .shape
            .first()
            .ok_or_else(|| NnError::shape("cannot select rows of a scalar tensor"))?;
        let row_len = if n == 0 { 0 } else { self.data.len() / n };
        let mut data = Vec::with_capacity(rows.len() * row_len);
        for &r in rows {
            if r >= n {
                return Err(NnError::shape(format!("row {r} out of bounds for {n} rows")));
            }
            data.extend_from_slice(&self.data[r * row_len..(r + 1) * row_len]);
        }
        let mut shape = self.shape.clone();
        shape[0] = rows.len();
        Ok(Tensor { data, shape })
    }

    /// Stack tensors along the leading axis. Trailing dimensions must agree.
    pub fn concat_rows(parts: &[Tensor]) -> Result<Tensor> {
        let first = parts
            .first()
            .ok_or_else(|| NnError::shape("concat_rows needs at least one tensor"))?;
        if first.shape.is_empty() {
            return Err(NnError::shape("cannot concatenate scalar tensors"));
        }
        let tail = &first.shape[1..];
        let mut rows = 0;
        let mut data = Vec::new();
        for p in parts {
            if p.shape.len() != first.shape.len() || &p.shape[1..] != tail {
                return Err(NnError::shape(format!(
                    "concat_rows: {:?} does not match trailing dims {:?}",
                    p.shape, tail
                )));
            }
            rows += p.shape[0];
            data.extend_from_slice(&p.data);
        }
        let mut shape = first.shape.clone();
        shape[0] = rows;
        Ok(Tensor { data, shape })
    }
}

/// Convert NHWC to NCHW if needed.
///
/// A tensor whose last axis is small (<= 4) while its second axis is not is
/// treated as channels-last and transposed; anything else is returned as is.
pub fn to_nchw(x: &Tensor) -> Result<Tensor> {
    let (_, d1, _, d3) = x.dims4()?;
    if d3 <= 4 && d1 > 4 {
        return x.permute(&[0, 3, 1, 2]);
    }
    Ok(x.clone())
}

/// Convert NCHW to NHWC if needed, using the same heuristic as [`to_nchw`].
pub fn to_nhwc(x: &Tensor) -> Result<Tensor> {
    let (_, d1, _, d3) = x.dims4()?;
    if d1 <= 4 && d3 > 4 {
        return x.permute(&[0, 2, 3, 1]);
    }
    Ok(x.clone())
}

fn per_channel(
    x: &Tensor,
    mean: &[f64],
    std: &[f64],
    f: impl Fn(f64, f64, f64) -> f64,
) -> Result<Tensor> {
    let (_, c, h, w) = x.dims4()?;
    if mean.len() != c || std.len() != c {
        return Err(NnError::shape(format!(
            "expected {c} channel statistics, got mean {} / std {}",
            mean.len(),
            std.len()
        )));
    }
    let plane = h * w;
    let mut out = x.clone();
    for (i, v) in out.data.iter_mut().enumerate() {
        let ch = (i / plane) % c;
        *v = f(*v, mean[ch], std[ch] + 1e-12);
    }
    Ok(out)
}

/// Channel-wise normalization for NCHW images: `(x - mean) / std`.
pub fn normalize_nchw(x: &Tensor, mean: &[f64], std: &[f64]) -> Result<Tensor> {
    per_channel(x, mean, std, |v, m, s| (v - m) / s)
}

/// Inverse of [`normalize_nchw`].
pub fn denormalize_nchw(x: &Tensor, mean: &[f64], std: &[f64]) -> Result<Tensor> {
    per_channel(x, mean, std, |v, m, s| v * s + m)
}

/// Zero pad the spatial axes of an NCHW tensor by `pad` on every side.
pub fn pad2d(x: &Tensor, pad: usize) -> Result<Tensor> {
    let (n, c, h, w) = x.dims4()?;
    if pad == 0 {
        return Ok(x.clone());
    }
    let (hp, wp) = (h + 2 * pad, w + 2 * pad);
    let mut out = Tensor::zeros(&[n, c, hp, wp]);
    for plane in 0..n * c {
        for i in 0..h {
            let src = plane * h * w + i * w;
            let dst = plane * hp * wp + (i + pad) * wp + pad;
            out.data[dst..dst + w].copy_from_slice(&x.data[src..src + w]);
        }
    }
    Ok(out)
}

/// Fail if `x` contains NaN or infinite values.
pub fn assert_finite(x: &Tensor, name: &str) -> Result<()> {
    if x.data.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(NnError::shape(format!("{name} contains non finite values")))
    }
}

/// One-line description with shape, min, max and mean.
pub fn summary(x: &Tensor) -> String {
    if x.is_empty() {
        return format!("shape={:?} min=NaN max=NaN mean=NaN", x.shape);
    }
    let mn = x.data.iter().cloned().fold(f64::INFINITY, f64::min);
    let mx = x.data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    format!(
        "shape={:?} min={:.4} max={:.4} mean={:.4}",
        x.shape,
        mn,
        mx,
        x.mean()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permute_matches_manual_transpose() {
        let t = Tensor::new((0..6).map(|v| v as f64).collect(), vec![2, 3]).unwrap();
        let p = t.transpose().unwrap();
        assert_eq!(p.shape, vec![3, 2]);
        assert_eq!(p.data, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn permute_4d_round_trips() {
        let t = Tensor::from_fn(&[2, 3, 4, 5], |i| i as f64);
        let nhwc = t.permute(&[0, 2, 3, 1]).unwrap();
        assert_eq!(nhwc.shape, vec![2, 4, 5, 3]);
        assert_eq!(nhwc.get(&[1, 2, 3, 1]).unwrap(), t.get(&[1, 1, 2, 3]).unwrap());
        let back = nhwc.permute(&[0, 3, 1, 2]).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn new_rejects_wrong_length() {
        assert!(matches!(
            Tensor::new(vec![1.0; 5], vec![2, 3]),
            Err(NnError::Shape(_))
        ));
    }

    #[test]
    fn channel_order_heuristic() {
        let nhwc = Tensor::zeros(&[2, 8, 8, 3]);
        assert_eq!(to_nchw(&nhwc).unwrap().shape, vec![2, 3, 8, 8]);
        let nchw = Tensor::zeros(&[2, 3, 8, 8]);
        assert_eq!(to_nchw(&nchw).unwrap().shape, vec![2, 3, 8, 8]);
        assert_eq!(to_nhwc(&nchw).unwrap().shape, vec![2, 8, 8, 3]);
    }

    #[test]
    fn normalize_round_trip() {
        let x = Tensor::from_fn(&[1, 2, 2, 2], |i| i as f64);
        let n = normalize_nchw(&x, &[1.0, 5.0], &[2.0, 4.0]).unwrap();
        assert!((n.data[0] - (-0.5)).abs() < 1e-9);
        let back = denormalize_nchw(&n, &[1.0, 5.0], &[2.0, 4.0]).unwrap();
        for (a, b) in back.data.iter().zip(x.data.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn pad2d_places_interior() {
        let x = Tensor::ones(&[1, 1, 2, 2]);
        let p = pad2d(&x, 1).unwrap();
        assert_eq!(p.shape, vec![1, 1, 4, 4]);
        assert_eq!(p.sum(), 4.0);
        assert_eq!(p.get(&[0, 0, 0, 0]).unwrap(), 0.0);
        assert_eq!(p.get(&[0, 0, 1, 1]).unwrap(), 1.0);
    }

    #[test]
    fn select_and_concat_rows() {
        let t = Tensor::from_fn(&[3, 2], |i| i as f64);
        let s = t.select_rows(&[2, 0]).unwrap();
        assert_eq!(s.data, vec![4.0, 5.0, 0.0, 1.0]);
        let c = Tensor::concat_rows(&[s.clone(), s]).unwrap();
        assert_eq!(c.shape, vec![4, 2]);
    }
}
