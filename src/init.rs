//! Weight initializers.
//!
//! Every function takes the generator explicitly so that two models built
//! from the same seed start from identical parameters.

use crate::error::{NnError, Result};
use crate::tensor::Tensor;
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

/// Compute `(fan_in, fan_out)` for a weight shape.
///
/// Dense weights are `(out, in)`; convolution kernels are
/// `(out, in, kh, kw)` and scale both fans by the receptive field.
pub fn fan_in_out(shape: &[usize]) -> Result<(usize, usize)> {
    match shape {
        [n] => Ok((*n, *n)),
        [out, inp] => Ok((*inp, *out)),
        [out, inp, rest @ ..] => {
            let receptive: usize = rest.iter().product();
            Ok((inp * receptive, out * receptive))
        }
        [] => Err(NnError::shape("cannot compute fans of a scalar shape")),
    }
}

pub fn zeros(shape: &[usize]) -> Tensor {
    Tensor::zeros(shape)
}

pub fn ones(shape: &[usize]) -> Tensor {
    Tensor::ones(shape)
}

pub fn constant(shape: &[usize], value: f64) -> Tensor {
    Tensor::full(shape, value)
}

/// Bias vectors start at zero.
pub fn bias_zeros(n: usize) -> Tensor {
    Tensor::zeros(&[n])
}

fn uniform<R: Rng + ?Sized>(shape: &[usize], limit: f64, rng: &mut R) -> Tensor {
    let dist = Uniform::new_inclusive(-limit, limit);
    Tensor::from_fn(shape, |_| dist.sample(rng))
}

fn normal<R: Rng + ?Sized>(shape: &[usize], std: f64, rng: &mut R) -> Result<Tensor> {
    let dist = Normal::new(0.0, std)
        .map_err(|e| NnError::config(format!("invalid normal std {std}: {e}")))?;
    Ok(Tensor::from_fn(shape, |_| dist.sample(rng)))
}

/// Glorot uniform: `U(-a, a)` with `a = sqrt(6 / (fan_in + fan_out))`.
pub fn xavier_uniform<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Result<Tensor> {
    let (fan_in, fan_out) = fan_in_out(shape)?;
    let limit = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
    Ok(uniform(shape, limit, rng))
}

pub fn xavier_normal<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Result<Tensor> {
    let (fan_in, fan_out) = fan_in_out(shape)?;
    normal(shape, (2.0 / (fan_in + fan_out).max(1) as f64).sqrt(), rng)
}

pub fn he_uniform<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Result<Tensor> {
    let (fan_in, _) = fan_in_out(shape)?;
    Ok(uniform(shape, (6.0 / fan_in.max(1) as f64).sqrt(), rng))
}

/// Kaiming normal: `N(0, 2 / fan_in)`.
pub fn he_normal<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Result<Tensor> {
    let (fan_in, _) = fan_in_out(shape)?;
    normal(shape, (2.0 / fan_in.max(1) as f64).sqrt(), rng)
}

/// Orthogonal initialization scaled by `gain`.
///
/// The weight is viewed as `(shape[0], prod(shape[1..]))`. A Gaussian matrix
/// of that size is orthonormalised with modified Gram-Schmidt along its
/// shorter side, so either the rows or the columns come out orthonormal.
pub fn orthogonal<R: Rng + ?Sized>(shape: &[usize], gain: f64, rng: &mut R) -> Result<Tensor> {
    if shape.len() < 2 {
        return Err(NnError::shape(format!(
            "orthogonal init needs at least 2 dims, got {shape:?}"
        )));
    }
    let rows = shape[0];
    let cols: usize = shape[1..].iter().product();
    let flat = normal(&[rows, cols], 1.0, rng)?;
    let transposed = rows > cols;
    let mut m = if transposed { flat.transpose()? } else { flat };
    let (n_vec, dim) = m.dims2()?;

    for i in 0..n_vec {
        for j in 0..i {
            let (head, tail) = m.data.split_at_mut(i * dim);
            let prev = &head[j * dim..(j + 1) * dim];
            let cur = &mut tail[..dim];
            let proj: f64 = prev.iter().zip(cur.iter()).map(|(a, b)| a * b).sum();
            for (c, p) in cur.iter_mut().zip(prev) {
                *c -= proj * p;
            }
        }
        let row = &mut m.data[i * dim..(i + 1) * dim];
        let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm < 1e-12 {
            return Err(NnError::state("orthogonal init produced a degenerate basis"));
        }
        for v in row.iter_mut() {
            *v *= gain / norm;
        }
    }

    let m = if transposed { m.transpose()? } else { m };
    m.into_shape(shape)
}

/// Named initializer, as written in configuration files.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightInit {
    Zeros,
    XavierUniform,
    XavierNormal,
    HeUniform,
    HeNormal,
    Orthogonal,
}

impl WeightInit {
    pub fn init<R: Rng + ?Sized>(self, shape: &[usize], rng: &mut R) -> Result<Tensor> {
        match self {
            WeightInit::Zeros => Ok(zeros(shape)),
            WeightInit::XavierUniform => xavier_uniform(shape, rng),
            WeightInit::XavierNormal => xavier_normal(shape, rng),
            WeightInit::HeUniform => he_uniform(shape, rng),
            WeightInit::HeNormal => he_normal(shape, rng),
            WeightInit::Orthogonal => orthogonal(shape, 1.0, rng),
        }
    }
}
