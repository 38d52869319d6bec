use super::layer::{missing_cache, Layer, Param};
use crate::error::{NnError, Result};
use crate::init::{self, WeightInit};
use crate::math;
use crate::tensor::Tensor;
use rand::Rng;

/// 2D convolution layer using im2col and a single matrix product.
///
/// Input is `(N, C_in, H, W)`, the kernel is `(C_out, C_in, KH, KW)` and the
/// output is `(N, C_out, H_out, W_out)` with
/// `H_out = (H + 2 * padding - KH) / stride + 1`. The padded input is
/// unrolled into a `(N * H_out * W_out, C_in * KH * KW)` matrix, multiplied
/// by the flattened kernel, and the backward pass scatters the column
/// gradient back through [`math::col2im`].
pub struct Conv2d {
    pub w: Tensor,
    pub b: Option<Tensor>,
    dw: Tensor,
    db: Option<Tensor>,
    in_channels: usize,
    out_channels: usize,
    kernel_size: (usize, usize),
    stride: usize,
    padding: usize,
    training: bool,
    cache: Option<ConvCache>,
}

struct ConvCache {
    cols: Tensor,
    input_shape: (usize, usize, usize, usize),
    out_hw: (usize, usize),
}

impl Conv2d {
    /// Square-kernel convolution with bias and He-normal weights.
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        rng: &mut R,
    ) -> Result<Self> {
        Self::with_kernel(
            in_channels,
            out_channels,
            (kernel_size, kernel_size),
            stride,
            padding,
            true,
            WeightInit::HeNormal,
            rng,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_kernel<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        stride: usize,
        padding: usize,
        bias: bool,
        weight_init: WeightInit,
        rng: &mut R,
    ) -> Result<Self> {
        let (kh, kw) = kernel_size;
        if in_channels == 0 || out_channels == 0 || kh == 0 || kw == 0 {
            return Err(NnError::config(format!(
                "Conv2D({in_channels}, {out_channels}, {kernel_size:?}) needs positive sizes"
            )));
        }
        if stride == 0 {
            return Err(NnError::config("Conv2D stride must be >= 1"));
        }
        let w = weight_init.init(&[out_channels, in_channels, kh, kw], rng)?;
        let dw = Tensor::zeros_like(&w);
        let (b, db) = if bias {
            (Some(init::bias_zeros(out_channels)), Some(init::bias_zeros(out_channels)))
        } else {
            (None, None)
        };
        Ok(Self {
            w,
            b,
            dw,
            db,
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
            training: true,
            cache: None,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel_size(&self) -> (usize, usize) {
        self.kernel_size
    }

    /// Output spatial size for an `(h, w)` input, or a shape error when the
    /// kernel does not fit.
    pub fn output_hw(&self, h: usize, w: usize) -> Result<(usize, usize)> {
        let (kh, kw) = self.kernel_size;
        Ok((
            math::conv_output_size(h, kh, self.stride, self.padding)?,
            math::conv_output_size(w, kw, self.stride, self.padding)?,
        ))
    }

    fn weight_matrix(&self) -> Result<Tensor> {
        let (kh, kw) = self.kernel_size;
        self.w
            .reshape(&[self.out_channels, self.in_channels * kh * kw])
    }
}

impl Layer for Conv2d {
    fn kind(&self) -> &'static str {
        "Conv2D"
    }

    fn forward(&mut self, x: &Tensor, training: Option<bool>) -> Result<Tensor> {
        if let Some(t) = training {
            self.training = t;
        }
        self.cache = None;
        let (n, c, h, w) = x.dims4()?;
        if c != self.in_channels {
            return Err(NnError::shape(format!(
                "Conv2D channel mismatch: expected {} input channels, got {}",
                self.in_channels, c
            )));
        }
        let (out_h, out_w) = self.output_hw(h, w)?;

        let cols = math::im2col(x, self.kernel_size, self.stride, self.padding)?;
        // (N*OH*OW, C_out)
        let mut y = math::matmul_nt(&cols, &self.weight_matrix()?)?;
        if let Some(b) = &self.b {
            for row in y.data.chunks_mut(self.out_channels) {
                for (v, bv) in row.iter_mut().zip(&b.data) {
                    *v += bv;
                }
            }
        }
        let y = y
            .into_shape(&[n, out_h, out_w, self.out_channels])?
            .permute(&[0, 3, 1, 2])?;

        self.cache = Some(ConvCache {
            cols,
            input_shape: (n, c, h, w),
            out_hw: (out_h, out_w),
        });
        Ok(y)
    }

    fn backward(&mut self, grad_out: &Tensor) -> Result<Tensor> {
        let cached = self.cache.as_ref().ok_or_else(|| missing_cache("Conv2D"))?;
        let (n, _, _, _) = cached.input_shape;
        let (out_h, out_w) = cached.out_hw;
        grad_out.ensure_shape(&[n, self.out_channels, out_h, out_w], "Conv2D.backward")?;
        let cache = self.cache.take().ok_or_else(|| missing_cache("Conv2D"))?;

        // back to row-per-output-cell layout, matching `cols`
        let g = grad_out
            .permute(&[0, 2, 3, 1])?
            .into_shape(&[n * out_h * out_w, self.out_channels])?;

        self.dw = math::matmul_tn(&g, &cache.cols)?.into_shape(&self.w.shape)?;
        if let Some(db) = self.db.as_mut() {
            *db = math::sum_rows(&g)?;
        }
        let dcols = math::matmul(&g, &self.weight_matrix()?)?;
        math::col2im(
            &dcols,
            cache.input_shape,
            self.kernel_size,
            self.stride,
            self.padding,
        )
    }

    fn params(&self) -> Vec<(&'static str, &Tensor)> {
        let mut out = vec![("W", &self.w)];
        if let Some(b) = &self.b {
            out.push(("b", b));
        }
        out
    }

    fn grads(&self) -> Vec<(&'static str, &Tensor)> {
        let mut out = vec![("W", &self.dw)];
        if let Some(db) = &self.db {
            out.push(("b", db));
        }
        out
    }

    fn parameters(&mut self) -> Vec<Param<'_>> {
        let mut out = vec![Param::new("W", &mut self.w, &self.dw)];
        if let (Some(b), Some(db)) = (self.b.as_mut(), self.db.as_ref()) {
            out.push(Param::new("b", b, db));
        }
        out
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
