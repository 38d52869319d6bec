use super::layer::{missing_cache, Layer};
use crate::error::{NnError, Result};
use crate::tensor::Tensor;

/// Window geometry shared by both pooling layers. No padding is applied.
#[derive(Clone, Copy, Debug)]
struct Window {
    kh: usize,
    kw: usize,
    stride: usize,
}

impl Window {
    fn new(kernel_size: (usize, usize), stride: Option<usize>) -> Result<Self> {
        let (kh, kw) = kernel_size;
        let stride = stride.unwrap_or(kh);
        if kh == 0 || kw == 0 || stride == 0 {
            return Err(NnError::config(format!(
                "pooling needs positive kernel and stride, got {kernel_size:?} / {stride}"
            )));
        }
        Ok(Self { kh, kw, stride })
    }

    fn output_hw(&self, h: usize, w: usize) -> Result<(usize, usize)> {
        if h < self.kh || w < self.kw {
            return Err(NnError::shape(format!(
                "pooling window {}x{} does not fit input {}x{}",
                self.kh, self.kw, h, w
            )));
        }
        Ok(((h - self.kh) / self.stride + 1, (w - self.kw) / self.stride + 1))
    }

    /// Visit every `(plane, out_index, input_offsets)` triple. Offsets are
    /// flat indices into the input for the window of that output cell.
    fn for_each(
        &self,
        (n, c, h, w): (usize, usize, usize, usize),
        (out_h, out_w): (usize, usize),
        mut f: impl FnMut(usize, &mut dyn Iterator<Item = usize>),
    ) {
        for plane in 0..n * c {
            for i in 0..out_h {
                for j in 0..out_w {
                    let (hs, ws) = (i * self.stride, j * self.stride);
                    let base = plane * h * w;
                    let mut offsets = (hs..hs + self.kh)
                        .flat_map(move |r| (ws..ws + self.kw).map(move |col| base + r * w + col));
                    f((plane * out_h + i) * out_w + j, &mut offsets);
                }
            }
        }
    }
}

/// Max pooling over `(N, C, H, W)`.
///
/// Every input position that attains its window's maximum is marked, and
/// the marks of overlapping windows are OR-ed together. Backward sends the
/// gradient of each output cell to every marked position inside its window,
/// so tied maxima all receive gradient.
pub struct MaxPool2d {
    window: Window,
    training: bool,
    cache: Option<MaxPoolCache>,
}

struct MaxPoolCache {
    input_shape: (usize, usize, usize, usize),
    out_hw: (usize, usize),
    mask: Vec<bool>,
}

impl MaxPool2d {
    /// Square window; stride defaults to the kernel size.
    pub fn new(kernel_size: usize, stride: Option<usize>) -> Result<Self> {
        Self::with_kernel((kernel_size, kernel_size), stride)
    }

    pub fn with_kernel(kernel_size: (usize, usize), stride: Option<usize>) -> Result<Self> {
        Ok(Self {
            window: Window::new(kernel_size, stride)?,
            training: true,
            cache: None,
        })
    }
}

impl Layer for MaxPool2d {
    fn kind(&self) -> &'static str {
        "MaxPool2D"
    }

    fn forward(&mut self, x: &Tensor, training: Option<bool>) -> Result<Tensor> {
        if let Some(t) = training {
            self.training = t;
        }
        self.cache = None;
        let (n, c, h, w) = x.dims4()?;
        let (out_h, out_w) = self.window.output_hw(h, w)?;
        let mut out = Tensor::zeros(&[n, c, out_h, out_w]);
        let mut mask = vec![false; x.len()];
        let mut window = Vec::with_capacity(self.window.kh * self.window.kw);

        self.window.for_each((n, c, h, w), (out_h, out_w), |o, offsets| {
            window.clear();
            window.extend(offsets);
            let max = window
                .iter()
                .map(|&i| x.data[i])
                .fold(f64::NEG_INFINITY, f64::max);
            out.data[o] = max;
            for &i in &window {
                if x.data[i] >= max {
                    mask[i] = true;
                }
            }
        });

        self.cache = Some(MaxPoolCache {
            input_shape: (n, c, h, w),
            out_hw: (out_h, out_w),
            mask,
        });
        Ok(out)
    }

    fn backward(&mut self, grad_out: &Tensor) -> Result<Tensor> {
        let cached = self.cache.as_ref().ok_or_else(|| missing_cache("MaxPool2D"))?;
        let (n, c, h, w) = cached.input_shape;
        let (out_h, out_w) = cached.out_hw;
        grad_out.ensure_shape(&[n, c, out_h, out_w], "MaxPool2D.backward")?;
        let cache = self.cache.take().ok_or_else(|| missing_cache("MaxPool2D"))?;

        let mut dx = Tensor::zeros(&[n, c, h, w]);
        self.window.for_each(cache.input_shape, cache.out_hw, |o, offsets| {
            let g = grad_out.data[o];
            for i in offsets {
                if cache.mask[i] {
                    dx.data[i] += g;
                }
            }
        });
        Ok(dx)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

/// Average pooling over `(N, C, H, W)`; backward spreads each output
/// gradient evenly over its `KH x KW` window.
pub struct AvgPool2d {
    window: Window,
    training: bool,
    cache: Option<(usize, usize, usize, usize)>,
}

impl AvgPool2d {
    pub fn new(kernel_size: usize, stride: Option<usize>) -> Result<Self> {
        Self::with_kernel((kernel_size, kernel_size), stride)
    }

    pub fn with_kernel(kernel_size: (usize, usize), stride: Option<usize>) -> Result<Self> {
        Ok(Self {
            window: Window::new(kernel_size, stride)?,
            training: true,
            cache: None,
        })
    }
}

impl Layer for AvgPool2d {
    fn kind(&self) -> &'static str {
        "AvgPool2D"
    }

    fn forward(&mut self, x: &Tensor, training: Option<bool>) -> Result<Tensor> {
        if let Some(t) = training {
            self.training = t;
        }
        self.cache = None;
        let (n, c, h, w) = x.dims4()?;
        let (out_h, out_w) = self.window.output_hw(h, w)?;
        let area = (self.window.kh * self.window.kw) as f64;
        let mut out = Tensor::zeros(&[n, c, out_h, out_w]);
        self.window.for_each((n, c, h, w), (out_h, out_w), |o, offsets| {
            out.data[o] = offsets.map(|i| x.data[i]).sum::<f64>() / area;
        });
        self.cache = Some((n, c, h, w));
        Ok(out)
    }

    fn backward(&mut self, grad_out: &Tensor) -> Result<Tensor> {
        let input_shape = self.cache.ok_or_else(|| missing_cache("AvgPool2D"))?;
        let (n, c, h, w) = input_shape;
        let out_hw = self.window.output_hw(h, w)?;
        grad_out.ensure_shape(&[n, c, out_hw.0, out_hw.1], "AvgPool2D.backward")?;
        self.cache = None;

        let area = (self.window.kh * self.window.kw) as f64;
        let mut dx = Tensor::zeros(&[n, c, h, w]);
        self.window.for_each(input_shape, out_hw, |o, offsets| {
            let g = grad_out.data[o] / area;
            for i in offsets {
                dx.data[i] += g;
            }
        });
        Ok(dx)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
