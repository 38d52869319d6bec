pub mod conv;
pub mod dense;
pub mod dropout;
pub mod layer;
pub mod leaky_relu;
pub mod normalization;
pub mod pooling;
pub mod relu;
pub mod softmax;
pub mod tanh;

pub use conv::Conv2d;
pub use dense::Dense;
pub use dropout::Dropout;
pub use layer::{Layer, Param};
pub use leaky_relu::LeakyRelu;
pub use normalization::BatchNorm2d;
pub use pooling::{AvgPool2d, MaxPool2d};
pub use relu::Relu;
pub use softmax::Softmax;
pub use tanh::Tanh;
