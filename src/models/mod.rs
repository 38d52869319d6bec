pub mod presets;
pub mod sequential;

pub use presets::{build_model, default_model_for, lenet_mnist, vgg_tiny_cifar10};
pub use sequential::{qualified_name, ParamMap, Sequential};
