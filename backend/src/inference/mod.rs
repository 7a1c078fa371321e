pub mod model;
pub mod preprocess;
#[cfg(feature = "torch")]
pub mod torch;
