pub mod analysis;
pub mod decode;
pub mod estimator;
pub mod features;
pub mod smoothing;
