pub mod conv;
pub mod data;
pub mod model;
pub mod norm;
pub mod training;

#[cfg(test)]
pub type TestBackend = burn::backend::NdArray<f32>;
#[cfg(test)]
pub type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;
