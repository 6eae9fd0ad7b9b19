pub mod coding;
pub mod decoder;
pub mod lattice;
#[cfg(feature = "neural")]
pub mod neural;
pub mod predictor;
pub mod settings;
pub mod trace_init;
