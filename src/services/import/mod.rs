//! Spreadsheet import pipeline
//!
//! parser → normalize/coerce → mapper → reconcile → batch, driven by the
//! orchestrator.

pub mod batch;
pub mod coerce;
pub mod error;
pub mod fields;
pub mod mapper;
pub mod normalize;
pub mod orchestrator;
pub mod parser;
pub mod reconcile;

pub use error::ImportError;
pub use fields::FieldConfigSet;
pub use orchestrator::{ImportPipeline, DEFAULT_BATCH_SIZE};
