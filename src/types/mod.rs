//! Type definitions

pub mod import;
pub mod messages;
pub mod record;

pub use import::*;
pub use messages::*;
pub use record::*;
