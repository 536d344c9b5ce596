//! Business logic services

pub mod import;
