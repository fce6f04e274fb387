//! Commission model: per-instrument costing schemes and their registry.

pub mod registry;
pub mod scheme;

pub use registry::CommissionRegistry;
pub use scheme::{AutoMargin, CommType, CommissionScheme, CommissionSettings};
