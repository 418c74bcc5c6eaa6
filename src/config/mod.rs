//! Configuration: coordinator settings, duration parsing, and the optional
//! `service-fixtures.yaml` file declaring extra resource descriptors.

mod duration;
mod parser;
mod types;
mod validation;

pub use duration::*;
pub use parser::*;
pub use types::*;
