mod error;
mod intel_hex;

pub use error::ParseError;
pub use intel_hex::{parse_hex, write_hex};
