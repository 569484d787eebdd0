//! Line framing for compiler stdout.
//!
//! The compiler writes newline-delimited lines that are either plain text or a
//! single JSON object tagged with `type`. This module reassembles lines across
//! arbitrary read boundaries and classifies each one, implementing a tolerant
//! reader: anything that is not a recognised object degrades to raw text.

mod codec;
mod parser;
mod types;

pub use codec::{DEFAULT_MAX_LINE_BYTES, OutputCodec, OutputCodecError};
pub use parser::parse_line;
pub use types::OutputEvent;
