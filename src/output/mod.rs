//! Output preparation for size-constrained delivery

pub mod chunker;
pub mod format;

pub use chunker::{split, text_len};
pub use format::format_record;
