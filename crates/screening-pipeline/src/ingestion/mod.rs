//! Text extraction from uploaded resume files

mod extractor;

pub use extractor::{ExtractedText, FileKind, TextExtractor};
