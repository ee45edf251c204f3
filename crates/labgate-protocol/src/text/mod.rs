//! Line-oriented vendor dialects.
//!
//! The simpler bench-top instruments print plain delimited text: either a
//! report framed by STX/ETX control bytes, or a comma-separated dump that
//! ends with a sentinel line (`TRANSFER FINISH`) and has no start marker at
//! all. Decoding is positional field extraction, one or more results per
//! content line; none of these dialects acknowledges or answers queries,
//! so their handshake hooks are no-ops.

mod combilyzer;
mod huma_reader;
mod humalyzer;

pub use combilyzer::CombilyzerDriver;
pub use huma_reader::HumaReaderDriver;
pub use humalyzer::HumalyzerDriver;

/// End-of-transmission sentinel shared by the Human comma-dump dialects.
pub(crate) const TRANSFER_FINISH: &str = "TRANSFER FINISH";

/// Drop leading blank lines of a report.
pub(crate) fn skip_leading_blanks<'a>(lines: &'a [&'a str]) -> &'a [&'a str] {
    let first = lines
        .iter()
        .position(|line| !line.trim().is_empty())
        .unwrap_or(lines.len());
    &lines[first..]
}
