pub mod apply;
pub mod comment;
pub mod diff;
pub mod merge_gate;
pub mod minimal;
pub mod preview;
pub mod rewrite;
pub mod syntax;
pub mod transformers;

use sha1::{Digest, Sha1};

/// SHA-1 of a single source line, stored on every hunk and re-verified at
/// apply time against the then-current file.
pub fn line_checksum(line: &str) -> String {
    hex::encode(Sha1::digest(line.as_bytes()))
}
