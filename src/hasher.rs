use std::{fs::File, io::BufReader, path::Path};

use crate::error::Result;

/// Hex-encoded BLAKE3 digest of a file's bytes.
///
/// This is the deduplication key for archives and documents: two files
/// with the same digest are treated as the same content wherever they live.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(BufReader::new(file))?;
    Ok(hasher.finalize().to_hex().to_string())
}
