use std::io::{Cursor, Write};

use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::Result;
use crate::generator::FileMap;

/// Zip the file map in path order with fixed timestamps
///
/// The same map always produces the same bytes.
pub fn package_zip(files: &FileMap) -> Result<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (path, content) in files {
        writer.start_file(path.as_str(), options)?;
        writer.write_all(content.as_bytes())?;
    }
    let archive = writer.finish()?.into_inner();

    tracing::debug!("Packaged {} files into {} bytes", files.len(), archive.len());
    Ok(archive)
}

/// SHA-256 over every path and content, hex encoded
pub fn digest(files: &FileMap) -> String {
    let mut hasher = Sha256::new();
    for (path, content) in files {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
