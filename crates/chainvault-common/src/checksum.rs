//! Checksum utilities for source files, converted artifacts and ciphertexts

use crate::error::{Result, VaultError};
use crate::types::ChecksumAlgorithm;
use sha2::{Digest, Sha256, Sha512};
use std::io::{Read, Write};
use std::path::Path;

const BUFFER_SIZE: usize = 8192;

/// Compute checksum for a file
pub fn compute_file_checksum(
    path: impl AsRef<Path>,
    algorithm: ChecksumAlgorithm,
) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file, algorithm)
}

/// Compute checksum for any readable source
pub fn compute_checksum<R: Read>(reader: &mut R, algorithm: ChecksumAlgorithm) -> Result<String> {
    match algorithm {
        ChecksumAlgorithm::Sha256 => digest_reader::<Sha256, R>(reader),
        ChecksumAlgorithm::Sha512 => digest_reader::<Sha512, R>(reader),
    }
}

fn digest_reader<D: Digest, R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = D::new();
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 of an in-memory buffer, hex encoded
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Verify a hex SHA-256 against an in-memory buffer
pub fn verify_sha256(data: &[u8], expected: &str) -> Result<()> {
    let actual = sha256_hex(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(VaultError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Verify checksum for a file
pub fn verify_file_checksum(
    path: impl AsRef<Path>,
    expected: &str,
    algorithm: ChecksumAlgorithm,
) -> Result<bool> {
    let actual = compute_file_checksum(path, algorithm)?;
    if actual == expected {
        Ok(true)
    } else {
        Err(VaultError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Writer adapter that hashes and counts everything passing through it.
///
/// Used to fingerprint streamed uploads and converted artifacts without a
/// second pass over the data.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Flush and return the inner writer, the hex SHA-256 and the byte count
    pub fn finish(mut self) -> std::io::Result<(W, String, u64)> {
        self.inner.flush()?;
        Ok((self.inner, hex::encode(self.hasher.finalize()), self.bytes))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.bytes += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_compute_checksum_sha256() {
        let mut cursor = Cursor::new(b"hello world");
        let checksum = compute_checksum(&mut cursor, ChecksumAlgorithm::Sha256).unwrap();
        assert_eq!(checksum, HELLO_SHA256);
    }

    #[test]
    fn test_compute_checksum_sha512() {
        let mut cursor = Cursor::new(b"hello world");
        let checksum = compute_checksum(&mut cursor, ChecksumAlgorithm::Sha512).unwrap();
        assert_eq!(
            checksum,
            "309ecc489c12d6eb4cc40f50c902f2b4d0ed77ee511a7c7a9bcd3ca86d4cd86f989dd35bc5ff499670da34255b45b0cfd830e81f605dcf7dc5542e93ae9cd76f"
        );
    }

    #[test]
    fn test_hashing_writer_matches_direct_digest() {
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();
        let (inner, checksum, bytes) = writer.finish().unwrap();

        assert_eq!(inner, b"hello world");
        assert_eq!(bytes, 11);
        assert_eq!(checksum, HELLO_SHA256);
        assert_eq!(sha256_hex(b"hello world"), HELLO_SHA256);
    }

    #[test]
    fn test_verify_sha256_mismatch() {
        assert!(verify_sha256(b"hello world", HELLO_SHA256).is_ok());
        let err = verify_sha256(b"hello there", HELLO_SHA256).unwrap_err();
        assert!(matches!(err, VaultError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_verify_file_checksum() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        assert!(verify_file_checksum(file.path(), HELLO_SHA256, ChecksumAlgorithm::Sha256).unwrap());
    }

    proptest::proptest! {
        #[test]
        fn prop_hashing_writer_is_chunking_independent(
            data in proptest::collection::vec(proptest::num::u8::ANY, 0..4096),
            split in 0usize..4096,
        ) {
            let split = split.min(data.len());
            let mut writer = HashingWriter::new(std::io::sink());
            writer.write_all(&data[..split]).unwrap();
            writer.write_all(&data[split..]).unwrap();
            let (_, checksum, bytes) = writer.finish().unwrap();

            proptest::prop_assert_eq!(bytes as usize, data.len());
            proptest::prop_assert_eq!(checksum, sha256_hex(&data));
        }
    }
}
