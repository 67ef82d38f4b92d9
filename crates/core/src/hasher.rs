//! Streaming BLAKE3 content fingerprints.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Hex BLAKE3 digest of the file at `path`, read `chunk_size` bytes at a time.
pub fn hash_file(path: &Path, chunk_size: usize) -> io::Result<String> {
    let file = fs::File::open(path)?;
    hash_reader(file, chunk_size)
}

pub fn hash_reader<R: Read>(mut reader: R, chunk_size: usize) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_BLAKE3: &str = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262";

    #[test]
    fn empty_file_has_the_blake3_empty_digest() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("empty");
        fs::write(&path, b"").unwrap();
        assert_eq!(hash_file(&path, 4096).unwrap(), EMPTY_BLAKE3);
    }

    #[test]
    fn digest_is_independent_of_chunk_size() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("data.bin");
        let bytes: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &bytes).unwrap();

        let reference = blake3::hash(&bytes).to_hex().to_string();
        for chunk in [1, 7, 4096, 65_536, DEFAULT_CHUNK_SIZE] {
            assert_eq!(hash_file(&path, chunk).unwrap(), reference, "chunk {chunk}");
        }
        assert_eq!(reference.len(), 64);
    }

    #[test]
    fn missing_file_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let err = hash_file(&temp.path().join("nope"), 1024).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::new(io::ErrorKind::Other, "device went away"));
            }
            self.served = true;
            buf[0] = 1;
            Ok(1)
        }
    }

    #[test]
    fn mid_stream_read_failure_yields_no_digest() {
        let err = hash_reader(FailingReader { served: false }, 16).unwrap_err();
        assert_eq!(err.to_string(), "device went away");
    }
}
