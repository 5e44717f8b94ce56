//! BLAKE3 content fingerprints for lock files
//!
//! A fingerprint is recorded when a session starts and after every successful
//! conversion. A burst whose file content matches the recorded fingerprint
//! does not reach the converter.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// A BLAKE3 digest of file content (32 bytes)
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Create a fingerprint from raw digest bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the digest as a byte slice
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        const HEX_CHARS: &[u8] = b"0123456789abcdef";
        let mut hex = String::with_capacity(64);
        for &byte in &self.0 {
            hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
            hex.push(HEX_CHARS[(byte & 0xf) as usize] as char);
        }
        hex
    }

    /// First 12 hex characters, for log lines
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Fingerprint a byte slice
pub fn fingerprint_bytes(data: &[u8]) -> Fingerprint {
    Fingerprint::from_bytes(*blake3::hash(data).as_bytes())
}

/// Fingerprint a file (streaming)
pub fn fingerprint_file(path: &Path) -> std::io::Result<Fingerprint> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(Fingerprint::from_bytes(*hasher.finalize().as_bytes()))
}

/// Fingerprint a file if it exists and is readable
///
/// Missing files have no fingerprint; sessions may start before the lock
/// file has been created.
pub fn fingerprint_if_present(path: &Path) -> Option<Fingerprint> {
    fingerprint_file(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_file_and_bytes_agree() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bun.lock");
        fs::write(&path, b"{\"lockfileVersion\": 1}").unwrap();

        let from_file = fingerprint_file(&path).unwrap();
        let from_bytes = fingerprint_bytes(b"{\"lockfileVersion\": 1}");
        assert_eq!(from_file, from_bytes);
    }

    #[test]
    fn test_content_change_changes_fingerprint() {
        let a = fingerprint_bytes(b"left-pad");
        let b = fingerprint_bytes(b"left-pad cowsay");
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_and_short() {
        let fp = fingerprint_bytes(b"");
        assert_eq!(fp.to_hex().len(), 64);
        assert_eq!(fp.short().len(), 12);
        assert!(fp.to_hex().starts_with(&fp.short()));
        // Known BLAKE3 digest of the empty input
        assert!(fp.to_hex().starts_with("af1349b9f5f9"));
    }

    #[test]
    fn test_missing_file_has_no_fingerprint() {
        let temp_dir = TempDir::new().unwrap();
        assert!(fingerprint_if_present(&temp_dir.path().join("absent.lock")).is_none());
    }
}
