//! Identifiers and object kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Size in bytes of a [`FileId`].
pub const ID_LENGTH: usize = 32;

/// Opaque identifier naming a persisted object.
///
/// Identifiers are assigned by the storage layer and never change. They are
/// the sole key into the [`FileTable`](crate::FileTable), and their byte-wise
/// ordering is the lock order used by
/// [`DualFileLockGuard`](crate::DualFileLockGuard).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId([u8; ID_LENGTH]);

impl FileId {
    /// The all-zero identifier, conventionally the root directory.
    pub const ROOT: FileId = FileId([0u8; ID_LENGTH]);

    pub const fn from_bytes(bytes: [u8; ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse an identifier from its hex representation.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; ID_LENGTH];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }

    pub const fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; ID_LENGTH]> for FileId {
    fn from(bytes: [u8; ID_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for FileId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes are plenty to tell ids apart in logs
        write!(f, "FileId({}..)", hex::encode(&self.0[..8]))
    }
}

/// Concrete kind of a file object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    RegularFile,
    Symlink,
    Directory,
}

impl FileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::RegularFile => "regular file",
            FileKind::Symlink => "symlink",
            FileKind::Directory => "directory",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_with_first(byte: u8) -> FileId {
        let mut bytes = [0u8; ID_LENGTH];
        bytes[0] = byte;
        FileId::from_bytes(bytes)
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = id_with_first(0xab);
        let parsed = FileId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(parsed, id);
        assert!(id.to_string().starts_with("ab00"));
        assert_eq!(id.to_string().len(), ID_LENGTH * 2);
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert!(FileId::from_hex("abcd").is_err());
        assert!(FileId::from_hex(&"zz".repeat(ID_LENGTH)).is_err());
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let low = id_with_first(0x01);
        let high = id_with_first(0xf0);
        assert!(low < high);
        assert!(FileId::ROOT < low);

        let mut tail = [0u8; ID_LENGTH];
        tail[ID_LENGTH - 1] = 0xff;
        // Leading bytes dominate
        assert!(FileId::from_bytes(tail) < low);
    }

    #[test]
    fn test_debug_is_abbreviated() {
        let debug = format!("{:?}", id_with_first(0x42));
        assert_eq!(debug, "FileId(4200000000000000..)");
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(FileKind::RegularFile.to_string(), "regular file");
        assert_eq!(FileKind::Symlink.to_string(), "symlink");
        assert_eq!(FileKind::Directory.to_string(), "directory");
    }
}
