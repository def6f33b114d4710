//! The directory of files stored on a device.
//!
//! Some features transfer configuration files to the device. The files live in
//! a region addressed by sectors, and a directory blob records for every file
//! its ID, owning feature, type, size, CRC-32 and first sector. The directory
//! is protected by a CRC-32 of its own.
//!
//! Wire format: a sequence of 10 byte entries, the terminator `0xff` and the
//! big-endian CRC-32 of everything before it.

use thiserror::Error;
use tracing::{debug, warn};

use crate::field::{BitField, FieldContainer, FieldError, Value, container};

/// Marks the end of the entry list.
pub const TERMINATOR: u8 = 0xff;

container! {
    /// The serialized form of one [`FileEntry`].
    pub struct DirectoryEntry {
        fields: [
            BitField::new(0xff, 8, "file_id"),
            BitField::new(0xfe, 16, "feature_id"),
            BitField::new(0xfd, 4, "file_type_id"),
            BitField::new(0xfc, 12, "length"),
            BitField::new(0xfb, 32, "crc32"),
            BitField::new(0xfa, 8, "first_sector"),
        ],
    }
}

/// Represents an error that occurred while maintaining a directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("no file with ID {0:#04x} in the directory")]
    UnknownFile(u16),

    #[error("directory blob ends after {0} bytes")]
    Truncated(usize),

    #[error("directory CRC is {actual:#010x}, expected {expected:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error(transparent)]
    Codec(#[from] FieldError),
}

/// The addressing parameters of a file region.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DirectoryConfig {
    /// The number of bytes per sector.
    pub sector_size: usize,

    pub first_file_id: u16,

    /// The highest assignable file ID. `0xff` is the terminator.
    pub max_file_id: u16,

    /// The sector the first file starts at.
    pub first_sector: u16,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            sector_size: 256,
            first_file_id: 1,
            max_file_id: 0xfe,
            first_sector: 1,
        }
    }
}

/// One file of the directory.
///
/// IDs are kept wider than their wire form so exhausted IDs stay visible;
/// only the least significant byte is serialized.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileEntry {
    pub file_id: u16,
    pub feature_id: u16,
    pub file_type_id: u8,

    /// The size of the file body in bytes.
    pub length: u16,

    /// The CRC-32 of the file body.
    pub crc32: u32,
    pub first_sector: u16,
}

impl FileEntry {
    /// The number of sectors the file body occupies.
    pub fn sector_count(&self, sector_size: usize) -> u16 {
        usize::from(self.length).div_ceil(sector_size.max(1)) as u16
    }

    /// Whether `other` describes a different body or owner.
    fn differs_from(&self, other: &Self) -> bool {
        (self.feature_id, self.file_type_id, self.length, self.crc32)
            != (other.feature_id, other.file_type_id, other.length, other.crc32)
    }
}

impl TryFrom<&FileEntry> for DirectoryEntry {
    type Error = FieldError;

    fn try_from(entry: &FileEntry) -> Result<Self, Self::Error> {
        Self::build([
            ("file_id", Value::from(entry.file_id & 0xff)),
            ("feature_id", Value::from(entry.feature_id)),
            ("file_type_id", Value::from(entry.file_type_id)),
            ("length", Value::from(entry.length)),
            ("crc32", Value::from(entry.crc32)),
            ("first_sector", Value::from(entry.first_sector & 0xff)),
        ])
    }
}

impl From<&DirectoryEntry> for FileEntry {
    fn from(entry: &DirectoryEntry) -> Self {
        let int = |name: &str| entry.get_int(name).unwrap_or_default();
        Self {
            file_id: int("file_id") as u16,
            feature_id: int("feature_id") as u16,
            file_type_id: int("file_type_id") as u8,
            length: int("length") as u16,
            crc32: int("crc32") as u32,
            first_sector: int("first_sector") as u16,
        }
    }
}

/// The place assigned to a newly registered file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Registration {
    pub file_id: u16,
    pub first_sector: u16,
    pub sector_count: u16,
}

/// How a file differs between two directories.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FileChange {
    /// The file is missing from the stored directory.
    Added(FileEntry),

    /// The file exists in both, with a different body or owner.
    Changed { stored: FileEntry, current: FileEntry },

    /// The file only exists in the stored directory.
    Removed(FileEntry),
    Unchanged(FileEntry),
}

/// An append-only directory of files.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Directory {
    config: DirectoryConfig,
    entries: Vec<FileEntry>,
}

impl Directory {
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
        }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn get(&self, file_id: u16) -> Option<&FileEntry> {
        self.entries.iter().find(|entry| entry.file_id == file_id)
    }

    /// IDs whose serialized byte would read as [`TERMINATOR`] are skipped.
    fn next_file_id(&self) -> u16 {
        let next = self
            .entries
            .iter()
            .map(|entry| entry.file_id.saturating_add(1))
            .max()
            .unwrap_or(self.config.first_file_id);

        if next & 0xff == u16::from(TERMINATOR) {
            next.saturating_add(1)
        } else {
            next
        }
    }

    fn next_sector(&self) -> u16 {
        self.entries
            .iter()
            .map(|entry| entry.first_sector + entry.sector_count(self.config.sector_size))
            .max()
            .unwrap_or(self.config.first_sector)
    }

    /// Appends a file, assigning it the next unused file ID and the sectors
    /// following the last file.
    ///
    /// Running out of file IDs is logged, the entry is recorded regardless.
    pub fn register(&mut self, feature_id: u16, file_type_id: u8, body: &[u8]) -> Result<Registration, DirectoryError> {
        let mut entry = FileEntry {
            file_id: self.next_file_id(),
            feature_id,
            file_type_id,
            length: 0,
            crc32: 0,
            first_sector: self.next_sector(),
        };
        fill(&mut entry, body)?;

        if entry.file_id > self.config.max_file_id {
            warn!(
                file_id = entry.file_id,
                max_file_id = self.config.max_file_id,
                "directory is out of file IDs"
            );
        }

        let registration = Registration {
            file_id: entry.file_id,
            first_sector: entry.first_sector,
            sector_count: entry.sector_count(self.config.sector_size),
        };
        debug!(?registration, feature_id, file_type_id, "registered file");

        self.entries.push(entry);
        Ok(registration)
    }

    /// Replaces the body of a file.
    ///
    /// Files before it keep their sectors, files after it are packed directly
    /// behind it again.
    pub fn update(&mut self, file_id: u16, body: &[u8]) -> Result<(), DirectoryError> {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.file_id == file_id)
            .ok_or(DirectoryError::UnknownFile(file_id))?;

        fill(&mut self.entries[position], body)?;

        let sector_size = self.config.sector_size;
        let mut next = self.entries[position].first_sector + self.entries[position].sector_count(sector_size);
        for entry in &mut self.entries[position + 1..] {
            entry.first_sector = next;
            next += entry.sector_count(sector_size);
        }

        Ok(())
    }

    /// The entry list followed by the terminator.
    fn body(&self) -> Result<Vec<u8>, DirectoryError> {
        let mut body = Vec::with_capacity(self.entries.len() * DirectoryEntry::byte_len() + 1);
        for entry in &self.entries {
            body.extend_from_slice(&DirectoryEntry::try_from(entry)?.to_bytes());
        }
        body.push(TERMINATOR);
        Ok(body)
    }

    /// The CRC-32 protecting the directory.
    pub fn crc(&self) -> Result<u32, DirectoryError> {
        Ok(crc32fast::hash(&self.body()?))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DirectoryError> {
        let mut bytes = self.body()?;
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());
        Ok(bytes)
    }

    /// Parses a directory blob with the default configuration.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DirectoryError> {
        Self::from_bytes_with(DirectoryConfig::default(), data)
    }

    /// Parses a directory blob, verifying its CRC. Bytes after the CRC are
    /// ignored.
    pub fn from_bytes_with(config: DirectoryConfig, data: &[u8]) -> Result<Self, DirectoryError> {
        let entry_len = DirectoryEntry::byte_len();

        let mut entries = Vec::new();
        let mut offset = 0;
        loop {
            match data.get(offset) {
                None => return Err(DirectoryError::Truncated(data.len())),
                Some(&TERMINATOR) => break,
                Some(_) => {
                    let raw = data
                        .get(offset..offset + entry_len)
                        .ok_or(DirectoryError::Truncated(data.len()))?;
                    entries.push(FileEntry::from(&DirectoryEntry::from_bytes(raw)?));
                    offset += entry_len;
                },
            }
        }

        let body_len = offset + 1;
        let stored = data
            .get(body_len..body_len + 4)
            .ok_or(DirectoryError::Truncated(data.len()))?;
        let expected = u32::from_be_bytes([stored[0], stored[1], stored[2], stored[3]]);
        let actual = crc32fast::hash(&data[..body_len]);
        if expected != actual {
            return Err(DirectoryError::CrcMismatch { expected, actual });
        }

        Ok(Self { config, entries })
    }

    /// Lists how the files of this directory differ from a `stored` one,
    /// usually read back from the device.
    ///
    /// Files of this directory come first in their order, followed by the
    /// files only `stored` has.
    pub fn compare(&self, stored: &Directory) -> Vec<FileChange> {
        let mut changes: Vec<FileChange> = self
            .entries
            .iter()
            .map(|current| match stored.get(current.file_id) {
                None => FileChange::Added(*current),
                Some(old) if old.differs_from(current) => FileChange::Changed {
                    stored: *old,
                    current: *current,
                },
                Some(_) => FileChange::Unchanged(*current),
            })
            .collect();

        changes.extend(
            stored
                .entries
                .iter()
                .filter(|old| self.get(old.file_id).is_none())
                .map(|old| FileChange::Removed(*old)),
        );

        changes
    }
}

/// Records size and CRC of `body` in `entry`.
fn fill(entry: &mut FileEntry, body: &[u8]) -> Result<(), DirectoryError> {
    entry.length = u16::try_from(body.len())
        .ok()
        .filter(|&length| length < 1 << 12)
        .ok_or(FieldError::OutOfRange {
            field: "length",
            bits: 12,
        })?;
    entry.crc32 = crc32fast::hash(body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    #[test]
    fn entries_are_ten_bytes() {
        let entry = FileEntry {
            file_id: 0x01,
            feature_id: 0x8100,
            file_type_id: 0x2,
            length: 0x345,
            crc32: 0xdeadbeef,
            first_sector: 0x07,
        };
        let bytes = DirectoryEntry::try_from(&entry).unwrap().to_bytes();

        assert_eq!(&bytes[..], &[0x01, 0x81, 0x00, 0x23, 0x45, 0xde, 0xad, 0xbe, 0xef, 0x07]);
        assert_eq!(FileEntry::from(&DirectoryEntry::from_bytes(&bytes).unwrap()), entry);
    }

    #[test]
    fn registration_assigns_ids_and_sector_runs() {
        let mut dir = Directory::default();

        let first = dir.register(0x8100, 1, &[0xaa; 300]).unwrap();
        let second = dir.register(0x8100, 2, &[0xbb; 10]).unwrap();

        assert_eq!(first, Registration {
            file_id: 1,
            first_sector: 1,
            sector_count: 2
        });
        assert_eq!(second, Registration {
            file_id: 2,
            first_sector: 3,
            sector_count: 1
        });
        assert_eq!(dir.get(1).unwrap().crc32, crc32fast::hash(&[0xaa; 300]));
    }

    #[test]
    fn update_repacks_later_files() {
        let mut dir = Directory::default();
        dir.register(0x8100, 1, &[0; 100]).unwrap();
        dir.register(0x8100, 1, &[0; 100]).unwrap();
        dir.register(0x8100, 1, &[0; 100]).unwrap();

        dir.update(2, &[1; 600]).unwrap();

        let sectors: Vec<_> = dir.entries().iter().map(|entry| entry.first_sector).collect();
        assert_eq!(sectors, [1, 2, 5]);
        assert_eq!(dir.get(2).unwrap().length, 600);

        assert!(matches!(dir.update(9, &[]), Err(DirectoryError::UnknownFile(9))));
    }

    #[test]
    fn update_with_the_same_body_is_a_no_op() {
        let mut dir = Directory::default();
        dir.register(0x1b04, 3, b"profile").unwrap();
        let before = dir.to_bytes().unwrap();

        dir.update(1, b"profile").unwrap();

        assert_eq!(dir.to_bytes().unwrap(), before);
    }

    #[test]
    fn blob_carries_terminator_and_crc() {
        let mut dir = Directory::default();
        dir.register(0x1b04, 3, b"profile").unwrap();

        let bytes = dir.to_bytes().unwrap();
        assert_eq!(bytes.len(), 10 + 1 + 4);
        assert_eq!(bytes[10], TERMINATOR);
        assert_eq!(&bytes[11..], &dir.crc().unwrap().to_be_bytes());

        assert_eq!(Directory::from_bytes(&bytes).unwrap(), dir);
    }

    #[test]
    fn corrupt_blobs_are_rejected() {
        let mut dir = Directory::default();
        dir.register(0x1b04, 3, b"profile").unwrap();
        let mut bytes = dir.to_bytes().unwrap();

        assert!(matches!(Directory::from_bytes(&bytes[..12]), Err(DirectoryError::Truncated(12))));
        assert!(matches!(Directory::from_bytes(&bytes[..5]), Err(DirectoryError::Truncated(5))));

        bytes[3] ^= 0x01;
        assert!(matches!(Directory::from_bytes(&bytes), Err(DirectoryError::CrcMismatch { .. })));
    }

    #[test]
    fn empty_directory_is_terminator_and_crc() {
        let dir = Directory::default();
        let bytes = dir.to_bytes().unwrap();

        assert_eq!(bytes[0], TERMINATOR);
        assert_eq!(u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]), crc32fast::hash(&[TERMINATOR]));
        assert!(Directory::from_bytes(&bytes).unwrap().entries().is_empty());
    }

    #[test]
    fn oversized_bodies_are_rejected() {
        let mut dir = Directory::default();
        assert!(matches!(
            dir.register(0x1b04, 1, &[0; 4096]),
            Err(DirectoryError::Codec(FieldError::OutOfRange { bits: 12, .. }))
        ));
        assert!(dir.entries().is_empty());
    }

    #[test]
    #[traced_test]
    fn exhausted_ids_warn_but_register() {
        let mut dir = Directory::new(DirectoryConfig {
            max_file_id: 2,
            ..Default::default()
        });
        dir.register(0x1b04, 1, b"a").unwrap();
        dir.register(0x1b04, 1, b"b").unwrap();
        let third = dir.register(0x1b04, 1, b"c").unwrap();

        assert_eq!(third.file_id, 3);
        assert!(logs_contain("directory is out of file IDs"));
    }

    #[test]
    fn exhausted_ids_never_collide_with_the_terminator() {
        let mut dir = Directory::default();
        let mut last = None;
        for _ in 0..255 {
            last = Some(dir.register(0x1b04, 1, b"x").unwrap());
        }

        assert_eq!(last.unwrap().file_id, 0x100);
        assert!(dir.get(0xff).is_none());

        let bytes = dir.to_bytes().unwrap();
        assert!(
            bytes[..bytes.len() - 5]
                .chunks(DirectoryEntry::byte_len())
                .all(|entry| entry[0] != TERMINATOR)
        );
        assert_eq!(Directory::from_bytes(&bytes).unwrap().entries().len(), 255);
    }

    #[test]
    fn compare_detects_upgrades() {
        let mut stored = Directory::default();
        stored.register(0x1b04, 1, b"keys").unwrap();
        stored.register(0x1b04, 2, b"lights").unwrap();
        stored.register(0x8100, 1, b"old").unwrap();

        let mut current = Directory::default();
        current.register(0x1b04, 1, b"keys").unwrap();
        current.register(0x1b04, 2, b"brighter lights").unwrap();

        let changes = current.compare(&stored);
        assert!(matches!(changes[0], FileChange::Unchanged(FileEntry { file_id: 1, .. })));
        assert!(matches!(changes[1], FileChange::Changed {
            current: FileEntry { length: 15, .. },
            ..
        }));
        assert!(matches!(changes[2], FileChange::Removed(FileEntry { file_id: 3, .. })));

        current.register(0x8100, 1, b"old").unwrap();
        current.register(0x8100, 1, b"new").unwrap();
        let changes = current.compare(&stored);
        assert!(matches!(changes[2], FileChange::Unchanged(_)));
        assert!(matches!(changes[3], FileChange::Added(FileEntry { file_id: 4, .. })));
    }
}
