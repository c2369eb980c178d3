//! exFAT directory entry decoding.
//!
//! Directories hold 32-byte records. The first byte is the entry type; its
//! high bit is the in-use flag (clear = deleted), the low seven bits name
//! the record kind. A file is described by an entry set: one File entry,
//! one Stream Extension entry, then one or more Name entries.

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Size of every exFAT directory record.
pub const ENTRY_SIZE: usize = 32;

/// Record kinds (entry type with the in-use bit masked off).
pub const TYPE_FILE: u8 = 0x05;
pub const TYPE_STREAM_EXTENSION: u8 = 0x40;
pub const TYPE_FILE_NAME: u8 = 0x41;

/// Unused record; ends the directory.
pub const TYPE_END_OF_DIRECTORY: u8 = 0x00;

const IN_USE_BIT: u8 = 0x80;

pub const ATTR_DIRECTORY: u16 = 0x10;

/// Stream Extension flag: data is one contiguous run with no FAT chain.
pub const FLAG_NO_FAT_CHAIN: u8 = 0x02;

/// UTF-16 code units per Name entry.
pub const NAME_UNITS_PER_ENTRY: usize = 15;

pub fn record_kind(entry_type: u8) -> u8 {
    entry_type & 0x7F
}

pub fn is_in_use(entry_type: u8) -> bool {
    entry_type & IN_USE_BIT != 0
}

pub fn is_file_entry(entry_type: u8) -> bool {
    record_kind(entry_type) == TYPE_FILE
}

pub fn is_stream_extension(entry_type: u8) -> bool {
    record_kind(entry_type) == TYPE_STREAM_EXTENSION
}

pub fn is_file_name(entry_type: u8) -> bool {
    record_kind(entry_type) == TYPE_FILE_NAME
}

/// File entry: the primary record of an entry set.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub entry_type: u8,
    pub secondary_count: u8,
    pub file_attributes: u16,
}

impl FileEntry {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ENTRY_SIZE {
            anyhow::bail!("insufficient data for file entry");
        }
        let mut cursor = Cursor::new(data);
        let entry_type = cursor.read_u8()?;
        let secondary_count = cursor.read_u8()?;
        let _set_checksum = cursor.read_u16::<LittleEndian>()?;
        let file_attributes = cursor.read_u16::<LittleEndian>()?;

        Ok(FileEntry {
            entry_type,
            secondary_count,
            file_attributes,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.file_attributes & ATTR_DIRECTORY != 0
    }
}

/// Stream Extension entry: size and first cluster of the data stream.
#[derive(Debug, Clone)]
pub struct StreamExtensionEntry {
    pub entry_type: u8,
    pub general_flags: u8,
    pub name_length: u8,
    pub valid_data_length: u64,
    pub first_cluster: u32,
    pub data_length: u64,
}

impl StreamExtensionEntry {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ENTRY_SIZE {
            anyhow::bail!("insufficient data for stream extension entry");
        }
        let mut cursor = Cursor::new(data);
        let entry_type = cursor.read_u8()?;
        let general_flags = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        let name_length = cursor.read_u8()?;
        let _name_hash = cursor.read_u16::<LittleEndian>()?;
        let _reserved2 = cursor.read_u16::<LittleEndian>()?;
        let valid_data_length = cursor.read_u64::<LittleEndian>()?;
        let _reserved3 = cursor.read_u32::<LittleEndian>()?;
        let first_cluster = cursor.read_u32::<LittleEndian>()?;
        let data_length = cursor.read_u64::<LittleEndian>()?;

        Ok(StreamExtensionEntry {
            entry_type,
            general_flags,
            name_length,
            valid_data_length,
            first_cluster,
            data_length,
        })
    }

    pub fn is_contiguous(&self) -> bool {
        self.general_flags & FLAG_NO_FAT_CHAIN != 0
    }
}

/// Decode the up-to-15 UTF-16 code units of a Name entry, stopping at the
/// first NUL.
pub fn name_fragment(data: &[u8]) -> String {
    let units: Vec<u16> = data[2..2 + NAME_UNITS_PER_ENTRY * 2]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&u| u != 0)
        .collect();

    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_type_bits() {
        assert!(is_in_use(0x85));
        assert!(!is_in_use(0x05));
        assert!(is_file_entry(0x85));
        assert!(is_file_entry(0x05));
        assert!(is_stream_extension(0xC0));
        assert!(is_stream_extension(0x40));
        assert!(is_file_name(0xC1));
        assert!(is_file_name(0x41));
    }

    #[test]
    fn stream_extension_fields() {
        let mut data = [0u8; 32];
        data[0] = 0x40;
        data[1] = FLAG_NO_FAT_CHAIN;
        data[3] = 8; // name length
        data[8..16].copy_from_slice(&4100u64.to_le_bytes()); // valid data length
        data[20..24].copy_from_slice(&20u32.to_le_bytes()); // first cluster
        data[24..32].copy_from_slice(&4100u64.to_le_bytes()); // data length

        let entry = StreamExtensionEntry::parse(&data).unwrap();
        assert_eq!(entry.first_cluster, 20);
        assert_eq!(entry.data_length, 4100);
        assert!(entry.is_contiguous());
    }

    #[test]
    fn name_fragment_stops_at_nul() {
        let mut data = [0u8; 32];
        data[0] = 0x41;
        for (i, unit) in "notes.md".encode_utf16().enumerate() {
            data[2 + i * 2..4 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(name_fragment(&data), "notes.md");
    }

    #[test]
    fn directory_attribute() {
        let mut data = [0u8; 32];
        data[0] = 0x85;
        data[1] = 2;
        data[4..6].copy_from_slice(&ATTR_DIRECTORY.to_le_bytes());
        let entry = FileEntry::parse(&data).unwrap();
        assert!(entry.is_directory());
    }
}
