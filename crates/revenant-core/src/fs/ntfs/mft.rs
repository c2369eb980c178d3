//! MFT record and attribute header decoding.

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use encoding_rs::UTF_16LE;
use std::io::Cursor;

/// "FILE" as the little-endian u32 at the start of every MFT record.
pub const RECORD_SIGNATURE: u32 = 0x454C_4946;

/// Record flag bit 0: the record describes a live file.
pub const FLAG_IN_USE: u16 = 0x0001;

pub const ATTR_FILE_NAME: u32 = 0x30;
pub const ATTR_DATA: u32 = 0x80;
/// Attribute type marking the end of the attribute list.
pub const ATTR_END: u32 = 0xFFFF_FFFF;

/// DOS (8.3) namespace of a $FILE_NAME attribute.
pub const NAMESPACE_DOS: u8 = 2;

/// Fixed-size head of an MFT record.
// TODO: apply the update sequence array fixups before trusting the last two
// bytes of each record sector.
#[derive(Debug, Clone)]
pub struct MftRecordHeader {
    pub signature: u32,
    pub first_attribute_offset: u16,
    pub flags: u16,
    pub used_size: u32,
}

impl MftRecordHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 28 {
            anyhow::bail!("insufficient data for MFT record header");
        }
        let mut cursor = Cursor::new(data);
        let signature = cursor.read_u32::<LittleEndian>()?;
        cursor.set_position(20);
        let first_attribute_offset = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let used_size = cursor.read_u32::<LittleEndian>()?;

        Ok(MftRecordHeader {
            signature,
            first_attribute_offset,
            flags,
            used_size,
        })
    }

    pub fn is_file_record(&self) -> bool {
        self.signature == RECORD_SIGNATURE
    }

    pub fn is_in_use(&self) -> bool {
        self.flags & FLAG_IN_USE != 0
    }
}

/// Common head shared by resident and non-resident attributes.
#[derive(Debug, Clone)]
pub struct AttributeHeader {
    pub attr_type: u32,
    pub length: u32,
    pub non_resident: bool,
}

impl AttributeHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 16 {
            anyhow::bail!("insufficient data for attribute header");
        }
        let mut cursor = Cursor::new(data);
        let attr_type = cursor.read_u32::<LittleEndian>()?;
        let length = cursor.read_u32::<LittleEndian>()?;
        let non_resident = cursor.read_u8()? != 0;

        Ok(AttributeHeader {
            attr_type,
            length,
            non_resident,
        })
    }
}

/// Resident attribute content location within the attribute.
#[derive(Debug, Clone)]
pub struct ResidentHeader {
    pub content_length: u32,
    pub content_offset: u16,
}

impl ResidentHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 24 {
            anyhow::bail!("insufficient data for resident attribute header");
        }
        let mut cursor = Cursor::new(data);
        cursor.set_position(16);
        let content_length = cursor.read_u32::<LittleEndian>()?;
        let content_offset = cursor.read_u16::<LittleEndian>()?;

        Ok(ResidentHeader {
            content_length,
            content_offset,
        })
    }
}

/// Non-resident attribute header: where the run list starts and the true
/// byte size of the stream.
#[derive(Debug, Clone)]
pub struct NonResidentHeader {
    pub data_run_offset: u16,
    pub real_size: u64,
}

impl NonResidentHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 56 {
            anyhow::bail!("insufficient data for non-resident attribute header");
        }
        let mut cursor = Cursor::new(data);
        cursor.set_position(32);
        let data_run_offset = cursor.read_u16::<LittleEndian>()?;
        cursor.set_position(48);
        let real_size = cursor.read_u64::<LittleEndian>()?;

        Ok(NonResidentHeader {
            data_run_offset,
            real_size,
        })
    }
}

/// Decoded $FILE_NAME attribute content.
#[derive(Debug, Clone)]
pub struct FileNameAttribute {
    pub name: String,
    pub namespace: u8,
}

impl FileNameAttribute {
    /// Decode from resident content. The name length is capped at 255
    /// UTF-16 code units by the format.
    pub fn parse(content: &[u8]) -> Result<Self> {
        if content.len() < 66 {
            anyhow::bail!("insufficient data for $FILE_NAME attribute");
        }
        let name_length = content[64] as usize;
        let namespace = content[65];

        let name_bytes = name_length * 2;
        if content.len() < 66 + name_bytes {
            anyhow::bail!("$FILE_NAME name extends past attribute content");
        }

        let (name, _, _) = UTF_16LE.decode(&content[66..66 + name_bytes]);

        Ok(FileNameAttribute {
            name: name.into_owned(),
            namespace,
        })
    }
}
