//! Synthetic volume images for integration tests.
//!
//! The builders produce minimal but structurally valid images: a boot
//! sector, an allocation table and a handful of directory entries or MFT
//! records, written to a temp file so tests exercise the real
//! `VolumeReader`.

// Each test binary compiles its own copy; not every binary uses every builder.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;

use tempfile::NamedTempFile;

pub struct ImageBuilder {
    data: Vec<u8>,
    bytes_per_sector: u32,
    sectors_per_cluster: u32,
    fat_start_sector: u64,
    heap_start_sector: u64,
    mft_sector: u64,
    dir_cursor: HashMap<u32, usize>,
}

impl ImageBuilder {
    fn blank(total_sectors: u64, bytes_per_sector: u32) -> Self {
        ImageBuilder {
            data: vec![0u8; (total_sectors * u64::from(bytes_per_sector)) as usize],
            bytes_per_sector,
            sectors_per_cluster: 1,
            fat_start_sector: 0,
            heap_start_sector: 0,
            mft_sector: 0,
            dir_cursor: HashMap::new(),
        }
    }

    fn put(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// FAT32: one FAT, 8 reserved sectors, 4 FAT sectors, root at cluster 2.
    pub fn fat32(bytes_per_sector: u32, sectors_per_cluster: u32) -> Self {
        let total_sectors = 4096u32;
        let mut image = Self::blank(u64::from(total_sectors), bytes_per_sector);

        let mut boot = vec![0u8; 512];
        boot[11..13].copy_from_slice(&(bytes_per_sector as u16).to_le_bytes());
        boot[13] = sectors_per_cluster as u8;
        boot[14..16].copy_from_slice(&8u16.to_le_bytes());
        boot[16] = 1;
        boot[32..36].copy_from_slice(&total_sectors.to_le_bytes());
        boot[36..40].copy_from_slice(&4u32.to_le_bytes());
        boot[44..48].copy_from_slice(&2u32.to_le_bytes());
        boot[82..90].copy_from_slice(b"FAT32   ");
        image.put(0, &boot);

        image.fat_start_sector = 8;
        image.heap_start_sector = 12;
        image.sectors_per_cluster = sectors_per_cluster;
        image
    }

    /// exFAT: FAT at sector 24, heap at 40, root directory at cluster 4.
    pub fn exfat(bytes_per_sector: u32, sectors_per_cluster: u32) -> Self {
        let cluster_count = 512u32;
        let volume_length =
            40u64 + u64::from(cluster_count) * u64::from(sectors_per_cluster);
        let mut image = Self::blank(volume_length, bytes_per_sector);

        let mut boot = vec![0u8; 512];
        boot[3..11].copy_from_slice(b"EXFAT   ");
        boot[72..80].copy_from_slice(&volume_length.to_le_bytes());
        boot[80..84].copy_from_slice(&24u32.to_le_bytes());
        boot[84..88].copy_from_slice(&8u32.to_le_bytes());
        boot[88..92].copy_from_slice(&40u32.to_le_bytes());
        boot[92..96].copy_from_slice(&cluster_count.to_le_bytes());
        boot[96..100].copy_from_slice(&4u32.to_le_bytes());
        boot[108] = bytes_per_sector.trailing_zeros() as u8;
        boot[109] = sectors_per_cluster.trailing_zeros() as u8;
        boot[110] = 1;
        image.put(0, &boot);

        image.fat_start_sector = 24;
        image.heap_start_sector = 40;
        image.sectors_per_cluster = sectors_per_cluster;
        image
    }

    /// NTFS: MFT at the given cluster, 1024-byte records.
    pub fn ntfs(bytes_per_sector: u32, sectors_per_cluster: u32, mft_cluster: u64) -> Self {
        let total_sectors = 8192u64;
        let mut image = Self::blank(total_sectors, bytes_per_sector);

        let mut boot = vec![0u8; 512];
        boot[3..11].copy_from_slice(b"NTFS    ");
        boot[11..13].copy_from_slice(&(bytes_per_sector as u16).to_le_bytes());
        boot[13] = sectors_per_cluster as u8;
        boot[40..48].copy_from_slice(&total_sectors.to_le_bytes());
        boot[48..56].copy_from_slice(&mft_cluster.to_le_bytes());
        boot[64] = 0xF6;
        image.put(0, &boot);

        image.mft_sector = mft_cluster * u64::from(sectors_per_cluster);
        image.sectors_per_cluster = sectors_per_cluster;
        image
    }

    /// An image whose boot sector carries no recognizable filesystem tag.
    pub fn blank_unknown() -> Self {
        Self::blank(64, 512)
    }

    fn cluster_offset(&self, cluster: u32) -> usize {
        ((self.heap_start_sector
            + u64::from(cluster - 2) * u64::from(self.sectors_per_cluster))
            * u64::from(self.bytes_per_sector)) as usize
    }

    pub fn set_fat_entry(&mut self, cluster: u32, value: u32) {
        let offset = (self.fat_start_sector * u64::from(self.bytes_per_sector)) as usize
            + cluster as usize * 4;
        self.put(offset, &value.to_le_bytes());
    }

    pub fn fill_cluster(&mut self, cluster: u32, bytes: &[u8]) {
        let offset = self.cluster_offset(cluster);
        self.put(offset, bytes);
    }

    fn push_dir_record(&mut self, dir_cluster: u32, record: &[u8; 32]) {
        let base = self.cluster_offset(dir_cluster);
        let cursor = self.dir_cursor.entry(dir_cluster).or_insert(0);
        let offset = base + *cursor;
        *cursor += 32;
        self.put(offset, record);
    }

    pub fn add_fat_dir_entry(
        &mut self,
        dir_cluster: u32,
        name: &[u8; 11],
        attr: u8,
        first_cluster: u32,
        size: u32,
    ) {
        let mut record = [0u8; 32];
        record[..11].copy_from_slice(name);
        record[11] = attr;
        record[20..22].copy_from_slice(&((first_cluster >> 16) as u16).to_le_bytes());
        record[26..28].copy_from_slice(&(first_cluster as u16).to_le_bytes());
        record[28..32].copy_from_slice(&size.to_le_bytes());
        self.push_dir_record(dir_cluster, &record);
    }

    pub fn add_exfat_entry_set(
        &mut self,
        dir_cluster: u32,
        in_use: bool,
        name: &str,
        first_cluster: u32,
        data_length: u64,
    ) {
        let use_bit = if in_use { 0x80 } else { 0x00 };
        let units: Vec<u16> = name.encode_utf16().collect();
        let name_entries = units.len().div_ceil(15).max(1);

        let mut file = [0u8; 32];
        file[0] = 0x05 | use_bit;
        file[1] = (1 + name_entries) as u8;
        file[4..6].copy_from_slice(&0x20u16.to_le_bytes());
        self.push_dir_record(dir_cluster, &file);

        let mut stream = [0u8; 32];
        stream[0] = 0x40 | use_bit;
        stream[1] = 0x01;
        stream[3] = units.len() as u8;
        stream[8..16].copy_from_slice(&data_length.to_le_bytes());
        stream[20..24].copy_from_slice(&first_cluster.to_le_bytes());
        stream[24..32].copy_from_slice(&data_length.to_le_bytes());
        self.push_dir_record(dir_cluster, &stream);

        for chunk in units.chunks(15) {
            let mut name_record = [0u8; 32];
            name_record[0] = 0x41 | use_bit;
            for (i, unit) in chunk.iter().enumerate() {
                name_record[2 + i * 2..4 + i * 2].copy_from_slice(&unit.to_le_bytes());
            }
            self.push_dir_record(dir_cluster, &name_record);
        }
    }

    pub fn add_mft_record(
        &mut self,
        index: u64,
        in_use: bool,
        name: &str,
        resident: Option<&[u8]>,
        non_resident: Option<(&[u8], u64)>,
    ) {
        let mut record = vec![0u8; 1024];
        record[0..4].copy_from_slice(b"FILE");
        record[20..22].copy_from_slice(&56u16.to_le_bytes());
        let flags: u16 = if in_use { 0x0001 } else { 0x0000 };
        record[22..24].copy_from_slice(&flags.to_le_bytes());

        let mut offset = 56usize;
        if !name.is_empty() {
            offset = write_file_name_attr(&mut record, offset, name);
        }
        if let Some(bytes) = resident {
            offset = write_resident_data_attr(&mut record, offset, bytes);
        }
        if let Some((runs, real_size)) = non_resident {
            offset = write_non_resident_data_attr(&mut record, offset, runs, real_size);
        }
        record[offset..offset + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());

        let at = (self.mft_sector * u64::from(self.bytes_per_sector)) as usize
            + index as usize * 1024;
        self.put(at, &record);
    }

    pub fn fill_lcn(&mut self, lcn: u64, bytes: &[u8]) {
        let offset = (lcn
            * u64::from(self.sectors_per_cluster)
            * u64::from(self.bytes_per_sector)) as usize;
        self.put(offset, bytes);
    }

    pub fn write_to_temp_file(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp image");
        file.write_all(&self.data).expect("write image");
        file.flush().expect("flush image");
        file
    }
}

fn align8(value: usize) -> usize {
    value.div_ceil(8) * 8
}

fn write_file_name_attr(record: &mut [u8], offset: usize, name: &str) -> usize {
    let units: Vec<u16> = name.encode_utf16().collect();
    let content_len = 66 + units.len() * 2;
    let attr_len = align8(24 + content_len);

    record[offset..offset + 4].copy_from_slice(&0x30u32.to_le_bytes());
    record[offset + 4..offset + 8].copy_from_slice(&(attr_len as u32).to_le_bytes());
    record[offset + 16..offset + 20].copy_from_slice(&(content_len as u32).to_le_bytes());
    record[offset + 20..offset + 22].copy_from_slice(&24u16.to_le_bytes());

    let content = offset + 24;
    record[content + 64] = units.len() as u8;
    record[content + 65] = 1; // Win32 namespace
    for (i, unit) in units.iter().enumerate() {
        record[content + 66 + i * 2..content + 68 + i * 2].copy_from_slice(&unit.to_le_bytes());
    }
    offset + attr_len
}

fn write_resident_data_attr(record: &mut [u8], offset: usize, bytes: &[u8]) -> usize {
    let attr_len = align8(24 + bytes.len());
    record[offset..offset + 4].copy_from_slice(&0x80u32.to_le_bytes());
    record[offset + 4..offset + 8].copy_from_slice(&(attr_len as u32).to_le_bytes());
    record[offset + 16..offset + 20].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
    record[offset + 20..offset + 22].copy_from_slice(&24u16.to_le_bytes());
    record[offset + 24..offset + 24 + bytes.len()].copy_from_slice(bytes);
    offset + attr_len
}

fn write_non_resident_data_attr(
    record: &mut [u8],
    offset: usize,
    runs: &[u8],
    real_size: u64,
) -> usize {
    let attr_len = align8(64 + runs.len());
    record[offset..offset + 4].copy_from_slice(&0x80u32.to_le_bytes());
    record[offset + 4..offset + 8].copy_from_slice(&(attr_len as u32).to_le_bytes());
    record[offset + 8] = 1;
    record[offset + 32..offset + 34].copy_from_slice(&64u16.to_le_bytes());
    record[offset + 48..offset + 56].copy_from_slice(&real_size.to_le_bytes());
    record[offset + 64..offset + 64 + runs.len()].copy_from_slice(runs);
    offset + attr_len
}
