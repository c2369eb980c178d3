//! NTFS deleted-record discovery.
//!
//! Every MFT record is visited once. Records whose in-use flag is clear
//! describe deleted files; their $FILE_NAME and $DATA attributes are enough
//! to rebuild the byte stream without touching any index structures.

use super::mft::{
    AttributeHeader, FileNameAttribute, MftRecordHeader, NonResidentHeader, ResidentHeader,
    ATTR_DATA, ATTR_END, ATTR_FILE_NAME, NAMESPACE_DOS,
};
use super::{runlist, NtfsBootSector};
use crate::device::SectorReader;
use crate::error::RecoveryError;
use crate::{CandidateFile, ClusterRun, FileLocation};

/// What one MFT record contributed before validation.
#[derive(Debug, Default)]
struct RecordFindings {
    name: Option<FileNameAttribute>,
    resident_bytes: Option<Vec<u8>>,
    runs: Vec<ClusterRun>,
    real_size: u64,
}

pub struct NtfsEngine {
    boot: NtfsBootSector,
}

impl NtfsEngine {
    pub fn new(reader: &mut dyn SectorReader) -> Result<Self, RecoveryError> {
        let mut sector0 = vec![0u8; reader.bytes_per_sector() as usize];
        if !reader.read_sector(0, &mut sector0) {
            return Err(RecoveryError::Parse(
                "failed to read NTFS boot sector".into(),
            ));
        }
        let boot = NtfsBootSector::parse(&sector0)
            .map_err(|e| RecoveryError::Parse(e.to_string()))?;

        tracing::info!(
            "NTFS: {} bytes/sector, {} sectors/cluster, MFT at cluster {}, {}-byte records",
            boot.bytes_per_sector,
            boot.sectors_per_cluster,
            boot.mft_cluster,
            boot.mft_record_size()
        );

        Ok(NtfsEngine { boot })
    }

    pub fn bytes_per_sector(&self) -> u32 {
        u32::from(self.boot.bytes_per_sector)
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        u32::from(self.boot.sectors_per_cluster)
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        self.boot.bytes_per_cluster()
    }

    pub fn cluster_to_sector(&self, lcn: u64) -> u64 {
        lcn * u64::from(self.boot.sectors_per_cluster)
    }

    pub fn total_clusters(&self) -> u64 {
        self.boot.total_clusters()
    }

    fn sectors_per_mft_record(&self) -> u64 {
        self.boot
            .mft_record_size()
            .div_ceil(u64::from(self.boot.bytes_per_sector))
    }

    fn read_mft_record(
        &self,
        reader: &mut dyn SectorReader,
        first_sector: u64,
        buf: &mut [u8],
    ) -> bool {
        let bytes_per_sector = self.boot.bytes_per_sector as usize;
        for (i, chunk) in buf.chunks_mut(bytes_per_sector).enumerate() {
            if !reader.read_sector(first_sector + i as u64, chunk) {
                tracing::warn!("failed to read MFT sector {}", first_sector + i as u64);
                return false;
            }
        }
        true
    }

    /// Number of MFT records, from the reader when it knows, otherwise from
    /// the length of the MFT's own $DATA stream in record 0.
    fn total_mft_records(&self, reader: &mut dyn SectorReader) -> u64 {
        let from_reader = reader.total_mft_records();
        if from_reader > 0 {
            return from_reader;
        }

        let record_size = self.boot.mft_record_size();
        let mut record = vec![0u8; record_size as usize];
        let mft_sector = self.cluster_to_sector(self.boot.mft_cluster);
        if !self.read_mft_record(reader, mft_sector, &mut record) {
            return 0;
        }

        let findings = match self.decode_record(&record) {
            Some(findings) => findings,
            None => return 0,
        };
        if findings.real_size == 0 {
            return 0;
        }
        findings.real_size / record_size
    }

    /// Scan every MFT record for deleted files.
    pub fn scan(
        &mut self,
        reader: &mut dyn SectorReader,
    ) -> Result<Vec<CandidateFile>, RecoveryError> {
        let record_size = self.boot.mft_record_size();
        let sectors_per_record = self.sectors_per_mft_record();
        let mft_sector = self.cluster_to_sector(self.boot.mft_cluster);

        if mft_sector >= self.boot.total_sectors {
            return Err(RecoveryError::Parse(format!(
                "MFT start sector {} lies past the volume end",
                mft_sector
            )));
        }

        let total_records = self.total_mft_records(reader);
        let known_count = total_records > 0;
        // Without a record count the scan stops at the first record that no
        // longer carries the FILE signature.
        let upper_bound = if known_count {
            total_records
        } else {
            (self.boot.total_sectors - mft_sector) / sectors_per_record
        };

        tracing::info!(
            "NTFS scan over {} MFT records{}",
            upper_bound,
            if known_count { "" } else { " (upper bound)" }
        );

        let mut candidates = Vec::new();
        let mut next_id: u16 = 1;
        let mut record = vec![0u8; record_size as usize];

        for index in 0..upper_bound {
            let first_sector = mft_sector + index * sectors_per_record;
            if !self.read_mft_record(reader, first_sector, &mut record) {
                continue;
            }

            let Ok(header) = MftRecordHeader::parse(&record) else {
                continue;
            };
            if !header.is_file_record() {
                if known_count {
                    continue;
                }
                break;
            }
            if header.is_in_use() {
                continue;
            }

            let Some(findings) = self.decode_record(&record) else {
                continue;
            };
            self.emit_candidate(findings, &mut next_id, &mut candidates);
        }

        tracing::info!("NTFS scan found {} deleted records", candidates.len());
        Ok(candidates)
    }

    /// Walk the attribute list of one record and collect $FILE_NAME and
    /// $DATA contributions.
    fn decode_record(&self, record: &[u8]) -> Option<RecordFindings> {
        let header = MftRecordHeader::parse(record).ok()?;
        if !header.is_file_record() {
            return None;
        }

        let record_size = record.len();
        let mut findings = RecordFindings::default();
        let mut offset = header.first_attribute_offset as usize;

        while offset + 16 <= record_size {
            let Ok(attr) = AttributeHeader::parse(&record[offset..]) else {
                break;
            };
            if attr.attr_type == ATTR_END {
                break;
            }
            let length = attr.length as usize;
            if length == 0 || offset + length > record_size {
                break;
            }
            let attr_data = &record[offset..offset + length];

            match attr.attr_type {
                ATTR_FILE_NAME => self.decode_file_name(attr_data, &attr, &mut findings),
                ATTR_DATA => self.decode_data(attr_data, &attr, &mut findings),
                _ => {}
            }

            offset += length;
        }

        Some(findings)
    }

    fn decode_file_name(
        &self,
        attr_data: &[u8],
        attr: &AttributeHeader,
        findings: &mut RecordFindings,
    ) {
        // $FILE_NAME is always resident.
        if attr.non_resident {
            return;
        }
        let Ok(resident) = ResidentHeader::parse(attr_data) else {
            return;
        };
        let start = resident.content_offset as usize;
        let end = start + resident.content_length as usize;
        if end > attr_data.len() {
            return;
        }
        let Ok(parsed) = FileNameAttribute::parse(&attr_data[start..end]) else {
            return;
        };

        // Records usually carry a DOS (8.3) name next to the long one;
        // keep the long form when both are present.
        let replace = match &findings.name {
            None => true,
            Some(existing) => existing.namespace == NAMESPACE_DOS && parsed.namespace != NAMESPACE_DOS,
        };
        if replace {
            findings.name = Some(parsed);
        }
    }

    fn decode_data(
        &self,
        attr_data: &[u8],
        attr: &AttributeHeader,
        findings: &mut RecordFindings,
    ) {
        if attr.non_resident {
            let Ok(non_resident) = NonResidentHeader::parse(attr_data) else {
                return;
            };
            let run_offset = non_resident.data_run_offset as usize;
            if run_offset >= attr_data.len() {
                return;
            }
            findings.runs =
                runlist::decode_data_runs(&attr_data[run_offset..], self.total_clusters());
            findings.real_size = non_resident.real_size;
        } else {
            let Ok(resident) = ResidentHeader::parse(attr_data) else {
                return;
            };
            let start = resident.content_offset as usize;
            let end = start + resident.content_length as usize;
            if end > attr_data.len() {
                return;
            }
            findings.resident_bytes = Some(attr_data[start..end].to_vec());
            findings.real_size = u64::from(resident.content_length);
        }
    }

    fn emit_candidate(
        &self,
        findings: RecordFindings,
        next_id: &mut u16,
        candidates: &mut Vec<CandidateFile>,
    ) {
        let Some(name) = findings.name else {
            return;
        };
        if name.name.is_empty() || findings.real_size == 0 {
            return;
        }

        let location = if let Some(bytes) = findings.resident_bytes {
            if bytes.is_empty() {
                return;
            }
            FileLocation::NtfsResident { bytes }
        } else {
            // An all-sparse run list references no cluster on disk.
            if !findings.runs.iter().any(|r| r.lcn.is_some()) {
                return;
            }
            FileLocation::NtfsNonResident {
                runs: findings.runs,
            }
        };

        tracing::debug!(
            "NTFS deleted record #{} \"{}\" ({} bytes)",
            *next_id,
            name.name,
            findings.real_size
        );

        candidates.push(CandidateFile {
            file_id: *next_id,
            display_name: name.name,
            size_bytes: findings.real_size,
            location,
            extension_was_predicted: false,
        });
        *next_id = next_id.saturating_add(1);
    }
}
