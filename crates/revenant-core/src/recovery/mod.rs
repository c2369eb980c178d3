//! The recovery driver.
//!
//! Per candidate: filter, name the output, reconstruct the allocation
//! chain, analyze it when asked, stream the bytes out. A candidate that
//! fails is reported and skipped; only boot-sector level failures abort
//! the run.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::analysis;
use crate::config::Config;
use crate::device::SectorReader;
use crate::error::RecoveryError;
use crate::fs::Engine;
use crate::history::AllocationHistory;
use crate::{CandidateFile, FileLocation, FileSystemType, RecoveryStatus};

pub mod output;

pub use output::{resolve_output_path, FileDataLog};

/// Per-file progress notification, forwarded to the caller's callback.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub file_id: u16,
    pub bytes_done: u64,
    pub bytes_total: u64,
}

impl ProgressEvent {
    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            return 100.0;
        }
        self.bytes_done as f64 / self.bytes_total as f64 * 100.0
    }
}

type ProgressFn = Box<dyn Fn(&ProgressEvent)>;

/// What happened to one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    pub file_id: u16,
    pub display_name: String,
    /// Written file, when recovery ran and succeeded.
    pub output_path: Option<PathBuf>,
    /// Candidate did not pass the size or target filter.
    pub skipped: bool,
    /// Per-file fatal error, when one occurred.
    pub error: Option<String>,
    pub status: RecoveryStatus,
}

/// Aggregate result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub fs_type: FileSystemType,
    pub total_candidates: usize,
    pub processed: usize,
    pub recovered: usize,
    pub failed: usize,
    pub total_bytes_recovered: u64,
    pub outcomes: Vec<FileOutcome>,
}

/// Drives probe results through analysis and emission.
///
/// The driver owns the allocation history; engines never see it.
pub struct RecoveryDriver<'cfg> {
    config: &'cfg Config,
    history: AllocationHistory,
    log: FileDataLog,
    progress: Option<ProgressFn>,
}

impl<'cfg> RecoveryDriver<'cfg> {
    pub fn new(config: &'cfg Config) -> Self {
        if config.recover {
            if let Err(e) = fs::create_dir_all(&config.output_folder) {
                tracing::warn!(
                    "could not create output directory {}: {}",
                    config.output_folder.display(),
                    e
                );
            }
        }

        RecoveryDriver {
            config,
            history: AllocationHistory::new(),
            log: FileDataLog::open(config),
            progress: None,
        }
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(&ProgressEvent) + 'static,
    {
        self.progress = Some(Box::new(callback));
    }

    pub fn log_is_open(&self) -> bool {
        self.log.is_open()
    }

    /// Write one log line per discovered candidate, in discovery order.
    pub fn log_candidates(&mut self, candidates: &[CandidateFile]) {
        for candidate in candidates {
            self.log
                .record(candidate.file_id, &candidate.display_name, candidate.size_bytes);
        }
        self.log.flush();
    }

    /// Process the given candidates in order and aggregate the outcomes.
    pub fn process_all(
        &mut self,
        engine: &mut Engine,
        reader: &mut dyn SectorReader,
        candidates: &[CandidateFile],
    ) -> RecoveryReport {
        let mut report = RecoveryReport {
            fs_type: engine.fs_type(),
            total_candidates: candidates.len(),
            processed: 0,
            recovered: 0,
            failed: 0,
            total_bytes_recovered: 0,
            outcomes: Vec::with_capacity(candidates.len()),
        };

        for candidate in candidates {
            let outcome = self.process_candidate(engine, reader, candidate);
            if !outcome.skipped {
                report.processed += 1;
            }
            if outcome.error.is_some() {
                report.failed += 1;
            } else if outcome.output_path.is_some() {
                report.recovered += 1;
                report.total_bytes_recovered += outcome.status.recovered_bytes;
            }
            report.outcomes.push(outcome);
        }

        self.log.flush();
        report
    }

    /// Validate, analyze and (when configured) emit one candidate.
    pub fn process_candidate(
        &mut self,
        engine: &mut Engine,
        reader: &mut dyn SectorReader,
        candidate: &CandidateFile,
    ) -> FileOutcome {
        let mut outcome = FileOutcome {
            file_id: candidate.file_id,
            display_name: candidate.display_name.clone(),
            output_path: None,
            skipped: false,
            error: None,
            status: RecoveryStatus::default(),
        };

        if candidate.size_bytes == 0
            || self
                .config
                .filtered_out(candidate.location.first_cluster(), candidate.size_bytes)
        {
            outcome.skipped = true;
            return outcome;
        }

        match self.run_pipeline(engine, reader, candidate, &mut outcome.status) {
            Ok(path) => outcome.output_path = path,
            Err(e) => {
                tracing::warn!(
                    "candidate #{} \"{}\" failed: {}",
                    candidate.file_id,
                    candidate.display_name,
                    e
                );
                outcome.error = Some(e.to_string());
            }
        }

        outcome
    }

    fn run_pipeline(
        &mut self,
        engine: &mut Engine,
        reader: &mut dyn SectorReader,
        candidate: &CandidateFile,
        status: &mut RecoveryStatus,
    ) -> Result<Option<PathBuf>, RecoveryError> {
        if matches!(engine, Engine::Fat32(_)) && candidate.size_bytes > u64::from(u32::MAX) {
            return Err(RecoveryError::Overflow(format!(
                "{} bytes cannot come from a FAT32 volume",
                candidate.size_bytes
            )));
        }

        let bytes_per_cluster = engine.bytes_per_cluster();
        status.expected_clusters = candidate.size_bytes.div_ceil(bytes_per_cluster);

        // Resident data never touches the allocation structures.
        if let FileLocation::NtfsResident { bytes } = &candidate.location {
            if self.config.analyze {
                status.invalid_name = analysis::is_file_name_corrupted(&candidate.display_name);
                status.aggregate();
            }
            if !self.config.recover {
                return Ok(None);
            }
            return self.emit_resident(candidate, bytes, status).map(Some);
        }

        let chain = self.build_chain(engine, reader, candidate, status);

        if self.config.analyze {
            self.analyze_chain(engine, reader, candidate, &chain, status);
        }

        if !self.config.recover {
            return Ok(None);
        }
        self.emit_chain(engine, reader, candidate, &chain, status)
            .map(Some)
    }

    /// Reconstruct the cluster chain for any non-resident location.
    ///
    /// A `None` slot is a sparse cluster: nothing on disk, one cluster of
    /// zeros in the output.
    fn build_chain(
        &mut self,
        engine: &mut Engine,
        reader: &mut dyn SectorReader,
        candidate: &CandidateFile,
        status: &mut RecoveryStatus,
    ) -> Vec<Option<u64>> {
        match &candidate.location {
            FileLocation::FatChain { first_cluster } => {
                let mut chain = Vec::new();
                let mut current = *first_cluster;
                while (chain.len() as u64) < status.expected_clusters
                    && engine.is_valid_cluster(u64::from(current))
                {
                    chain.push(Some(u64::from(current)));
                    current = match engine.next_cluster(reader, current) {
                        Some(next) if next != current => next,
                        // End of chain before the expected count: try the
                        // neighbouring cluster, deletion often leaves the
                        // data contiguous.
                        _ => current + 1,
                    };
                }
                chain
            }
            FileLocation::ExfatContiguous {
                first_cluster,
                length_clusters,
            } => {
                let len = (*length_clusters).min(status.expected_clusters);
                (0..len)
                    .map(|i| u64::from(*first_cluster) + i)
                    .filter(|&c| engine.is_valid_cluster(c))
                    .map(Some)
                    .collect()
            }
            FileLocation::NtfsNonResident { runs } => {
                let mut seen = HashSet::new();
                let mut chain = Vec::new();
                for run in runs {
                    match run.lcn {
                        Some(first) => {
                            for i in 0..run.length_clusters {
                                let lcn = first + i;
                                if engine.is_valid_cluster(lcn) && seen.insert(lcn) {
                                    chain.push(Some(lcn));
                                }
                            }
                        }
                        // Sparse extent: keep its length so later runs stay
                        // byte-aligned in the output.
                        None => chain.extend(std::iter::repeat(None).take(run.length_clusters as usize)),
                    }
                }
                chain
            }
            FileLocation::NtfsResident { .. } => Vec::new(),
        }
    }

    fn analyze_chain(
        &mut self,
        engine: &mut Engine,
        reader: &mut dyn SectorReader,
        candidate: &CandidateFile,
        chain: &[Option<u64>],
        status: &mut RecoveryStatus,
    ) {
        // Sparse slots hold no allocation; only real clusters are analyzed.
        let real: Vec<u64> = chain.iter().copied().flatten().collect();

        let mut seen = HashSet::new();
        for &cluster in &real {
            if !seen.insert(cluster) {
                status.overwritten = true;
                status.problematic_clusters.push(cluster);
            }
            if engine.is_cluster_in_use(reader, cluster) {
                status.overwritten = true;
                status.problematic_clusters.push(cluster);
            }
        }

        let overwrite = analysis::analyze_cluster_overwrites(
            &real,
            candidate.file_id,
            engine.bytes_per_cluster(),
            candidate.size_bytes,
            &mut self.history,
        );
        if overwrite.has_overwrite() {
            status.overwritten = true;
            for cluster in overwrite.overwritten_clusters {
                if !status.problematic_clusters.contains(&cluster) {
                    status.problematic_clusters.push(cluster);
                }
            }
        }

        status.invalid_name = analysis::is_file_name_corrupted(&candidate.display_name);

        if let Some(first) = candidate.location.first_cluster() {
            if !engine.is_valid_cluster(u64::from(first)) {
                status.corrupted = true;
            }
        }

        if candidate.extension_was_predicted {
            status.invalid_extension = true;
        }

        // The chain cannot deliver the recorded size.
        if (chain.len() as u64) < status.expected_clusters {
            status.corrupted = true;
        }

        analysis::analyze_cluster_pattern(&real, status);
        status.aggregate();
    }

    fn emit_resident(
        &mut self,
        candidate: &CandidateFile,
        bytes: &[u8],
        status: &mut RecoveryStatus,
    ) -> Result<PathBuf, RecoveryError> {
        let path = resolve_output_path(&self.config.output_folder, &candidate.display_name);
        let file = File::create(&path)
            .map_err(|e| RecoveryError::Write(format!("{}: {}", path.display(), e)))?;
        let mut writer = BufWriter::new(file);

        writer
            .write_all(bytes)
            .and_then(|_| writer.flush())
            .map_err(|e| RecoveryError::Write(format!("{}: {}", path.display(), e)))?;

        status.recovered_bytes = bytes.len() as u64;
        self.report_progress(candidate.file_id, status.recovered_bytes, status.recovered_bytes);
        Ok(path)
    }

    /// Stream the chain to the output file one sector at a time, clipping
    /// the final sector to the recorded size. Sparse slots are emitted as
    /// zeroed sectors.
    fn emit_chain(
        &mut self,
        engine: &mut Engine,
        reader: &mut dyn SectorReader,
        candidate: &CandidateFile,
        chain: &[Option<u64>],
        status: &mut RecoveryStatus,
    ) -> Result<PathBuf, RecoveryError> {
        let path = resolve_output_path(&self.config.output_folder, &candidate.display_name);
        let file = File::create(&path)
            .map_err(|e| RecoveryError::Write(format!("{}: {}", path.display(), e)))?;
        let mut writer = BufWriter::new(file);

        let bytes_per_sector = u64::from(engine.bytes_per_sector());
        let sectors_per_cluster = u64::from(engine.sectors_per_cluster());
        let size = candidate.size_bytes;
        let mut buf = vec![0u8; bytes_per_sector as usize];

        'chain: for &slot in chain {
            for i in 0..sectors_per_cluster {
                match slot {
                    Some(cluster) => {
                        let sector = engine.cluster_to_sector(cluster) + i;
                        if !reader.read_sector(sector, &mut buf) {
                            tracing::warn!("skipping unreadable sector {}", sector);
                            continue;
                        }
                    }
                    None => buf.fill(0),
                }

                let to_write = bytes_per_sector.min(size - status.recovered_bytes) as usize;
                writer
                    .write_all(&buf[..to_write])
                    .map_err(|e| RecoveryError::Write(format!("{}: {}", path.display(), e)))?;
                status.recovered_bytes += to_write as u64;
                self.report_progress(candidate.file_id, status.recovered_bytes, size);

                if status.recovered_bytes >= size {
                    status.recovered_clusters += 1;
                    break 'chain;
                }
            }
            status.recovered_clusters += 1;
        }

        writer
            .flush()
            .map_err(|e| RecoveryError::Write(format!("{}: {}", path.display(), e)))?;

        if self.config.analyze && status.recovered_bytes < size {
            status.corrupted = true;
        }

        Ok(path)
    }

    fn report_progress(&self, file_id: u16, done: u64, total: u64) {
        if let Some(callback) = &self.progress {
            callback(&ProgressEvent {
                file_id,
                bytes_done: done,
                bytes_total: total,
            });
        }
    }
}
