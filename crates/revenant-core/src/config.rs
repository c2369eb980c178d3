use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Immutable run configuration, built once after argument parsing and
/// threaded through the engines and the driver by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source volume: a block device node or a volume image file.
    pub drive_path: PathBuf,
    /// Directory that receives recovered files. Must live on a different
    /// volume than `drive_path`.
    pub output_folder: PathBuf,
    /// Log subdirectory under `output_folder`.
    pub log_folder: PathBuf,
    /// Name of the file-info log inside the log subdirectory.
    pub log_file: String,
    /// Restrict recovery to the candidate with this starting cluster.
    /// Only applied together with `target_file_size`.
    pub target_cluster: Option<u32>,
    /// Restrict recovery to candidates of exactly this size.
    pub target_file_size: Option<u64>,
    /// Write the per-candidate file-info log.
    pub create_file_data_log: bool,
    /// Write reconstructed files to the output directory.
    pub recover: bool,
    /// Run allocation-chain corruption analysis.
    pub analyze: bool,
}

impl Config {
    pub fn new(drive_path: impl Into<PathBuf>) -> Self {
        Config {
            drive_path: drive_path.into(),
            output_folder: PathBuf::from("Recovered"),
            log_folder: PathBuf::from("Log"),
            log_file: "FileDataLog.txt".to_string(),
            target_cluster: None,
            target_file_size: None,
            create_file_data_log: true,
            recover: false,
            analyze: false,
        }
    }

    /// Full path of the log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.output_folder.join(&self.log_folder)
    }

    /// Whether a (cluster, size) target filter is configured.
    pub fn has_target_filter(&self) -> bool {
        self.target_cluster.is_some() && self.target_file_size.is_some()
    }

    /// True when the target filter is set and does not match the candidate.
    pub fn filtered_out(&self, first_cluster: Option<u32>, size: u64) -> bool {
        match (self.target_cluster, self.target_file_size) {
            (Some(cluster), Some(target_size)) => {
                first_cluster != Some(cluster) || size != target_size
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_layout() {
        let config = Config::new("/dev/sdb1");
        assert_eq!(config.output_folder, PathBuf::from("Recovered"));
        assert_eq!(config.log_dir(), PathBuf::from("Recovered/Log"));
        assert_eq!(config.log_file, "FileDataLog.txt");
        assert!(config.create_file_data_log);
        assert!(!config.recover);
        assert!(!config.analyze);
    }

    #[test]
    fn target_filter_requires_both_fields() {
        let mut config = Config::new("/dev/sdb1");
        assert!(!config.has_target_filter());
        assert!(!config.filtered_out(Some(10), 100));

        config.target_cluster = Some(10);
        assert!(!config.has_target_filter());

        config.target_file_size = Some(100);
        assert!(config.has_target_filter());
        assert!(!config.filtered_out(Some(10), 100));
        assert!(config.filtered_out(Some(11), 100));
        assert!(config.filtered_out(Some(10), 99));
        assert!(config.filtered_out(None, 100));
    }
}
