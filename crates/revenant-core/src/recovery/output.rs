//! Output naming and the file-info log.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Resolve a collision-free output path: `name`, then `name_1`, `name_2`, …
/// with the counter inserted before the extension.
pub fn resolve_output_path(folder: &Path, full_name: &str) -> PathBuf {
    let candidate = folder.join(full_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, extension) = match full_name.rfind('.').filter(|&p| p != 0) {
        Some(pos) => (&full_name[..pos], Some(&full_name[pos + 1..])),
        None => (full_name, None),
    };

    let mut counter = 1u32;
    loop {
        let next_name = match extension {
            Some(ext) if !ext.is_empty() => format!("{}_{}.{}", stem, counter, ext),
            _ => format!("{}_{}", stem, counter),
        };
        let path = folder.join(next_name);
        if !path.exists() {
            return path;
        }
        counter += 1;
    }
}

/// Plain-text log of discovered candidates, one line each:
/// `#<id> Filename: "<name>" (<size> bytes)`.
pub struct FileDataLog {
    writer: Option<BufWriter<File>>,
}

impl FileDataLog {
    /// Open the log under `<output>/<log_folder>/`, collision-resolved like
    /// any other output file. Disabled or failed logs degrade to a no-op;
    /// recovery itself is not affected.
    pub fn open(config: &Config) -> Self {
        if !config.create_file_data_log {
            return FileDataLog { writer: None };
        }

        let log_dir = config.log_dir();
        if let Err(e) = fs::create_dir_all(&log_dir) {
            tracing::warn!("could not create log directory {}: {}", log_dir.display(), e);
            return FileDataLog { writer: None };
        }

        let path = resolve_output_path(&log_dir, &config.log_file);
        match File::create(&path) {
            Ok(file) => {
                tracing::info!("file-info log at {}", path.display());
                FileDataLog {
                    writer: Some(BufWriter::new(file)),
                }
            }
            Err(e) => {
                tracing::warn!("could not open log file {}: {}", path.display(), e);
                FileDataLog { writer: None }
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn record(&mut self, file_id: u16, name: &str, size: u64) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writeln!(writer, "#{} Filename: \"{}\" ({} bytes)", file_id, name, size)
            {
                tracing::warn!("log write failed: {}", e);
                self.writer = None;
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}

impl Drop for FileDataLog {
    fn drop(&mut self) {
        self.flush();
    }
}
