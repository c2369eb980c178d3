use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;

use revenant_core::{
    probe, CandidateFile, Config, Engine, FileOutcome, RecoveryDriver, SectorReader, VolumeReader,
};

const DIVIDER_WIDTH: usize = 60;

#[derive(Parser, Debug)]
#[command(
    name = "revenant",
    version,
    about = "Offline deleted-file recovery for FAT32, exFAT and NTFS volumes"
)]
struct Cli {
    /// Source volume: a block device node or a volume image file
    #[arg(short = 'd', long = "drive")]
    drive: PathBuf,

    /// Write reconstructed files to the output directory
    #[arg(short = 'r', long = "recover")]
    recover: bool,

    /// Analyze cluster chains for corruption (time-consuming)
    #[arg(short = 'a', long = "analyze")]
    analyze: bool,

    /// Disable logging found files and their location
    #[arg(short = 'l', long = "no-log")]
    no_log: bool,

    /// Output directory for recovered files; must live on another volume
    #[arg(short = 'o', long = "output", default_value = "Recovered")]
    output: PathBuf,

    /// Only process the candidate starting at this cluster
    /// (requires --target-size)
    #[arg(long = "target-cluster", requires = "target_size")]
    target_cluster: Option<u32>,

    /// Only process candidates of exactly this many bytes
    /// (requires --target-cluster)
    #[arg(long = "target-size", requires = "target_cluster")]
    target_size: Option<u64>,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut config = Config::new(self.drive);
        config.output_folder = self.output;
        config.recover = self.recover;
        config.analyze = self.analyze;
        config.create_file_data_log = !self.no_log;
        config.target_cluster = self.target_cluster;
        config.target_file_size = self.target_size;
        config
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    // Help and version go to stdout and exit 0; any argument error prints
    // usage and exits 1.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };
    let config = cli.into_config();

    if let Err(e) = run(&config) {
        eprintln!("[-] Error: {}", e);
        process::exit(1);
    }
}

fn run(config: &Config) -> Result<()> {
    print_config(config);

    let mut reader = VolumeReader::open(&config.drive_path)?;
    let fs_type = probe::probe(&mut reader)?;

    if let Ok(info) = probe::filesystem_info(&mut reader, fs_type) {
        println!("{}\n", info);
    }

    let mut engine = Engine::new(fs_type, &mut reader)?;

    print_header("File Search:");
    let candidates = engine.scan(&mut reader)?;
    for candidate in &candidates {
        println!(
            "[+] #{} Found file \"{}\" ({} bytes)",
            candidate.file_id, candidate.display_name, candidate.size_bytes
        );
    }
    if candidates.is_empty() {
        eprintln!("[-] No deleted files found");
    }
    print_footer();

    let mut driver = RecoveryDriver::new(config);
    if config.create_file_data_log && !driver.log_is_open() {
        eprintln!("[!] Couldn't open log file; continuing without it.");
    }
    driver.log_candidates(&candidates);

    if candidates.is_empty() {
        return Ok(());
    }
    if !config.recover && !config.analyze {
        println!("[!] Recovery or analysis is disabled. Use --recover and/or --analyze to proceed.");
        return Ok(());
    }

    let selected = if config.has_target_filter() || !io::stdin().is_terminal() {
        candidates
    } else {
        select_files_to_process(candidates)
    };

    driver.set_progress_callback(|event| {
        print!("\r[*] Progress: {:5.2}%", event.percent());
        let _ = io::stdout().flush();
    });

    print_header("File Recovery and Analysis:");
    let mut recovered = 0usize;
    let mut failed = 0usize;

    for (index, candidate) in selected.iter().enumerate() {
        println!(
            "[*] Current file: \"{}\" ({} bytes)",
            candidate.display_name, candidate.size_bytes
        );

        let outcome = driver.process_candidate(&mut engine, &mut reader, candidate);
        if outcome.skipped {
            println!("  [!] Skipped");
        } else {
            if config.analyze {
                show_analysis_result(&outcome);
            }
            if config.recover {
                show_recovery_result(&outcome, candidate);
            }
            match (&outcome.error, &outcome.output_path) {
                (Some(_), _) => failed += 1,
                (None, Some(_)) => recovered += 1,
                (None, None) => {}
            }
        }

        if index + 1 < selected.len() {
            print_item_divider();
        }
    }
    print_footer();

    if config.recover {
        println!(
            "[*] Recovery finished: {} recovered, {} failed, {} processed",
            recovered,
            failed,
            selected.len()
        );
    }

    reader.close();
    Ok(())
}

fn print_config(config: &Config) {
    let line = "_".repeat(DIVIDER_WIDTH);
    println!("{}\n", line);
    println!("Configuration Details:");
    println!("{}\n", line);
    println!("  Drive Path             | {}", config.drive_path.display());
    println!(
        "  Output Folder          | {}",
        config.output_folder.display()
    );
    println!(
        "  Target Cluster         | {}",
        config
            .target_cluster
            .map_or("Not specified".to_string(), |c| c.to_string())
    );
    println!(
        "  Target File Size       | {}",
        config
            .target_file_size
            .map_or("Not specified".to_string(), |s| s.to_string())
    );
    println!(
        "  Create File Data Log   | {}",
        if config.create_file_data_log { "Yes" } else { "No" }
    );
    println!(
        "  Recover Files          | {}",
        if config.recover { "Yes" } else { "No" }
    );
    println!(
        "  Analyze Files          | {}",
        if config.analyze { "Yes" } else { "No" }
    );
    println!("{}\n", line);
}

/// Ask whether to process everything or a comma-separated id selection.
fn select_files_to_process(candidates: Vec<CandidateFile>) -> Vec<CandidateFile> {
    println!("Options:");
    println!("  1. Process all files");
    println!("  2. Choose specific file(s) to process");
    println!("  0. Exit without processing");

    let stdin = io::stdin();
    loop {
        print!("\nEnter your option: ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() {
            return candidates;
        }

        match line.trim() {
            "0" => process::exit(0),
            "1" => return candidates,
            "2" => {
                print!("\nEnter file IDs to recover (e.g., 1,2,3): ");
                let _ = io::stdout().flush();

                let mut ids_line = String::new();
                if stdin.lock().read_line(&mut ids_line).is_err() {
                    return candidates;
                }

                let ids: Vec<u16> = ids_line
                    .trim()
                    .split(',')
                    .filter_map(|part| part.trim().parse().ok())
                    .collect();
                if ids.is_empty() {
                    eprintln!("Invalid input. Please enter numeric IDs.");
                    continue;
                }

                return candidates
                    .into_iter()
                    .filter(|c| ids.contains(&c.file_id))
                    .collect();
            }
            _ => eprintln!("Incorrect value"),
        }
    }
}

fn show_analysis_result(outcome: &FileOutcome) {
    let status = &outcome.status;
    if !status.corrupted {
        println!("  [+] No signs of corruption found");
        return;
    }

    println!("  [-] Warning: File appears to be corrupted");
    if status.invalid_name {
        println!("  [-] Filename is corrupted or invalid");
    }
    if status.invalid_extension {
        println!("  [-] File extension was either missing or contained invalid characters");
    }
    if status.overwritten {
        println!("  [-] Some clusters may have been overwritten");
        if !status.problematic_clusters.is_empty() {
            let clusters: Vec<String> = status
                .problematic_clusters
                .iter()
                .map(|c| format!("0x{:x}", c))
                .collect();
            println!("  [-] Problematic clusters: {}", clusters.join(" "));
        }
    }
    if status.fragmented {
        println!("  [-] Some clusters are fragmented");
        println!(
            "      - Fragmentation score: {:.2}",
            status.fragmentation_score
        );
    }
    if status.has_repeated_clusters {
        println!("  [-] Repeated clusters found: {}", status.repeated_clusters);
    }
    if status.has_back_jumps {
        println!("  [-] Backward jumps detected: {}", status.back_jumps);
    }
    if status.has_large_gaps {
        println!("  [-] Large gaps detected: {}", status.large_gaps);
    }
}

fn show_recovery_result(outcome: &FileOutcome, candidate: &CandidateFile) {
    let status = &outcome.status;
    println!(
        "\n  [*] Clusters recovered: {} / {}",
        status.recovered_clusters, status.expected_clusters
    );
    println!(
        "  [*] Bytes recovered: {} / {}",
        status.recovered_bytes, candidate.size_bytes
    );
    match (&outcome.output_path, &outcome.error) {
        (Some(path), _) => println!("  [+] File saved to {}", path.display()),
        (None, Some(error)) => println!("  [-] Failed to save file: {}", error),
        (None, None) => {}
    }
}

fn print_header(stage: &str) {
    println!("{}", stage);
    println!("{}\n", "_".repeat(DIVIDER_WIDTH));
}

fn print_footer() {
    println!("{}\n", "_".repeat(DIVIDER_WIDTH));
}

fn print_item_divider() {
    println!("{}", "-".repeat(DIVIDER_WIDTH));
}
