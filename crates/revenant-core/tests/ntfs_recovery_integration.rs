//! End-to-end recovery from synthetic NTFS images.

mod common;

use common::ImageBuilder;
use revenant_core::{
    probe, Config, Engine, FileSystemType, RecoveryDriver, RecoveryError, VolumeReader,
};

fn config_for(dir: &std::path::Path, image: &std::path::Path) -> Config {
    let mut config = Config::new(image);
    config.output_folder = dir.join("Recovered");
    config.recover = true;
    config.analyze = true;
    config
}

/// Record 0 stands in for $MFT itself: in use, with a non-resident $DATA
/// whose real size bounds the record count for the scan.
fn add_mft_self_record(image: &mut ImageBuilder, record_count: u64) {
    image.add_mft_record(
        0,
        true,
        "$MFT",
        None,
        Some((&[0x21, 0x04, 0x04, 0x00], record_count * 1024)),
    );
}

#[test]
fn resident_data_recovers_verbatim() {
    let mut image = ImageBuilder::ntfs(512, 8, 4);
    add_mft_self_record(&mut image, 4);
    image.add_mft_record(1, false, "hello.txt", Some(b"hello"), None);

    let image_file = image.write_to_temp_file();
    let out_dir = tempfile::tempdir().unwrap();
    let config = config_for(out_dir.path(), image_file.path());

    let mut reader = VolumeReader::open(image_file.path()).unwrap();
    let fs_type = probe::probe(&mut reader).unwrap();
    assert_eq!(fs_type, FileSystemType::Ntfs);

    let mut engine = Engine::new(fs_type, &mut reader).unwrap();
    let candidates = engine.scan(&mut reader).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].display_name, "hello.txt");
    assert_eq!(candidates[0].size_bytes, 5);

    let mut driver = RecoveryDriver::new(&config);
    let report = driver.process_all(&mut engine, &mut reader, &candidates);

    assert_eq!(report.recovered, 1);
    let written =
        std::fs::read(report.outcomes[0].output_path.as_ref().unwrap()).unwrap();
    assert_eq!(written, b"hello");
}

#[test]
fn non_resident_run_recovers_up_to_the_run_length() {
    // 5 sectors per cluster, 512-byte sectors: 2560 bytes per cluster.
    // A single 5-cluster run holds 12800 bytes; the record claims 17000.
    let mut image = ImageBuilder::ntfs(512, 5, 4);
    add_mft_self_record(&mut image, 4);
    image.add_mft_record(
        1,
        false,
        "movie.mp4",
        None,
        Some((&[0x21, 0x05, 0x0A, 0x00], 17000)),
    );
    for lcn in 10..15u64 {
        image.fill_lcn(lcn, &vec![lcn as u8; 2560]);
    }

    let image_file = image.write_to_temp_file();
    let out_dir = tempfile::tempdir().unwrap();
    let config = config_for(out_dir.path(), image_file.path());

    let mut reader = VolumeReader::open(image_file.path()).unwrap();
    let mut engine = Engine::new(FileSystemType::Ntfs, &mut reader).unwrap();
    let candidates = engine.scan(&mut reader).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].size_bytes, 17000);

    let mut driver = RecoveryDriver::new(&config);
    let report = driver.process_all(&mut engine, &mut reader, &candidates);

    let outcome = &report.outcomes[0];
    // Recovery stops when the run is exhausted; the shortfall is corruption.
    assert_eq!(outcome.status.recovered_bytes, 12800);
    assert!(outcome.status.corrupted);

    let written = std::fs::read(outcome.output_path.as_ref().unwrap()).unwrap();
    assert_eq!(written.len(), 12800);
    assert_eq!(written[..2560], vec![10u8; 2560][..]);
    assert_eq!(written[4 * 2560..], vec![14u8; 2560][..]);
}

#[test]
fn in_use_records_never_surface() {
    let mut image = ImageBuilder::ntfs(512, 8, 4);
    add_mft_self_record(&mut image, 3);
    image.add_mft_record(1, true, "alive.txt", Some(b"live"), None);
    image.add_mft_record(2, false, "gone.txt", Some(b"gone"), None);

    let image_file = image.write_to_temp_file();
    let mut reader = VolumeReader::open(image_file.path()).unwrap();
    let mut engine = Engine::new(FileSystemType::Ntfs, &mut reader).unwrap();
    let candidates = engine.scan(&mut reader).unwrap();

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].display_name, "gone.txt");
}

#[test]
fn multi_extent_files_concatenate_their_runs() {
    let mut image = ImageBuilder::ntfs(512, 8, 4);
    add_mft_self_record(&mut image, 4);
    // Two runs: 2 clusters at LCN 0x30, then 1 cluster at LCN 0x40.
    image.add_mft_record(
        1,
        false,
        "frag.bin",
        None,
        Some((&[0x21, 0x02, 0x30, 0x21, 0x01, 0x10, 0x00], 3 * 4096)),
    );
    image.fill_lcn(0x30, &[0xA1; 4096]);
    image.fill_lcn(0x31, &[0xA2; 4096]);
    image.fill_lcn(0x40, &[0xA3; 4096]);

    let image_file = image.write_to_temp_file();
    let out_dir = tempfile::tempdir().unwrap();
    let config = config_for(out_dir.path(), image_file.path());

    let mut reader = VolumeReader::open(image_file.path()).unwrap();
    let mut engine = Engine::new(FileSystemType::Ntfs, &mut reader).unwrap();
    let candidates = engine.scan(&mut reader).unwrap();

    let mut driver = RecoveryDriver::new(&config);
    let report = driver.process_all(&mut engine, &mut reader, &candidates);

    let written =
        std::fs::read(report.outcomes[0].output_path.as_ref().unwrap()).unwrap();
    assert_eq!(written.len(), 3 * 4096);
    assert!(written[..4096].iter().all(|&b| b == 0xA1));
    assert!(written[4096..8192].iter().all(|&b| b == 0xA2));
    assert!(written[8192..].iter().all(|&b| b == 0xA3));
}

#[test]
fn sparse_extents_are_zero_filled_in_the_output() {
    let mut image = ImageBuilder::ntfs(512, 8, 4);
    add_mft_self_record(&mut image, 4);
    // One real cluster at LCN 0x30, one sparse cluster, one real cluster at
    // LCN 0x38 (offset +8 from the previous real run).
    image.add_mft_record(
        1,
        false,
        "sparse.bin",
        None,
        Some((&[0x21, 0x01, 0x30, 0x01, 0x01, 0x21, 0x01, 0x08, 0x00], 3 * 4096)),
    );
    image.fill_lcn(0x30, &[0xC1; 4096]);
    image.fill_lcn(0x38, &[0xC2; 4096]);

    let image_file = image.write_to_temp_file();
    let out_dir = tempfile::tempdir().unwrap();
    let config = config_for(out_dir.path(), image_file.path());

    let mut reader = VolumeReader::open(image_file.path()).unwrap();
    let mut engine = Engine::new(FileSystemType::Ntfs, &mut reader).unwrap();
    let candidates = engine.scan(&mut reader).unwrap();
    assert_eq!(candidates.len(), 1);

    let mut driver = RecoveryDriver::new(&config);
    let report = driver.process_all(&mut engine, &mut reader, &candidates);

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status.recovered_bytes, 3 * 4096);

    let written = std::fs::read(outcome.output_path.as_ref().unwrap()).unwrap();
    assert_eq!(written.len(), 3 * 4096);
    assert!(written[..4096].iter().all(|&b| b == 0xC1));
    assert!(written[4096..8192].iter().all(|&b| b == 0x00));
    assert!(written[8192..].iter().all(|&b| b == 0xC2));
}

#[test]
fn unknown_filesystems_are_rejected_at_probe_time() {
    let image = ImageBuilder::blank_unknown();
    let image_file = image.write_to_temp_file();

    let mut reader = VolumeReader::open(image_file.path()).unwrap();
    let err = probe::probe(&mut reader).unwrap_err();
    assert!(matches!(err, RecoveryError::UnsupportedFilesystem(_)));
}
