use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use recoverscan_core::block::{BlockReader, DirectReader};
use recoverscan_core::carver;
use recoverscan_core::coordinator::{CancellationToken, MountedVolumeScan, ScanCoordinator};
use recoverscan_core::session::SessionManager;
use recoverscan_core::trash::{StdDirectoryLister, StdFileOpener};
use recoverscan_core::{CameraProfile, FilesystemHint, RecoverableFile, ScanEvent, ScanSession};

#[derive(Parser, Debug)]
#[command(
    name = "recoverscan",
    version,
    about = "Recovers deleted images and videos from a device image or raw disk"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a device image or raw disk for recoverable images and videos
    Scan {
        /// Path to the device image or raw disk
        target: PathBuf,
        /// Filesystem hint; "other" skips the catalog phase and only carves
        #[arg(long, value_parser = ["fat32", "exfat", "ntfs", "apfs", "hfsplus", "other"], default_value = "other")]
        fs: String,
        /// Camera profile used for ambiguous TIFF/name promotion
        #[arg(long, value_parser = ["gopro", "canon", "sony", "dji", "generic"], default_value = "generic")]
        camera: String,
        /// Byte offset of the partition within `target`
        #[arg(long, default_value = "0")]
        partition_offset: u64,
        /// Skip the signature carver and only run the catalog phase
        #[arg(long)]
        catalog_only: bool,
        /// Directory to write recovered files into
        #[arg(long)]
        out: Option<PathBuf>,
        /// Save the scan as a resumable session afterward
        #[arg(long)]
        save: bool,
        /// Mounted volume root to walk for trashed files before the catalog
        /// scan (Phase A's mounted-file walk); omit to scan `target` as a
        /// raw device or image only
        #[arg(long)]
        mounted_root: Option<PathBuf>,
        /// Current user's home-trash directory, scanned in addition to the
        /// volume's own trash directories when `--mounted-root` is given
        #[arg(long)]
        home_trash: Option<PathBuf>,
    },
    /// Resume a saved session's carver sweep against the same target
    Resume {
        /// Session ID (full UUID or unambiguous prefix)
        session: String,
        /// Path to the device image or raw disk this session was scanning
        target: PathBuf,
        /// Directory to write recovered files into
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Manage saved scan sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    /// List all saved sessions
    List,
    /// Show details of one session
    Info { id: String },
    /// Delete one or more sessions
    Delete { ids: Vec<String> },
    /// Delete sessions older than the given number of days
    Cleanup {
        #[arg(long, default_value = "30")]
        days: u32,
    },
}

fn parse_fs_hint(value: &str) -> FilesystemHint {
    match value {
        "fat32" => FilesystemHint::Fat32,
        "exfat" => FilesystemHint::ExFat,
        "ntfs" => FilesystemHint::Ntfs,
        "apfs" => FilesystemHint::Apfs,
        "hfsplus" => FilesystemHint::HfsPlus,
        _ => FilesystemHint::Other,
    }
}

fn parse_camera_profile(value: &str) -> CameraProfile {
    match value {
        "gopro" => CameraProfile::GoPro,
        "canon" => CameraProfile::Canon,
        "sony" => CameraProfile::Sony,
        "dji" => CameraProfile::Dji,
        _ => CameraProfile::Generic,
    }
}

/// Drives a coordinator to completion on a background thread while the
/// caller drains its event stream on the current thread, updating a
/// progress bar and collecting discovered files.
fn drive_scan(
    mut coordinator: ScanCoordinator,
    rx: crossbeam_channel::Receiver<ScanEvent>,
    mut reader: DirectReader,
    fs_hint: FilesystemHint,
    camera_profile: CameraProfile,
    run_carver: bool,
    carve_start_offset: u64,
    mounted: Option<MountedVolumeScan>,
) -> Result<Vec<RecoverableFile>> {
    let handle = std::thread::spawn(move || {
        coordinator.run(
            &mut reader,
            fs_hint,
            camera_profile,
            run_carver,
            carve_start_offset,
            mounted,
        )
    });

    let bar = ProgressBar::new(1000);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {percent}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut found = Vec::new();
    for event in rx.iter() {
        match event {
            ScanEvent::FileFound(file) => {
                bar.set_message(format!("found {}.{}", file.display_name, file.extension));
                found.push(file);
            }
            ScanEvent::Progress(p) => bar.set_position((p as f64 * 1000.0) as u64),
            ScanEvent::Completed => break,
        }
    }
    bar.finish_and_clear();

    handle
        .join()
        .map_err(|_| anyhow!("scan thread panicked"))?
        .context("scan failed")?;

    Ok(found)
}

fn recover_to(out: &PathBuf, target: &PathBuf, files: &[RecoverableFile]) -> Result<()> {
    std::fs::create_dir_all(out)?;
    let mut reader = DirectReader::open(target)
        .with_context(|| format!("failed to reopen {}", target.display()))?;

    for file in files {
        match carver::extract(&mut reader, file) {
            Ok(bytes) => {
                let file_name = format!("{}.{}", file.display_name, file.extension);
                let dest = out.join(file_name);
                std::fs::write(&dest, &bytes)
                    .with_context(|| format!("failed to write {}", dest.display()))?;
            }
            Err(e) => {
                eprintln!("skipping {}: {e}", file.display_name);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Scan {
            target,
            fs,
            camera,
            partition_offset,
            catalog_only,
            out,
            save,
            mounted_root,
            home_trash,
        } => {
            let fs_hint = parse_fs_hint(&fs);
            let camera_profile = parse_camera_profile(&camera);

            let probe = DirectReader::open(&target)
                .with_context(|| format!("failed to open {}", target.display()))?;
            let declared_size = probe.size().unwrap_or(0);
            drop(probe);

            let mounted = mounted_root.map(|volume_root| MountedVolumeScan {
                volume_root,
                home_trash,
                lister: Box::new(StdDirectoryLister),
                opener: Box::new(StdFileOpener),
                snapshots: None,
            });

            let reader = DirectReader::open(&target)?;
            let (coordinator, rx) = ScanCoordinator::new(CancellationToken::new());
            let found = drive_scan(
                coordinator,
                rx,
                reader,
                fs_hint,
                camera_profile,
                !catalog_only,
                partition_offset,
                mounted,
            )?;

            println!("Scan complete: {} file(s) found", found.len());
            for file in &found {
                println!(
                    "  {}.{} ({} bytes, offset {})",
                    file.display_name, file.extension, file.size, file.offset
                );
            }

            if let Some(out_dir) = &out {
                recover_to(out_dir, &target, &found)?;
                println!("Recovered files written to {}", out_dir.display());
            }

            if save {
                let mut target_handle = recoverscan_core::Target::new(&target, fs_hint);
                target_handle.partition_offset = Some(partition_offset);
                target_handle.declared_size = Some(declared_size);

                let mut session = ScanSession::new(&target_handle, declared_size);
                session.last_scanned_offset = declared_size;
                session.discovered_files = found;

                let manager = SessionManager::new()?;
                manager.save(&session)?;
                println!("Session saved: {}", session.id);
            }
        }
        Commands::Resume {
            session,
            target,
            out,
        } => {
            let manager = SessionManager::new()?;
            let loaded = manager.load(&session)?;
            println!(
                "Resuming session {} ({} file(s) already found)",
                loaded.id,
                loaded.discovered_files.len()
            );

            let resume_offset = loaded.last_scanned_offset;
            let (mut coordinator, rx) = ScanCoordinator::new(CancellationToken::new());
            let resume_offset = coordinator.resume_from(loaded).max(resume_offset);

            let reader = DirectReader::open(&target)
                .with_context(|| format!("failed to open {}", target.display()))?;
            let found = drive_scan(
                coordinator,
                rx,
                reader,
                FilesystemHint::Other,
                CameraProfile::Generic,
                true,
                resume_offset,
                None,
            )?;

            println!("Resume complete: {} new file(s) found", found.len());
            if let Some(out_dir) = &out {
                recover_to(out_dir, &target, &found)?;
                println!("Recovered files written to {}", out_dir.display());
            }
        }
        Commands::Session { action } => {
            let manager = SessionManager::new()?;
            match action {
                SessionAction::List => {
                    let sessions = manager.list()?;
                    if sessions.is_empty() {
                        println!("No saved sessions");
                        return Ok(());
                    }
                    for s in sessions {
                        println!(
                            "{}  {}  {} file(s)  {}",
                            &s.id.to_string()[..8],
                            s.target_identity,
                            s.file_count,
                            s.created_at
                        );
                    }
                }
                SessionAction::Info { id } => {
                    let session = manager.load(&id)?;
                    println!("Session {}", session.id);
                    println!("  Target: {}", session.target_identity);
                    println!("  Created: {}", session.created_at);
                    println!("  Declared capacity: {} bytes", session.declared_capacity);
                    println!("  Last scanned offset: {}", session.last_scanned_offset);
                    println!("  Files found: {}", session.discovered_files.len());
                }
                SessionAction::Delete { ids } => {
                    for id in ids {
                        match manager.delete(&id) {
                            Ok(()) => println!("Deleted session {id}"),
                            Err(e) => eprintln!("Failed to delete {id}: {e}"),
                        }
                    }
                }
                SessionAction::Cleanup { days } => {
                    let removed = manager.cleanup(days)?;
                    println!("Removed {removed} session(s) older than {days} days");
                }
            }
        }
    }

    Ok(())
}
