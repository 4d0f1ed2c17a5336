//! Setup/initialization module - handles application startup tasks
//!
//! Includes:
//! - Worker program availability check
//! - Folder structure initialization
//! - Logger initialization
//! - Stale upload and partial record cleanup

use crate::{common::TEMP_RECORD_EXTENSION, config::AppConfig};
use anyhow::{Context, Result};
use env_logger::Builder;
use env_logger::fmt::style::{AnsiColor, Style};
use log::kv::Key;
use log::{error, info, warn};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

// ────────────────────────────────────────────────────────────────
// Worker Check
// ────────────────────────────────────────────────────────────────

/// Resolve `program` the way the OS would: paths are taken as-is, bare names
/// are searched in PATH.
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let search_path = std::env::var_os("PATH")?;
    std::env::split_paths(&search_path)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

/// Log whether the configured worker programs can be found. A missing worker
/// does not stop the server; batches fail with a launch error instead.
pub fn check_worker_programs(config: &AppConfig) {
    for (role, program) in [
        ("file worker", &config.file_worker_program),
        ("enrichment worker", &config.enrichment_worker_program),
    ] {
        match find_program(program) {
            Some(path) => info!("{} program: {}", role, path.display()),
            None => error!(
                "`{}` ({}) is not installed or not available in PATH. Uploads will fail until it is.",
                program, role
            ),
        }
    }
}

// ────────────────────────────────────────────────────────────────
// Folder Initialization
// ────────────────────────────────────────────────────────────────

/// Create required folder structure for the application
pub fn initialize_folder(config: &AppConfig) -> Result<()> {
    for dir in [&config.upload_dir, &config.derived_dir, &config.records_dir] {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────
// Stale File Cleanup
// ────────────────────────────────────────────────────────────────

/// Remove uploads left behind by a previous run and partially written records.
/// Returns how many files were removed.
pub fn sweep_stale_files(config: &AppConfig) -> usize {
    let mut removed = 0;

    for entry in WalkDir::new(&config.upload_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
    {
        removed += remove_stale(entry.path()) as usize;
    }

    for entry in WalkDir::new(&config.records_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_partial_record(entry.path()))
    {
        removed += remove_stale(entry.path()) as usize;
    }

    if removed > 0 {
        info!("Cleared {} stale file(s) from a previous run", removed);
    }
    removed
}

fn is_partial_record(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'));
    hidden && path.extension().and_then(|ext| ext.to_str()) == Some(TEMP_RECORD_EXTENSION)
}

fn remove_stale(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) => {
            warn!("Fail to delete stale file {}: {}", path.display(), err);
            false
        }
    }
}

// ────────────────────────────────────────────────────────────────
// Logger Initialization
// ────────────────────────────────────────────────────────────────

/// Install the global logger. `RUST_LOG` overrides the default filters.
pub fn initialize_logger() {
    Builder::new()
        .format(|buf, record| {
            let dim = Style::new().dimmed();
            let cyan = Style::new().fg_color(Some(AnsiColor::Cyan.into()));

            let ts = buf.timestamp();
            let level_style = buf.default_level_style(record.level());

            // Extract raw duration and format to 2 decimal places
            let dur_raw = record
                .key_values()
                .get(Key::from("duration"))
                .map(|v| {
                    let s = format!("{}", v);
                    if let Some(idx) = s.find(|c: char| c.is_alphabetic()) {
                        let (num, unit) = (&s[..idx], &s[idx..]);
                        if let Ok(val) = num.parse::<f32>() {
                            return format!("{:.2} {}", val, unit);
                        }
                    }
                    s
                })
                .unwrap_or_default();

            let dur = if dur_raw.is_empty() {
                " ".repeat(10)
            } else {
                format!(
                    "{}{:>10}{}",
                    cyan.render(),
                    dur_raw,
                    cyan.render_reset()
                )
            };

            writeln!(
                buf,
                "{}{}{} {}{}{} {}{}{}",
                dim.render(),
                ts,
                dim.render_reset(),
                level_style.render(),
                record.level(),
                level_style.render_reset(),
                dim.render(),
                record.target(),
                dim.render_reset()
            )?;

            let message = format!("{}", record.args());
            let subsequent_indent = " ".repeat(11);
            let mut lines = message.lines();

            if let Some(first_line) = lines.next() {
                writeln!(buf, "{} {}", dur, first_line)?;
            }
            for line in lines {
                writeln!(buf, "{}{}", subsequent_indent, line)?;
            }

            Ok(())
        })
        // Only show INFO+ globally, WARN+ for Rocket
        .filter(None, log::LevelFilter::Info)
        .filter(Some("rocket"), log::LevelFilter::Warn)
        .parse_default_env()
        .init();
}

pub fn initialize(config: &AppConfig) -> Result<()> {
    check_worker_programs(config);
    initialize_folder(config)?;
    sweep_stale_files(config);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(root: &TempDir) -> AppConfig {
        AppConfig {
            upload_dir: root.path().join("uploads"),
            derived_dir: root.path().join("public/results/images"),
            records_dir: root.path().join("results"),
            ..AppConfig::default()
        }
    }

    #[test]
    fn initialize_folder_creates_every_directory() {
        let root = TempDir::new().unwrap();
        let config = config_in(&root);
        initialize_folder(&config).unwrap();
        initialize_folder(&config).unwrap();

        assert!(config.upload_dir.is_dir());
        assert!(config.derived_dir.is_dir());
        assert!(config.records_dir.is_dir());
    }

    #[test]
    fn sweep_removes_uploads_and_partial_records_only() {
        let root = TempDir::new().unwrap();
        let config = config_in(&root);
        initialize_folder(&config).unwrap();

        fs::write(config.upload_dir.join("a.upload"), b"x").unwrap();
        fs::write(config.upload_dir.join("b.upload"), b"y").unwrap();
        fs::write(config.records_dir.join(".batch.1234.tmp"), b"{").unwrap();
        fs::write(config.records_dir.join("batch.json"), b"{}").unwrap();
        fs::write(config.derived_dir.join("keep.jpg"), b"z").unwrap();

        assert_eq!(sweep_stale_files(&config), 3);
        assert_eq!(fs::read_dir(&config.upload_dir).unwrap().count(), 0);
        assert!(config.records_dir.join("batch.json").exists());
        assert!(!config.records_dir.join(".batch.1234.tmp").exists());
        assert!(config.derived_dir.join("keep.jpg").exists());
    }

    #[test]
    fn sweep_tolerates_missing_directories() {
        let root = TempDir::new().unwrap();
        assert_eq!(sweep_stale_files(&config_in(&root)), 0);
    }

    #[test]
    fn find_program_handles_paths_and_names() {
        assert!(find_program("phototrail-no-such-worker").is_none());
        assert!(find_program("/definitely/not/here/python3").is_none());
        #[cfg(unix)]
        assert!(find_program("sh").is_some());
    }
}
