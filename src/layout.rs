//! Channel file layout.
//!
//! Directory shape is fixed: `<root>/<base_name>/<schema_version>/` holds
//! the `channelsVersions` beacon and one `rec_<random>` file per live
//! producer thread. Publication is atomic-create-then-rename: a producer
//! never lets the consumer observe a file mid-initialization.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::LayoutError;

/// Creates `<root>/<base_name>/<schema_version>/` if it does not already
/// exist, with world-writable permissions.
///
/// Idempotent: an already-existing directory is not an error.
pub fn ensure_schema_dir(root: &Path, base_name: &str, schema_version: &str) -> Result<PathBuf, LayoutError> {
    let base_dir = root.join(base_name);
    let schema_dir = base_dir.join(schema_version);

    create_world_writable_dir(&base_dir)?;
    create_world_writable_dir(&schema_dir)?;

    Ok(schema_dir)
}

fn create_world_writable_dir(path: &Path) -> Result<(), LayoutError> {
    match fs::create_dir(path) {
        Ok(()) => {
            // best-effort: dir may be created by a racing sibling thread
            // between `create_dir` and this chmod; that race is benign,
            // both sides want the same permission bits.
            let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o777));
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(LayoutError::create_dir(path.display().to_string(), e)),
    }
}

/// Creates a uniquely-named `tmp_XXXXXX` file inside `schema_dir`,
/// truncated to exactly `size` bytes and world-readable/writable
///.
///
/// Returns the opened file and its path. The file is left at `tmp_*`;
/// callers map it, initialize it, then call [`publish`] to rename it
/// into its final `rec_*` name.
pub fn create_tmp_file(schema_dir: &Path, size: usize) -> Result<(File, PathBuf), LayoutError> {
    create_named_file(schema_dir, "tmp_", size)
}

fn create_named_file(schema_dir: &Path, prefix: &str, size: usize) -> Result<(File, PathBuf), LayoutError> {
    const MAX_ATTEMPTS: u32 = 64;

    for _ in 0..MAX_ATTEMPTS {
        let path = schema_dir.join(format!("{prefix}{:016x}", random_suffix()));
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o666)
            .open(&path)
        {
            Ok(file) => {
                file.set_len(size as u64)
                    .map_err(|e| LayoutError::truncate(path.display().to_string(), size, e))?;
                return Ok((file, path));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(LayoutError::create_file(path.display().to_string(), e)),
        }
    }

    Err(LayoutError::create_file(
        schema_dir.display().to_string(),
        std::io::Error::new(std::io::ErrorKind::AlreadyExists, "exhausted unique-name attempts"),
    ))
}

fn random_suffix() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    // A fresh `RandomState` draws fresh per-process keying material from
    // the OS on construction; hashing a thread-local counter through it
    // gives a cheap, dependency-free source of unpredictable suffixes
    // without reaching for an RNG crate just for file-name uniqueness.
    thread_local! {
        static COUNTER: std::cell::Cell<u64> = const { std::cell::Cell::new(0) };
    }
    let counter = COUNTER.with(|c| {
        let v = c.get().wrapping_add(1);
        c.set(v);
        v
    });
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(counter);
    hasher.write_u64(std::process::id() as u64);
    hasher.finish()
}

/// Publishes a fully-initialized `tmp_*` file by renaming it to its
/// final `rec_*` name.
pub fn publish(tmp_path: &Path) -> Result<PathBuf, LayoutError> {
    let file_name = tmp_path
        .file_name()
        .and_then(|n| n.to_str())
        .expect("tmp path always has a UTF-8 file name, created by create_tmp_file");
    let rec_name = file_name.replacen("tmp_", "rec_", 1);
    let rec_path = tmp_path.with_file_name(rec_name);

    fs::rename(tmp_path, &rec_path).map_err(|e| {
        LayoutError::rename(tmp_path.display().to_string(), rec_path.display().to_string(), e)
    })?;

    debug!("published channel file {}", rec_path.display());
    Ok(rec_path)
}

/// Lists every `rec_*` entry currently in `schema_dir`.
pub fn list_channel_files(schema_dir: &Path) -> Result<Vec<PathBuf>, LayoutError> {
    let entries = fs::read_dir(schema_dir)
        .map_err(|e| LayoutError::create_dir(schema_dir.display().to_string(), e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| LayoutError::create_dir(schema_dir.display().to_string(), e))?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with("rec_") {
            files.push(entry.path());
        }
    }
    Ok(files)
}
