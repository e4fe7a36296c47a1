use crate::error::AppError;
use crate::safety::{validate_not_protected, validate_path};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
const CROSS_DEVICE_ERROR: i32 = 18; // EXDEV
#[cfg(windows)]
const CROSS_DEVICE_ERROR: i32 = 17; // ERROR_NOT_SAME_DEVICE

const MAX_NAME_PROBES: usize = 10_000;

fn as_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Creates `path` one level at a time and returns every directory that did
/// not exist before, outermost first.
pub fn create_dir_tracked(path: &Path) -> Result<Vec<PathBuf>, AppError> {
    let display = as_str(path);
    validate_path(&display)?;
    validate_not_protected(&display)?;

    let missing: Vec<&Path> = path
        .ancestors()
        .take_while(|ancestor| !ancestor.as_os_str().is_empty() && !ancestor.exists())
        .collect();

    let mut created = Vec::with_capacity(missing.len());
    for dir in missing.into_iter().rev() {
        match fs::create_dir(dir) {
            Ok(()) => created.push(dir.to_path_buf()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(created)
}

/// Lower-cased form used to compare destinations on case-insensitive volumes.
pub fn destination_key(path: &Path) -> String {
    crate::scope_path::normalize(&path.to_string_lossy()).to_lowercase()
}

/// First free name in `dir` for `file_name`: `name.ext`, `name (1).ext`, ...
///
/// A candidate is taken when nothing exists there and it is not in
/// `reserved`. `source` counts as free so a file already in place maps onto
/// itself. Never touches the filesystem beyond existence checks.
pub fn available_destination(
    dir: &Path,
    file_name: &str,
    source: Option<&Path>,
    reserved: &HashSet<String>,
) -> PathBuf {
    let (stem, ext) = split_file_name(file_name);
    let source_key = source.map(destination_key);

    let is_free = |candidate: &Path| {
        let key = destination_key(candidate);
        if source_key.as_deref() == Some(key.as_str()) {
            return true;
        }
        !reserved.contains(&key) && fs::symlink_metadata(candidate).is_err()
    };

    let first = dir.join(file_name);
    if is_free(&first) {
        return first;
    }

    for n in 1..MAX_NAME_PROBES {
        let candidate = match ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        };
        if is_free(&candidate) {
            return candidate;
        }
    }

    let unique = uuid::Uuid::new_v4().simple().to_string();
    match ext {
        Some(ext) => dir.join(format!("{stem} ({unique}).{ext}")),
        None => dir.join(format!("{stem} ({unique})")),
    }
}

fn split_file_name(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < file_name.len() => {
            (&file_name[..idx], Some(&file_name[idx + 1..]))
        }
        _ => (file_name, None),
    }
}

pub fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(any(unix, windows))]
    {
        err.raw_os_error() == Some(CROSS_DEVICE_ERROR)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = err;
        false
    }
}

fn check_move(source: &Path, destination: &Path) -> Result<(), AppError> {
    let src = as_str(source);
    validate_path(&src)?;
    validate_path(&as_str(destination))?;
    validate_not_protected(&src)?;

    if !source.exists() {
        return Err(AppError::General(format!("source does not exist: {src}")));
    }
    if destination.exists() {
        return Err(AppError::General(format!(
            "destination already exists: {}",
            destination.display()
        )));
    }
    Ok(())
}

/// Plain rename. Errors carry the raw OS error so callers can detect a
/// cross-device failure with [`is_cross_device`].
pub fn rename(source: &Path, destination: &Path) -> Result<(), AppError> {
    check_move(source, destination)?;
    fs::rename(source, destination)?;
    Ok(())
}

/// Copies a regular file. A partial destination is removed on failure.
pub fn copy_file(source: &Path, destination: &Path) -> Result<(), AppError> {
    check_move(source, destination)?;
    if let Err(err) = fs::copy(source, destination) {
        let _ = fs::remove_file(destination);
        return Err(err.into());
    }
    Ok(())
}

/// Removes the source half of a cross-volume move. If that fails the copy is
/// rolled back so the file exists exactly once.
pub fn remove_moved_source(source: &Path, copied_to: &Path) -> Result<(), AppError> {
    if let Err(err) = fs::remove_file(source) {
        let _ = fs::remove_file(copied_to);
        return Err(AppError::General(format!(
            "failed to remove {} after copy: {err}",
            source.display()
        )));
    }
    Ok(())
}

/// Returns whether the directory was removed. Non-empty or missing
/// directories are left alone.
pub fn remove_dir_if_empty(path: &Path) -> Result<bool, AppError> {
    if !path.is_dir() {
        return Ok(false);
    }
    if fs::read_dir(path)?.next().is_some() {
        return Ok(false);
    }
    fs::remove_dir(path)?;
    Ok(true)
}
