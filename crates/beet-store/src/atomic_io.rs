use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Replaces `path` with `content` through a synced sibling file and a rename,
/// so a crash leaves either the previous checkpoint or the new one on disk.
pub fn replace_file_atomically(path: &Path, content: &str) -> Result<()> {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        bail!("checkpoint path '{}' has no file name", path.display());
    };
    if path.is_dir() {
        bail!("checkpoint path '{}' is a directory", path.display());
    }
    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create state directory {}", parent_dir.display()))?;

    let staged = staging_path(parent_dir, file_name);
    if let Err(error) = write_synced(&staged, content) {
        let _ = std::fs::remove_file(&staged);
        return Err(error);
    }
    if let Err(error) = std::fs::rename(&staged, path) {
        let _ = std::fs::remove_file(&staged);
        return Err(error).with_context(|| {
            format!(
                "failed to move staged checkpoint {} over {}",
                staged.display(),
                path.display()
            )
        });
    }
    Ok(())
}

fn staging_path(parent_dir: &Path, file_name: &str) -> PathBuf {
    parent_dir.join(format!(
        ".{file_name}.{}.{}.partial",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ))
}

fn write_synced(staged: &Path, content: &str) -> Result<()> {
    let mut file: File = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(staged)
        .with_context(|| format!("failed to stage checkpoint {}", staged.display()))?;
    file.write_all(content.as_bytes())
        .and_then(|()| file.sync_all())
        .with_context(|| format!("failed to flush staged checkpoint {}", staged.display()))
}
