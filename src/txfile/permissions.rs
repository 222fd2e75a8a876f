use std::path::Path;

/// Apply POSIX mode bits to `path`. Best-effort: a failure is logged and
/// otherwise ignored.
pub fn apply(path: &Path, mode: u32) {
    if let Err(e) = set_mode(path, mode) {
        tracing::warn!(path = %path.display(), mode = %format!("{mode:o}"), error = %e, "failed to set file permissions");
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
