use std::path::{Path, PathBuf};

pub struct RuntimePaths {
    pub runtime_dir: PathBuf,
    pub socket_path: PathBuf,
    pub lock_path: PathBuf,
}

pub const APP_ID: &str = "drive-backup";

pub fn runtime_paths() -> RuntimePaths {
    // Linux: prefer XDG_RUNTIME_DIR if present.
    if let Some(xdg) = std::env::var_os("XDG_RUNTIME_DIR") {
        return runtime_paths_in(PathBuf::from(xdg));
    }

    // macOS: use TMPDIR.
    if let Some(tmp) = std::env::var_os("TMPDIR") {
        return runtime_paths_in(PathBuf::from(tmp));
    }

    runtime_paths_in(std::env::temp_dir())
}

/// Paths under `base/<APP_ID>`.
pub fn runtime_paths_in(base: impl Into<PathBuf>) -> RuntimePaths {
    let runtime_dir = base.into().join(APP_ID);
    RuntimePaths {
        socket_path: runtime_dir.join("backupd.sock"),
        lock_path: runtime_dir.join("backupd.lock"),
        runtime_dir,
    }
}

/// Owner-only; the control socket lives in here.
pub const RUNTIME_DIR_MODE: u32 = 0o700;

/// Creates `p` owner-only, and narrows it again if it already existed.
#[cfg(unix)]
pub fn ensure_private_dir(p: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(RUNTIME_DIR_MODE)
        .create(p)?;
    std::fs::set_permissions(p, std::fs::Permissions::from_mode(RUNTIME_DIR_MODE))
}

#[cfg(not(unix))]
pub fn ensure_private_dir(p: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_share_one_namespace() {
        let base = tempfile::tempdir().unwrap();
        let paths = runtime_paths_in(base.path());

        assert_eq!(paths.runtime_dir, base.path().join(APP_ID));
        assert_eq!(paths.socket_path.parent(), Some(paths.runtime_dir.as_path()));
        assert_eq!(paths.lock_path.parent(), Some(paths.runtime_dir.as_path()));

        ensure_private_dir(&paths.runtime_dir).unwrap();
        ensure_private_dir(&paths.runtime_dir).unwrap();
        assert!(paths.runtime_dir.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn runtime_dir_is_owner_only_even_if_it_existed() {
        use std::os::unix::fs::PermissionsExt;

        let base = tempfile::tempdir().unwrap();
        let paths = runtime_paths_in(base.path());
        std::fs::create_dir_all(&paths.runtime_dir).unwrap();
        std::fs::set_permissions(&paths.runtime_dir, std::fs::Permissions::from_mode(0o755)).unwrap();

        ensure_private_dir(&paths.runtime_dir).unwrap();
        let mode = std::fs::metadata(&paths.runtime_dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, RUNTIME_DIR_MODE);

        let fresh = base.path().join("nested").join(APP_ID);
        ensure_private_dir(&fresh).unwrap();
        let mode = std::fs::metadata(&fresh).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, RUNTIME_DIR_MODE);
    }
}
