use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Held for the daemon's lifetime; the OS lock goes away with the file handle.
pub struct InstanceLock {
    _file: File,
}

/// `Ok(None)` when another daemon already holds the lock.
pub fn try_acquire(path: &Path) -> std::io::Result<Option<InstanceLock>> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;

    match file.try_lock_exclusive() {
        Ok(()) => {}
        Err(err) if err.kind() == fs2::lock_contended_error().kind() => return Ok(None),
        Err(err) => return Err(err),
    }

    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(Some(InstanceLock { _file: file }))
}
