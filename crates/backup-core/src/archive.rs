use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::errors::ArchiveError;

/// Entries at or above this size need zip64 headers.
const LARGE_FILE_THRESHOLD: u64 = 0xFFFF_FFFF;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Streams every regular file under `source_dir` into a deflate zip at `output`.
///
/// Entry names are relative to `source_dir` with `/` separators; directories are
/// implied by entry paths rather than written as entries. Links are not followed.
/// On failure the partially written output is removed.
pub fn archive_dir(source_dir: &Path, output: &Path) -> Result<ArchiveSummary, ArchiveError> {
    if !source_dir.is_dir() {
        return Err(ArchiveError::NotADirectory(source_dir.to_path_buf()));
    }
    let root = source_dir
        .canonicalize()
        .map_err(|err| ArchiveError::io("resolving", source_dir, err))?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| ArchiveError::io("creating", parent, err))?;
    }
    let file = File::create(output).map_err(|err| ArchiveError::io("creating", output, err))?;
    let output_abs = output.canonicalize().ok();

    let result = write_archive(&root, output, output_abs.as_deref(), BufWriter::new(file));
    if result.is_err() {
        let _ = fs::remove_file(output);
    }
    result
}

fn write_archive(
    root: &Path,
    output: &Path,
    skip: Option<&Path>,
    writer: BufWriter<File>,
) -> Result<ArchiveSummary, ArchiveError> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut summary = ArchiveSummary::default();
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|source| ArchiveError::Walk {
            path: source
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf()),
            source,
        })?;
        let path = entry.path();

        if !entry.file_type().is_file() {
            if entry.path_is_symlink() {
                debug!(path = %path.display(), "skipping symlink");
            }
            continue;
        }
        if skip == Some(path) {
            continue;
        }

        let Some(name) = entry_name(root, path) else {
            warn!(path = %path.display(), "skipping file whose name is not valid UTF-8");
            continue;
        };
        let size = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
        let mut input = File::open(path).map_err(|source| ArchiveError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        zip.start_file(name, options.large_file(size >= LARGE_FILE_THRESHOLD))
            .map_err(|source| ArchiveError::Zip {
                path: path.to_path_buf(),
                source,
            })?;
        let copied = copy_entry(&mut input, &mut zip, &mut buffer, path, output)?;

        summary.files += 1;
        summary.bytes += copied;
    }

    let writer = zip.finish().map_err(|source| ArchiveError::Zip {
        path: output.to_path_buf(),
        source,
    })?;
    finish_file(writer, output)?;

    Ok(summary)
}

fn finish_file<W: Write + Seek>(
    writer: BufWriter<W>,
    output: &Path,
) -> Result<W, ArchiveError> {
    writer
        .into_inner()
        .map_err(|err| ArchiveError::io("flushing", output, err.into_error()))
}

/// Relative path components joined with `/`. A backslash inside a Unix file
/// name stays part of that name. `None` when a component is not UTF-8.
fn entry_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts = rel
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

/// Copies one file into the archive, blaming read failures on the source file
/// and write failures on the archive.
fn copy_entry<R: Read, W: Write>(
    input: &mut R,
    archive: &mut W,
    buffer: &mut [u8],
    source_path: &Path,
    archive_path: &Path,
) -> Result<u64, ArchiveError> {
    let mut copied = 0u64;
    loop {
        let read = match input.read(buffer) {
            Ok(0) => return Ok(copied),
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(ArchiveError::Read {
                    path: source_path.to_path_buf(),
                    source,
                })
            }
        };
        archive
            .write_all(&buffer[..read])
            .map_err(|err| ArchiveError::io("writing", archive_path, err))?;
        copied += read as u64;
    }
}

/// Scratch path used to stage one archive before upload.
pub fn scratch_path(scratch_dir: &Path) -> PathBuf {
    scratch_dir.join(".backup-scratch.zip")
}
