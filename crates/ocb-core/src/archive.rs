//! Archive type detection and safe extraction (zip family + 7z).
//!
//! Extraction defends against common archive attacks:
//! - Path traversal (`../`, absolute paths, Windows drive prefixes)
//! - Symlink entries that escape the extraction directory
//! - Resource exhaustion (too many files / too much total content)
//!
//! Regular files are reported in archive listing order; the job pipeline relies
//! on that order for reproducible delivery.

use std::{
    fs,
    io::{BufReader, Read},
    path::{Component, Path, PathBuf},
};

use sevenz_rust::{Password, SevenZReader};
use tracing::debug;
use zip::ZipArchive;

use crate::{errors::Error, Result};

/// File extensions accepted at intake, for user-facing help text.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[".zip", ".cbz", ".cz", ".7z"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtractLimits {
    /// Maximum number of regular files extracted.
    pub max_files: usize,
    /// Maximum total bytes extracted across all regular files.
    pub max_total_bytes: u64,
    /// Maximum bytes extracted per file.
    pub max_file_bytes: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_files: 500,
            max_total_bytes: 256 * 1024 * 1024, // 256MB
            max_file_bytes: 25 * 1024 * 1024,   // 25MB per page image
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExtractReport {
    /// Relative paths of extracted regular files, in archive listing order.
    pub extracted_files: Vec<PathBuf>,
    pub total_bytes: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    /// `.zip`, `.cbz` and `.cz` are all zip containers.
    Zip,
    SevenZip,
}

impl ArchiveKind {
    /// Determine the archive kind from an uploaded file name (case-insensitive).
    pub fn detect(file_name: &str) -> Option<Self> {
        let lower = file_name.trim().to_lowercase();
        if lower.ends_with(".zip") || lower.ends_with(".cbz") || lower.ends_with(".cz") {
            return Some(Self::Zip);
        }
        if lower.ends_with(".7z") {
            return Some(Self::SevenZip);
        }
        None
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::SevenZip => "7z",
        }
    }
}

pub fn safe_extract_archive(
    archive_path: &Path,
    kind: ArchiveKind,
    dest_dir: &Path,
    limits: ExtractLimits,
) -> Result<ExtractReport> {
    fs::create_dir_all(dest_dir)?;

    let report = match kind {
        ArchiveKind::Zip => safe_extract_zip(archive_path, dest_dir, limits)?,
        ArchiveKind::SevenZip => safe_extract_7z(archive_path, dest_dir, limits)?,
    };

    debug!(
        archive = %archive_path.display(),
        files = report.extracted_files.len(),
        bytes = report.total_bytes,
        "archive extracted"
    );
    Ok(report)
}

/// Running totals shared by the per-format extractors.
struct Budget {
    limits: ExtractLimits,
    file_count: usize,
    total: u64,
}

impl Budget {
    fn new(limits: ExtractLimits) -> Self {
        Self {
            limits,
            file_count: 0,
            total: 0,
        }
    }

    /// Account for one more regular file with a declared size.
    fn admit(&mut self, name: &str, declared_size: u64) -> Result<()> {
        self.file_count += 1;
        if self.file_count > self.limits.max_files {
            return Err(Error::Security(format!(
                "archive exceeds max_files limit ({})",
                self.limits.max_files
            )));
        }
        if declared_size > self.limits.max_file_bytes {
            return Err(Error::Security(format!(
                "archive file too large: {} bytes (max {}) for {name}",
                declared_size, self.limits.max_file_bytes
            )));
        }
        if self.total.saturating_add(declared_size) > self.limits.max_total_bytes {
            return Err(Error::Security(format!(
                "archive exceeds max_total_bytes limit ({})",
                self.limits.max_total_bytes
            )));
        }
        Ok(())
    }

    /// Copy an entry to disk, enforcing the per-file bound even if metadata lies.
    fn write_entry(&mut self, name: &str, reader: impl Read, out_path: &Path) -> Result<()> {
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = fs::File::create(out_path)?;
        let mut limited = reader.take(self.limits.max_file_bytes + 1);
        let copied = std::io::copy(&mut limited, &mut out)?;
        if copied > self.limits.max_file_bytes {
            return Err(Error::Security(format!(
                "archive entry exceeds max_file_bytes while extracting: {name}"
            )));
        }
        self.total += copied;
        if self.total > self.limits.max_total_bytes {
            return Err(Error::Security(format!(
                "archive exceeds max_total_bytes limit ({})",
                self.limits.max_total_bytes
            )));
        }
        Ok(())
    }
}

fn safe_extract_zip(
    archive_path: &Path,
    dest_dir: &Path,
    limits: ExtractLimits,
) -> Result<ExtractReport> {
    let f = fs::File::open(archive_path)?;
    let mut zip = ZipArchive::new(f).map_err(|e| Error::Archive(format!("zip error: {e}")))?;

    let mut report = ExtractReport::default();
    let mut budget = Budget::new(limits);

    for i in 0..zip.len() {
        let entry = zip
            .by_index(i)
            .map_err(|e| Error::Archive(format!("zip error: {e}")))?;
        let name = entry.name().replace('\\', "/");
        if name.is_empty() {
            continue;
        }

        // Zip symlinks are commonly encoded via unix mode bits. Disallow them.
        if let Some(mode) = entry.unix_mode() {
            if mode & 0o170000 == 0o120000 {
                return Err(Error::Security(format!(
                    "archive contains symlink entry: {name}"
                )));
            }
        }

        let rel = sanitize_rel_path(Path::new(&name))?;
        let out_path = dest_dir.join(&rel);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        budget.admit(&name, entry.size())?;
        budget.write_entry(&name, entry, &out_path)?;

        report.extracted_files.push(rel);
        report.total_bytes = budget.total;
    }

    Ok(report)
}

fn safe_extract_7z(
    archive_path: &Path,
    dest_dir: &Path,
    limits: ExtractLimits,
) -> Result<ExtractReport> {
    let f = fs::File::open(archive_path)?;
    let len = f.metadata()?.len();

    let mut sz = SevenZReader::new(BufReader::new(f), len, Password::empty())
        .map_err(|e| Error::Archive(format!("7z error: {e}")))?;

    let mut report = ExtractReport::default();
    let mut budget = Budget::new(limits);
    let mut failure: Option<Error> = None;

    sz.for_each_entries(|entry, reader| {
        let name = entry.name().replace('\\', "/");
        if name.is_empty() {
            return Ok(true);
        }

        let rel = match sanitize_rel_path(Path::new(&name)) {
            Ok(rel) => rel,
            Err(e) => {
                failure = Some(e);
                return Ok(false);
            }
        };
        let out_path = dest_dir.join(&rel);

        if entry.is_directory() {
            if let Err(e) = fs::create_dir_all(&out_path) {
                failure = Some(e.into());
                return Ok(false);
            }
            return Ok(true);
        }

        let step = budget
            .admit(&name, entry.size())
            .and_then(|_| budget.write_entry(&name, reader, &out_path));
        match step {
            Ok(()) => {
                report.extracted_files.push(rel);
                report.total_bytes = budget.total;
                Ok(true)
            }
            Err(e) => {
                failure = Some(e);
                Ok(false)
            }
        }
    })
    .map_err(|e| Error::Archive(format!("7z error: {e}")))?;

    match failure {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

fn sanitize_rel_path(p: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for comp in p.components() {
        match comp {
            Component::CurDir => {}
            Component::Normal(os) => out.push(os),
            Component::ParentDir => {
                return Err(Error::Security(format!(
                    "archive contains path traversal: {}",
                    p.display()
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Security(format!(
                    "archive contains absolute path: {}",
                    p.display()
                )));
            }
        }
    }

    if out.as_os_str().is_empty() {
        return Err(Error::Security("archive contains empty path".to_string()));
    }

    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::{FileOptions, ZipWriter};

    /// Build a zip at `path` with `(name, bytes)` entries in the given order.
    pub(crate) fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let f = fs::File::create(path).unwrap();
        let mut zw = ZipWriter::new(f);
        for (name, data) in entries {
            zw.start_file(*name, FileOptions::default()).unwrap();
            zw.write_all(data).unwrap();
        }
        zw.finish().unwrap();
    }

    /// Build a 7z at `path` with `(name, bytes)` entries in the given order.
    pub(crate) fn write_7z(path: &Path, entries: &[(&str, &[u8])]) {
        let src = tempfile::tempdir().unwrap();
        let mut sz = sevenz_rust::SevenZWriter::create(path).unwrap();
        for (i, (name, data)) in entries.iter().enumerate() {
            let file = src.path().join(i.to_string());
            fs::write(&file, data).unwrap();
            sz.push_archive_entry(
                sevenz_rust::SevenZArchiveEntry::from_path(&file, name.to_string()),
                Some(fs::File::open(&file).unwrap()),
            )
            .unwrap();
        }
        sz.finish().unwrap();
    }

    #[test]
    fn detects_supported_kinds_case_insensitively() {
        assert_eq!(ArchiveKind::detect("photos.zip"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::detect("Chapter 1.CBZ"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::detect("scan.cz"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::detect("scan.7Z"), Some(ArchiveKind::SevenZip));
        assert_eq!(ArchiveKind::detect("scan.rar"), None);
        assert_eq!(ArchiveKind::detect("scan.tar.gz"), None);
        assert_eq!(ArchiveKind::detect("zip"), None);
    }

    #[test]
    fn zip_preserves_listing_order() {
        let base = tempfile::tempdir().unwrap();
        let zip_path = base.path().join("a.zip");
        let out_dir = base.path().join("out");
        write_zip(
            &zip_path,
            &[("b.png", b"2"), ("dir/c.png", b"3"), ("a.png", b"1")],
        );

        let report =
            safe_extract_archive(&zip_path, ArchiveKind::Zip, &out_dir, ExtractLimits::default())
                .unwrap();
        assert_eq!(
            report.extracted_files,
            vec![
                PathBuf::from("b.png"),
                PathBuf::from("dir/c.png"),
                PathBuf::from("a.png")
            ]
        );
        assert_eq!(report.total_bytes, 3);
        assert_eq!(fs::read(out_dir.join("dir/c.png")).unwrap(), b"3");
    }

    #[test]
    fn sevenz_preserves_listing_order() {
        let base = tempfile::tempdir().unwrap();
        let path = base.path().join("a.7z");
        let out_dir = base.path().join("out");
        write_7z(&path, &[("b.png", b"22"), ("dir/c.png", b"333"), ("a.png", b"1")]);

        let report = safe_extract_archive(
            &path,
            ArchiveKind::SevenZip,
            &out_dir,
            ExtractLimits::default(),
        )
        .unwrap();
        assert_eq!(
            report.extracted_files,
            vec![
                PathBuf::from("b.png"),
                PathBuf::from("dir/c.png"),
                PathBuf::from("a.png")
            ]
        );
        assert_eq!(report.total_bytes, 6);
        assert_eq!(fs::read(out_dir.join("dir/c.png")).unwrap(), b"333");
    }

    #[test]
    fn sevenz_enforces_limits() {
        let base = tempfile::tempdir().unwrap();
        let path = base.path().join("a.7z");
        write_7z(&path, &[("a.png", b"hello"), ("b.png", b"world")]);

        let count = ExtractLimits {
            max_files: 1,
            max_total_bytes: 100,
            max_file_bytes: 10,
        };
        let err = safe_extract_archive(&path, ArchiveKind::SevenZip, &base.path().join("o1"), count)
            .unwrap_err();
        assert!(matches!(err, Error::Security(_)));
        assert!(!base.path().join("o1/b.png").exists());

        let per_file = ExtractLimits {
            max_files: 10,
            max_total_bytes: 100,
            max_file_bytes: 4,
        };
        let err =
            safe_extract_archive(&path, ArchiveKind::SevenZip, &base.path().join("o2"), per_file)
                .unwrap_err();
        assert!(matches!(err, Error::Security(_)));
    }

    #[test]
    fn zip_blocks_path_traversal() {
        let base = tempfile::tempdir().unwrap();
        let zip_path = base.path().join("a.zip");
        let out_dir = base.path().join("out");
        write_zip(&zip_path, &[("../evil.txt", b"x")]);

        let err =
            safe_extract_archive(&zip_path, ArchiveKind::Zip, &out_dir, ExtractLimits::default())
                .unwrap_err();
        assert!(matches!(err, Error::Security(_)));
        assert!(!base.path().join("evil.txt").exists());
    }

    #[test]
    fn enforces_per_file_size_limit() {
        let base = tempfile::tempdir().unwrap();
        let zip_path = base.path().join("a.zip");
        write_zip(&zip_path, &[("big.png", b"hello")]);

        let limits = ExtractLimits {
            max_files: 10,
            max_total_bytes: 100,
            max_file_bytes: 4,
        };
        let err = safe_extract_archive(&zip_path, ArchiveKind::Zip, &base.path().join("out"), limits)
            .unwrap_err();
        assert!(matches!(err, Error::Security(_)));
    }

    #[test]
    fn enforces_total_size_and_count_limits() {
        let base = tempfile::tempdir().unwrap();
        let zip_path = base.path().join("a.zip");
        write_zip(&zip_path, &[("a.png", b"hello"), ("b.png", b"world")]);

        let total = ExtractLimits {
            max_files: 10,
            max_total_bytes: 9,
            max_file_bytes: 10,
        };
        let err = safe_extract_archive(&zip_path, ArchiveKind::Zip, &base.path().join("o1"), total)
            .unwrap_err();
        assert!(matches!(err, Error::Security(_)));

        let count = ExtractLimits {
            max_files: 1,
            max_total_bytes: 100,
            max_file_bytes: 10,
        };
        let err = safe_extract_archive(&zip_path, ArchiveKind::Zip, &base.path().join("o2"), count)
            .unwrap_err();
        assert!(matches!(err, Error::Security(_)));
    }

    #[test]
    fn corrupt_archives_are_archive_errors() {
        let base = tempfile::tempdir().unwrap();
        let bogus = base.path().join("bogus.bin");
        fs::write(&bogus, b"definitely not an archive").unwrap();

        let err =
            safe_extract_archive(&bogus, ArchiveKind::Zip, &base.path().join("o1"), ExtractLimits::default())
                .unwrap_err();
        assert!(matches!(err, Error::Archive(_)));

        let err = safe_extract_archive(
            &bogus,
            ArchiveKind::SevenZip,
            &base.path().join("o2"),
            ExtractLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
    }

    #[test]
    fn sanitizes_relative_paths() {
        assert_eq!(
            sanitize_rel_path(Path::new("./a/./b.png")).unwrap(),
            PathBuf::from("a/b.png")
        );
        assert!(sanitize_rel_path(Path::new("/etc/passwd")).is_err());
        assert!(sanitize_rel_path(Path::new(".")).is_err());
    }
}
