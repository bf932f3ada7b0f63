// apptool-backup/src/backup/archive.rs
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use tar::Builder;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::errors::{BackupError, Result};

pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Traversal options shared by archiving and the backup file copy.
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    pub follow_links: bool,
    /// Roots that are never descended into, even when nested under an included root.
    pub excludes: Vec<PathBuf>,
}

/// A regular file to be archived and the path it takes inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub source_path: PathBuf,
    pub archive_path: PathBuf,
}

/// Position of `path` relative to `base`. Paths outside `base` keep their
/// normal components, so `/data/uploads` becomes `data/uploads`.
pub fn relative_location(path: &Path, base: &Path) -> PathBuf {
    match path.strip_prefix(base) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect(),
    }
}

fn is_excluded(path: &Path, excludes: &[PathBuf]) -> bool {
    excludes.iter().any(|ex| path.starts_with(ex))
}

/// Walks every root depth-first and returns the regular files found, each
/// once, with its archive path relative to `base`.
///
/// Symlinks are only traversed when `follow_links` is set; otherwise they are
/// skipped. Dangling links are skipped in both modes.
pub fn collect_entries(roots: &[PathBuf], base: &Path, options: &PackOptions) -> Result<Vec<ArchiveEntry>> {
    let mut seen = BTreeSet::new();
    let mut entries = Vec::new();

    for root in roots {
        if is_excluded(root, &options.excludes) {
            debug!("Skipping excluded root {}", root.display());
            continue;
        }

        let walker = WalkDir::new(root)
            .follow_links(options.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_excluded(e.path(), &options.excludes));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    if err.loop_ancestor().is_some() {
                        warn!("Skipping symlink loop at {}", path.display());
                        continue;
                    }
                    if path.is_symlink() && !path.exists() {
                        warn!("Skipping dangling symlink {}", path.display());
                        continue;
                    }
                    return Err(BackupError::archive(path, format!("Failed to walk directory: {}", err)));
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if file_type.is_symlink() {
                debug!("Not following symlink {}", entry.path().display());
                continue;
            }
            if !file_type.is_file() {
                debug!("Skipping special file {}", entry.path().display());
                continue;
            }

            let archive_path = relative_location(entry.path(), base);
            if archive_path.as_os_str().is_empty() {
                return Err(BackupError::archive(
                    entry.path(),
                    format!("file has no path relative to {}", base.display()),
                ));
            }
            if seen.insert(archive_path.clone()) {
                entries.push(ArchiveEntry {
                    source_path: entry.into_path(),
                    archive_path,
                });
            }
        }
    }

    Ok(entries)
}

/// Writes `entries` into a gzipped tar at `archive_dest_path`.
///
/// The archive is built in a temporary file next to the destination and
/// renamed into place only once every entry has been written, so a failed
/// run leaves nothing at `archive_dest_path`.
pub fn write_archive(entries: &[ArchiveEntry], archive_dest_path: &Path) -> Result<PathBuf> {
    let parent = archive_dest_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|e| {
        BackupError::archive(parent, format!("Failed to create parent directory for archive: {}", e))
    })?;

    let partial = tempfile::Builder::new()
        .prefix(".archive-")
        .suffix(".partial")
        .tempfile_in(parent)
        .map_err(|e| BackupError::archive(archive_dest_path, format!("Failed to create temporary archive: {}", e)))?;

    {
        let enc = GzEncoder::new(partial.as_file(), Compression::default());
        let mut tar_builder = Builder::new(enc);

        for entry in entries {
            let mut file = File::open(&entry.source_path).map_err(|e| {
                BackupError::archive(&entry.source_path, format!("Failed to read file: {}", e))
            })?;
            tar_builder
                .append_file(&entry.archive_path, &mut file)
                .map_err(|e| {
                    BackupError::archive(
                        &entry.source_path,
                        format!("Failed to append as {} to archive: {}", entry.archive_path.display(), e),
                    )
                })?;
        }

        let encoder = tar_builder.into_inner().map_err(|e| {
            BackupError::archive(archive_dest_path, format!("Failed to finish tar stream: {}", e))
        })?;
        encoder.finish().map_err(|e| {
            BackupError::archive(archive_dest_path, format!("Failed to finish Gzip encoding: {}", e))
        })?;
    }

    partial
        .as_file()
        .sync_all()
        .map_err(|e| BackupError::archive(archive_dest_path, format!("Failed to flush archive: {}", e)))?;
    partial
        .persist(archive_dest_path)
        .map_err(|e| BackupError::archive(archive_dest_path, format!("Failed to move archive into place: {}", e.error)))?;

    Ok(archive_dest_path.to_path_buf())
}

/// Packs every file under `roots` into `archive_dest_path`, with paths
/// relative to `base`. The destination itself is never packed.
pub fn pack(
    roots: &[PathBuf],
    base: &Path,
    archive_dest_path: &Path,
    options: &PackOptions,
) -> Result<PathBuf> {
    info!(
        "Creating tar.gz archive from {} root(s) under {} to {}",
        roots.len(),
        base.display(),
        archive_dest_path.display()
    );

    let mut options = options.clone();
    options.excludes.push(archive_dest_path.to_path_buf());
    let entries = collect_entries(roots, base, &options)?;
    write_archive(&entries, archive_dest_path)?;

    info!(
        "✓ Tar.gz archive with {} file(s) created at {}",
        entries.len(),
        archive_dest_path.display()
    );
    Ok(archive_dest_path.to_path_buf())
}

/// Extracts a gzipped tar into `extract_to_dir`, creating directories as needed.
pub fn unpack(archive_path: &Path, extract_to_dir: &Path) -> Result<PathBuf> {
    let metadata = fs::metadata(archive_path)
        .map_err(|e| BackupError::archive(archive_path, format!("Archive is missing: {}", e)))?;
    if !metadata.is_file() {
        return Err(BackupError::archive(archive_path, "Archive for extraction is not a file"));
    }
    if metadata.len() == 0 {
        return Err(BackupError::archive(archive_path, "Archive is empty"));
    }

    if extract_to_dir.exists() && !extract_to_dir.is_dir() {
        return Err(BackupError::archive(
            extract_to_dir,
            "Extraction path exists but is not a directory",
        ));
    }
    fs::create_dir_all(extract_to_dir).map_err(|e| {
        BackupError::archive(extract_to_dir, format!("Failed to create extraction directory: {}", e))
    })?;

    info!(
        "Extracting tar.gz archive from {} to {}",
        archive_path.display(),
        extract_to_dir.display()
    );

    let archive_file = File::open(archive_path)
        .map_err(|e| BackupError::archive(archive_path, format!("Failed to open archive file: {}", e)))?;
    let gz_decoder = flate2::read::GzDecoder::new(archive_file);
    let mut archive = tar::Archive::new(gz_decoder);
    archive.unpack(extract_to_dir).map_err(|e| {
        BackupError::archive(
            archive_path,
            format!("Failed to unpack archive to {}: {}", extract_to_dir.display(), e),
        )
    })?;

    info!("✓ Tar.gz archive extracted successfully to {}", extract_to_dir.display());
    Ok(extract_to_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{read_tree, write_file};

    #[test]
    fn round_trip_preserves_paths_and_contents() {
        let src = tempfile::tempdir().unwrap();
        write_file(&src.path().join("a.txt"), b"alpha");
        write_file(&src.path().join("nested/deeper/b.bin"), &[0u8, 1, 2, 255]);
        write_file(&src.path().join("nested/c.txt"), b"");
        let out = tempfile::tempdir().unwrap();
        let archive = out.path().join("snapshot.tar.gz");

        pack(&[src.path().to_path_buf()], src.path(), &archive, &PackOptions::default()).unwrap();
        let restored = out.path().join("restored");
        unpack(&archive, &restored).unwrap();

        assert_eq!(read_tree(src.path()), read_tree(&restored));
    }

    #[test]
    fn paths_are_relative_to_the_common_base() {
        let base = tempfile::tempdir().unwrap();
        write_file(&base.path().join("public/upload/x.png"), b"x");
        write_file(&base.path().join("notes.md"), b"n");

        let roots = vec![base.path().join("public/upload"), base.path().join("notes.md")];
        let entries = collect_entries(&roots, base.path(), &PackOptions::default()).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.archive_path.clone()).collect();

        assert_eq!(paths, vec![PathBuf::from("public/upload/x.png"), PathBuf::from("notes.md")]);
    }

    #[test]
    fn overlapping_roots_yield_each_file_once() {
        let base = tempfile::tempdir().unwrap();
        write_file(&base.path().join("up/a"), b"a");
        write_file(&base.path().join("up/sub/b"), b"b");

        let roots = vec![base.path().join("up"), base.path().join("up/sub")];
        let entries = collect_entries(&roots, base.path(), &PackOptions::default()).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn nested_exclude_root_is_never_archived() {
        let base = tempfile::tempdir().unwrap();
        write_file(&base.path().join("app/keep.txt"), b"k");
        write_file(&base.path().join("app/vendor/lib/skip.txt"), b"s");
        write_file(&base.path().join("app/vendorish.txt"), b"v");

        let options = PackOptions {
            follow_links: false,
            excludes: vec![base.path().join("app/vendor")],
        };
        let entries = collect_entries(&[base.path().join("app")], base.path(), &options).unwrap();
        let paths: BTreeSet<_> = entries.into_iter().map(|e| e.archive_path).collect();

        assert!(paths.contains(Path::new("app/keep.txt")));
        assert!(paths.contains(Path::new("app/vendorish.txt")));
        assert!(paths.iter().all(|p| !p.starts_with("app/vendor")));
    }

    #[test]
    fn archive_never_contains_itself() {
        let root = tempfile::tempdir().unwrap();
        write_file(&root.path().join("data.txt"), b"d");
        let archive = root.path().join("self.tar.gz");

        pack(&[root.path().to_path_buf()], root.path(), &archive, &PackOptions::default()).unwrap();
        // Second run sees the first archive on disk and must still skip it.
        pack(&[root.path().to_path_buf()], root.path(), &archive, &PackOptions::default()).unwrap();

        let out = tempfile::tempdir().unwrap();
        unpack(&archive, out.path()).unwrap();
        let tree = read_tree(out.path());
        assert_eq!(tree.keys().cloned().collect::<Vec<_>>(), vec![PathBuf::from("data.txt")]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_follow_the_configured_policy() {
        let base = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        write_file(&outside.path().join("target/t.txt"), b"t");
        write_file(&base.path().join("root/real.txt"), b"r");
        std::os::unix::fs::symlink(outside.path().join("target"), base.path().join("root/linked")).unwrap();
        std::os::unix::fs::symlink(base.path().join("missing"), base.path().join("root/dangling")).unwrap();

        let roots = vec![base.path().join("root")];
        let skipped = collect_entries(&roots, base.path(), &PackOptions::default()).unwrap();
        assert_eq!(skipped.len(), 1);

        let followed = collect_entries(
            &roots,
            base.path(),
            &PackOptions {
                follow_links: true,
                excludes: vec![],
            },
        )
        .unwrap();
        let paths: BTreeSet<_> = followed.into_iter().map(|e| e.archive_path).collect();
        assert!(paths.contains(Path::new("root/linked/t.txt")));
        assert!(!paths.iter().any(|p| p.ends_with("dangling")));
    }

    #[test]
    fn unreadable_entry_fails_and_leaves_no_archive() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("ok.txt"), b"ok");
        let vanished = dir.path().join("vanished.txt");
        let entries = vec![
            ArchiveEntry {
                source_path: dir.path().join("ok.txt"),
                archive_path: PathBuf::from("ok.txt"),
            },
            ArchiveEntry {
                source_path: vanished.clone(),
                archive_path: PathBuf::from("vanished.txt"),
            },
        ];
        let out = tempfile::tempdir().unwrap();
        let archive = out.path().join("broken.tar.gz");

        let err = write_archive(&entries, &archive).unwrap_err();

        match err {
            BackupError::Archive { path, .. } => assert_eq!(path, vanished),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!archive.exists());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn unpack_rejects_missing_empty_and_corrupt_archives() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");

        assert!(matches!(
            unpack(&dir.path().join("nope.tar.gz"), &dest),
            Err(BackupError::Archive { .. })
        ));

        let empty = dir.path().join("empty.tar.gz");
        write_file(&empty, b"");
        assert!(matches!(unpack(&empty, &dest), Err(BackupError::Archive { .. })));

        let corrupt = dir.path().join("corrupt.tar.gz");
        write_file(&corrupt, b"this is not a gzip stream");
        assert!(matches!(unpack(&corrupt, &dest), Err(BackupError::Archive { .. })));
    }

    #[test]
    fn relative_location_strips_base_or_root() {
        assert_eq!(
            relative_location(Path::new("/srv/app/public/upload"), Path::new("/srv/app")),
            PathBuf::from("public/upload")
        );
        assert_eq!(
            relative_location(Path::new("/data/uploads"), Path::new("/srv/app")),
            PathBuf::from("data/uploads")
        );
    }
}
