use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};
use vidslim_scanner::walk::relative_string;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrashEntry {
    /// `/`-separated path relative to the trash root.
    pub path: String,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TrashInfo {
    pub total_size: u64,
    pub file_count: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EmptyReport {
    pub deleted_files: u64,
    pub freed_bytes: u64,
}

/// Every file under `root`, sorted by relative path.
pub async fn list(root: &Path) -> io::Result<Vec<TrashEntry>> {
    let root = root.to_path_buf();
    blocking(move || {
        let mut entries = Vec::new();
        for (path, size) in collect_files(&root)? {
            let Some(rel) = relative_string(&root, &path) else {
                continue;
            };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            entries.push(TrashEntry {
                path: rel,
                name,
                size,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    })
    .await
}

pub async fn info(root: &Path) -> io::Result<TrashInfo> {
    let root = root.to_path_buf();
    blocking(move || {
        let files = collect_files(&root)?;
        Ok(TrashInfo {
            total_size: files.iter().map(|(_, size)| size).sum(),
            file_count: files.len() as u64,
        })
    })
    .await
}

/// Delete everything under `root`, keeping `root` itself.
pub async fn empty(root: &Path) -> io::Result<EmptyReport> {
    let root = root.to_path_buf();
    let report = blocking(move || {
        let mut report = EmptyReport::default();
        for (path, size) in collect_files(&root)? {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    report.deleted_files += 1;
                    report.freed_bytes += size;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to delete trash file"),
            }
        }
        remove_empty_dirs(&root);
        Ok(report)
    })
    .await?;

    info!(
        deleted_files = report.deleted_files,
        freed_bytes = report.freed_bytes,
        "trash emptied"
    );
    Ok(report)
}

async fn blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

fn collect_files(root: &Path) -> io::Result<Vec<(PathBuf, u64)>> {
    let mut files = Vec::new();
    match std::fs::read_dir(root) {
        Ok(_) => collect_recursive(root, &mut files),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    Ok(files)
}

fn collect_recursive(dir: &Path, files: &mut Vec<(PathBuf, u64)>) {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        if file_type.is_dir() {
            collect_recursive(&path, files);
        } else if let Ok(meta) = entry.metadata() {
            files.push((path, meta.len()));
        }
    }
}

fn remove_empty_dirs(dir: &Path) {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.flatten() {
        if entry.file_type().is_ok_and(|ft| ft.is_dir()) {
            let path = entry.path();
            remove_empty_dirs(&path);
            let _ = std::fs::remove_dir(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(root: &Path) {
        std::fs::create_dir_all(root.join("Movies/2020")).unwrap();
        std::fs::write(root.join("Movies/2020/a.mkv"), vec![0u8; 300]).unwrap();
        std::fs::write(root.join("b.mp4"), vec![0u8; 50]).unwrap();
    }

    #[tokio::test]
    async fn lists_and_sizes_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        seed(tmp.path());

        let entries = list(tmp.path()).await.unwrap();
        assert_eq!(
            entries,
            vec![
                TrashEntry {
                    path: "Movies/2020/a.mkv".into(),
                    name: "a.mkv".into(),
                    size: 300
                },
                TrashEntry {
                    path: "b.mp4".into(),
                    name: "b.mp4".into(),
                    size: 50
                },
            ]
        );
        assert_eq!(
            info(tmp.path()).await.unwrap(),
            TrashInfo {
                total_size: 350,
                file_count: 2
            }
        );
    }

    #[tokio::test]
    async fn empty_deletes_contents_but_keeps_root() {
        let tmp = tempfile::tempdir().unwrap();
        seed(tmp.path());

        let report = empty(tmp.path()).await.unwrap();
        assert_eq!(report.deleted_files, 2);
        assert_eq!(report.freed_bytes, 350);
        assert!(tmp.path().is_dir());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_root_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("trash");
        assert!(list(&root).await.unwrap().is_empty());
        assert_eq!(empty(&root).await.unwrap(), EmptyReport::default());
    }
}
