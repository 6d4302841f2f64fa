use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Video file discovered during a filesystem walk.
#[derive(Debug, Clone)]
pub struct VideoEntry {
    pub path: PathBuf,
    /// `/`-separated path relative to the walk root.
    pub relative_path: String,
    pub size_bytes: u64,
}

/// NAS housekeeping folders that never hold real media.
const JUNK_DIRS: &[&str] = &["@eaDir", "#recycle", "$RECYCLE.BIN", "lost+found"];

/// Walk `root` recursively and collect files accepted by `is_video`.
///
/// Hidden entries, junk folders, symlinks and every directory in `exclude`
/// are skipped. Excluded directories are compared by canonical path, so
/// `.`/`..` segments or symlinked spellings still match. Results are sorted
/// by relative path.
pub fn walk_video_files<F>(root: &Path, exclude: &[PathBuf], is_video: F) -> Vec<VideoEntry>
where
    F: Fn(&Path) -> bool,
{
    // A directory that does not exist cannot be walked into.
    let exclude: Vec<PathBuf> = exclude
        .iter()
        .filter_map(|p| std::fs::canonicalize(p).ok())
        .collect();

    let mut entries = Vec::new();
    walk_recursive(root, root, &exclude, &is_video, &mut entries);
    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    entries
}

fn walk_recursive<F>(
    root: &Path,
    dir: &Path,
    exclude: &[PathBuf],
    is_video: &F,
    entries: &mut Vec<VideoEntry>,
) where
    F: Fn(&Path) -> bool,
{
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "cannot read directory");
            return;
        }
    };

    for entry in read_dir.flatten() {
        let path = entry.path();
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        if name.starts_with('.') {
            continue;
        }

        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            if JUNK_DIRS.contains(&name.as_ref()) {
                continue;
            }
            if is_excluded(&path, exclude) {
                debug!(path = %path.display(), "skipping excluded directory");
                continue;
            }
            walk_recursive(root, &path, exclude, is_video, entries);
        } else if file_type.is_file() && is_video(&path) {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let Some(relative_path) = relative_string(root, &path) else {
                continue;
            };
            entries.push(VideoEntry {
                path,
                relative_path,
                size_bytes: metadata.len(),
            });
        }
    }
}

fn is_excluded(dir: &Path, exclude: &[PathBuf]) -> bool {
    !exclude.is_empty() && std::fs::canonicalize(dir).is_ok_and(|c| exclude.contains(&c))
}

/// `path` relative to `root`, joined with `/` regardless of platform.
pub fn relative_string(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
