use std::io;
use std::path::Path;

use tracing::debug;

/// Move a file, creating the destination's parent directories. Falls back
/// to copy + remove when a rename is not possible (e.g. across devices).
pub async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match tokio::fs::rename(from, to).await {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(e),
        Err(e) => {
            debug!(from = %from.display(), to = %to.display(), error = %e, "rename failed, copying");
        }
    }

    if let Err(e) = tokio::fs::copy(from, to).await {
        let _ = tokio::fs::remove_file(to).await;
        return Err(e);
    }
    tokio::fs::remove_file(from).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_missing_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let from = tmp.path().join("a.mkv");
        let to = tmp.path().join("trash/Movies/2020/a.mkv");
        std::fs::write(&from, b"data").unwrap();

        move_file(&from, &to).await.unwrap();

        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"data");
    }

    #[tokio::test]
    async fn missing_source_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = move_file(&tmp.path().join("nope"), &tmp.path().join("out"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!tmp.path().join("out").exists());
    }
}
