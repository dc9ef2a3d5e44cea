use std::path::{Path, PathBuf};

use stacked_errors::{bail, Result, StackableErr};
use tokio::fs;

/// Canonicalizes and checks the existence of a directory path. Also adds on
/// better information to errors.
///
/// Note: this does not prevent TOCTOU bugs, the directory listing done
/// afterwards can still fail.
pub async fn acquire_dir_path(dir_path: impl AsRef<Path>) -> Result<PathBuf> {
    let dir_path = dir_path.as_ref();
    let path = fs::canonicalize(dir_path)
        .await
        .stack_err_with(|| format!("acquire_dir_path(dir_path: {dir_path:?})"))?;
    if !path.is_dir() {
        bail!("acquire_dir_path(dir_path: {dir_path:?}) -> is not a directory")
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directories_only() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("recipe");
        std::fs::write(&file, "#docker run").unwrap();

        let acquired = acquire_dir_path(dir.path()).await.unwrap();
        assert!(acquired.is_absolute());
        assert!(acquire_dir_path(&file).await.is_err());
        assert!(acquire_dir_path(dir.path().join("nope")).await.is_err());
    }
}
