//! Package the output directory into a single deliverable archive.

use std::time::Duration;

use anyhow::Result;
use camino::Utf8Path;
use fn_error_context::context;

use crate::task::Task;

const TARBALL_NAME: &str = "data.tar";
pub(crate) const ARCHIVE_NAME: &str = "data.tar.gz";
pub(crate) const BIN_NAME: &str = "data.bin";

/// Archive the whole output directory in place. The uncompressed tar is
/// excluded from itself; everything else in the directory (metadata,
/// superblock, data parts) is included.
#[context("Packaging {dir}")]
pub(crate) async fn create_tarball(dir: &Utf8Path, timeout: Option<Duration>) -> Result<()> {
    let tarball = dir.join(TARBALL_NAME);
    let exclude = format!("--exclude=./{TARBALL_NAME}");
    Task::new("Archiving delta artifacts", "tar")
        .args([
            "-cf",
            tarball.as_str(),
            "--directory",
            dir.as_str(),
            exclude.as_str(),
            ".",
        ])
        .timeout(timeout)
        .run()
        .await?;
    Task::new("Compressing archive", "gzip")
        .args(["--force", tarball.as_str()])
        .timeout(timeout)
        .run()
        .await
}

/// Rename the compressed archive to the `data.bin` name expected by
/// manifest-driven update tooling.
#[context("Renaming archive to {BIN_NAME}")]
pub(crate) async fn rename_to_bin(dir: &Utf8Path, timeout: Option<Duration>) -> Result<()> {
    Task::new("Renaming archive", "mv")
        .args([
            dir.join(ARCHIVE_NAME).as_str(),
            dir.join(BIN_NAME).as_str(),
        ])
        .timeout(timeout)
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_package_and_rename() -> Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path()).unwrap();
        std::fs::write(dir.join("metadata"), "From-sha:a\nTo-sha:b\n")?;
        std::fs::write(dir.join("superblock"), b"superblock")?;
        std::fs::write(dir.join("0"), b"chunk")?;

        create_tarball(dir, None).await?;
        assert!(dir.join(ARCHIVE_NAME).try_exists()?);
        assert!(!dir.join(TARBALL_NAME).try_exists()?);

        // The archive lists every artifact but never itself.
        let listing = Task::new("Listing archive", "tar")
            .args(["-tzf", dir.join(ARCHIVE_NAME).as_str()])
            .quiet()
            .read()
            .await?;
        for entry in ["./metadata", "./superblock", "./0"] {
            assert!(listing.contains(entry), "missing {entry} in: {listing}");
        }
        assert!(!listing.contains("data.tar"));

        rename_to_bin(dir, None).await?;
        assert!(dir.join(BIN_NAME).try_exists()?);
        assert!(!dir.join(ARCHIVE_NAME).try_exists()?);
        Ok(())
    }
}
