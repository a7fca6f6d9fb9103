//! Plan and drive the delta build sequence.

use std::time::Duration;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use tracing::Level;

use crate::cli::DeltaOpts;
use crate::error::DeltaError;
use crate::metadata::DeltaMetadata;
use crate::package;
use crate::repo::Repo;

/// Name of the delta superblock inside the output directory; the delta's
/// numbered data parts land next to it.
const SUPERBLOCK_FILENAME: &str = "superblock";

/// Everything decided before any revision is resolved: the repositories
/// involved, the machine ref, and both ends of the delta as revision
/// expressions.
#[derive(Debug)]
pub(crate) struct DeltaPlan {
    /// The deployed (source) repository; deltas are generated against it.
    repo: Repo,
    /// Where the target revision lives. Same as `repo` unless the build
    /// publishes updates to a separate repository.
    update_repo: Repo,
    single_repo: bool,
    output: Utf8PathBuf,
    machine: String,
    to_rev: String,
    /// `None` requests a baseline delta from the empty commit.
    from_rev: Option<String>,
    generate_bin: bool,
    timeout: Option<Duration>,
}

/// The commit checksums both ends of the delta resolved to; `from_sha` is
/// absent for baseline deltas.
#[derive(Debug)]
pub(crate) struct ResolvedRevisions {
    pub(crate) to_sha: String,
    pub(crate) from_sha: Option<String>,
}

impl DeltaPlan {
    /// Build the plan: validate the directories, fix the machine name, and
    /// pick the revision expressions for both ends of the delta.
    pub(crate) async fn from_opts(opts: DeltaOpts) -> Result<Self> {
        let repo_path = resolved_path(&opts.repo)?;
        ensure_is_directory(&repo_path)?;
        let output = resolved_path(&opts.output)?;
        std::fs::create_dir_all(&output).with_context(|| format!("Creating {output}"))?;

        let timeout = opts.command_timeout.map(Duration::from_secs);
        let repo = Repo::new(repo_path.clone(), timeout);

        let machine = match opts.machine {
            Some(machine) => machine,
            None => repo.detect_machine().await?,
        };

        let update_path = match opts.update_repo {
            Some(path) => resolved_path(&path)?,
            None => repo_path.clone(),
        };
        let single_repo = update_path == repo_path;
        let update_repo = Repo::new(update_path, timeout);

        let to_rev = opts.to_sha.unwrap_or_else(|| machine.clone());
        let from_rev = if opts.empty {
            None
        } else {
            Some(
                opts.from_sha
                    .unwrap_or_else(|| default_from_rev(&machine, single_repo)),
            )
        };

        Ok(DeltaPlan {
            repo,
            update_repo,
            single_repo,
            output,
            machine,
            to_rev,
            from_rev,
            generate_bin: opts.generate_bin,
            timeout,
        })
    }

    /// Resolve both revision expressions to commit checksums: the target
    /// against the update repository, the base against the deployed one.
    pub(crate) async fn resolve(&self) -> Result<ResolvedRevisions> {
        let to_sha = self
            .update_repo
            .resolve_revision(&self.to_rev)
            .await?
            .ok_or_else(|| DeltaError::RevisionNotFound {
                rev: self.to_rev.clone(),
                repo: self.update_repo.path().to_owned(),
            })?;
        let from_sha = match self.from_rev.as_deref() {
            None => None,
            Some(rev) => Some(self.repo.resolve_revision(rev).await?.ok_or_else(|| {
                DeltaError::RevisionNotFound {
                    rev: rev.to_string(),
                    repo: self.repo.path().to_owned(),
                }
            })?),
        };
        Ok(ResolvedRevisions { to_sha, from_sha })
    }

    /// Run the build: unify the repositories if needed, write the metadata
    /// file, generate the delta, and package the output directory.
    #[context("Building delta for {}", self.machine)]
    pub(crate) async fn execute(&self, revisions: &ResolvedRevisions) -> Result<()> {
        if !self.single_repo {
            // Both endpoints have to live in one repository before a delta
            // can be computed between them.
            self.repo
                .pull_local_from(&self.update_repo, &revisions.to_sha)
                .await?;
        }

        if tracing::enabled!(Level::DEBUG) {
            self.log_tip_diagnostics().await;
        }

        // A baseline delta has no predecessor commit; record the machine
        // name so the deploy side can still sanity-check the target device.
        let from_id = revisions
            .from_sha
            .clone()
            .unwrap_or_else(|| self.machine.clone());
        DeltaMetadata::new(from_id, revisions.to_sha.clone()).write_to(&self.output)?;

        self.repo
            .static_delta_generate(
                &self.output.join(SUPERBLOCK_FILENAME),
                &revisions.to_sha,
                revisions.from_sha.as_deref(),
            )
            .await?;

        package::create_tarball(&self.output, self.timeout).await?;
        if self.generate_bin {
            package::rename_to_bin(&self.output, self.timeout).await?;
        }
        Ok(())
    }

    async fn log_tip_diagnostics(&self) {
        match self.repo.log(&self.machine).await {
            Ok(entries) => {
                if let Some(tip) = entries.first() {
                    tracing::debug!(
                        "tip of {}: commit {} version {:?} date {:?}",
                        self.machine,
                        tip.checksum,
                        tip.version,
                        tip.date
                    );
                }
            }
            Err(e) => tracing::debug!("commit log of {} unavailable: {e:#}", self.machine),
        }
    }
}

/// The default base revision: the previous commit on the machine's branch
/// when both ends come from a single repository, otherwise the deployed
/// repository's tip (the last state a device is known to have).
fn default_from_rev(machine: &str, single_repo: bool) -> String {
    if single_repo {
        format!("{machine}^")
    } else {
        machine.to_string()
    }
}

/// Fully resolve `path`, following symlinks, when it exists on disk;
/// otherwise make it absolute lexically. Different spellings of one
/// directory resolve to the same path, so aliased repositories compare
/// equal.
fn resolved_path(path: &Utf8Path) -> Result<Utf8PathBuf> {
    if let Ok(resolved) = path.canonicalize_utf8() {
        return Ok(resolved);
    }
    let path = std::path::absolute(path).with_context(|| format!("Resolving {path}"))?;
    Utf8PathBuf::from_path_buf(path)
        .map_err(|p| anyhow::anyhow!("Non-UTF-8 path: {}", p.display()))
}

fn ensure_is_directory(path: &Utf8Path) -> Result<()> {
    if !path.try_exists()? {
        anyhow::bail!("\"{path}\" does not exist");
    }
    if !path.is_dir() {
        anyhow::bail!("\"{path}\" is not a directory");
    }
    Ok(())
}
