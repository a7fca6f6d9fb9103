//! A narrow interface over the `ostree` CLI.
//!
//! Everything this tool knows about a repository it learns by scraping the
//! textual output of `ostree`; that scraping is confined to this module so
//! the format dependency stays in one place.

use std::time::Duration;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;

use crate::error::DeltaError;
use crate::task::Task;

/// The binary we drive for every repository operation.
const OSTREE: &str = "ostree";
/// Refs with this prefix are repository bookkeeping (e.g. `ostree/bootloader`),
/// never machine names.
const RESERVED_REF_PREFIX: &str = "ostree";
/// Upper bound (in KiB) on generated delta chunks. At this size the payload
/// of a typical image update lands in a single data part named `0`.
const MAX_CHUNK_SIZE_KIB: u32 = 2048;

/// Handle on an OSTree repository directory.
#[derive(Debug)]
pub(crate) struct Repo {
    path: Utf8PathBuf,
    timeout: Option<Duration>,
}

impl Repo {
    pub(crate) fn new(path: Utf8PathBuf, timeout: Option<Duration>) -> Self {
        Self { path, timeout }
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn task(&self, description: &str) -> Task {
        Task::new(description, OSTREE)
            .args([format!("--repo={}", self.path)])
            .timeout(self.timeout)
    }

    /// List every ref known to the repository.
    pub(crate) async fn list_refs(&self) -> Result<Vec<String>> {
        let output = self.task("Listing refs").args(["refs"]).read().await?;
        Ok(output
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    /// Resolve a revision expression to a commit checksum. Returns `None`
    /// when the expression does not name a commit; mirroring the underlying
    /// tool, that failure is observable only as empty output.
    pub(crate) async fn resolve_revision(&self, rev: &str) -> Result<Option<String>> {
        let output = self
            .task("Resolving revision")
            .args(["rev-parse", rev])
            .read()
            .await?;
        Ok(first_line(&output))
    }

    /// Query the commit log of a revision expression.
    pub(crate) async fn log(&self, rev: &str) -> Result<Vec<LogEntry>> {
        let output = self
            .task("Querying commit log")
            .quiet()
            .args(["log", rev])
            .read()
            .await?;
        Ok(parse_log(&output))
    }

    /// Pull a commit (with its closure) out of `source` into this repository.
    #[context("Pulling {to_sha} from {}", source.path)]
    pub(crate) async fn pull_local_from(&self, source: &Repo, to_sha: &str) -> Result<()> {
        self.task("Transferring commit between repos")
            .args(["pull-local", source.path.as_str(), to_sha])
            .run()
            .await
    }

    /// Generate a static delta ending at `to_sha`, either from `from_sha` or
    /// from the empty baseline. The superblock is written to the given path
    /// and the delta's data parts land next to it.
    pub(crate) async fn static_delta_generate(
        &self,
        superblock: &Utf8Path,
        to_sha: &str,
        from_sha: Option<&str>,
    ) -> Result<()> {
        let task = self.task("Generating static delta").args([
            "static-delta".to_string(),
            "generate".to_string(),
            format!("--max-chunk-size={MAX_CHUNK_SIZE_KIB}"),
            "--min-fallback-size=0".to_string(),
            format!("--filename={superblock}"),
            "--to".to_string(),
            to_sha.to_string(),
        ]);
        let task = match from_sha {
            Some(from_sha) => task.args(["--from", from_sha]),
            None => task.args(["--empty"]),
        };
        task.run().await
    }

    /// Auto-detect the machine ref this repository serves: the single ref
    /// left after discarding the reserved ones.
    pub(crate) async fn detect_machine(&self) -> Result<String> {
        let refs = self.list_refs().await?;
        machine_from_refs(refs).map_err(|candidates| {
            DeltaError::MachineUndetermined {
                repo: self.path.clone(),
                candidates,
            }
            .into()
        })
    }
}

/// One entry of an `ostree log` listing; only the fields this tool consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LogEntry {
    pub(crate) checksum: String,
    pub(crate) version: Option<String>,
    pub(crate) date: Option<String>,
}

fn first_line(output: &str) -> Option<String> {
    output
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

/// Partition refs into machine candidates by discarding the reserved prefix;
/// exactly one candidate must remain, otherwise the candidates are handed
/// back so the caller can report them.
fn machine_from_refs(refs: Vec<String>) -> std::result::Result<String, Vec<String>> {
    let mut candidates: Vec<String> = refs
        .into_iter()
        .filter(|r| !r.starts_with(RESERVED_REF_PREFIX))
        .collect();
    if candidates.len() == 1 {
        Ok(candidates.remove(0))
    } else {
        Err(candidates)
    }
}

/// Parse the human-readable `ostree log` format. Entries begin with a
/// `commit <checksum>` line; `Version` values are single tokens, while
/// `Date` values contain spaces and colons and keep everything after the
/// first `:`.
fn parse_log(output: &str) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    for line in output.lines() {
        if let Some(checksum) = line.strip_prefix("commit ") {
            entries.push(LogEntry {
                checksum: checksum.trim().to_string(),
                version: None,
                date: None,
            });
            continue;
        }
        let Some(current) = entries.last_mut() else {
            continue;
        };
        if line.starts_with("Version") {
            current.version = line.split_whitespace().nth(1).map(str::to_string);
        } else if line.starts_with("Date") {
            current.date = line.split_once(':').map(|(_, v)| v.trim().to_string());
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_machine_from_refs() {
        let refs = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(
            machine_from_refs(refs(&["ostree/bootloader", "myboard"])),
            Ok("myboard".to_string())
        );
        // Bare `ostree` and anything under it is reserved.
        assert_eq!(
            machine_from_refs(refs(&["ostree", "ostree/1/1/0", "myboard"])),
            Ok("myboard".to_string())
        );
        assert_eq!(machine_from_refs(refs(&["ostree/bootloader"])), Err(vec![]));
        assert_eq!(
            machine_from_refs(refs(&["boardA", "boardB"])),
            Err(refs(&["boardA", "boardB"]))
        );
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line(""), None);
        assert_eq!(first_line("\n"), None);
        assert_eq!(first_line("abc123\n"), Some("abc123".to_string()));
        assert_eq!(first_line("abc123\ndef456\n"), Some("abc123".to_string()));
    }

    #[test]
    fn test_parse_log() {
        let sample = indoc! {"
            commit abc123
            ContentChecksum:  444b2eefa73b504b167c9ff2f5c6e11e3b4d8f3f6b4e3a4f2b8d9c0a1e5f6a7b
            Date:  2021-06-11 13:00:23 +0000
            Version: 1.2.3

                Commit made by build pipeline

            commit def456
            Date:  2021-06-04 09:11:02 +0000

                Commit made by build pipeline
        "};
        let entries = parse_log(sample);
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0],
            LogEntry {
                checksum: "abc123".to_string(),
                version: Some("1.2.3".to_string()),
                date: Some("2021-06-11 13:00:23 +0000".to_string()),
            }
        );
        assert_eq!(entries[1].checksum, "def456");
        assert_eq!(entries[1].version, None);
        assert_eq!(entries[1].date, Some("2021-06-04 09:11:02 +0000".to_string()));
    }

    #[test]
    fn test_parse_log_empty() {
        assert!(parse_log("").is_empty());
        // Body lines before any commit header are ignored.
        assert!(parse_log("Version: 1.0\n").is_empty());
    }
}
