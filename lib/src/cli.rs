//! Command line parsing and the entrypoint used by the binary.

use std::ffi::OsString;

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::Parser;

use crate::delta::DeltaPlan;

/// Build a static delta package between two commits of an OSTree repository.
///
/// The target revision may first be transferred from a separate update
/// repository; the generated artifacts (metadata, superblock and data parts)
/// are packaged as a gzipped tarball in the output directory.
#[derive(Debug, Parser)]
#[clap(name = "ostree-delta", version)]
pub(crate) struct DeltaOpts {
    /// Initial (deployed) repository; must exist.
    #[clap(long, value_name = "DIR")]
    pub(crate) repo: Utf8PathBuf,

    /// Output directory; created if necessary.
    #[clap(long, value_name = "DIR")]
    pub(crate) output: Utf8PathBuf,

    /// Repository holding the update commit; defaults to the deployed
    /// repository.
    #[clap(long = "update_repo", value_name = "DIR")]
    pub(crate) update_repo: Option<Utf8PathBuf>,

    /// Machine (and therefore ref) being worked on; auto-detected from the
    /// repository refs when omitted.
    #[clap(long)]
    pub(crate) machine: Option<String>,

    /// Revision of the tip of the delta; defaults to the machine's current
    /// tip in the update repository.
    #[clap(long = "to_sha", value_name = "REV")]
    pub(crate) to_sha: Option<String>,

    /// Revision of the base of the delta.
    #[clap(long = "from_sha", value_name = "REV")]
    pub(crate) from_sha: Option<String>,

    /// Name the packaged archive data.bin instead of data.tar.gz.
    #[clap(long = "generate_bin")]
    pub(crate) generate_bin: bool,

    /// Generate a baseline delta from the empty commit, ignoring any base
    /// revision.
    #[clap(long)]
    pub(crate) empty: bool,

    /// Kill any external command that runs longer than this many seconds
    /// and carry on with whatever output it produced.
    #[clap(long = "command_timeout", value_name = "SECS")]
    pub(crate) command_timeout: Option<u64>,
}

/// Parse the provided arguments and execute.
///
/// Arguments the tool does not recognize are warned about and dropped so
/// that newer build recipes can pass options an older tool predates; all
/// other parse failures terminate with the usual usage error.
pub async fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString>,
{
    let argv: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let (opts, unknown) = parse_known_args(argv).unwrap_or_else(|e| e.exit());
    if !unknown.is_empty() {
        tracing::warn!("unsupported arguments: {unknown:?}");
    }
    run_from_opts(opts).await
}

/// Internal (non-generic) primary entrypoint.
async fn run_from_opts(opts: DeltaOpts) -> Result<()> {
    let plan = DeltaPlan::from_opts(opts).await?;
    let revisions = plan.resolve().await?;
    plan.execute(&revisions).await
}

/// Like `Parser::try_parse_from`, except that unknown arguments are
/// collected and stripped instead of aborting the parse.
fn parse_known_args(
    mut argv: Vec<OsString>,
) -> std::result::Result<(DeltaOpts, Vec<String>), clap::Error> {
    let mut unknown = Vec::new();
    loop {
        match DeltaOpts::try_parse_from(argv.iter()) {
            Ok(opts) => return Ok((opts, unknown)),
            Err(e) if e.kind() == ErrorKind::UnknownArgument => {
                let Some(bad) = invalid_arg(&e) else {
                    return Err(e);
                };
                let Some(pos) = argv.iter().position(|a| token_matches(a, &bad)) else {
                    return Err(e);
                };
                argv.remove(pos);
                unknown.push(bad);
            }
            Err(e) => return Err(e),
        }
    }
}

fn invalid_arg(e: &clap::Error) -> Option<String> {
    match e.get(ContextKind::InvalidArg) {
        Some(ContextValue::String(s)) => Some(s.clone()),
        _ => None,
    }
}

// clap reports `--flag=value` as just `--flag`; match both spellings.
fn token_matches(arg: &OsString, reported: &str) -> bool {
    let Some(arg) = arg.to_str() else {
        return false;
    };
    arg == reported || (reported.starts_with("--") && arg.starts_with(&format!("{reported}=")))
}
