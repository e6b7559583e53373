use clap::{Args, Parser, Subcommand};

use strata_core::commands::rewrite::RewriteOptions;
use strata_core::filter::{ExcludeOptions, IncludeOptions};
use strata_core::snapshot::find::{parse_tag_groups, SnapshotFilter};

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Rewrite snapshots in a content-addressed backup repository",
    after_help = "\
Configuration file lookup order:
  1. --config <path>                     (explicit flag)
  2. $STRATA_CONFIG                      (environment variable)
  3. ./strata.yaml                       (project)
  4. Platform user config dir + /strata/config.yaml (e.g. ~/.config)

Environment variables:
  STRATA_CONFIG       Path to configuration file (overrides default search)
  STRATA_REPOSITORY   Repository path (overrides repository.url)

Exit status:
  0 success, 1 error, 10 repository does not exist,
  11 repository already locked, 130 interrupted"
)]
pub(crate) struct Cli {
    /// Path to configuration file (overrides STRATA_CONFIG and default search)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Repository path or file:// URL (overrides the configured repository)
    #[arg(short, long, global = true)]
    pub repo: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Keep retrying a locked repository for this long (e.g. 30s, 5m, 1h)
    #[arg(long, global = true, value_name = "DURATION")]
    pub retry_lock: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Initialize a new repository
    Init,

    /// Rewrite snapshots to exclude unwanted files or change metadata
    Rewrite(RewriteArgs),

    /// Remove all lock records from the repository
    BreakLock,
}

#[derive(Args, Debug, Default)]
pub(crate) struct RewriteArgs {
    /// Remove the original snapshots after rewriting
    #[arg(long)]
    pub forget: bool,

    /// Only report what would be done
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Replace the hostname of rewritten snapshots
    #[arg(long, value_name = "NAME")]
    pub new_host: Option<String>,

    /// Replace the time of rewritten snapshots ("YYYY-MM-DD HH:MM:SS", local time)
    #[arg(long, value_name = "TIME")]
    pub new_time: Option<String>,

    /// Attach a summary to snapshots that have none
    #[arg(long)]
    pub snapshot_summary: bool,

    /// Max concurrent tree uploads (1-16, overrides config)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=16))]
    pub upload_concurrency: Option<u16>,

    /// Only consider snapshots from this host (repeatable)
    #[arg(long = "host", value_name = "HOST")]
    pub hosts: Vec<String>,

    /// Only consider snapshots with these comma-separated tags (repeatable)
    #[arg(long = "tag", value_name = "TAG[,TAG...]")]
    pub tags: Vec<String>,

    /// Only consider snapshots containing this path (repeatable)
    #[arg(long = "path", value_name = "PATH")]
    pub paths: Vec<String>,

    /// Exclude a pattern (repeatable)
    #[arg(short = 'e', long = "exclude", value_name = "PATTERN")]
    pub excludes: Vec<String>,

    /// Same as --exclude but ignores the case of paths
    #[arg(long = "iexclude", value_name = "PATTERN")]
    pub iexcludes: Vec<String>,

    /// Exclude a literal path (repeatable)
    #[arg(long = "exclude-verbatim", value_name = "PATH")]
    pub excludes_verbatim: Vec<String>,

    /// Read exclude patterns from a file (repeatable)
    #[arg(long = "exclude-file", value_name = "FILE")]
    pub exclude_files: Vec<String>,

    /// Same as --exclude-file but ignores the case of paths
    #[arg(long = "iexclude-file", value_name = "FILE")]
    pub iexclude_files: Vec<String>,

    /// Read literal paths to exclude from a file (repeatable)
    #[arg(long = "exclude-file-verbatim", value_name = "FILE")]
    pub exclude_files_verbatim: Vec<String>,

    /// Exclude directories containing this file, optionally starting with a signature
    #[arg(long = "exclude-if-present", value_name = "NAME[:SIGNATURE]")]
    pub exclude_if_present: Vec<String>,

    /// Include a pattern (repeatable)
    #[arg(short = 'i', long = "include", value_name = "PATTERN")]
    pub includes: Vec<String>,

    /// Same as --include but ignores the case of paths
    #[arg(long = "iinclude", value_name = "PATTERN")]
    pub iincludes: Vec<String>,

    /// Read include patterns from a file (repeatable)
    #[arg(long = "include-file", value_name = "FILE")]
    pub include_files: Vec<String>,

    /// Same as --include-file but ignores the case of paths
    #[arg(long = "iinclude-file", value_name = "FILE")]
    pub iinclude_files: Vec<String>,

    /// Snapshot IDs, unique prefixes or "latest" (default: all snapshots)
    #[arg(value_name = "SNAPSHOT")]
    pub snapshots: Vec<String>,
}

impl RewriteArgs {
    pub fn to_options(&self) -> RewriteOptions {
        RewriteOptions {
            forget: self.forget,
            dry_run: self.dry_run,
            new_host: self.new_host.clone(),
            new_time: self.new_time.clone(),
            snapshot_summary: self.snapshot_summary,
            exclude: ExcludeOptions {
                excludes: self.excludes.clone(),
                insensitive_excludes: self.iexcludes.clone(),
                excludes_verbatim: self.excludes_verbatim.clone(),
                exclude_files: self.exclude_files.clone(),
                insensitive_exclude_files: self.iexclude_files.clone(),
                exclude_files_verbatim: self.exclude_files_verbatim.clone(),
                exclude_if_present: self.exclude_if_present.clone(),
            },
            include: IncludeOptions {
                includes: self.includes.clone(),
                insensitive_includes: self.iincludes.clone(),
                include_files: self.include_files.clone(),
                insensitive_include_files: self.iinclude_files.clone(),
            },
            filter: SnapshotFilter {
                hosts: self.hosts.clone(),
                tags: parse_tag_groups(&self.tags),
                paths: self.paths.clone(),
            },
            snapshots: self.snapshots.clone(),
        }
    }
}
