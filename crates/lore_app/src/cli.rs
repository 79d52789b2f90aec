//! Command-line arguments for the `lore` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use lore_logging::LogDestination;

/// Bulk maintenance for a world's lore content
#[derive(Parser, Debug)]
#[command(name = "lore", version)]
pub struct Cli {
    /// RON config file; defaults are used when it does not exist
    #[arg(long, value_name = "PATH", default_value = "lore.ron", global = true)]
    pub config: PathBuf,

    /// Where log output goes: terminal, file or both
    #[arg(long, value_name = "DEST", default_value = "terminal", global = true)]
    pub log: LogDestination,

    /// File used when `--log` includes file output; appended to
    #[arg(long, value_name = "PATH", default_value = lore_logging::LOG_FILE, global = true)]
    pub log_file: PathBuf,

    /// Log at debug level
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Find and replace a literal string across copies of one document
    Reconcile(ReconcileArgs),
    /// Reset a field on content records back to inherited
    Clear(ClearArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReconcileArgs {
    #[arg(long, value_name = "TEXT")]
    pub find: String,

    #[arg(long, value_name = "TEXT")]
    pub replace: String,

    /// Leave one match untouched, e.g. `2#0` (source 2, first match)
    #[arg(long, value_name = "MATCH")]
    pub reject: Vec<String>,

    /// Leave every match of a source untouched (1-based)
    #[arg(long, value_name = "N")]
    pub reject_source: Vec<usize>,

    /// Print the matches and the outcome without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// The published copy first, then the draft, then older versions
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ClearArgs {
    #[arg(long, value_name = "NAME")]
    pub field: String,

    #[arg(required = true, value_name = "ID")]
    pub ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn reconcile_collects_repeated_rejections() {
        let cli = Cli::parse_from([
            "lore", "--log", "both", "reconcile", "--find", "Elena", "--replace", "Mira",
            "--reject", "1#0", "--reject", "2#1", "--reject-source", "3", "a.md", "b.md", "c.md",
        ]);
        assert_eq!(cli.log, LogDestination::Both);
        assert_eq!(cli.log_file, PathBuf::from(lore_logging::LOG_FILE));
        let Command::Reconcile(args) = cli.command else {
            panic!("expected reconcile");
        };
        assert_eq!(args.reject, vec!["1#0", "2#1"]);
        assert_eq!(args.reject_source, vec![3]);
        assert_eq!(args.files.len(), 3);
        assert!(!args.dry_run);
    }
}
