use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use lore_core::reconcile::{self, ReconciledSource};
use lore_core::{
    MatchId, ReconcileDecisions, ReconcileScan, SourceKind, TextSource, WhitespaceWordCounter,
};
use lore_engine::{write_atomic, ReconcileSettings};
use lore_logging::{lore_info, lore_warn};

use crate::cli::ReconcileArgs;

struct LoadedSource {
    path: PathBuf,
    source: TextSource,
}

/// Published first, then the draft, then numbered versions.
fn kind_for(index: usize) -> SourceKind {
    match index {
        0 => SourceKind::Published,
        1 => SourceKind::Draft,
        n => SourceKind::Version((n - 1) as u32),
    }
}

fn load_sources(files: &[PathBuf]) -> Result<Vec<LoadedSource>> {
    files
        .iter()
        .enumerate()
        .map(|(index, path)| {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(LoadedSource {
                path: path.clone(),
                source: TextSource::new((index + 1).to_string(), kind_for(index), text),
            })
        })
        .collect()
}

/// Accepts `<source>#<ordinal>`.
fn parse_match_id(raw: &str) -> Result<MatchId> {
    let (source, ordinal) = raw
        .rsplit_once('#')
        .ok_or_else(|| anyhow!("match id '{raw}' must look like <source>#<ordinal>"))?;
    let ordinal = ordinal
        .parse()
        .with_context(|| format!("match id '{raw}' has a bad ordinal"))?;
    Ok(MatchId::new(source, ordinal))
}

fn decisions_for(args: &ReconcileArgs, scan: &ReconcileScan) -> Result<ReconcileDecisions> {
    let mut decisions = ReconcileDecisions::accept_all(scan);
    for raw in &args.reject {
        let id = parse_match_id(raw)?;
        decisions.set(&id, false)?;
    }
    for source in &args.reject_source {
        if decisions.set_source(&source.to_string(), false) == 0 {
            lore_warn!("--reject-source {} matched nothing", source);
        }
    }
    Ok(decisions)
}

/// Runs one reconciliation and returns the sources that were rewritten.
pub fn run(args: &ReconcileArgs, settings: &ReconcileSettings) -> Result<Vec<ReconciledSource>> {
    let loaded = load_sources(&args.files)?;
    let sources: Vec<TextSource> = loaded.iter().map(|l| l.source.clone()).collect();
    let scan = reconcile::scan(&sources, &args.find, settings.context_chars)?;

    for (group, file) in scan.groups.iter().zip(&loaded) {
        println!(
            "[{}] {} ({}): {} matches",
            group.source_id,
            file.path.display(),
            group.kind,
            group.matches.len()
        );
        for instance in &group.matches {
            println!(
                "  {:<6} ...{}[{}]{}...",
                instance.id.to_string(),
                instance.context_before,
                instance.matched_text,
                instance.context_after
            );
        }
    }
    if scan.total_matches() == 0 {
        println!("'{}' does not occur in any source", args.find);
        return Ok(Vec::new());
    }

    let decisions = decisions_for(args, &scan)?;
    let rewritten = reconcile::apply(
        &sources,
        &scan,
        &decisions,
        &args.replace,
        &WhitespaceWordCounter,
    )?;

    for source in &rewritten {
        let file = loaded
            .iter()
            .find(|l| l.source.id == source.source_id)
            .ok_or_else(|| anyhow!("rewritten source {} has no file", source.source_id))?;
        if args.dry_run {
            println!(
                "would rewrite {} ({} replacements, {} words)",
                file.path.display(),
                source.replaced,
                source.word_count
            );
        } else {
            write_atomic(&file.path, &source.text)
                .with_context(|| format!("failed to write {}", file.path.display()))?;
            lore_info!("rewrote {:?}", file.path);
            println!(
                "rewrote {} ({} replacements, {} words)",
                file.path.display(),
                source.replaced,
                source.word_count
            );
        }
    }
    println!(
        "{} of {} matches accepted; {} of {} sources rewritten",
        decisions.accepted_count(),
        scan.total_matches(),
        rewritten.len(),
        sources.len()
    );
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn reconcile_args(dir: &TempDir, files: &[(&str, &str)]) -> ReconcileArgs {
        let paths = files
            .iter()
            .map(|(name, text)| {
                let path = dir.path().join(name);
                fs::write(&path, text).unwrap();
                path
            })
            .collect();
        ReconcileArgs {
            find: "Elena".to_string(),
            replace: "Mira".to_string(),
            reject: Vec::new(),
            reject_source: Vec::new(),
            dry_run: false,
            files: paths,
        }
    }

    #[test]
    fn rejected_match_and_source_stay_untouched() {
        let dir = TempDir::new().unwrap();
        let mut args = reconcile_args(
            &dir,
            &[
                ("published.md", "Elena met Elena's sister"),
                ("draft.md", "Elena waited"),
                ("v1.md", "No one here"),
            ],
        );
        args.reject = vec!["1#0".to_string()];
        args.reject_source = vec![2];

        let rewritten = run(&args, &ReconcileSettings::default()).unwrap();

        assert_eq!(rewritten.len(), 1);
        assert_eq!(rewritten[0].word_count, 4);
        assert_eq!(
            fs::read_to_string(dir.path().join("published.md")).unwrap(),
            "Elena met Mira's sister"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("draft.md")).unwrap(),
            "Elena waited"
        );
    }

    #[test]
    fn dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut args = reconcile_args(&dir, &[("published.md", "Elena met Elena's sister")]);
        args.dry_run = true;

        let rewritten = run(&args, &ReconcileSettings::default()).unwrap();

        assert_eq!(rewritten[0].text, "Mira met Mira's sister");
        assert_eq!(
            fs::read_to_string(dir.path().join("published.md")).unwrap(),
            "Elena met Elena's sister"
        );
    }

    #[test]
    fn malformed_match_ids_are_errors() {
        assert!(parse_match_id("1-0").is_err());
        assert!(parse_match_id("1#x").is_err());
        assert_eq!(parse_match_id("2#3").unwrap(), MatchId::new("2", 3));
    }
}
