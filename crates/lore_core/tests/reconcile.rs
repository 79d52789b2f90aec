use lore_core::reconcile::{self, replace_at, DEFAULT_CONTEXT_CHARS};
use lore_core::{
    MatchId, ReconcileDecisions, ReconcileError, SourceKind, TextSource, WhitespaceWordCounter,
};
use pretty_assertions::assert_eq;

fn source(id: &str, kind: SourceKind, text: &str) -> TextSource {
    TextSource::new(id, kind, text)
}

#[test]
fn scenario_accepting_only_the_second_match() {
    let sources = vec![source("s1", SourceKind::Draft, "Elena met Elena's sister")];
    let scan = reconcile::scan(&sources, "Elena", DEFAULT_CONTEXT_CHARS).unwrap();

    let positions: Vec<usize> = scan.matches().map(|m| m.position).collect();
    assert_eq!(positions, vec![0, 10]);

    let mut decisions = ReconcileDecisions::accept_all(&scan);
    decisions.set(&MatchId::new("s1", 0), false).unwrap();
    let out =
        reconcile::apply(&sources, &scan, &decisions, "Mira", &WhitespaceWordCounter).unwrap();
    assert_eq!(out[0].text, "Elena met Mira's sister");
    assert_eq!(out[0].replaced, 1);

    decisions.set_all(true);
    let out =
        reconcile::apply(&sources, &scan, &decisions, "Mira", &WhitespaceWordCounter).unwrap();
    assert_eq!(out[0].text, "Mira met Mira's sister");
    assert_eq!(out[0].word_count, 4);
}

#[test]
fn empty_search_is_rejected() {
    let sources = vec![source("s1", SourceKind::Draft, "anything")];
    assert_eq!(
        reconcile::scan(&sources, "", 10),
        Err(ReconcileError::EmptySearch)
    );
}

#[test]
fn duplicate_source_ids_are_rejected() {
    let sources = vec![
        source("s1", SourceKind::Published, "a"),
        source("s1", SourceKind::Draft, "a"),
    ];
    assert_eq!(
        reconcile::scan(&sources, "a", 10),
        Err(ReconcileError::DuplicateSource("s1".into()))
    );
}

#[test]
fn scan_advances_past_each_match() {
    let sources = vec![source("s1", SourceKind::Draft, "aaaaa")];
    let scan = reconcile::scan(&sources, "aa", 2).unwrap();
    let positions: Vec<usize> = scan.matches().map(|m| m.position).collect();
    assert_eq!(positions, vec![0, 2]);
}

#[test]
fn context_windows_are_bounded_and_char_safe() {
    let sources = vec![source("s1", SourceKind::Draft, "héllo wörld Elena ünd more")];
    let scan = reconcile::scan(&sources, "Elena", 4).unwrap();
    let m = scan.matches().next().unwrap();

    assert_eq!(m.context_before, "rld ");
    assert_eq!(m.matched_text, "Elena");
    assert_eq!(m.context_after, " ünd");
    assert_eq!(m.char_position, 12);
    assert_eq!(&sources[0].text[m.position..m.position + 5], "Elena");
}

#[test]
fn descending_apply_matches_live_rescan_for_any_replacement_length() {
    let text = "the cat sat with a cat on the cat mat";
    for replacement in ["", "d", "dog", "tiger"] {
        let sources = vec![source("s1", SourceKind::Draft, text)];
        let scan = reconcile::scan(&sources, "cat", 8).unwrap();
        let decisions = ReconcileDecisions::accept_all(&scan);
        let batched =
            reconcile::apply(&sources, &scan, &decisions, replacement, &WhitespaceWordCounter)
                .unwrap();

        // One edit at a time against the live string, re-scanning after each.
        let mut live = text.to_string();
        let mut from = 0;
        while let Some(relative) = live[from..].find("cat") {
            let position = from + relative;
            live.replace_range(position..position + 3, replacement);
            from = position + replacement.len();
        }

        assert_eq!(batched[0].text, live, "replacement {replacement:?}");
    }
}

#[test]
fn subset_apply_matches_one_at_a_time_edits() {
    let text = "Elena, Elena, Elena, Elena";
    let sources = vec![source("s1", SourceKind::Draft, text)];
    let scan = reconcile::scan(&sources, "Elena", 5).unwrap();
    let mut decisions = ReconcileDecisions::accept_all(&scan);
    decisions.toggle(&MatchId::new("s1", 1)).unwrap();
    decisions.toggle(&MatchId::new("s1", 3)).unwrap();

    let out = reconcile::apply(&sources, &scan, &decisions, "Anastasia", &WhitespaceWordCounter)
        .unwrap();
    assert_eq!(out[0].text, "Anastasia, Elena, Anastasia, Elena");
}

#[test]
fn rejected_source_is_left_untouched() {
    let sources = vec![
        source("published", SourceKind::Published, "Elena rides north."),
        source("draft", SourceKind::Draft, "Elena rides north. Elena rests."),
    ];
    let scan = reconcile::scan(&sources, "Elena", 10).unwrap();
    let mut decisions = ReconcileDecisions::accept_all(&scan);
    assert_eq!(decisions.set_source("published", false), 1);
    assert_eq!(decisions.accepted_in("draft"), 2);

    let out =
        reconcile::apply(&sources, &scan, &decisions, "Mira", &WhitespaceWordCounter).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].source_id, "draft");
    assert_eq!(out[0].text, "Mira rides north. Mira rests.");
    assert_eq!(sources[0].text, "Elena rides north.");
}

#[test]
fn identical_sources_are_reconciled_independently() {
    let text = "Elena and Elena";
    let sources = vec![
        source("draft", SourceKind::Draft, text),
        source("v3", SourceKind::Version(3), text),
    ];
    let scan = reconcile::scan(&sources, "Elena", 10).unwrap();
    assert_eq!(scan.total_matches(), 4);

    let mut decisions = ReconcileDecisions::accept_all(&scan);
    decisions.set(&MatchId::new("v3", 0), false).unwrap();
    let out =
        reconcile::apply(&sources, &scan, &decisions, "Mira", &WhitespaceWordCounter).unwrap();

    assert_eq!(out[0].text, "Mira and Mira");
    assert_eq!(out[1].text, "Elena and Mira");
}

#[test]
fn stale_source_is_reported_instead_of_corrupted() {
    let original = vec![source("s1", SourceKind::Draft, "Elena met Elena")];
    let scan = reconcile::scan(&original, "Elena", 10).unwrap();
    let decisions = ReconcileDecisions::accept_all(&scan);

    let edited = vec![source("s1", SourceKind::Draft, "Elen met Elena")];
    let err = reconcile::apply(&edited, &scan, &decisions, "Mira", &WhitespaceWordCounter)
        .unwrap_err();
    assert!(matches!(err, ReconcileError::StaleMatch { .. }));
}

#[test]
fn unknown_match_decision_is_an_error() {
    let sources = vec![source("s1", SourceKind::Draft, "Elena")];
    let scan = reconcile::scan(&sources, "Elena", 10).unwrap();
    let mut decisions = ReconcileDecisions::accept_all(&scan);
    assert_eq!(
        decisions.set(&MatchId::new("s1", 9), false),
        Err(ReconcileError::UnknownMatch(MatchId::new("s1", 9)))
    );
}

#[test]
fn replace_at_rejects_overlapping_positions() {
    assert_eq!(replace_at("aaa", "aa", "b", &[0, 1]), Err(0));
    assert_eq!(replace_at("abab", "ab", "x", &[2, 0]), Ok("xx".to_string()));
}

#[test]
fn fresh_decisions_accept_every_scanned_match() {
    let sources = vec![
        source("1", SourceKind::Published, "Elena and Elena"),
        source("2", SourceKind::Version(1), "only Elena"),
    ];
    let scan = reconcile::scan(&sources, "Elena", DEFAULT_CONTEXT_CHARS).unwrap();
    let decisions = ReconcileDecisions::accept_all(&scan);

    assert!(scan.matches().all(|m| decisions.is_accepted(&m.id)));
    assert_eq!(decisions.accepted_count(), 3);
    assert_eq!(decisions.accepted_in("1"), 2);
    assert!(!decisions.is_accepted(&MatchId::new("3", 0)));
}
