//! Grouping of classified commits into oracle work units.

use serde::Serialize;

use crate::models::CommitDiff;
use crate::pipeline::classify::{classify, Classification, ClassifierConfig};

pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Files per oracle call when a large commit is split.
const FILES_PER_SPLIT_CALL: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Single,
    Batch,
    Split,
}

/// One or more commits scored together.
#[derive(Debug, Clone)]
pub struct WorkUnit<'a> {
    pub kind: UnitKind,
    members: Vec<&'a CommitDiff>,
    pub classification: Classification,
}

impl<'a> WorkUnit<'a> {
    fn single(diff: &'a CommitDiff, classification: Classification) -> Self {
        Self {
            kind: UnitKind::Single,
            members: vec![diff],
            classification,
        }
    }

    /// Members are never empty.
    pub fn members(&self) -> &[&'a CommitDiff] {
        &self.members
    }

    pub fn needs_oracle(&self) -> bool {
        self.classification.is_scored()
    }

    /// Short label for progress output.
    pub fn label(&self) -> String {
        match self.members.as_slice() {
            [only] => format!("{} {}", only.commit.abbreviated_hash, only.commit.subject),
            members => format!("batch of {} commits", members.len()),
        }
    }
}

/// Group diffs into work units, preserving input order.
///
/// Small commits accumulate until `batch_size` of them can share one call;
/// a single leftover small commit is scored on its own as normal.
pub fn group_into_units<'a, I>(
    diffs: I,
    config: &ClassifierConfig,
    batch_size: usize,
) -> Vec<WorkUnit<'a>>
where
    I: IntoIterator<Item = &'a CommitDiff>,
{
    let batch_size = batch_size.max(1);
    let mut units = Vec::new();
    let mut pending: Vec<&'a CommitDiff> = Vec::new();

    for diff in diffs {
        let classification = classify(diff, config);
        match classification {
            Classification::Skipped | Classification::Mechanical | Classification::Normal => {
                units.push(WorkUnit::single(diff, classification));
            }
            Classification::Large => units.push(WorkUnit {
                kind: UnitKind::Split,
                members: vec![diff],
                classification,
            }),
            Classification::Small => {
                pending.push(diff);
                if pending.len() >= batch_size {
                    units.push(WorkUnit {
                        kind: UnitKind::Batch,
                        members: std::mem::take(&mut pending),
                        classification: Classification::Small,
                    });
                }
            }
        }
    }

    match pending.len() {
        0 => {}
        1 => units.push(WorkUnit::single(pending[0], Classification::Normal)),
        _ => units.push(WorkUnit {
            kind: UnitKind::Batch,
            members: pending,
            classification: Classification::Small,
        }),
    }

    units
}

/// Oracle calls needed for a list of units, as an upper bound.
///
/// Split units are charged one call per five files. Scoring currently sends a
/// large commit in a single call, so estimates run high for large commits.
pub fn estimate_llm_calls(units: &[WorkUnit]) -> usize {
    units
        .iter()
        .filter(|u| u.needs_oracle())
        .map(|unit| match unit.kind {
            UnitKind::Single | UnitKind::Batch => 1,
            UnitKind::Split => {
                let files = unit.members.iter().map(|m| m.files.len()).sum::<usize>();
                files.div_ceil(FILES_PER_SPLIT_CALL).max(1)
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{make_diff, make_diff_with_files};

    #[test]
    fn six_small_commits_form_batch_and_single() {
        let diffs: Vec<_> = (0..6)
            .map(|i| make_diff(&format!("s00000{}", i), "Fix typo", 2))
            .collect();

        let units = group_into_units(&diffs, &ClassifierConfig::default(), DEFAULT_BATCH_SIZE);

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].kind, UnitKind::Batch);
        assert_eq!(units[0].members().len(), 5);
        assert_eq!(units[0].classification, Classification::Small);
        assert_eq!(units[1].kind, UnitKind::Single);
        assert_eq!(units[1].classification, Classification::Normal);
        assert_eq!(units[1].members()[0].hash(), "s000005");
    }

    #[test]
    fn leftover_smalls_form_final_batch() {
        let diffs: Vec<_> = (0..3)
            .map(|i| make_diff(&format!("s00000{}", i), "Fix typo", 2))
            .collect();

        let units = group_into_units(&diffs, &ClassifierConfig::default(), DEFAULT_BATCH_SIZE);

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].kind, UnitKind::Batch);
        assert_eq!(units[0].members().len(), 3);
    }

    #[test]
    fn every_diff_lands_in_exactly_one_unit() {
        let mut diffs = vec![
            make_diff("m000001", "Merge branch 'main'", 10),
            make_diff("n000001", "Add parser", 120),
            make_diff("l000001", "Rewrite engine", 900),
            make_diff("c000001", "chore(deps): bump", 4),
        ];
        diffs[0].commit.parent_hashes = vec!["p1".into(), "p2".into()];
        for i in 0..7 {
            diffs.push(make_diff(&format!("s00000{}", i), "Tweak", 3));
        }

        let units = group_into_units(&diffs, &ClassifierConfig::default(), DEFAULT_BATCH_SIZE);

        let mut seen: Vec<&str> = units
            .iter()
            .flat_map(|u| u.members().iter().map(|d| d.hash()))
            .collect();
        let mut expected: Vec<&str> = diffs.iter().map(|d| d.hash()).collect();
        seen.sort();
        expected.sort();
        assert_eq!(seen, expected);
        assert!(units.iter().all(|u| !u.members().is_empty()));
    }

    #[test]
    fn unit_kinds_follow_classification() {
        let mut diffs = vec![
            make_diff("m000001", "Merge branch 'main'", 10),
            make_diff("n000001", "Add parser", 120),
            make_diff("l000001", "Rewrite engine", 900),
        ];
        diffs[0].commit.parent_hashes = vec!["p1".into(), "p2".into()];

        let units = group_into_units(&diffs, &ClassifierConfig::default(), DEFAULT_BATCH_SIZE);

        assert_eq!(units[0].classification, Classification::Skipped);
        assert_eq!(units[0].kind, UnitKind::Single);
        assert_eq!(units[1].classification, Classification::Normal);
        assert_eq!(units[2].kind, UnitKind::Split);
    }

    #[test]
    fn estimates_calls_per_unit_kind() {
        let mut diffs = vec![
            make_diff("m000001", "Merge branch 'main'", 10),
            make_diff("n000001", "Add parser", 120),
            make_diff_with_files("l000001", 12, 60),
        ];
        diffs[0].commit.parent_hashes = vec!["p1".into(), "p2".into()];
        for i in 0..5 {
            diffs.push(make_diff(&format!("s00000{}", i), "Tweak", 3));
        }

        let units = group_into_units(&diffs, &ClassifierConfig::default(), DEFAULT_BATCH_SIZE);

        // skipped 0 + normal 1 + split ceil(12/5)=3 + batch 1
        assert_eq!(estimate_llm_calls(&units), 5);
    }
}
