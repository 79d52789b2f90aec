use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Assignment, FieldWrite, Proposal, TargetId};

/// Field that carries a chronicle's assigned year.
pub const YEAR_FIELD: &str = "year";

/// Proposed placement of chronicles on the world timeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChronologyProposal {
    pub assignments: BTreeMap<TargetId, i32>,
}

impl ChronologyProposal {
    pub fn new(assignments: impl IntoIterator<Item = (TargetId, i32)>) -> Self {
        Self {
            assignments: assignments.into_iter().collect(),
        }
    }

    pub fn year_of(&self, chronicle_id: &str) -> Option<i32> {
        self.assignments.get(chronicle_id).copied()
    }

    /// One write per chronicle, in id order.
    pub fn field_writes(&self) -> Vec<FieldWrite> {
        self.assignments
            .iter()
            .map(|(id, year)| {
                FieldWrite::new(id.clone(), YEAR_FIELD, Assignment::Value(year.to_string()))
            })
            .collect()
    }
}

impl Proposal for ChronologyProposal {
    type Key = TargetId;
    type Value = i32;

    fn accepts_override(&self, key: &TargetId) -> bool {
        self.assignments.contains_key(key)
    }

    fn apply_override(&mut self, key: &TargetId, value: &i32) {
        if let Some(year) = self.assignments.get_mut(key) {
            *year = *value;
        }
    }
}
