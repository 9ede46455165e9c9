//! The ordered column list and its scores.
//!
//! Columns and scores live in a single sequence of [`RankedColumn`]s, so a
//! column can never lose or swap its score through an index mismatch.

use serde::{Deserialize, Serialize};

use crate::data::VariableId;

/// A visible column and its dependency score against the sort key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankedColumn {
    pub variable: VariableId,
    /// `None` until computed; otherwise in [0, 1].
    pub score: Option<f32>,
}

impl RankedColumn {
    pub fn new(variable: VariableId) -> Self {
        Self { variable, score: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreTable {
    columns: Vec<RankedColumn>,
}

impl ScoreTable {
    pub fn new(variables: impl IntoIterator<Item = VariableId>) -> Self {
        Self {
            columns: variables.into_iter().map(RankedColumn::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RankedColumn> {
        self.columns.iter()
    }

    pub fn as_slice(&self) -> &[RankedColumn] {
        &self.columns
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [RankedColumn] {
        &mut self.columns
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut RankedColumn> {
        self.columns.iter_mut()
    }

    pub fn variables(&self) -> Vec<VariableId> {
        self.columns.iter().map(|c| c.variable).collect()
    }

    pub fn position(&self, var: VariableId) -> Option<usize> {
        self.columns.iter().position(|c| c.variable == var)
    }

    pub fn contains(&self, var: VariableId) -> bool {
        self.position(var).is_some()
    }

    pub fn get(&self, var: VariableId) -> Option<&RankedColumn> {
        self.columns.iter().find(|c| c.variable == var)
    }

    /// Number of columns whose score is not computed yet.
    pub fn uncomputed(&self) -> usize {
        self.columns.iter().filter(|c| c.score.is_none()).count()
    }

    pub fn clear_scores(&mut self) {
        for column in &mut self.columns {
            column.score = None;
        }
    }

    /// Insert keeping natural (variable index) order; returns the position.
    pub(crate) fn insert_natural(&mut self, var: VariableId) -> usize {
        let idx = self
            .columns
            .iter()
            .position(|c| c.variable > var)
            .unwrap_or(self.columns.len());
        self.columns.insert(idx, RankedColumn::new(var));
        idx
    }

    /// Append with an uncomputed score; returns the position.
    pub(crate) fn push(&mut self, var: VariableId) -> usize {
        self.columns.push(RankedColumn::new(var));
        self.columns.len() - 1
    }

    pub(crate) fn remove(&mut self, var: VariableId) -> bool {
        match self.position(var) {
            Some(idx) => {
                self.columns.remove(idx);
                true
            }
            None => false,
        }
    }
}
