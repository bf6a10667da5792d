//! Typed conditional probability tables.
//!
//! Storage is flat: the conditional distribution for parent combination
//! `c` occupies `values[c * n_states .. (c + 1) * n_states]`. Parent
//! combinations enumerate in mixed-radix order with the LAST parent
//! varying fastest, and model files list their columns in that same
//! order. Every shape and normalization rule is enforced in [`Cpt::new`];
//! a constructed table can always be evaluated.

use thiserror::Error;

/// Slack allowed when a distribution must sum to 1.0.
pub const PROB_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum CptError {
    #[error("cpt needs at least two child states, got {0}")]
    TooFewStates(usize),

    #[error("cpt parent {position} has cardinality {got}, minimum is 2")]
    ParentCardinality { position: usize, got: usize },

    #[error(
        "cpt shape mismatch: parent cardinalities require {expected_cols} columns \
         ({expected_values} values), got {got_values} values ({got_cols} columns)"
    )]
    Shape {
        expected_cols: usize,
        expected_values: usize,
        got_cols: usize,
        got_values: usize,
    },

    #[error("cpt combination space overflows: {0} parents")]
    ComboOverflow(usize),

    #[error("cpt value at index {index} is {value}, outside [0, 1]")]
    Entry { index: usize, value: f64 },

    #[error("cpt column {combo} sums to {sum:.9}, expected 1.0")]
    ColumnSum { combo: usize, sum: f64 },
}

/// A validated conditional probability table.
#[derive(Debug, Clone, PartialEq)]
pub struct Cpt {
    n_states: usize,
    parent_cards: Vec<usize>,
    n_combos: usize,
    values: Vec<f64>,
}

impl Cpt {
    /// Build and validate a table.
    ///
    /// `parent_cards` lists parent state counts in parent declaration
    /// order; `values` holds `Π cards` columns of `n_states` entries each.
    pub fn new(
        n_states: usize,
        parent_cards: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, CptError> {
        if n_states < 2 {
            return Err(CptError::TooFewStates(n_states));
        }
        for (position, &card) in parent_cards.iter().enumerate() {
            if card < 2 {
                return Err(CptError::ParentCardinality { position, got: card });
            }
        }
        let n_combos = parent_cards
            .iter()
            .try_fold(1usize, |acc, &card| acc.checked_mul(card))
            .ok_or(CptError::ComboOverflow(parent_cards.len()))?;
        let expected_values = n_combos
            .checked_mul(n_states)
            .ok_or(CptError::ComboOverflow(parent_cards.len()))?;
        if values.len() != expected_values {
            return Err(CptError::Shape {
                expected_cols: n_combos,
                expected_values,
                got_cols: values.len() / n_states,
                got_values: values.len(),
            });
        }
        for (index, &value) in values.iter().enumerate() {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(CptError::Entry { index, value });
            }
        }
        for combo in 0..n_combos {
            let sum: f64 = values[combo * n_states..(combo + 1) * n_states].iter().sum();
            if (sum - 1.0).abs() > PROB_TOLERANCE {
                return Err(CptError::ColumnSum { combo, sum });
            }
        }
        Ok(Self {
            n_states,
            parent_cards,
            n_combos,
            values,
        })
    }

    /// A parentless table: the single column is the node's distribution.
    pub fn root(distribution: Vec<f64>) -> Result<Self, CptError> {
        Self::new(distribution.len(), Vec::new(), distribution)
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    pub fn parent_cards(&self) -> &[usize] {
        &self.parent_cards
    }

    pub fn n_combos(&self) -> usize {
        self.n_combos
    }

    /// The conditional distribution for one parent combination.
    pub fn column(&self, combo: usize) -> &[f64] {
        &self.values[combo * self.n_states..(combo + 1) * self.n_states]
    }

    pub fn value(&self, combo: usize, state: usize) -> f64 {
        self.values[combo * self.n_states + state]
    }

    /// Mixed-radix encode of per-parent states (last parent fastest).
    /// Returns None when a state is out of range for its parent.
    pub fn combo_index(&self, parent_states: &[usize]) -> Option<usize> {
        if parent_states.len() != self.parent_cards.len() {
            return None;
        }
        let mut index = 0usize;
        for (&state, &card) in parent_states.iter().zip(&self.parent_cards) {
            if state >= card {
                return None;
            }
            index = index * card + state;
        }
        Some(index)
    }

    /// Inverse of [`combo_index`]: per-parent states for a combination.
    ///
    /// [`combo_index`]: Cpt::combo_index
    pub fn decode_combo(&self, combo: usize) -> Vec<usize> {
        let mut states = vec![0usize; self.parent_cards.len()];
        let mut rest = combo;
        for (pos, &card) in self.parent_cards.iter().enumerate().rev() {
            states[pos] = rest % card;
            rest /= card;
        }
        states
    }
}
