// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Find formulas that separate labeled models.

use std::sync::Arc;

use logic::{model::Model, semantics::check, syntax::Formula};

use crate::timer::{Timeout, Timer};

/// Identifies a model registered with a [`Separator`].
pub type ModelId = usize;

/// A search for formulas that hold on some models and not others.
pub trait Separator {
    /// Register a model, which is never modified afterward.
    fn add_model(&mut self, model: Arc<Model>) -> ModelId;

    /// Find a formula true on every model in `pos`, false on every model in
    /// `neg`, and true on `b` whenever it is true on `a` for `(a, b)` in
    /// `imp`. The formula has at most `max_clauses` top-level conjuncts and
    /// at most `max_depth` nested quantifiers.
    ///
    /// Returns `Ok(None)` if there is no such formula within these limits.
    /// `timer` bounds the search; `matrix_timer` measures the part of it
    /// spent evaluating candidates on models.
    #[allow(clippy::too_many_arguments)]
    fn separate(
        &mut self,
        pos: &[ModelId],
        neg: &[ModelId],
        imp: &[(ModelId, ModelId)],
        max_clauses: usize,
        max_depth: usize,
        timer: &mut Timer,
        matrix_timer: &mut Timer,
    ) -> Result<Option<Formula>, Timeout>;
}

/// A separator that builds conjunctions from a fixed pool of candidate
/// formulas.
///
/// Like Houdini, it first drops every candidate that is false on a positive
/// model (or that would break an implication), which leaves the strongest
/// conjunction consistent with the positive models. It then greedily picks
/// the candidates that rule out the most negative models.
pub struct CandidateSeparator {
    candidates: Vec<Formula>,
    models: Vec<Arc<Model>>,
    /// `matrix[m][c]` is the value of candidate `c` on model `m`, or `None`
    /// if the candidate could not be evaluated there.
    matrix: Vec<Vec<Option<bool>>>,
}

impl CandidateSeparator {
    #[allow(missing_docs)]
    pub fn new(candidates: Vec<Formula>) -> Self {
        log::info!("separating with {} candidates", candidates.len());
        for c in &candidates {
            log::debug!("    {c}");
        }
        Self {
            candidates,
            models: vec![],
            matrix: vec![],
        }
    }

    /// Evaluate every candidate on the models added since the last call.
    fn fill_matrix(&mut self, timer: &Timer, matrix_timer: &mut Timer) -> Result<(), Timeout> {
        matrix_timer.start();
        while self.matrix.len() < self.models.len() {
            if let Err(err) = timer.check_time() {
                matrix_timer.stop();
                return Err(err);
            }
            let model = &self.models[self.matrix.len()];
            let row = self
                .candidates
                .iter()
                .map(|c| match check(c, model) {
                    Ok(b) => Some(b),
                    Err(err) => {
                        log::warn!("could not evaluate {c} on model {}: {err}", model.label);
                        None
                    }
                })
                .collect();
            self.matrix.push(row);
        }
        matrix_timer.stop();
        Ok(())
    }

    fn holds(&self, m: ModelId, c: usize) -> bool {
        self.matrix[m][c] == Some(true)
    }

    fn all_hold(&self, m: ModelId, cs: &[usize]) -> bool {
        cs.iter().all(|&c| self.holds(m, c))
    }
}

impl Separator for CandidateSeparator {
    fn add_model(&mut self, model: Arc<Model>) -> ModelId {
        self.models.push(model);
        self.models.len() - 1
    }

    fn separate(
        &mut self,
        pos: &[ModelId],
        neg: &[ModelId],
        imp: &[(ModelId, ModelId)],
        max_clauses: usize,
        max_depth: usize,
        timer: &mut Timer,
        matrix_timer: &mut Timer,
    ) -> Result<Option<Formula>, Timeout> {
        self.fill_matrix(timer, matrix_timer)?;

        let mut alive: Vec<usize> = (0..self.candidates.len())
            .filter(|&c| self.candidates[c].quantifier_depth() <= max_depth)
            .filter(|&c| pos.iter().all(|&m| self.holds(m, c)))
            .collect();
        if alive.is_empty() && !neg.is_empty() {
            log::debug!("no candidate within depth {max_depth} holds on the positive models");
            return Ok(None);
        }
        // if the conjunction holds at a, it must also hold at b
        loop {
            timer.check_time()?;
            let before = alive.len();
            for &(a, b) in imp {
                if self.all_hold(a, &alive) {
                    alive.retain(|&c| self.holds(b, c));
                }
            }
            if alive.len() == before {
                break;
            }
        }
        if let Some(&m) = neg.iter().find(|&&m| self.all_hold(m, &alive)) {
            log::debug!("negative model {m} satisfies every remaining candidate");
            return Ok(None);
        }

        let mut chosen: Vec<usize> = vec![];
        let mut uncovered: Vec<ModelId> = neg.to_vec();
        while !uncovered.is_empty() {
            timer.check_time()?;
            let best = alive
                .iter()
                .copied()
                .filter(|c| !chosen.contains(c))
                .max_by_key(|&c| {
                    // prefer earlier candidates on ties
                    let excluded = uncovered.iter().filter(|&&m| !self.holds(m, c)).count();
                    (excluded, std::cmp::Reverse(c))
                })
                .expect("every negative model is ruled out by some candidate");
            uncovered.retain(|&m| self.holds(m, best));
            chosen.push(best);
        }
        // a conjunction of fewer candidates may break an implication whose
        // left side is excluded only by the others
        while let Some(&(a, _)) = imp
            .iter()
            .find(|&&(a, b)| self.all_hold(a, &chosen) && !self.all_hold(b, &chosen))
        {
            timer.check_time()?;
            let c = alive
                .iter()
                .copied()
                .find(|&c| !self.holds(a, c))
                .expect("the remaining candidates respect every implication");
            chosen.push(c);
        }
        if chosen.len() > max_clauses {
            log::debug!(
                "separation needs {} clauses, more than {max_clauses}",
                chosen.len()
            );
            return Ok(None);
        }
        chosen.sort();
        Ok(Some(Formula::and(
            chosen.into_iter().map(|c| self.candidates[c].clone()),
        )))
    }
}

/// Simplify a conjunction of one formula to the formula itself.
pub fn flatten(f: Formula) -> Formula {
    match f {
        Formula::And(mut fs) if fs.len() == 1 => fs.remove(0),
        f => f,
    }
}
