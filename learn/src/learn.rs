// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The refinement loop, and a batch mode that separates the models of a file.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use logic::{
    model::Model,
    parser::FolFile,
    semantics::check,
    syntax::{Formula, Signature},
};
use solver::{
    context::SolverContext,
    oracle::{EquivalenceOracle, OracleConf, OracleError, POSITIVE},
};
use thiserror::Error;

use crate::{
    separator::{flatten, ModelId, Separator},
    timer::{Timeout, Timer},
};

/// Limits and solver choice for a learning run.
#[derive(Debug, Clone)]
pub struct LearnConf {
    /// Largest number of top-level conjuncts in a hypothesis
    pub max_clauses: usize,
    /// Largest quantifier depth of a hypothesis
    pub max_depth: usize,
    /// Limit for the oracle queries, and separately for separation
    pub timeout: Option<Duration>,
    #[allow(missing_docs)]
    pub oracle: OracleConf,
}

impl Default for LearnConf {
    fn default() -> Self {
        Self {
            max_clauses: 10,
            max_depth: 3,
            timeout: None,
            oracle: OracleConf::default(),
        }
    }
}

/// Why a run failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The oracle or the separator ran out of time.
    #[error("timeout")]
    Timeout,
    /// No formula within the limits is consistent with the models.
    #[error("couldn't separate models under given restrictions")]
    CouldNotSeparate,
    /// A constraint names a label that no model has.
    #[error("no model labeled {0}")]
    UnknownLabel(String),
    /// The oracle failed, with its error.
    #[error("{0}")]
    Oracle(String),
}

impl From<Timeout> for Failure {
    fn from(_: Timeout) -> Self {
        Failure::Timeout
    }
}

impl From<OracleError> for Failure {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::Timeout => Failure::Timeout,
            err => Failure::Oracle(err.to_string()),
        }
    }
}

/// The outcome of a run.
#[derive(Debug, Clone)]
pub struct LearningResult {
    /// Whether `current` is the answer
    pub success: bool,
    /// The last hypothesis
    pub current: Formula,
    /// Time spent finding counterexamples
    pub counterexample_timer: Timer,
    /// Time spent separating
    pub separation_timer: Timer,
    /// Time spent evaluating candidates, part of `separation_timer`
    pub matrix_timer: Timer,
    /// Every model used, in the order they were found
    pub models: Vec<Arc<Model>>,
    #[allow(missing_docs)]
    pub reason: Option<Failure>,
    /// In batch mode, the label of each model and whether the result holds
    /// on it
    pub checks: Vec<(String, bool)>,
}

impl LearningResult {
    fn new(conf: &LearnConf) -> Self {
        Self {
            success: false,
            current: Formula::false_(),
            counterexample_timer: Timer::new(conf.timeout),
            separation_timer: Timer::new(conf.timeout),
            matrix_timer: Timer::unlimited(),
            models: vec![],
            reason: None,
            checks: vec![],
        }
    }

    fn fail(mut self, reason: impl Into<Failure>) -> Self {
        let reason = reason.into();
        log::info!("learning failed: {reason}");
        self.success = false;
        self.reason = Some(reason);
        self
    }
}

impl fmt::Display for LearningResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            None if self.success => writeln!(f, "success: {}", self.current)?,
            None => writeln!(f, "result: {}", self.current)?,
            Some(reason) => writeln!(f, "failure: {reason}")?,
        }
        writeln!(f, "models: {}", self.models.len())?;
        write!(
            f,
            "counterexamples: {}, separation: {} (matrix: {})",
            self.counterexample_timer, self.separation_timer, self.matrix_timer
        )
    }
}

/// Learn a formula equivalent to `target` under `axioms`, using the oracle
/// configured in `conf`.
pub fn learn(
    sig: &Arc<Signature>,
    axioms: &[Formula],
    target: &Formula,
    conf: &LearnConf,
    separator: &mut dyn Separator,
) -> LearningResult {
    let result = LearningResult::new(conf);
    let mut ctx = SolverContext::new(sig);
    for axiom in axioms {
        if let Err(err) = ctx.assert_formula(axiom) {
            return result.fail(OracleError::from(err));
        }
    }
    match conf.oracle.launch(ctx) {
        Ok(mut oracle) => learn_with_oracle(oracle.as_mut(), target, conf, separator),
        Err(err) => result.fail(err),
    }
}

/// Learn a formula equivalent to `target`, starting from `false`.
///
/// Each round asks `oracle` for a model that distinguishes the current
/// hypothesis from `target` and adds it to the positive or negative models
/// according to its label. The separator then proposes the next hypothesis.
pub fn learn_with_oracle(
    oracle: &mut dyn EquivalenceOracle,
    target: &Formula,
    conf: &LearnConf,
    separator: &mut dyn Separator,
) -> LearningResult {
    let mut result = LearningResult::new(conf);
    let mut pos: Vec<ModelId> = vec![];
    let mut neg: Vec<ModelId> = vec![];
    log::info!("learning {target}");
    loop {
        if let Err(err) = result.counterexample_timer.check_time() {
            return result.fail(err);
        }
        result.counterexample_timer.start();
        let deadline = result.counterexample_timer.deadline();
        let r = oracle.find_model_or_equivalence(&result.current, target, deadline);
        result.counterexample_timer.stop();
        if let Err(err) = result.counterexample_timer.check_time() {
            return result.fail(err);
        }
        let model = match r {
            Ok(None) => {
                log::info!("found equivalent formula {}", result.current);
                result.success = true;
                return result;
            }
            Ok(Some(model)) => Arc::new(model),
            Err(err) => return result.fail(err),
        };
        log::debug!("counterexample:\n{model}");
        let id = separator.add_model(model.clone());
        if model.label == POSITIVE {
            pos.push(id);
        } else {
            neg.push(id);
        }
        result.models.push(model);

        result.separation_timer.start();
        let r = separator.separate(
            &pos,
            &neg,
            &[],
            conf.max_clauses,
            conf.max_depth,
            &mut result.separation_timer,
            &mut result.matrix_timer,
        );
        result.separation_timer.stop();
        match r {
            Ok(Some(f)) => {
                result.current = flatten(f);
                log::info!(
                    "hypothesis after {} models: {}",
                    result.models.len(),
                    result.current
                );
            }
            Ok(None) => return result.fail(Failure::CouldNotSeparate),
            Err(err) => return result.fail(err),
        }
    }
}

/// Separate the models of `file` according to its constraints, in a single
/// pass with no oracle.
pub fn separate(file: &FolFile, conf: &LearnConf, separator: &mut dyn Separator) -> LearningResult {
    let mut result = LearningResult::new(conf);
    // a constraint on a label applies to every model with that label
    let mut ids: HashMap<&str, Vec<ModelId>> = HashMap::new();
    for model in &file.models {
        let label = model.label.as_str();
        let model = Arc::new(model.clone());
        let id = separator.add_model(model.clone());
        result.models.push(model);
        ids.entry(label).or_default().push(id);
    }
    let (pos, neg, imp) = match resolve_constraints(file, &ids) {
        Ok(c) => c,
        Err(err) => return result.fail(err),
    };

    result.separation_timer.start();
    let r = separator.separate(
        &pos,
        &neg,
        &imp,
        conf.max_clauses,
        conf.max_depth,
        &mut result.separation_timer,
        &mut result.matrix_timer,
    );
    result.separation_timer.stop();
    match r {
        Ok(Some(f)) => {
            result.current = flatten(f);
            result.success = true;
            log::info!("separated with {}", result.current);
        }
        Ok(None) => return result.fail(Failure::CouldNotSeparate),
        Err(err) => return result.fail(err),
    }

    for model in &result.models {
        let holds = match check(&result.current, model) {
            Ok(b) => b,
            Err(err) => {
                log::warn!("could not evaluate result on {}: {err}", model.label);
                false
            }
        };
        log::info!("check {}: {holds}", model.label);
        result.checks.push((model.label.clone(), holds));
    }
    result
}

fn resolve_constraints(
    file: &FolFile,
    ids: &HashMap<&str, Vec<ModelId>>,
) -> Result<(Vec<ModelId>, Vec<ModelId>, Vec<(ModelId, ModelId)>), Failure> {
    let mut pos = vec![];
    for label in &file.constraint_pos {
        pos.extend_from_slice(models_labeled(ids, label)?);
    }
    let mut neg = vec![];
    for label in &file.constraint_neg {
        neg.extend_from_slice(models_labeled(ids, label)?);
    }
    let mut imp = vec![];
    for (a, b) in &file.constraint_imp {
        let (a, b) = (models_labeled(ids, a)?, models_labeled(ids, b)?);
        imp.extend(a.iter().flat_map(|&i| b.iter().map(move |&j| (i, j))));
    }
    Ok((pos, neg, imp))
}

fn models_labeled<'a>(
    ids: &'a HashMap<&str, Vec<ModelId>>,
    label: &str,
) -> Result<&'a [ModelId], Failure> {
    ids.get(label)
        .map(|ms| ms.as_slice())
        .ok_or_else(|| Failure::UnknownLabel(label.to_string()))
}
