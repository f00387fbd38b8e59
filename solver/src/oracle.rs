// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Decide whether two formulas are equivalent under the axioms of a
//! [`SolverContext`], producing a labeled counterexample if they are not.

use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use logic::{model::Model, syntax::Formula};
use thiserror::Error;

use crate::{
    context::SolverContext,
    cvc::CvcOracle,
    models::EvalError,
    translate::TranslateError,
    z3::Z3Oracle,
    SolverError,
};

/// Label of a counterexample on which the current formula is false and the
/// target true (the current formula is too weak).
pub const POSITIVE: &str = "+";
/// Label of a counterexample on which the current formula is true and the
/// target false (the current formula is too strong).
pub const NEGATIVE: &str = "-";

/// An error from an equivalence query.
#[derive(Error, Debug)]
pub enum OracleError {
    /// Communicating with the solver failed.
    #[error(transparent)]
    Solver(#[from] SolverError),
    /// A formula could not be translated.
    #[error(transparent)]
    Translate(#[from] TranslateError),
    /// The solver's model could not be turned into a complete model.
    #[error(transparent)]
    Model(#[from] logic::model::ModelError),
    /// The solver's model definitions could not be evaluated.
    #[error(transparent)]
    Eval(#[from] EvalError),
    /// The solver answered neither sat nor unsat.
    #[error("solver was inconclusive: {0}")]
    Inconclusive(String),
    /// The query ran past its deadline.
    #[error("timeout")]
    Timeout,
}

/// The answer to whether `a` holds while `b` does not.
#[derive(Debug)]
pub enum Answer {
    /// `a` implies `b`.
    Unsat,
    /// A model of `a` and the negation of `b`, not yet labeled.
    Sat(Model),
    /// The solver gave up, with its reason.
    Unknown(String),
}

/// A solver that can check a single entailment.
pub trait Backend {
    /// Check whether `a ∧ ¬b` is satisfiable together with the axioms.
    fn entails_not(
        &mut self,
        a: &Formula,
        b: &Formula,
        deadline: Option<Instant>,
    ) -> Result<Answer, OracleError>;
}

/// Find counterexamples to the equivalence of a formula and a target.
pub trait EquivalenceOracle {
    /// Returns `None` if `current` and `target` are equivalent under the
    /// axioms. Otherwise returns a model on which they differ, labeled
    /// [`NEGATIVE`] if `current` holds there and [`POSITIVE`] if `target`
    /// does.
    fn find_model_or_equivalence(
        &mut self,
        current: &Formula,
        target: &Formula,
        deadline: Option<Instant>,
    ) -> Result<Option<Model>, OracleError>;
}

impl<B: Backend> EquivalenceOracle for B {
    fn find_model_or_equivalence(
        &mut self,
        current: &Formula,
        target: &Formula,
        deadline: Option<Instant>,
    ) -> Result<Option<Model>, OracleError> {
        let too_strong = self.entails_not(current, target, deadline)?;
        let too_weak = match too_strong {
            Answer::Sat(mut model) => {
                model.label = NEGATIVE.to_string();
                return Ok(Some(model));
            }
            Answer::Unsat => None,
            Answer::Unknown(reason) => Some(reason),
        };
        match self.entails_not(target, current, deadline)? {
            Answer::Sat(mut model) => {
                model.label = POSITIVE.to_string();
                Ok(Some(model))
            }
            Answer::Unsat if too_weak.is_none() => Ok(None),
            Answer::Unsat | Answer::Unknown(_) if past(deadline) => Err(OracleError::Timeout),
            Answer::Unsat => Err(OracleError::Inconclusive(too_weak.unwrap_or_default())),
            Answer::Unknown(reason) => Err(OracleError::Inconclusive(reason)),
        }
    }
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// The time left before `deadline` (`None` if there is no deadline), or a
/// timeout if it has passed.
pub(crate) fn remaining(deadline: Option<Instant>) -> Result<Option<Duration>, OracleError> {
    match deadline {
        None => Ok(None),
        Some(d) => match d.checked_duration_since(Instant::now()) {
            Some(left) if !left.is_zero() => Ok(Some(left)),
            _ => Err(OracleError::Timeout),
        },
    }
}

/// Which solver answers equivalence queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OracleBackend {
    /// An incremental Z3 session.
    #[default]
    Z3,
    /// One-shot CVC4 runs.
    Cvc4,
    /// One-shot CVC5 runs.
    Cvc5,
}

/// Configuration for launching an oracle.
#[derive(Debug, Clone, Default)]
pub struct OracleConf {
    #[allow(missing_docs)]
    pub backend: OracleBackend,
    /// A directory to save queries in, for debugging.
    pub tee: Option<PathBuf>,
}

impl OracleConf {
    /// Launch an oracle for the declarations and axioms of `ctx`.
    pub fn launch(&self, ctx: SolverContext) -> Result<Box<dyn EquivalenceOracle>, OracleError> {
        let tee = self.tee.as_deref();
        log::debug!("launching {:?} oracle", self.backend);
        Ok(match self.backend {
            OracleBackend::Z3 => Box::new(Z3Oracle::new(ctx, tee)?),
            OracleBackend::Cvc4 => Box::new(CvcOracle::new(ctx, false, tee)),
            OracleBackend::Cvc5 => Box::new(CvcOracle::new(ctx, true, tee)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Arc};

    use logic::{
        parser::{parse_formula, parse_model, parse_signature},
        syntax::Signature,
    };

    use super::*;

    /// Replays a fixed sequence of answers.
    struct Scripted(VecDeque<Answer>);

    impl Backend for Scripted {
        fn entails_not(
            &mut self,
            _a: &Formula,
            _b: &Formula,
            _deadline: Option<Instant>,
        ) -> Result<Answer, OracleError> {
            Ok(self.0.pop_front().expect("no more scripted answers"))
        }
    }

    fn sig() -> Arc<Signature> {
        Arc::new(parse_signature("(sort s) (relation p s)").unwrap())
    }

    fn model() -> Model {
        parse_model(&sig(), "(model a ((e s)) (p e))").unwrap()
    }

    fn find(answers: Vec<Answer>) -> Result<Option<Model>, OracleError> {
        let f = parse_formula("(forall x s (p x))").unwrap();
        Scripted(answers.into()).find_model_or_equivalence(&f, &f, None)
    }

    #[test]
    fn test_labels() {
        let m = find(vec![Answer::Sat(model())]).unwrap().unwrap();
        assert_eq!(m.label, NEGATIVE);
        let m = find(vec![Answer::Unsat, Answer::Sat(model())]).unwrap().unwrap();
        assert_eq!(m.label, POSITIVE);
        let m = find(vec![Answer::Unknown("incomplete".to_string()), Answer::Sat(model())])
            .unwrap()
            .unwrap();
        assert_eq!(m.label, POSITIVE);
    }

    #[test]
    fn test_equivalent() {
        assert!(find(vec![Answer::Unsat, Answer::Unsat]).unwrap().is_none());
    }

    #[test]
    fn test_inconclusive() {
        let r = find(vec![Answer::Unknown("incomplete".to_string()), Answer::Unsat]);
        assert!(
            matches!(&r, Err(OracleError::Inconclusive(reason)) if reason == "incomplete"),
            "{r:?}"
        );
        let r = find(vec![Answer::Unsat, Answer::Unknown("resource".to_string())]);
        assert!(matches!(r, Err(OracleError::Inconclusive(_))), "{r:?}");
    }

    #[test]
    fn test_remaining() {
        assert_eq!(remaining(None).unwrap(), None);
        let past = Instant::now() - Duration::from_millis(1);
        assert!(matches!(remaining(Some(past)), Err(OracleError::Timeout)));
        let later = Instant::now() + Duration::from_secs(60);
        assert!(remaining(Some(later)).unwrap().is_some());
    }
}
