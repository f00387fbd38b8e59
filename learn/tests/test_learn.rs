// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

use std::{
    process::{Command, Stdio},
    sync::Arc,
    time::{Duration, Instant},
};

use eyre::{eyre, Context};
use learn::{
    learn::{learn, learn_with_oracle, separate, Failure, LearnConf},
    separator::CandidateSeparator,
};
use logic::{
    model::Model,
    parser::{parse_file, parse_formula, parse_model, parse_signature},
    semantics::check,
    syntax::{Formula, Signature},
};
use solver::{
    oracle::{Answer, Backend, OracleBackend, OracleError},
    solver_path,
};
use test_log::test;

const GRAPH_SIG: &str = "(sort node) (relation edge node node)";
const IRREFLEXIVE: &str = "(forall x node (not (edge x x)))";
const ANTISYMMETRIC: &str =
    "(forall x node (forall y node (or (not (edge x y)) (not (edge y x)))))";

fn formula(text: &str) -> Formula {
    parse_formula(text)
        .wrap_err_with(|| format!("could not parse {text}"))
        .unwrap()
}

fn graph_candidates() -> CandidateSeparator {
    CandidateSeparator::new(
        [
            "(forall x node (forall y node (not (edge x y))))",
            ANTISYMMETRIC,
            IRREFLEXIVE,
            "(exists x node (exists y node (edge x y)))",
            "(forall x node (exists y node (edge x y)))",
        ]
        .iter()
        .map(|f| formula(f))
        .collect(),
    )
}

/// An oracle that only knows about a fixed set of models.
struct ModelPool(Vec<Model>);

impl Backend for ModelPool {
    fn entails_not(
        &mut self,
        a: &Formula,
        b: &Formula,
        _deadline: Option<Instant>,
    ) -> Result<Answer, OracleError> {
        for m in &self.0 {
            if check(a, m) == Ok(true) && check(b, m) == Ok(false) {
                return Ok(Answer::Sat(m.clone()));
            }
        }
        Ok(Answer::Unsat)
    }
}

/// Every irreflexive graph with one or two nodes.
fn irreflexive_graphs(sig: &Arc<Signature>) -> ModelPool {
    let texts = [
        "(model g ((a node)))",
        "(model g ((a node) (b node)))",
        "(model g ((a node) (b node)) (edge a b))",
        "(model g ((a node) (b node)) (edge b a))",
        "(model g ((a node) (b node)) (edge a b) (edge b a))",
    ];
    ModelPool(
        texts
            .iter()
            .map(|t| parse_model(sig, t).unwrap())
            .collect(),
    )
}

#[test]
fn learn_antisymmetric_from_model_pool() {
    let sig = Arc::new(parse_signature(GRAPH_SIG).unwrap());
    let mut oracle = irreflexive_graphs(&sig);
    let target = formula(ANTISYMMETRIC);
    let result = learn_with_oracle(
        &mut oracle,
        &target,
        &LearnConf::default(),
        &mut graph_candidates(),
    );
    assert!(result.success, "{result}");
    assert_eq!(result.current, target);
    assert_eq!(result.reason, None);
    let labels: Vec<&str> = result.models.iter().map(|m| m.label.as_str()).collect();
    assert_eq!(labels, vec!["+", "-", "+"]);
}

#[test]
fn learn_without_quantifiers_cannot_separate() {
    let sig = Arc::new(parse_signature(GRAPH_SIG).unwrap());
    let mut oracle = irreflexive_graphs(&sig);
    let conf = LearnConf {
        max_depth: 0,
        ..LearnConf::default()
    };
    let result = learn_with_oracle(
        &mut oracle,
        &formula(ANTISYMMETRIC),
        &conf,
        &mut graph_candidates(),
    );
    assert!(!result.success);
    assert_eq!(result.reason, Some(Failure::CouldNotSeparate));
    assert_eq!(
        result.reason.unwrap().to_string(),
        "couldn't separate models under given restrictions"
    );
    // true separates the first model, but nothing rules out the second
    let labels: Vec<&str> = result.models.iter().map(|m| m.label.as_str()).collect();
    assert_eq!(labels, vec!["+", "-"]);
    assert_eq!(result.current, Formula::true_());
}

#[test]
fn learn_with_expired_timeout() {
    let sig = Arc::new(parse_signature(GRAPH_SIG).unwrap());
    let mut oracle = irreflexive_graphs(&sig);
    let conf = LearnConf {
        timeout: Some(Duration::ZERO),
        ..LearnConf::default()
    };
    let result = learn_with_oracle(
        &mut oracle,
        &formula(ANTISYMMETRIC),
        &conf,
        &mut graph_candidates(),
    );
    assert!(!result.success);
    assert_eq!(result.reason.map(|r| r.to_string()).as_deref(), Some("timeout"));
    assert!(result.models.is_empty());
}

/// Answers like the pool it wraps, but only after a delay.
struct SlowPool(ModelPool, Duration);

impl Backend for SlowPool {
    fn entails_not(
        &mut self,
        a: &Formula,
        b: &Formula,
        deadline: Option<Instant>,
    ) -> Result<Answer, OracleError> {
        std::thread::sleep(self.1);
        self.0.entails_not(a, b, deadline)
    }
}

#[test]
fn learn_discards_late_counterexample() {
    let sig = Arc::new(parse_signature(GRAPH_SIG).unwrap());
    let mut oracle = SlowPool(irreflexive_graphs(&sig), Duration::from_millis(50));
    let conf = LearnConf {
        timeout: Some(Duration::from_millis(10)),
        ..LearnConf::default()
    };
    let result = learn_with_oracle(
        &mut oracle,
        &formula(ANTISYMMETRIC),
        &conf,
        &mut graph_candidates(),
    );
    assert!(!result.success);
    assert_eq!(result.reason, Some(Failure::Timeout));
    assert!(result.models.is_empty());
}

const EXISTS_P: &str = "
(sort elem)
(relation p elem)

(model pos ((e0 elem) (e1 elem))
  (p e1))
(model neg ((e0 elem) (e1 elem)))

(constraint pos (not neg))
";

fn p_candidates() -> CandidateSeparator {
    CandidateSeparator::new(
        [
            "(forall x elem (p x))",
            "(forall x elem (not (p x)))",
            "(exists x elem (p x))",
            "(exists x elem (not (p x)))",
        ]
        .iter()
        .map(|f| formula(f))
        .collect(),
    )
}

#[test]
fn separate_exists_p() -> eyre::Result<()> {
    let file = parse_file(EXISTS_P).wrap_err("could not parse file")?;
    let result = separate(&file, &LearnConf::default(), &mut p_candidates());
    if !result.success {
        return Err(eyre!("separation failed: {result}"));
    }
    insta::assert_display_snapshot!(result.current, @"(exists x elem (p x))");
    assert_eq!(
        result.checks,
        vec![("pos".to_string(), true), ("neg".to_string(), false)]
    );
    Ok(())
}

#[test]
fn separate_unknown_label() {
    let text = EXISTS_P.replace("(not neg)", "(not missing)");
    let file = parse_file(&text).unwrap();
    let result = separate(&file, &LearnConf::default(), &mut p_candidates());
    assert!(!result.success);
    assert_eq!(
        result.reason,
        Some(Failure::UnknownLabel("missing".to_string()))
    );
    assert!(result.checks.is_empty());
}

#[test]
fn separate_constrains_every_model_with_a_label() {
    let text = "
(sort elem)
(relation p elem)

(model pos ((e0 elem)))
(model pos ((e0 elem)) (p e0))
(model neg ((e0 elem) (e1 elem)) (p e0))

(constraint pos (not neg))
";
    let file = parse_file(text).unwrap();
    let result = separate(&file, &LearnConf::default(), &mut p_candidates());
    // no candidate holds on both positive models
    assert!(!result.success);
    assert_eq!(result.reason, Some(Failure::CouldNotSeparate));

    let text = "
(sort elem)
(relation p elem)

(model pos ((e0 elem)) (p e0))
(model pos ((e0 elem) (e1 elem)) (p e1))
(model neg ((e0 elem)))
(model neg ((e0 elem) (e1 elem)))

(constraint pos (not neg))
";
    let file = parse_file(text).unwrap();
    let result = separate(&file, &LearnConf::default(), &mut p_candidates());
    assert!(result.success, "{result}");
    assert_eq!(result.current, formula("(exists x elem (p x))"));
    assert_eq!(
        result.checks,
        vec![
            ("pos".to_string(), true),
            ("pos".to_string(), true),
            ("neg".to_string(), false),
            ("neg".to_string(), false),
        ]
    );
}

fn installed(bin: &str, version_flag: &str) -> bool {
    let ok = Command::new(solver_path(bin))
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok();
    if !ok {
        eprintln!("could not find {bin}, skipping test");
    }
    ok
}

fn learn_graph(backend: OracleBackend, max_depth: usize) -> learn::learn::LearningResult {
    let sig = Arc::new(parse_signature(GRAPH_SIG).unwrap());
    let conf = LearnConf {
        max_depth,
        oracle: solver::oracle::OracleConf {
            backend,
            tee: None,
        },
        ..LearnConf::default()
    };
    learn(
        &sig,
        &[formula(IRREFLEXIVE)],
        &formula(ANTISYMMETRIC),
        &conf,
        &mut graph_candidates(),
    )
}

#[test]
fn learn_antisymmetric_z3() {
    if !installed("z3", "-version") {
        return;
    }
    let result = learn_graph(OracleBackend::Z3, 3);
    assert!(result.success, "{result}");
    assert_eq!(result.current, formula(ANTISYMMETRIC));
    // every counterexample is labeled by the side it satisfies
    let target = formula(ANTISYMMETRIC);
    for m in &result.models {
        assert_eq!(check(&target, m), Ok(m.label == "+"), "{m}");
    }
}

#[test]
fn learn_antisymmetric_z3_depth_zero() {
    if !installed("z3", "-version") {
        return;
    }
    let result = learn_graph(OracleBackend::Z3, 0);
    assert!(!result.success);
    assert_eq!(result.reason, Some(Failure::CouldNotSeparate));
    assert_eq!(result.models.len(), 2);
}

#[test]
fn learn_antisymmetric_cvc5() {
    if !installed("cvc5", "--version") {
        return;
    }
    let result = learn_graph(OracleBackend::Cvc5, 3);
    assert!(result.success, "{result}");
    assert_eq!(result.current, formula(ANTISYMMETRIC));
}
