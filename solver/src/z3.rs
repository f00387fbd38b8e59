// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The embedded backend: one incremental Z3 session per run.
//!
//! Declarations and axioms are sent once when the session starts. Each query
//! is checked inside a `push`/`pop` frame, and a satisfying model is minimized
//! by bounding the number of elements of every sort.

use std::{
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use logic::{
    model::Model,
    syntax::{Formula, RESERVED_PREFIX},
};
use smtlib::{
    conf::{SolverCmd, Z3Conf},
    proc::{SatResp, SmtProc, SolverError},
    sexp::{app, atom_s, sexp_l, Sexp},
};

use crate::{
    context::SolverContext,
    models::parse_z3,
    oracle::{remaining, Answer, Backend, OracleError},
    solver_path,
};

/// Largest number of elements per sort tried when minimizing a model.
const MAX_CARDINALITY: usize = 100000;

/// Extra time the solver gets to honor its own `:timeout` before it is killed.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Z3's `:timeout` for the time left before `deadline`.
fn timeout_ms(deadline: Option<Instant>) -> Result<usize, OracleError> {
    Ok(match remaining(deadline)? {
        // this is the default Z3 timeout
        None => 4294967295,
        Some(left) => (left.as_millis() as usize).max(1),
    })
}

/// An [`crate::oracle::EquivalenceOracle`] backed by an incremental Z3 process.
///
/// If a query has to be killed the session is dropped, and a new one is
/// started (and sent the declarations and axioms again) by the next query.
pub struct Z3Oracle {
    ctx: SolverContext,
    cmd: SolverCmd,
    tee: Option<PathBuf>,
    proc: Option<SmtProc>,
}

impl Z3Oracle {
    /// Start Z3 with the declarations and axioms of `ctx`.
    pub fn new(ctx: SolverContext, tee: Option<&Path>) -> Result<Self, SolverError> {
        let cmd = Z3Conf::new(&solver_path("z3")).done();
        let mut oracle = Self {
            ctx,
            cmd,
            tee: tee.map(|p| p.to_path_buf()),
            proc: None,
        };
        oracle.session()?;
        Ok(oracle)
    }

    fn session(&mut self) -> Result<&mut SmtProc, SolverError> {
        if self.proc.is_none() {
            log::debug!("starting {}", self.cmd.cmdline());
            let mut proc = SmtProc::new(self.cmd.clone(), self.tee.as_deref())?;
            for decl in self.ctx.declarations() {
                proc.send(&decl);
            }
            for axiom in self.ctx.assertions() {
                proc.assert(axiom);
            }
            self.proc = Some(proc);
        }
        Ok(self.proc.as_mut().expect("session was just started"))
    }

    fn query(
        proc: &mut SmtProc,
        ctx: &SolverContext,
        deadline: Option<Instant>,
    ) -> Result<Answer, OracleError> {
        proc.set_timeout_ms(timeout_ms(deadline)?);
        match proc.check_sat()? {
            SatResp::Unsat => Ok(Answer::Unsat),
            SatResp::Unknown(reason) => Ok(Answer::Unknown(reason)),
            SatResp::Sat => Ok(Answer::Sat(Self::minimize(proc, ctx, deadline)?)),
        }
    }

    /// Find a model with the fewest elements per sort, knowing the current
    /// assertions are satisfiable.
    fn minimize(
        proc: &mut SmtProc,
        ctx: &SolverContext,
        deadline: Option<Instant>,
    ) -> Result<Model, OracleError> {
        let sig = ctx.signature();
        for k in 1..MAX_CARDINALITY {
            let timeout = timeout_ms(deadline)?;
            proc.push(1);
            for sort in sig.sort_names() {
                let sort_symbol = ctx
                    .sort_symbol(sort)
                    .expect("every sort of the signature is declared");
                let x = format!("{RESERVED_PREFIX}elem_{sort}");
                let mut eqs = vec![];
                for i in 0..k {
                    let rep = format!("{RESERVED_PREFIX}elem_{sort}_{i}");
                    proc.send(&app(
                        "declare-fun",
                        [atom_s(&rep), sexp_l([]), atom_s(sort_symbol)],
                    ));
                    eqs.push(app("=", [atom_s(&rep), atom_s(&x)]));
                }
                proc.assert(&app(
                    "forall",
                    [
                        sexp_l([sexp_l([atom_s(&x), atom_s(sort_symbol)])]),
                        app("or", eqs),
                    ],
                ));
            }
            proc.set_timeout_ms(timeout);
            let resp = proc.check_sat()?;
            if resp == SatResp::Sat {
                let items = proc.get_model()?;
                proc.pop(1);
                log::debug!("found a model with at most {k} elements per sort");
                return Self::extract(&items, ctx);
            }
            proc.pop(1);
            if let SatResp::Unknown(reason) = resp {
                log::debug!("minimizing with {k} elements per sort: unknown ({reason})");
            }
        }
        panic!("no model with fewer than {MAX_CARDINALITY} elements per sort");
    }

    fn extract(items: &[Sexp], ctx: &SolverContext) -> Result<Model, OracleError> {
        let smt = parse_z3(items)?;
        smt.to_model(ctx.signature(), "", |sort| format!("{sort}!val!0"))
    }
}

impl Backend for Z3Oracle {
    fn entails_not(
        &mut self,
        a: &Formula,
        b: &Formula,
        deadline: Option<Instant>,
    ) -> Result<Answer, OracleError> {
        let a = self.ctx.translate(a)?;
        let not_b = app("not", [self.ctx.translate(b)?]);
        let limit = remaining(deadline)?;
        self.session()?;
        let proc = self.proc.as_mut().expect("session was just started");
        let r = Self::check(proc, &self.ctx, &a, &not_b, deadline, limit);
        self.finish(r)
    }
}

impl Z3Oracle {
    /// Run one query in its own frame, killing the solver if it overruns
    /// `limit`.
    fn check(
        proc: &mut SmtProc,
        ctx: &SolverContext,
        a: &Sexp,
        not_b: &Sexp,
        deadline: Option<Instant>,
        limit: Option<Duration>,
    ) -> Result<Answer, OracleError> {
        let (done, watch) = mpsc::channel::<()>();
        if let Some(limit) = limit {
            let pid = proc.pid();
            thread::spawn(move || {
                if watch.recv_timeout(limit + KILL_GRACE) == Err(mpsc::RecvTimeoutError::Timeout) {
                    log::warn!("killing z3 after {limit:?}");
                    pid.kill();
                }
            });
        }
        proc.comment_with(|| "equivalence query".to_string());
        proc.push(1);
        proc.assert(a);
        proc.assert(not_b);
        let r = Self::query(proc, ctx, deadline);
        proc.pop(1);
        drop(done);
        r
    }

    /// Drop the session if the query left it unusable.
    fn finish(&mut self, r: Result<Answer, OracleError>) -> Result<Answer, OracleError> {
        match r {
            Err(OracleError::Solver(SolverError::Killed)) => {
                self.proc = None;
                Err(OracleError::Timeout)
            }
            Err(OracleError::Solver(err)) => {
                self.proc = None;
                Err(OracleError::Solver(err))
            }
            r => r,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use logic::{
        parser::{parse_formula, parse_signature},
        semantics::check,
        syntax::Signature,
    };
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use test_log::test;

    use super::*;
    use crate::oracle::{EquivalenceOracle, NEGATIVE, POSITIVE};

    fn oracle(sig: &str, axioms: &[&str]) -> Option<Z3Oracle> {
        let _ = pretty_env_logger::try_init();
        let sig = Arc::new(parse_signature(sig).unwrap());
        let mut ctx = SolverContext::new(&sig);
        for ax in axioms {
            ctx.assert_formula(&parse_formula(ax).unwrap()).unwrap();
        }
        match Z3Oracle::new(ctx, None) {
            Ok(oracle) => Some(oracle),
            Err(_) => {
                eprintln!("could not find z3, skipping test");
                None
            }
        }
    }

    #[test]
    fn test_minimal_counterexamples() {
        let Some(mut z3) = oracle("(sort node) (relation edge node node)", &[]) else {
            return;
        };
        let current = parse_formula("(or)").unwrap();
        let target = parse_formula("(exists x node (edge x x))").unwrap();
        let m = z3
            .find_model_or_equivalence(&current, &target, None)
            .unwrap()
            .expect("formulas differ");
        assert_eq!(m.label, POSITIVE);
        assert_eq!(m.len(), 1);
        assert_eq!(check(&current, &m), Ok(false));
        assert_eq!(check(&target, &m), Ok(true));

        let m = z3
            .find_model_or_equivalence(&target, &current, None)
            .unwrap()
            .expect("formulas differ");
        assert_eq!(m.label, NEGATIVE);
        assert_eq!(check(&target, &m), Ok(true));
    }

    #[test]
    fn test_equivalent_under_axioms() {
        let Some(mut z3) = oracle(
            "(sort node) (relation edge node node)",
            &["(forall x node (not (edge x x)))"],
        ) else {
            return;
        };
        let a = parse_formula("(and)").unwrap();
        let b = parse_formula("(forall x node (not (edge x x)))").unwrap();
        let r = z3.find_model_or_equivalence(&a, &b, None).unwrap();
        assert!(r.is_none(), "got {r:?}");
    }

    #[test]
    fn test_functions_and_constants() {
        let Some(mut z3) = oracle(
            "(sort node) (constant root node) (function next node node)",
            &[],
        ) else {
            return;
        };
        let current = parse_formula("(= (next root) root)").unwrap();
        let target = parse_formula("(and)").unwrap();
        let m = z3
            .find_model_or_equivalence(&current, &target, None)
            .unwrap()
            .expect("formulas differ");
        assert_eq!(m.label, POSITIVE);
        assert!(m.is_complete());
        // next root must differ from root
        assert_eq!(m.len(), 2);
        assert_eq!(check(&current, &m), Ok(false));
    }

    #[test]
    fn test_deadline_passed() {
        let Some(mut z3) = oracle("(sort node) (relation p node)", &[]) else {
            return;
        };
        let f = parse_formula("(forall x node (p x))").unwrap();
        let past = Instant::now() - Duration::from_millis(1);
        let r = z3.find_model_or_equivalence(&f, &f, Some(past));
        assert!(matches!(r, Err(OracleError::Timeout)), "{r:?}");
        // the session is still usable
        assert!(z3.find_model_or_equivalence(&f, &f, None).unwrap().is_none());
    }

    /// A model with one to three elements per sort and a random
    /// interpretation of every symbol.
    fn random_model(sig: &Arc<Signature>, rng: &mut StdRng) -> Model {
        let mut m = Model::new(sig);
        for sort in sig.sort_names() {
            for i in 0..rng.random_range(1..=3) {
                m.add_elem(&format!("{sort}{i}"), sort).unwrap();
            }
        }
        let names = |m: &Model, t: &[usize]| -> Vec<String> {
            t.iter().map(|&e| m.name(e).to_string()).collect()
        };
        let pick = |m: &Model, sort: &str, rng: &mut StdRng| -> String {
            let elems = m.elems_of_sort(sort);
            m.name(elems[rng.random_range(0..elems.len())]).to_string()
        };
        for (c, sort) in sig.constants() {
            let e = pick(&m, sort, rng);
            m.add_constant(c, &e).unwrap();
        }
        for (r, sorts) in sig.relations() {
            for t in m.tuples(sorts) {
                if rng.random_bool(0.5) {
                    let args = names(&m, &t);
                    m.add_relation(r, args.as_slice()).unwrap();
                }
            }
        }
        for (f, (sorts, ret)) in sig.functions() {
            for t in m.tuples(sorts) {
                let args = names(&m, &t);
                let v = pick(&m, ret, rng);
                m.add_function(f, args.as_slice(), &v).unwrap();
            }
        }
        m
    }

    #[test]
    fn test_equivalence_agrees_on_random_models() {
        const SIG: &str =
            "(sort node) (constant root node) (relation edge node node) (function next node node)";
        let axioms = ["(forall x node (not (edge x x)))"];
        let Some(mut z3) = oracle(SIG, &axioms) else {
            return;
        };
        let sig = Arc::new(parse_signature(SIG).unwrap());
        let axioms: Vec<_> = axioms.iter().map(|a| parse_formula(a).unwrap()).collect();
        let pairs = [
            (
                "(forall x node (forall y node (or (not (edge x y)) (not (edge y x)))))",
                "(not (exists x node (exists y node (and (edge x y) (edge y x)))))",
            ),
            ("(and)", "(forall x node (not (edge x x)))"),
            (
                "(edge root (next root))",
                "(exists x node (and (= x (next root)) (edge root x)))",
            ),
            ("(not (edge root root))", "(and)"),
        ];
        let mut rng = StdRng::seed_from_u64(42);
        for (a, b) in pairs {
            let (a, b) = (parse_formula(a).unwrap(), parse_formula(b).unwrap());
            let r = z3.find_model_or_equivalence(&a, &b, None).unwrap();
            assert!(r.is_none(), "{a} and {b} differ on {r:?}");

            let mut checked = 0;
            for _ in 0..10000 {
                let m = random_model(&sig, &mut rng);
                if axioms.iter().any(|ax| check(ax, &m) != Ok(true)) {
                    continue;
                }
                assert_eq!(check(&a, &m), check(&b, &m), "{a} and {b} differ on\n{m}");
                checked += 1;
                if checked == 100 {
                    break;
                }
            }
            assert_eq!(checked, 100);
        }
    }
}
