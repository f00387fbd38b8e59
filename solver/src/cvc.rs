// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The external backend: each query is a fresh CVC4 or CVC5 process that reads
//! the whole query on stdin, searches for a finite model, and prints it.

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
    time::{Duration, Instant},
};

use lazy_static::lazy_static;
use logic::syntax::Formula;
use nix::{sys::signal, unistd::Pid};
use regex::Regex;
use smtlib::{
    conf::{CvcConf, SolverCmd},
    tee::Tee,
};

use crate::{
    context::SolverContext,
    models::{cvc_default_elem, parse_cvc},
    oracle::{remaining, Answer, Backend, OracleError},
    solver_path, SolverError,
};

/// Rewrite a query from [`SolverContext::to_smt2`] for CVC's strict parser.
///
/// Panics if the query mentions a name with `@`, which CVC reserves for the
/// elements of its models.
pub fn preprocess(smt2: &str) -> String {
    lazy_static! {
        static ref DECLARE_SORT_RE: Regex = Regex::new(r"\(declare-sort ([^\s()]+)\)").unwrap();
    }
    let mut lines = vec!["(set-logic UF)".to_string()];
    for line in smt2.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') || trimmed.starts_with("(set-info ") {
            continue;
        }
        assert!(!line.contains('@'), "query line uses @: {line}");
        lines.push(
            DECLARE_SORT_RE
                .replace_all(line, "(declare-sort $1 0)")
                .into_owned(),
        );
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// How a CVC run ended.
#[derive(Debug, PartialEq, Eq)]
enum RunResult {
    /// The process exited normally with this output.
    Finished(String),
    /// The process was killed or failed, for this reason.
    Failed(String),
}

/// Run `cmd` on `input`, killing it if it runs longer than `timeout`.
fn run(cmd: &SolverCmd, input: &str, timeout: Option<Duration>) -> Result<RunResult, SolverError> {
    let mut child = Command::new(&cmd.cmd)
        .args(&cmd.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes())?;
        // dropping stdin closes it, which starts the solver
    }

    let pid = Pid::from_raw(child.id() as i32);
    let killed = Arc::new(AtomicBool::new(false));
    let (done, watch) = mpsc::channel::<()>();
    let watchdog = timeout.map(|timeout| {
        let killed = killed.clone();
        thread::spawn(move || {
            if watch.recv_timeout(timeout) == Err(mpsc::RecvTimeoutError::Timeout) {
                killed.store(true, Ordering::SeqCst);
                // the process may have just exited on its own
                _ = signal::kill(pid, signal::Signal::SIGKILL);
            }
        })
    });
    let output = child.wait_with_output()?;
    drop(done);
    if let Some(watchdog) = watchdog {
        _ = watchdog.join();
    }

    if killed.load(Ordering::SeqCst) {
        return Ok(RunResult::Failed("timeout".to_string()));
    }
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        log::warn!(
            "{} exited with {}:\n{stdout}{stderr}",
            cmd.cmdline(),
            output.status
        );
        return Ok(RunResult::Failed(format!("exited with {}", output.status)));
    }
    Ok(RunResult::Finished(
        String::from_utf8_lossy(&output.stdout).into_owned(),
    ))
}

/// Interpret CVC's output: a `sat`, `unsat` or `unknown` line, followed by the
/// model when it is `sat`.
fn parse_output(ctx: &SolverContext, out: &str, version5: bool) -> Result<Answer, OracleError> {
    let mut lines = out.lines().filter(|l| !l.trim().is_empty());
    let Some(first) = lines.next() else {
        log::warn!("no output from cvc");
        return Ok(Answer::Unknown("no output".to_string()));
    };
    match first.trim() {
        "unsat" => Ok(Answer::Unsat),
        "unknown" => Ok(Answer::Unknown("unknown".to_string())),
        "sat" => {
            let rest: Vec<&str> = lines.collect();
            let smt = parse_cvc(&rest, version5)?;
            let model = smt.to_model(ctx.signature(), "", cvc_default_elem(version5))?;
            Ok(Answer::Sat(model))
        }
        line => {
            log::warn!("unexpected response from cvc: {line}");
            Ok(Answer::Unknown(line.to_string()))
        }
    }
}

/// An [`crate::oracle::EquivalenceOracle`] that runs CVC once per query.
pub struct CvcOracle {
    ctx: SolverContext,
    cmd: SolverCmd,
    version5: bool,
    tee: Option<PathBuf>,
}

impl CvcOracle {
    /// Create an oracle for the declarations and axioms of `ctx`. No process
    /// is started until the first query.
    pub fn new(ctx: SolverContext, version5: bool, tee: Option<&Path>) -> Self {
        let conf = if version5 {
            CvcConf::new_cvc5(&solver_path("cvc5"))
        } else {
            CvcConf::new_cvc4(&solver_path("cvc4"))
        };
        let version5 = conf.is_cvc5();
        Self {
            ctx,
            cmd: conf.done(),
            version5,
            tee: tee.map(|p| p.to_path_buf()),
        }
    }

    /// The query for `a ∧ ¬b`, ready to send to CVC.
    fn query(&mut self, a: &Formula, b: &Formula) -> Result<String, OracleError> {
        self.ctx.push();
        let r = self
            .ctx
            .assert_formula(a)
            .and_then(|_| self.ctx.assert_formula(&Formula::not(b.clone())));
        let smt2 = self.ctx.to_smt2();
        if let Some(dir) = &self.tee {
            let mut tee = Tee::new(dir, "cvc");
            for cmd in self.ctx.commands() {
                tee.append(cmd);
            }
            match tee.save() {
                Ok(name) => log::debug!("saved query to {}", name.display()),
                Err(err) => log::warn!("failed to save tee: {err}"),
            }
        }
        self.ctx.pop();
        r?;
        Ok(preprocess(&smt2))
    }
}

impl Backend for CvcOracle {
    fn entails_not(
        &mut self,
        a: &Formula,
        b: &Formula,
        deadline: Option<Instant>,
    ) -> Result<Answer, OracleError> {
        let input = self.query(a, b)?;
        let timeout = remaining(deadline)?;
        log::debug!("running {}", self.cmd.cmdline());
        match run(&self.cmd, &input, timeout)? {
            RunResult::Finished(out) => parse_output(&self.ctx, &out, self.version5),
            RunResult::Failed(reason) => Ok(Answer::Unknown(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use logic::{
        parser::{parse_formula, parse_signature},
        semantics::check,
    };
    use test_log::test;

    use super::*;
    use crate::oracle::{EquivalenceOracle, NEGATIVE};

    fn ctx() -> SolverContext {
        let sig = parse_signature("(sort node) (constant root node) (relation edge node node)")
            .unwrap();
        SolverContext::new(&Arc::new(sig))
    }

    #[test]
    fn test_preprocess() {
        let mut ctx = ctx();
        ctx.assert_formula(&parse_formula("(edge root root)").unwrap())
            .unwrap();
        insta::assert_snapshot!(preprocess(&ctx.to_smt2()), @r###"
        (set-logic UF)
        (declare-sort node 0)
        (declare-fun edge (node node) Bool)
        (declare-fun root () node)
        (assert (edge root root))
        (check-sat)
        "###);
    }

    #[test]
    #[should_panic(expected = "query line uses @")]
    fn test_preprocess_rejects_model_names() {
        preprocess("(assert (= root @uc_node_0))");
    }

    #[test]
    fn test_parse_output() {
        let ctx = ctx();
        let out = "sat
(model
(declare-sort node 0)
; cardinality of node is 2
; rep: @uc_node_0
; rep: @uc_node_1
(define-fun root () node @uc_node_0)
(define-fun edge ((_arg_1 node) (_arg_2 node)) Bool (and (= _arg_1 @uc_node_0) (= _arg_2 @uc_node_1)))
)
";
        let Answer::Sat(m) = parse_output(&ctx, out, false).unwrap() else {
            panic!("expected a model");
        };
        assert_eq!(m.len(), 2);
        let f = parse_formula("(exists x node (and (edge root x) (not (= x root))))").unwrap();
        assert_eq!(check(&f, &m), Ok(true));

        assert!(matches!(
            parse_output(&ctx, "\nunsat\n", false).unwrap(),
            Answer::Unsat
        ));
        assert!(matches!(
            parse_output(&ctx, "(error \"parse error\")\n", true).unwrap(),
            Answer::Unknown(_)
        ));
        assert!(matches!(
            parse_output(&ctx, "", true).unwrap(),
            Answer::Unknown(_)
        ));
    }

    fn cvc5_installed() -> bool {
        Command::new(solver_path("cvc5"))
            .arg("--version")
            .stdout(Stdio::null())
            .status()
            .is_ok()
    }

    #[test]
    fn test_cvc5_counterexample() {
        if !cvc5_installed() {
            eprintln!("could not find cvc5, skipping test");
            return;
        }
        let mut cvc = CvcOracle::new(ctx(), true, None);
        let current = parse_formula("(forall x node (edge x x))").unwrap();
        let target = parse_formula("(edge root root)").unwrap();
        let m = cvc
            .find_model_or_equivalence(&current, &target, None)
            .unwrap()
            .expect("formulas differ");
        // a model of target that is not a model of current
        assert_ne!(m.label, NEGATIVE);
        assert_eq!(check(&current, &m), Ok(false));
        assert_eq!(check(&target, &m), Ok(true));
    }

    #[test]
    fn test_missing_binary() {
        let cmd = CvcConf::new_cvc5("no-such-solver").done();
        assert!(matches!(
            run(&cmd, "(check-sat)\n", None),
            Err(SolverError::Io(_))
        ));
    }
}
