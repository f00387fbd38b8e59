// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Manage a running SMT process.
//!
//! This is a low-level generic API for incremental SMT-LIB solvers; the
//! solver-specific parts are captured by the [`SolverCmd`] passed to launch
//! the solver and in the code that interprets models returned by
//! [`SmtProc::get_model`].

use crate::conf::SolverCmd;
use crate::sexp;
use crate::tee::Tee;
use nix::{errno::Errno, sys::signal, unistd::Pid};
use std::{
    ffi::{OsStr, OsString},
    io::{self, BufRead, BufReader, ErrorKind, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    sync::{Arc, Mutex},
};
use thiserror::Error;

use super::sexp::{app, atom_i, atom_s, Sexp};

/// The states that the process can be in.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Status {
    /// Solver is running normally. If `in_call` is true, it is currently
    /// processing a `check-sat` call.
    Running { in_call: bool },
    /// A cancellation has been requested while the solver was idle. Any solver
    /// operations after this point will cause the solver to be killed; calls
    /// that return nothing like `assert` will silently succeed, while calls
    /// that require a response will return `SolverError::Killed`.
    Stopping,
    /// The solver has been killed but needs a `.wait()` call to reap the process.
    NeedsWait,
    /// The solver has exited and the process has been reaped with `.wait()`.
    Terminated,
}

/// SmtProc wraps an instance of a solver process.
#[derive(Debug)]
pub struct SmtProc {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    tee: Option<Tee>,
    // signal to SmtPids that this process has terminated (so we don't try to
    // kill the process long afterward when the pid might have been reused)
    terminated: Arc<Mutex<Status>>,
}

/// A handle to the SMT process for cancelling an in-progress check.
#[derive(Clone)]
pub struct SmtPid {
    pid: Pid,
    terminated: Arc<Mutex<Status>>,
}

/// SatResp is a solver's response to a `(check-sat)` command.
///
/// For unknown it also returns the reason the solver provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SatResp {
    /// The query is satisfiable.
    Sat,
    /// The query is unsatisfiable (and thus negated assertions are valid).
    Unsat,
    /// Unknown whether the query is sat or unsat. The reason is the one given
    /// by (get-info :reason-unknown).
    ///
    /// This can happen due to a timeout or limitations of quantifier instantiation
    /// heuristics, for example.
    Unknown(String),
}

#[derive(Error, Debug)]
/// An error from trying to call the solver
pub enum SolverError {
    /// I/O went wrong
    #[error("some I/O went wrong: {0}")]
    Io(#[from] io::Error),
    /// Solver returned an `(error ...)` response or closed its output
    #[error("solver returned an error:\n{0}")]
    UnexpectedClose(String),
    /// Solver killed specifically by SIGKILL signal
    #[error("solver was killed")]
    Killed,
}

type Result<T> = std::result::Result<T, SolverError>;

// =============================
// State-machine related code
// =============================

impl Drop for SmtProc {
    fn drop(&mut self) {
        self.kill();
    }
}

fn lock(status: &Mutex<Status>) -> std::sync::MutexGuard<'_, Status> {
    // the status is a plain value, so it is still meaningful if another thread
    // panicked while holding the lock
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SmtPid {
    /// Kill the SMT process by pid.
    pub fn kill(&self) {
        let mut terminated = lock(&self.terminated);
        match *terminated {
            Status::NeedsWait | Status::Terminated | Status::Stopping => {
                return;
            }
            Status::Running { in_call } => {
                // Only try to kill the solver if it's in the middle of an
                // expensive call.
                if in_call {
                    let r = signal::kill(self.pid, signal::Signal::SIGKILL);
                    if let Err(errno) = r {
                        if errno != Errno::ESRCH {
                            panic!("killing SMT process {} failed with {errno}", self.pid);
                        }
                    }
                    *terminated = Status::NeedsWait;
                } else {
                    // Otherwise, we mark the solver as stopping, which causes
                    // most commands to exit early and the next check-sat to
                    // kill the solver without running.
                    *terminated = Status::Stopping;
                }
            }
        }
    }
}

impl SmtProc {
    /// Create a new SMT process by running a solver.
    ///
    /// The optional `tee` argument is a directory where everything sent to the
    /// solver is saved when a query comes back unknown, for debugging purposes.
    pub fn new(mut cmd: SolverCmd, tee: Option<&Path>) -> Result<Self> {
        cmd.option("produce-models", "true");
        let mut child = Command::new(OsStr::new(&cmd.cmd))
            .args(cmd.args.iter().map(OsString::from))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let tee = tee.map(|dir| {
            let mut f = Tee::new(dir, "query");
            f.append(Sexp::Comment(cmd.cmdline()));
            f
        });
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(SolverError::UnexpectedClose(
                "solver pipes were not captured".to_string(),
            ));
        };
        let mut proc = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            tee,
            terminated: Arc::new(Mutex::new(Status::Running { in_call: false })),
        };
        for (option, val) in &cmd.options {
            proc.send(&app(
                "set-option",
                [atom_s(format!(":{option}")), atom_s(val)],
            ));
        }
        // quantified formulas over uninterpreted sorts and functions
        proc.send(&app("set-logic", [atom_s("UF")]));
        Ok(proc)
    }

    /// Get a handle to the process for cancellation.
    pub fn pid(&self) -> SmtPid {
        // Child guarantees a positive pid, which fits in an i32
        let pid = Pid::from_raw(self.child.id() as i32);
        SmtPid {
            pid,
            terminated: self.terminated.clone(),
        }
    }

    fn send_raw(&mut self, data: &sexp::Sexp) {
        // a broken pipe shows up again (with the reason) when reading the response
        if let Err(err) = writeln!(self.stdin, "{data}") {
            log::debug!("failed to send to solver: {err}");
        }
        if let Some(f) = &mut self.tee {
            f.append(data.clone());
        }
    }

    /// Low-level API to send the solver a command that expects a response,
    /// which is parsed as a single s-expression.
    fn send_with_reply(&mut self, data: &sexp::Sexp) -> Result<sexp::Sexp> {
        self.send(data);
        let resp = self.get_response(|s| s.to_string())?;
        sexp::parse(&resp).map_err(|err| {
            SolverError::UnexpectedClose(format!("could not parse solver response ({err}):\n{resp}"))
        })
    }

    /// Get an error presumed to be in resp, checking for termination first.
    ///
    /// This function always returns a `Result::Err`, but is written this way for
    /// convenient use with `?`. As a result it can return a `Result<T>` for any
    /// type `T`.
    fn get_error<T>(&mut self, resp: &str) -> Result<T> {
        self.check_killed()?;
        let msg = Self::parse_error(resp);
        return Err(SolverError::UnexpectedClose(msg));
    }

    /// Check the status because the solver is currently idle, to see if we
    /// should kill or wait and return early.
    fn handle_termination_status(&mut self, status: &mut Status) -> Result<()> {
        match *status {
            Status::Running { .. } => return Ok(()),
            Status::Stopping => {
                self.child.kill()?;
                self.child.wait()?;
            }
            Status::NeedsWait => {
                self.child.wait()?;
            }
            Status::Terminated => {}
        }
        // if not currently running, we'll leave the solver terminated and `wait`'d for
        *status = Status::Terminated;
        return Err(SolverError::Killed);
    }

    /// Mark the solver as being inside an expensive call (so killing it will
    /// actually send a signal).
    fn start_call(&mut self) -> Result<()> {
        let status_m = self.terminated.clone();
        let mut status = lock(&status_m);
        self.handle_termination_status(&mut status)?;
        assert!(
            *status == Status::Running { in_call: false },
            "unexpected start when solver is already in a call"
        );
        *status = Status::Running { in_call: true };
        Ok(())
    }

    /// Mark the solver as being done with an expensive call.
    fn end_call(&mut self) -> Result<()> {
        let status_m = self.terminated.clone();
        let mut status = lock(&status_m);
        self.handle_termination_status(&mut status)?;
        assert!(
            *status == Status::Running { in_call: true },
            "unexpected end when solver is not in a call"
        );
        *status = Status::Running { in_call: false };
        Ok(())
    }

    fn check_killed(&mut self) -> Result<()> {
        let status_m = self.terminated.clone();
        let mut status = lock(&status_m);
        self.handle_termination_status(&mut status)?;
        Ok(())
    }

    /// A marker for determining end of solver response.
    const DONE: &'static str = "<<DONE>>";

    fn write_stdin(&mut self, line: &str) -> std::result::Result<(), io::Error> {
        writeln!(self.stdin, "{line}")?;
        self.stdin.flush()?;
        Ok(())
    }

    /// Low-level mechanism to get a response. Note that this needs to be issued
    /// after each query that returns a response, since it sends a marker and
    /// waits for the solver to reach that marker.
    fn get_response<F, T>(&mut self, cb: F) -> Result<T>
    where
        F: FnOnce(&str) -> T,
    {
        if let Err(err) = self.write_stdin(&format!(r#"(echo "{}")"#, Self::DONE)) {
            if err.kind() == ErrorKind::BrokenPipe {
                self.check_killed()?
            }
            return Err(SolverError::from(err));
        }
        // buf accumulates the entire response, which is read line-by-line
        // looking for the DONE marker.
        let mut buf = String::new();
        loop {
            let last_end = buf.len();
            // n is the number of bytes read (that is, the length of this line
            // including the newline)
            let n = self.stdout.read_line(&mut buf)?;
            if n == 0 {
                self.check_killed()?;
                let msg = Self::parse_error(&buf);
                return Err(SolverError::UnexpectedClose(msg));
            }
            // last line, without the newline
            let last_line = buf[last_end..last_end + n].trim_end();
            // Z3 doesn't put quotes and CVC does (quotes do follow SMT-LIB)
            if last_line == Self::DONE || last_line == format!("\"{}\"", Self::DONE) {
                let response = buf[..last_end].trim_end();
                return Ok(cb(response));
            }
        }
    }

    fn kill(&mut self) {
        _ = writeln!(self.stdin, "(exit)");
        _ = self.stdin.flush();
        _ = self.child.kill();
        _ = self.child.wait();
        *lock(&self.terminated) = Status::Terminated;
    }

    // ========================
    // Non state machine APIs
    // ========================

    /// Low-level API to send the solver a command as an s-expression. This
    /// should only be used for commands that do not require a response.
    pub fn send(&mut self, data: &sexp::Sexp) {
        let status_m = self.terminated.clone();
        let mut status = lock(&status_m);
        if self.handle_termination_status(&mut status).is_err() {
            // solver has been cancelled, pretend like the command succeeded
            return;
        }
        drop(status);
        self.send_raw(data)
    }

    /// Assert a formula, given as an s-expression.
    pub fn assert(&mut self, e: &Sexp) {
        self.send(&app("assert", [e.clone()]))
    }

    /// Push `n` assertion frames.
    pub fn push(&mut self, n: usize) {
        self.send(&app("push", [atom_i(n)]))
    }

    /// Pop `n` assertion frames.
    pub fn pop(&mut self, n: usize) {
        self.send(&app("pop", [atom_i(n)]))
    }

    /// Limit the following queries to `ms` milliseconds (Z3's `:timeout`).
    pub fn set_timeout_ms(&mut self, ms: usize) {
        self.send(&app("set-option", [atom_s(":timeout"), atom_i(ms)]))
    }

    /// Get some attribute using the SMT get-info command.
    pub fn get_info(&mut self, attribute: &str) -> Result<Sexp> {
        let resp = self.send_with_reply(&app("get-info", [atom_s(attribute)]))?;
        match resp.list() {
            Some([key, value]) if key == &atom_s(attribute) => Ok(value.clone()),
            _ => Err(SolverError::UnexpectedClose(format!(
                "unexpected response to get-info {attribute}: {resp}"
            ))),
        }
    }

    /// Parse an error message returned as an s-expression.
    fn parse_error(resp: &str) -> String {
        // Z3 returns check-sat errors as:
        // (error "error msg")
        // sat
        //
        // Thus we parse the result as a sequence of sexps and look for the
        // error sexp, falling back to the raw response.
        sexp::parse_many(resp)
            .ok()
            .and_then(|sexps| {
                sexps.iter().find_map(|s| match s.args_of("error") {
                    Some([msg]) => msg.atom_s().map(|m| m.to_string()),
                    _ => None,
                })
            })
            .unwrap_or_else(|| resp.to_string())
    }

    fn parse_sat(&mut self, resp: &str) -> Result<SatResp> {
        match resp {
            "unsat" => Ok(SatResp::Unsat),
            "sat" => Ok(SatResp::Sat),
            "unknown" => {
                let reason = self.get_info(":reason-unknown")?;
                Ok(SatResp::Unknown(reason.to_string()))
            }
            _ => self.get_error(resp),
        }
    }

    /// Send the solver `(check-sat)`. For unknown gets a reason, but does not
    /// call `(get-model)` for sat.
    pub fn check_sat(&mut self) -> Result<SatResp> {
        self.send(&app("check-sat", []));
        self.start_call()?;
        let resp = self.get_response(|s| s.to_string())?;
        let resp = self.parse_sat(&resp)?;
        if matches!(resp, SatResp::Unknown(_)) {
            if let Some(name) = self.save_tee() {
                log::warn!("unknown response to {}", name.display());
            }
        }
        self.end_call()?;
        Ok(resp)
    }

    /// Get a model (following a sat reply) as a list of s-expressions, one per
    /// definition or comment.
    pub fn get_model(&mut self) -> Result<Vec<Sexp>> {
        let model = self.send_with_reply(&app("get-model", []))?;
        // older solvers wrap the definitions as (model ...)
        match model {
            Sexp::List(mut items) => {
                if items.first() == Some(&atom_s("model")) {
                    items.remove(0);
                }
                Ok(items)
            }
            _ => self.get_error(&model.to_string()),
        }
    }

    // =============
    // Tee support
    // =============

    /// Save the current tee file, if there is one. Returns the name of the
    /// created file (or None if there is no tee'd output setup).
    pub fn save_tee(&self) -> Option<PathBuf> {
        self.tee.as_ref().and_then(|tee| match tee.save() {
            Ok(name) => Some(name),
            Err(err) => {
                // report this error but this isn't fatal
                log::warn!("failed to save tee: {err}");
                None
            }
        })
    }

    /// Add a comment to the tee'd file.
    ///
    /// The comment is passed as a closure, which is not evaluated if there is
    /// no tee'd smt2 file.
    pub fn comment_with<F>(&mut self, comment: F)
    where
        F: FnOnce() -> String,
    {
        if let Some(f) = &mut self.tee {
            let comment = comment();
            f.append(Sexp::Comment("".to_string()));
            f.append(Sexp::Comment(comment));
        }
    }
}
