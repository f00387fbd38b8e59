// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The solver-side symbol table and assertion stack for one learning run.

use std::{collections::BTreeMap, sync::Arc};

use logic::syntax::{Environment, Formula, Signature};
use smtlib::sexp::{app, atom_s, sexp_l, Sexp};

use crate::translate::{self, TranslateError};

/// Declarations of a signature's sorts and symbols for the solver, plus a stack
/// of assertion frames.
///
/// A context belongs to a single run: it is built once from the run's signature
/// and is never shared between runs with different signatures.
#[derive(Debug, Clone)]
pub struct SolverContext {
    sig: Arc<Signature>,
    /// The solver sort symbol of each sort
    sorts: BTreeMap<String, String>,
    /// The `declare-fun` of each constant, relation and function
    symbols: BTreeMap<String, Sexp>,
    frames: Vec<Vec<Sexp>>,
}

impl SolverContext {
    /// Declare every sort and symbol of `sig`, with no assertions.
    pub fn new(sig: &Arc<Signature>) -> Self {
        let sorts: BTreeMap<String, String> =
            sig.sorts().map(|s| (s.clone(), s.clone())).collect();
        let sort = |s: &String| atom_s(&sorts[s]);
        let mut symbols = BTreeMap::new();
        for (c, s) in sig.constants() {
            symbols.insert(c.clone(), app("declare-fun", [atom_s(c), sexp_l([]), sort(s)]));
        }
        for (r, args) in sig.relations() {
            symbols.insert(
                r.clone(),
                app(
                    "declare-fun",
                    [atom_s(r), sexp_l(args.iter().map(sort)), atom_s("Bool")],
                ),
            );
        }
        for (f, (args, ret)) in sig.functions() {
            symbols.insert(
                f.clone(),
                app(
                    "declare-fun",
                    [atom_s(f), sexp_l(args.iter().map(sort)), sort(ret)],
                ),
            );
        }
        Self {
            sig: sig.clone(),
            sorts,
            symbols,
            frames: vec![vec![]],
        }
    }

    /// The signature this context declares.
    pub fn signature(&self) -> &Arc<Signature> {
        &self.sig
    }

    /// The solver sort for a sort of the signature.
    pub fn sort_symbol(&self, sort: &str) -> Option<&str> {
        self.sorts.get(sort).map(|s| s.as_str())
    }

    /// The sort and symbol declarations, sorts first.
    pub fn declarations(&self) -> Vec<Sexp> {
        self.sorts
            .values()
            .map(|s| app("declare-sort", [atom_s(s)]))
            .chain(self.symbols.values().cloned())
            .collect()
    }

    /// Translate a closed formula in this context.
    pub fn translate(&self, f: &Formula) -> Result<Sexp, TranslateError> {
        let mut env = Environment::new(&self.sig);
        translate::formula(f, &mut env, self)
    }

    /// Add an assertion to the innermost frame.
    pub fn assert(&mut self, e: Sexp) {
        self.frames
            .last_mut()
            .expect("the base frame is never popped")
            .push(e);
    }

    /// Translate and assert a closed formula.
    pub fn assert_formula(&mut self, f: &Formula) -> Result<(), TranslateError> {
        let e = self.translate(f)?;
        self.assert(e);
        Ok(())
    }

    /// Open a new assertion frame.
    pub fn push(&mut self) {
        self.frames.push(vec![]);
    }

    /// Drop the innermost frame and its assertions.
    pub fn pop(&mut self) {
        assert!(self.frames.len() > 1, "pop without a matching push");
        self.frames.pop();
    }

    /// All assertions, outermost frame first.
    pub fn assertions(&self) -> impl Iterator<Item = &Sexp> {
        self.frames.iter().flatten()
    }

    /// The full query as a list of commands: declarations, assertions and a
    /// final `check-sat`.
    pub fn commands(&self) -> Vec<Sexp> {
        let mut cmds = vec![
            Sexp::Comment(" query generated for an equivalence check".to_string()),
            app("set-info", [atom_s(":status"), atom_s("unknown")]),
        ];
        cmds.extend(self.declarations());
        cmds.extend(self.assertions().map(|e| app("assert", [e.clone()])));
        cmds.push(app("check-sat", []));
        cmds
    }

    /// Render the full query as SMT-LIB text, one command per line.
    pub fn to_smt2(&self) -> String {
        let mut text = self
            .commands()
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        text.push('\n');
        text
    }
}
