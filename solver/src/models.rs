// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Parse models returned by SMT solvers and turn them into finite
//! [`logic::model::Model`]s.
//!
//! The solvers report a model as a universe of named elements for every sort
//! plus a `define-fun` for every symbol, whose body is an expression over the
//! arguments. Relations and functions are recovered by evaluating these bodies
//! on every tuple of elements.

use itertools::Itertools;
use lazy_static::lazy_static;
use logic::{model::Model, syntax::Signature};
use regex::Regex;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use thiserror::Error;

use smtlib::sexp::{self, atom_s, Atom, Sexp};

use crate::oracle::OracleError;

/// A model as the solver reports it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SmtModel {
    /// The elements of each sort, in the order they are added to the model
    pub universes: BTreeMap<String, Vec<String>>,
    /// Each defined symbol's parameter names and body
    pub symbols: HashMap<String, (Vec<String>, Sexp)>,
}

/// An error evaluating a solver's definitions.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("eval error: {0}")]
pub struct EvalError(String);

fn bool_atom(b: bool) -> Atom {
    let v = if b { "true" } else { "false" };
    Atom::S(v.to_string())
}

fn subst_hashmap(repl: &HashMap<&str, &Sexp>, e: &Sexp) -> Sexp {
    match e {
        Sexp::Atom(Atom::I(_)) | Sexp::Comment(_) => e.clone(),
        Sexp::Atom(Atom::S(s)) => repl.get(s.as_str()).copied().unwrap_or(e).clone(),
        Sexp::List(ss) => Sexp::List(ss.iter().map(|e| subst_hashmap(repl, e)).collect()),
    }
}

/// Parallel substitution of atoms in an sexp.
pub fn subst(repl: &[(&str, Sexp)], e: &Sexp) -> Sexp {
    let repl_map: HashMap<&str, &Sexp> = repl.iter().map(|(name, e)| (*name, e)).collect();
    subst_hashmap(&repl_map, e)
}

fn parse_binders(binders: &Sexp) -> Result<Vec<String>, EvalError> {
    let malformed = || EvalError(format!("malformed binders {binders}"));
    binders
        .list()
        .ok_or_else(malformed)?
        .iter()
        .map(|b| match b.list() {
            Some([name, _sort]) => name.atom_s().map(|s| s.to_string()).ok_or_else(malformed),
            _ => Err(malformed()),
        })
        .collect()
}

fn parse_define_fun(args: &[Sexp]) -> Result<(String, Vec<String>, Sexp), EvalError> {
    match args {
        [name, binders, _sort, body] => {
            let name = name
                .atom_s()
                .ok_or_else(|| EvalError(format!("define-fun of non-atom {name}")))?;
            Ok((name.to_string(), parse_binders(binders)?, body.clone()))
        }
        _ => Err(EvalError(
            "define-fun should have name, binders, sort, body".to_string(),
        )),
    }
}

/// Parse the definitions returned by Z3's `(get-model)`.
///
/// Universe elements are the `declare-fun`s without arguments, sorted by
/// name within each sort.
pub fn parse_z3(model: &[Sexp]) -> Result<SmtModel, EvalError> {
    let mut m = SmtModel::default();
    for s in model {
        let Some((head, args)) = s.app() else {
            continue;
        };
        match (head, args) {
            ("declare-fun", [name, binders, sort]) if binders == &sexp::sexp_l([]) => {
                if let (Some(name), Some(sort)) = (name.atom_s(), sort.atom_s()) {
                    m.universes
                        .entry(sort.to_string())
                        .or_default()
                        .push(name.to_string());
                }
            }
            ("define-fun", args) => {
                let (name, binders, body) = parse_define_fun(args)?;
                m.symbols.insert(name, (binders, body));
            }
            // cardinality constraint
            ("forall", _) => (),
            _ => log::warn!("unexpected {head} in z3 model"),
        }
    }
    for elems in m.universes.values_mut() {
        elems.sort();
    }
    Ok(m)
}

/// The name CVC gives to element `i` of a sort when it does not report one.
fn cvc_elem(sort: &str, i: usize, version5: bool) -> String {
    if version5 {
        format!("@{sort}_{i}")
    } else {
        format!("@uc_{sort}_{i}")
    }
}

/// Parse the model CVC dumps after a `sat` line (`lines` excludes that line).
///
/// Elements are read line by line from the `; rep: NAME` comments following
/// each `(declare-sort S 0)`; sorts without these get elements named after
/// the `; cardinality of S is N` comment if there is one.
pub fn parse_cvc(lines: &[&str], version5: bool) -> Result<SmtModel, EvalError> {
    lazy_static! {
        static ref DECLARE_SORT_RE: Regex = Regex::new(r"\(declare-sort ([^\s]+) 0\)").unwrap();
        static ref REP_RE: Regex = Regex::new(r"; rep: ([^\s(]+)").unwrap();
        static ref CARDINALITY_RE: Regex =
            Regex::new("cardinality of (.*) is ([0-9]+)$").unwrap();
    }
    let mut m = SmtModel::default();
    let mut cardinalities: BTreeMap<String, usize> = BTreeMap::new();
    let mut last_sort: Option<String> = None;
    for line in lines {
        let line = line.trim();
        if let Some(cs) = DECLARE_SORT_RE.captures(line) {
            last_sort = Some(cs[1].to_string());
        } else if let Some(cs) = REP_RE.captures(line) {
            let Some(sort) = &last_sort else {
                return Err(EvalError(format!("{line} before any declare-sort")));
            };
            m.universes
                .entry(sort.clone())
                .or_default()
                .push(cs[1].to_string());
        } else if let Some(cs) = CARDINALITY_RE.captures(line) {
            if let Ok(card) = cs[2].parse::<usize>() {
                cardinalities.insert(cs[1].to_string(), card);
            }
        }
    }
    for (sort, card) in cardinalities {
        m.universes
            .entry(sort.clone())
            .or_insert_with(|| (0..card).map(|i| cvc_elem(&sort, i, version5)).collect());
    }

    let text = lines.join("\n");
    let items = sexp::parse_many(&text)
        .map_err(|err| EvalError(format!("could not parse model: {err}")))?;
    for s in items.iter().flat_map(unwrap_model) {
        match s.app() {
            Some(("define-fun", args)) => {
                let (name, binders, body) = parse_define_fun(args)?;
                m.symbols.insert(name, (binders, body));
            }
            Some(("declare-sort", _)) | None => (),
            Some((head, _)) => log::warn!("unexpected {head} in cvc model"),
        }
    }
    Ok(m)
}

/// The definitions in one top-level item of a CVC model, which may be wrapped
/// as `(model ...)` (CVC4) or as a bare list (CVC5).
fn unwrap_model(s: &Sexp) -> &[Sexp] {
    match s.list() {
        Some([head, rest @ ..]) if head == &atom_s("model") => rest,
        Some(ss) if ss.iter().all(|s| s.is_comment() || s.list().is_some()) => ss,
        _ => std::slice::from_ref(s),
    }
}

impl SmtModel {
    fn eval_bool(&self, e: &Sexp) -> Result<bool, EvalError> {
        let a = self.smt_eval(e)?;
        match a {
            Atom::S(s) if s == "true" => Ok(true),
            Atom::S(s) if s == "false" => Ok(false),
            _ => Err(EvalError(format!("unexpected bool: {a}"))),
        }
    }

    fn apply(&self, head: &str, args: &[&Sexp]) -> Result<Atom, EvalError> {
        let (binders, body) = &self.symbols[head];
        if binders.len() != args.len() {
            return Err(EvalError(format!("wrong number of arguments to {head}")));
        }
        // evaluate the arguments first, since they may mention the binders
        let args = args
            .iter()
            .map(|a| self.smt_eval(a).map(Sexp::Atom))
            .collect::<Result<Vec<_>, _>>()?;
        let repl: Vec<(&str, Sexp)> = binders.iter().map(|b| b.as_str()).zip(args).collect();
        self.smt_eval(&subst(&repl, body))
    }

    /// Evaluate an SMT expression, reducing constants with known semantics and
    /// symbols defined by the model. Fails if this does not result in an Atom.
    pub fn smt_eval(&self, e: &Sexp) -> Result<Atom, EvalError> {
        match e {
            Sexp::Atom(Atom::S(s)) if self.symbols.get(s).is_some_and(|(b, _)| b.is_empty()) => {
                self.apply(s, &[])
            }
            Sexp::Atom(a) => Ok(a.clone()),
            Sexp::Comment(_) => Err(EvalError("comment".to_string())),
            Sexp::List(ss) => {
                let ss = ss
                    .iter()
                    .filter(|s| !matches!(s, Sexp::Comment(_)))
                    .collect::<Vec<_>>();
                if ss.is_empty() {
                    return Err(EvalError("empty list".to_string()));
                }
                let head = ss[0]
                    .atom_s()
                    .ok_or_else(|| EvalError(format!("unexpected function {} (non-atom)", ss[0])))?;
                let args = &ss[1..];
                let arity = |n: usize| {
                    if args.len() == n {
                        Ok(())
                    } else {
                        Err(EvalError(format!("{head} expects {n} arguments")))
                    }
                };
                match head {
                    "and" => {
                        for a in args {
                            if !self.eval_bool(a)? {
                                return Ok(bool_atom(false));
                            }
                        }
                        Ok(bool_atom(true))
                    }
                    "or" => {
                        for a in args {
                            if self.eval_bool(a)? {
                                return Ok(bool_atom(true));
                            }
                        }
                        Ok(bool_atom(false))
                    }
                    "not" => {
                        arity(1)?;
                        Ok(bool_atom(!self.eval_bool(args[0])?))
                    }
                    "=>" => {
                        arity(2)?;
                        Ok(bool_atom(!self.eval_bool(args[0])? || self.eval_bool(args[1])?))
                    }
                    // annotations, for example (! e :weight 1)
                    "!" => match args.first() {
                        Some(e) => self.smt_eval(e),
                        None => Err(EvalError("empty annotation".to_string())),
                    },
                    // type cast (basically ignored)
                    "as" => {
                        arity(2)?;
                        self.smt_eval(args[0])
                    }
                    "=" => {
                        arity(2)?;
                        let lhs = self.smt_eval(args[0])?;
                        let rhs = self.smt_eval(args[1])?;
                        Ok(bool_atom(lhs == rhs))
                    }
                    "distinct" => {
                        let vals = args
                            .iter()
                            .map(|a| self.smt_eval(a))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(bool_atom(vals.iter().all_unique()))
                    }
                    "ite" => {
                        arity(3)?;
                        if self.eval_bool(args[0])? {
                            self.smt_eval(args[1])
                        } else {
                            self.smt_eval(args[2])
                        }
                    }
                    "let" => {
                        arity(2)?;
                        let bindings = args[0]
                            .list()
                            .ok_or_else(|| EvalError(format!("malformed let {}", args[0])))?;
                        let mut repl = vec![];
                        for b in bindings {
                            match b.list() {
                                Some([name, value]) => {
                                    let name = name.atom_s().ok_or_else(|| {
                                        EvalError(format!("malformed let binding {b}"))
                                    })?;
                                    repl.push((name, Sexp::Atom(self.smt_eval(value)?)));
                                }
                                _ => return Err(EvalError(format!("malformed let binding {b}"))),
                            }
                        }
                        self.smt_eval(&subst(&repl, args[1]))
                    }
                    _ if self.symbols.contains_key(head) => self.apply(head, args),
                    _ => Err(EvalError(format!("unexpected function {head}"))),
                }
            }
        }
    }

    fn eval_elem(&self, e: &Sexp) -> Result<String, EvalError> {
        match self.smt_eval(e)? {
            Atom::S(s) => Ok(s),
            a => Err(EvalError(format!("unexpected element {a}"))),
        }
    }

    /// Evaluate a symbol's definition on a tuple of elements.
    fn eval_symbol(&self, name: &str, args: &[String]) -> Result<Option<Sexp>, EvalError> {
        let Some((binders, body)) = self.symbols.get(name) else {
            return Ok(None);
        };
        if binders.len() != args.len() {
            return Err(EvalError(format!("wrong number of arguments to {name}")));
        }
        let repl: Vec<(&str, Sexp)> = binders
            .iter()
            .map(|b| b.as_str())
            .zip(args.iter().map(atom_s))
            .collect();
        Ok(Some(subst(&repl, body)))
    }

    /// Build a finite model over `sig`.
    ///
    /// Sorts the solver did not report get a single element named by
    /// `default_elem`. Symbols it did not define are completed with defaults,
    /// and the result is checked to be complete.
    pub fn to_model(
        &self,
        sig: &Arc<Signature>,
        label: &str,
        default_elem: impl Fn(&str) -> String,
    ) -> Result<Model, OracleError> {
        let mut m = Model::new(sig);
        m.label = label.to_string();
        for sort in sig.sort_names() {
            match self.universes.get(sort) {
                Some(elems) if !elems.is_empty() => {
                    for e in elems {
                        m.add_elem(e, sort)?;
                    }
                }
                _ => {
                    m.add_elem(&default_elem(sort), sort)?;
                }
            }
        }
        let names = |m: &Model, sorts: &[String]| -> Vec<Vec<String>> {
            m.tuples(sorts)
                .into_iter()
                .map(|t| t.into_iter().map(|e| m.name(e).to_string()).collect())
                .collect()
        };
        for c in sig.constants().keys() {
            if let Some(e) = self.eval_symbol(c, &[])? {
                let v = self.eval_elem(&e)?;
                m.add_constant(c, &v)?;
            }
        }
        for (r, sorts) in sig.relations() {
            for args in names(&m, sorts) {
                if let Some(e) = self.eval_symbol(r, &args)? {
                    if self.eval_bool(&e)? {
                        m.add_relation(r, &args)?;
                    }
                }
            }
        }
        for (f, (sorts, _)) in sig.functions() {
            for args in names(&m, sorts) {
                if let Some(e) = self.eval_symbol(f, &args)? {
                    let v = self.eval_elem(&e)?;
                    m.add_function(f, &args, &v)?;
                }
            }
        }
        m.complete_with_defaults()?;
        m.check_complete()?;
        Ok(m)
    }
}

/// The name of the default element of a sort for a CVC model.
pub fn cvc_default_elem(version5: bool) -> impl Fn(&str) -> String {
    move |sort| cvc_elem(sort, 0, version5)
}

#[cfg(test)]
mod tests {
    use logic::{parser::parse_signature, semantics::check};
    use smtlib::sexp::parse_many;

    use super::*;

    fn sig() -> Arc<Signature> {
        Arc::new(
            parse_signature(
                "(sort node) (constant root node) (relation edge node node) (function next node node)",
            )
            .unwrap(),
        )
    }

    const Z3_MODEL: &str = r#"
  ;; universe for node:
  ;;   node!val!1 node!val!0
  ;; -----------
  ;; definitions for universe elements:
  (declare-fun node!val!1 () node)
  (declare-fun node!val!0 () node)
  ;; cardinality constraint:
  (forall ((x node)) (or (= x node!val!1) (= x node!val!0)))
  ;; -----------
  (define-fun root () node
    node!val!0)
  (define-fun elem_node_0 () node
    node!val!0)
  (define-fun edge ((x!0 node) (x!1 node)) Bool
    (let ((a!1 (and (= x!0 node!val!0) (= (k!3 x!1) node!val!1))))
      (or a!1 (edge!5 x!0 x!1))))
  (define-fun k!3 ((x!0 node)) node
    (ite (= x!0 node!val!1) node!val!1 node!val!0))
  (define-fun edge!5 ((x!0 node) (x!1 node)) Bool
    false)
"#;

    #[test]
    fn test_parse_z3_model() {
        let items = parse_many(Z3_MODEL).unwrap();
        let smt = parse_z3(&items).unwrap();
        assert_eq!(
            smt.universes["node"],
            vec!["node!val!0".to_string(), "node!val!1".to_string()]
        );
        let m = smt.to_model(&sig(), "-", |s| format!("{s}!val!0")).unwrap();
        assert_eq!(m.label, "-");
        insta::assert_display_snapshot!(m, @r###"
        (model -
          ((node!val!0 node) (node!val!1 node))
          (= root node!val!0)
          (edge node!val!0 node!val!1)
          (= (next node!val!0) node!val!0)
          (= (next node!val!1) node!val!0)
        )
        "###);
    }

    const CVC4_MODEL: &str = "(model
(declare-sort node 0)
; cardinality of node is 2
; rep: @uc_node_0
; rep: @uc_node_1
(define-fun root () node @uc_node_1)
(define-fun edge ((_arg_1 node) (_arg_2 node)) Bool (ite (= _arg_1 @uc_node_1) (not (= _arg_2 @uc_node_1)) false))
(define-fun next ((_arg_1 node)) node (as @uc_node_0 node))
)";

    #[test]
    fn test_parse_cvc4_model() {
        let lines: Vec<&str> = CVC4_MODEL.lines().collect();
        let smt = parse_cvc(&lines, false).unwrap();
        let m = smt.to_model(&sig(), "+", cvc_default_elem(false)).unwrap();
        assert_eq!(m.elems_of_sort("node").len(), 2);
        let edge_from_root =
            logic::parser::parse_formula("(exists x node (and (edge root x) (not (= x root))))")
                .unwrap();
        assert_eq!(check(&edge_from_root, &m), Ok(true));
        insta::assert_display_snapshot!(m, @r###"
        (model +
          ((@uc_node_0 node) (@uc_node_1 node))
          (= root @uc_node_1)
          (edge @uc_node_1 @uc_node_0)
          (= (next @uc_node_0) @uc_node_0)
          (= (next @uc_node_1) @uc_node_0)
        )
        "###);
    }

    #[test]
    fn test_parse_cvc5_model_by_cardinality() {
        let text = "(
; cardinality of node is 1
(define-fun edge ((x node) (y node)) Bool true)
)";
        let lines: Vec<&str> = text.lines().collect();
        let smt = parse_cvc(&lines, true).unwrap();
        assert_eq!(smt.universes["node"], vec!["@node_0".to_string()]);
        // root and next are completed with the only element
        let m = smt.to_model(&sig(), "-", cvc_default_elem(true)).unwrap();
        assert!(m.is_complete());
        assert_eq!(m.relation("edge").map(|r| r.len()), Some(1));
    }

    #[test]
    fn test_unreported_sort_gets_default_element() {
        let smt = parse_cvc(&["(model", ")"], false).unwrap();
        let m = smt.to_model(&sig(), "+", cvc_default_elem(false)).unwrap();
        assert_eq!(m.names(), &["@uc_node_0".to_string()]);
    }

    #[test]
    fn test_smt_eval_builtins() {
        let smt = SmtModel::default();
        let eval = |text: &str| smt.smt_eval(&sexp::parse(text).unwrap()).unwrap().to_string();
        assert_eq!(eval("(distinct a b c)"), "true");
        assert_eq!(eval("(distinct a b a)"), "false");
        assert_eq!(eval("(ite (= a a) b c)"), "b");
        assert_eq!(eval("(let ((x a) (y b)) (=> (= x y) false))"), "true");
        assert_eq!(eval("(as a node)"), "a");
    }

    #[test]
    fn test_smt_eval_errors() {
        let smt = SmtModel::default();
        let e = sexp::parse("(frobnicate a)").unwrap();
        assert_eq!(
            smt.smt_eval(&e),
            Err(EvalError("unexpected function frobnicate".to_string()))
        );
        let e = sexp::parse("(not true false)").unwrap();
        assert!(smt.smt_eval(&e).is_err());
    }
}
