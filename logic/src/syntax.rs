// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The AST for multi-sorted first-order terms and formulas, together with the
//! signature they are built over.

use itertools::Itertools;
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
};
use thiserror::Error;

/// Names which can never be used for a sort or symbol, since they are keywords
/// of the text format or of SMT-LIB.
pub const RESERVED_NAMES: &[&str] = &[
    "", "sort", "relation", "constant", "function", "axiom", "model", "forall", "exists", "and",
    "or", "not", "implies", "=", "=>", "ite", "let", "distinct", "true", "false", "Bool", "as",
    "!", "_",
];

/// Names starting with this prefix are left to the solvers for auxiliary
/// declarations.
pub const RESERVED_PREFIX: &str = "__";

/// An error from building a [`Signature`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    /// The name is reserved or already declared as a sort or symbol.
    #[error("{0} is reserved or already declared")]
    NameInUse(String),
    /// A symbol referred to a sort that was not declared.
    #[error("sort {0} was not declared")]
    UnknownSort(String),
}

/// A Signature is the vocabulary formulas are built over: uninterpreted sorts,
/// and constants, relations and functions over those sorts.
///
/// All names are mutually disjoint and disjoint from [`RESERVED_NAMES`], and
/// none starts with [`RESERVED_PREFIX`].
#[derive(PartialEq, Eq, Clone, Debug, Default, Serialize)]
pub struct Signature {
    sorts: BTreeSet<String>,
    /// Sorts in their finalized order (empty until [`Signature::finalize_sorts`]).
    sort_names: Vec<String>,
    sort_indices: HashMap<String, usize>,
    constants: BTreeMap<String, String>,
    relations: BTreeMap<String, Vec<String>>,
    functions: BTreeMap<String, (Vec<String>, String)>,
}

impl Signature {
    /// An empty signature.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `name` is not reserved and not yet declared.
    pub fn is_free_name(&self, name: &str) -> bool {
        !(RESERVED_NAMES.contains(&name)
            || name.starts_with(RESERVED_PREFIX)
            || self.sorts.contains(name)
            || self.constants.contains_key(name)
            || self.relations.contains_key(name)
            || self.functions.contains_key(name))
    }

    fn claim(&self, name: &str) -> Result<(), SignatureError> {
        if self.is_free_name(name) {
            Ok(())
        } else {
            Err(SignatureError::NameInUse(name.to_string()))
        }
    }

    fn check_sorts<'a, I>(&self, sorts: I) -> Result<(), SignatureError>
    where
        I: IntoIterator<Item = &'a String>,
    {
        for s in sorts {
            if !self.sorts.contains(s) {
                return Err(SignatureError::UnknownSort(s.clone()));
            }
        }
        Ok(())
    }

    /// Declare a new sort. Invalidates any previous sort order.
    pub fn add_sort(&mut self, sort: &str) -> Result<(), SignatureError> {
        self.claim(sort)?;
        self.sorts.insert(sort.to_string());
        self.sort_names.clear();
        self.sort_indices.clear();
        Ok(())
    }

    /// Declare a constant of sort `sort`.
    pub fn add_constant(&mut self, name: &str, sort: &str) -> Result<(), SignatureError> {
        self.claim(name)?;
        self.check_sorts([&sort.to_string()])?;
        self.constants.insert(name.to_string(), sort.to_string());
        Ok(())
    }

    /// Declare a relation with the given argument sorts.
    pub fn add_relation<S: AsRef<str>>(
        &mut self,
        name: &str,
        args: &[S],
    ) -> Result<(), SignatureError> {
        self.claim(name)?;
        let args = args.iter().map(|s| s.as_ref().to_string()).collect_vec();
        self.check_sorts(&args)?;
        self.relations.insert(name.to_string(), args);
        Ok(())
    }

    /// Declare a function with the given argument sorts and result sort.
    pub fn add_function<S: AsRef<str>>(
        &mut self,
        name: &str,
        args: &[S],
        ret: &str,
    ) -> Result<(), SignatureError> {
        self.claim(name)?;
        let args = args.iter().map(|s| s.as_ref().to_string()).collect_vec();
        self.check_sorts(args.iter().chain([&ret.to_string()]))?;
        self.functions
            .insert(name.to_string(), (args, ret.to_string()));
        Ok(())
    }

    /// Fix a total order on the sorts, giving each a dense index.
    pub fn finalize_sorts(&mut self) {
        self.sort_names = self.sorts.iter().cloned().collect();
        self.sort_indices = self
            .sort_names
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();
    }

    /// Whether the sort order is up to date with the declared sorts.
    pub fn is_finalized(&self) -> bool {
        self.sort_names.len() == self.sorts.len()
    }

    /// Get the index of a sort in the finalized order. Panics if invalid.
    pub fn sort_idx(&self, sort: &str) -> usize {
        *self
            .sort_indices
            .get(sort)
            .unwrap_or_else(|| panic!("invalid sort {sort} (or sorts not finalized)"))
    }

    /// Sorts in their finalized order.
    pub fn sort_names(&self) -> &[String] {
        &self.sort_names
    }

    /// All declared sorts, in lexicographic order.
    pub fn sorts(&self) -> impl Iterator<Item = &String> {
        self.sorts.iter()
    }

    /// Check if `name` is a declared sort.
    pub fn contains_sort(&self, name: &str) -> bool {
        self.sorts.contains(name)
    }

    #[allow(missing_docs)]
    pub fn constants(&self) -> &BTreeMap<String, String> {
        &self.constants
    }

    #[allow(missing_docs)]
    pub fn relations(&self) -> &BTreeMap<String, Vec<String>> {
        &self.relations
    }

    #[allow(missing_docs)]
    pub fn functions(&self) -> &BTreeMap<String, (Vec<String>, String)> {
        &self.functions
    }

    /// Every declared name: sorts, then constants, relations, and functions.
    pub fn all_names(&self) -> impl Iterator<Item = &String> {
        self.sorts
            .iter()
            .chain(self.constants.keys())
            .chain(self.relations.keys())
            .chain(self.functions.keys())
    }
}

/// A first-order term: a variable (bound variable or constant) or a function
/// application.
///
/// The derived order puts variables before applications.
#[derive(PartialEq, Eq, Clone, Debug, Hash, PartialOrd, Ord, Serialize)]
pub enum Term {
    /// A bound variable or a constant of the signature
    Var(String),
    /// Application of a signature function to arguments
    Func(String, Vec<Term>),
}

impl Term {
    /// Smart constructor for Var
    pub fn var(name: &str) -> Self {
        Self::Var(name.to_string())
    }

    /// Smart constructor for Func
    pub fn func<I>(f: &str, args: I) -> Self
    where
        I: IntoIterator<Item = Term>,
    {
        Self::Func(f.to_string(), args.into_iter().collect())
    }
}

/// A first-order formula.
///
/// `And(vec![])` is true and `Or(vec![])` is false.
#[derive(PartialEq, Eq, Clone, Debug, Hash, PartialOrd, Ord, Serialize)]
pub enum Formula {
    #[allow(missing_docs)]
    And(Vec<Formula>),
    #[allow(missing_docs)]
    Or(Vec<Formula>),
    #[allow(missing_docs)]
    Not(Box<Formula>),
    /// Equality between two terms of the same sort
    Equal(Term, Term),
    /// A relation applied to arguments
    Relation(String, Vec<Term>),
    #[allow(missing_docs)]
    Forall {
        var: String,
        sort: String,
        body: Box<Formula>,
    },
    #[allow(missing_docs)]
    Exists {
        var: String,
        sort: String,
        body: Box<Formula>,
    },
}

/// Smart constructors for Formula.
impl Formula {
    /// The formula `true`, represented as an empty conjunction.
    pub fn true_() -> Self {
        Self::And(vec![])
    }

    /// The formula `false`, represented as an empty disjunction.
    pub fn false_() -> Self {
        Self::Or(vec![])
    }

    #[allow(missing_docs)]
    pub fn and<I: IntoIterator<Item = Formula>>(fs: I) -> Self {
        Self::And(fs.into_iter().collect())
    }

    #[allow(missing_docs)]
    pub fn or<I: IntoIterator<Item = Formula>>(fs: I) -> Self {
        Self::Or(fs.into_iter().collect())
    }

    /// Negation. Does not simplify double negation.
    pub fn not(f: Formula) -> Self {
        Self::Not(Box::new(f))
    }

    /// `lhs -> rhs`, encoded as `!lhs | rhs`.
    pub fn implies(lhs: Formula, rhs: Formula) -> Self {
        Self::Or(vec![Self::not(lhs), rhs])
    }

    #[allow(missing_docs)]
    pub fn equal(lhs: Term, rhs: Term) -> Self {
        Self::Equal(lhs, rhs)
    }

    #[allow(missing_docs)]
    pub fn rel<I: IntoIterator<Item = Term>>(r: &str, args: I) -> Self {
        Self::Relation(r.to_string(), args.into_iter().collect())
    }

    #[allow(missing_docs)]
    pub fn forall(var: &str, sort: &str, body: Formula) -> Self {
        Self::Forall {
            var: var.to_string(),
            sort: sort.to_string(),
            body: Box::new(body),
        }
    }

    #[allow(missing_docs)]
    pub fn exists(var: &str, sort: &str, body: Formula) -> Self {
        Self::Exists {
            var: var.to_string(),
            sort: sort.to_string(),
            body: Box::new(body),
        }
    }
}

/// Utilities for getting information about a given [`Formula`].
impl Formula {
    /// Maximum nesting of quantifiers.
    pub fn quantifier_depth(&self) -> usize {
        match self {
            Formula::And(fs) | Formula::Or(fs) => {
                fs.iter().map(Formula::quantifier_depth).max().unwrap_or(0)
            }
            Formula::Not(f) => f.quantifier_depth(),
            Formula::Equal(..) | Formula::Relation(..) => 0,
            Formula::Forall { body, .. } | Formula::Exists { body, .. } => {
                1 + body.quantifier_depth()
            }
        }
    }

    /// Return the number of atomic formulas.
    pub fn size(&self) -> usize {
        match self {
            Formula::And(fs) | Formula::Or(fs) => fs.iter().map(Formula::size).sum(),
            Formula::Not(f) => f.size(),
            Formula::Equal(..) | Formula::Relation(..) => 1,
            Formula::Forall { body, .. } | Formula::Exists { body, .. } => body.size(),
        }
    }

    /// Render in the infix notation used for reporting learned formulas.
    pub fn pretty(&self) -> String {
        match self {
            Formula::And(fs) if fs.is_empty() => "true".to_string(),
            Formula::Or(fs) if fs.is_empty() => "false".to_string(),
            Formula::And(fs) | Formula::Or(fs) if fs.len() == 1 => fs[0].pretty(),
            Formula::And(fs) => format!("({})", fs.iter().map(Formula::pretty).join(" /\\ ")),
            Formula::Or(fs) => match &fs[..] {
                [Formula::Not(a), b] if !matches!(b, Formula::Not(_)) => {
                    format!("({} => {})", a.pretty(), b.pretty())
                }
                [a, Formula::Not(b)] if !matches!(a, Formula::Not(_)) => {
                    format!("({} => {})", b.pretty(), a.pretty())
                }
                _ => format!("({})", fs.iter().map(Formula::pretty).join(" \\/ ")),
            },
            Formula::Not(f) => match f.as_ref() {
                Formula::Equal(a, b) => format!("{} # {}", pretty_term(a), pretty_term(b)),
                Formula::Relation(..) => format!("~{}", f.pretty()),
                _ => format!("~({})", f.pretty()),
            },
            Formula::Equal(a, b) => format!("{} = {}", pretty_term(a), pretty_term(b)),
            Formula::Relation(r, args) => {
                format!("{r}({})", args.iter().map(pretty_term).join(", "))
            }
            Formula::Forall { var, sort, body } => {
                format!("\\A {var} \\in {sort} : {}", body.pretty())
            }
            Formula::Exists { var, sort, body } => {
                format!("\\E {var} \\in {sort} : {}", body.pretty())
            }
        }
    }
}

fn pretty_term(t: &Term) -> String {
    match t {
        Term::Var(v) => v.clone(),
        Term::Func(f, args) => format!("{f}[{}]", args.iter().map(pretty_term).join(", ")),
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(v) => write!(f, "{v}"),
            Term::Func(func, args) if args.is_empty() => write!(f, "({func})"),
            Term::Func(func, args) => write!(f, "({func} {})", args.iter().join(" ")),
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |f: &mut fmt::Formatter<'_>, head: &str, fs: &[Formula]| {
            if fs.is_empty() {
                write!(f, "({head})")
            } else {
                write!(f, "({head} {})", fs.iter().join(" "))
            }
        };
        match self {
            Formula::And(fs) => list(f, "and", fs),
            Formula::Or(fs) => list(f, "or", fs),
            Formula::Not(inner) => write!(f, "(not {inner})"),
            Formula::Equal(a, b) => write!(f, "(= {a} {b})"),
            Formula::Relation(r, args) if args.is_empty() => write!(f, "({r})"),
            Formula::Relation(r, args) => write!(f, "({r} {})", args.iter().join(" ")),
            Formula::Forall { var, sort, body } => write!(f, "(forall {var} {sort} {body})"),
            Formula::Exists { var, sort, body } => write!(f, "(exists {var} {sort} {body})"),
        }
    }
}

/// A scoped map from bound variables to their sorts, falling back to the
/// constants of a signature.
///
/// Binding a name that is already bound shadows it until the matching
/// [`Environment::pop`].
#[derive(Debug, Clone)]
pub struct Environment<'a> {
    sig: &'a Signature,
    bound: HashMap<String, String>,
    /// Each bound name with the binding it shadowed, if any.
    stack: Vec<(String, Option<String>)>,
}

impl<'a> Environment<'a> {
    /// An environment with nothing bound.
    pub fn new(sig: &'a Signature) -> Self {
        Self {
            sig,
            bound: HashMap::new(),
            stack: vec![],
        }
    }

    #[allow(missing_docs)]
    pub fn signature(&self) -> &'a Signature {
        self.sig
    }

    /// Bind `var` to `sort` in a new innermost scope.
    pub fn bind(&mut self, var: &str, sort: &str) {
        let shadowed = self.bound.insert(var.to_string(), sort.to_string());
        self.stack.push((var.to_string(), shadowed));
    }

    /// Leave the innermost scope.
    pub fn pop(&mut self) {
        let (var, shadowed) = self
            .stack
            .pop()
            .expect("pop from an environment with nothing bound");
        match shadowed {
            Some(sort) => {
                self.bound.insert(var, sort);
            }
            None => {
                self.bound.remove(&var);
            }
        }
    }

    /// Number of bindings currently in scope.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// The sort of a bound variable or constant.
    pub fn lookup_var(&self, x: &str) -> Option<&str> {
        self.bound
            .get(x)
            .or_else(|| self.sig.constants.get(x))
            .map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_sig() -> Signature {
        let mut sig = Signature::new();
        sig.add_sort("node").unwrap();
        sig.add_sort("edge_id").unwrap();
        sig.add_constant("root", "node").unwrap();
        sig.add_relation("edge", &["node", "node"]).unwrap();
        sig.add_function("src", &["edge_id"], "node").unwrap();
        sig.finalize_sorts();
        sig
    }

    #[test]
    fn test_names_are_disjoint() {
        let mut sig = graph_sig();
        assert_eq!(
            sig.add_relation("root", &["node"]),
            Err(SignatureError::NameInUse("root".to_string()))
        );
        assert_eq!(
            sig.add_sort("forall"),
            Err(SignatureError::NameInUse("forall".to_string()))
        );
        assert_eq!(
            sig.add_constant("c", "thread"),
            Err(SignatureError::UnknownSort("thread".to_string()))
        );
        assert!(sig.is_free_name("leader"));
        assert_eq!(sig.all_names().count(), 5);
        for name in ["ite", "distinct", "Bool", "=>", "__elem_node_0"] {
            assert_eq!(
                sig.add_relation(name, &["node"]),
                Err(SignatureError::NameInUse(name.to_string()))
            );
        }
        assert!(sig.is_free_name("elem_node_0"));
    }

    #[test]
    fn test_sort_order() {
        let mut sig = graph_sig();
        assert_eq!(sig.sort_names(), &["edge_id", "node"]);
        assert_eq!(sig.sort_idx("node"), 1);
        sig.add_sort("a").unwrap();
        assert!(!sig.is_finalized());
        sig.finalize_sorts();
        assert_eq!(sig.sort_idx("a"), 0);
        assert_eq!(sig.sort_idx("node"), 2);
    }

    #[test]
    fn test_term_order() {
        let x = Term::var("z");
        let f = Term::func("a", [Term::var("x")]);
        assert!(x < f, "variables order before applications");
    }

    #[test]
    fn test_environment_shadowing() {
        let sig = graph_sig();
        let mut env = Environment::new(&sig);
        assert_eq!(env.lookup_var("root"), Some("node"));
        assert_eq!(env.lookup_var("x"), None);
        env.bind("x", "node");
        env.bind("x", "edge_id");
        assert_eq!(env.lookup_var("x"), Some("edge_id"));
        env.pop();
        assert_eq!(env.lookup_var("x"), Some("node"));
        env.bind("root", "edge_id");
        assert_eq!(env.lookup_var("root"), Some("edge_id"));
        env.pop();
        env.pop();
        assert_eq!(env.lookup_var("x"), None);
        assert_eq!(env.lookup_var("root"), Some("node"));
        assert_eq!(env.depth(), 0);
    }

    #[test]
    fn test_display() {
        let f = Formula::forall(
            "x",
            "node",
            Formula::implies(
                Formula::rel("edge", [Term::var("x"), Term::var("root")]),
                Formula::equal(Term::var("x"), Term::var("root")),
            ),
        );
        assert_eq!(
            f.to_string(),
            "(forall x node (or (not (edge x root)) (= x root)))"
        );
        assert_eq!(f.pretty(), "\\A x \\in node : (edge(x, root) => x = root)");
        assert_eq!(f.quantifier_depth(), 1);
        assert_eq!(f.size(), 2);
        assert_eq!(Formula::true_().to_string(), "(and)");
        assert_eq!(Formula::false_().pretty(), "false");
    }
}
