// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Parse the parenthesized text format for signatures, formulas and models.
//!
//! A file is a sequence of declarations:
//!
//! ```text
//! (sort node)
//! (constant root node)
//! (relation edge node node)
//! (function next node node)
//! (axiom (forall x node (not (edge x x))))
//! (model m1 ((n0 node) (n1 node)) (= root n0) (edge n0 n1) (= (next n0) n1) (= (next n1) n0))
//! (constraint m1 (not m2) (implies m3 m4))
//! ```
//!
//! Lines starting with `;` are comments.

use std::sync::Arc;

use peg::str::LineCol;
use thiserror::Error;

use crate::{
    model::Model,
    syntax::{Formula, Signature, Term},
};

/// A raw s-expression with the byte offset it starts at.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    pos: usize,
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Atom(String),
    List(Vec<Node>),
}

peg::parser! {
grammar sexp() for str {
    rule comment() = ";" [^'\n']*
    rule _ = quiet!{ ([' ' | '\t' | '\n' | '\r'] / comment())* }
    rule atom_char() = [^ '(' | ')' | ';' | ' ' | '\t' | '\n' | '\r']

    rule node() -> Node
        = pos:position!() "(" _ items:(node() ** _) _ ")" { Node { pos, kind: Kind::List(items) } }
        / pos:position!() s:$(atom_char()+) { Node { pos, kind: Kind::Atom(s.to_string()) } }
        / expected!("atom or list")

    pub rule nodes() -> Vec<Node> = _ ns:(node() ** _) _ { ns }

    pub rule single() -> Node = _ n:node() _ { n }
}
}

/// An error from parsing the text format.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The text is not a well-formed sequence of s-expressions.
    #[error("syntax error at {0}")]
    Syntax(#[from] peg::error::ParseError<LineCol>),
    /// A well-formed s-expression that does not mean anything.
    #[allow(missing_docs)]
    #[error("{line}:{column}: {message}")]
    Invalid {
        line: usize,
        column: usize,
        message: String,
    },
}

/// A parsed file: a signature, axioms, labeled models and constraints on the
/// labels.
#[derive(Debug, Clone)]
pub struct FolFile {
    #[allow(missing_docs)]
    pub sig: Arc<Signature>,
    #[allow(missing_docs)]
    pub axioms: Vec<Formula>,
    /// Models in file order, each with its label.
    pub models: Vec<Model>,
    /// Labels whose models must satisfy the learned formula
    pub constraint_pos: Vec<String>,
    /// Labels whose models must not satisfy the learned formula
    pub constraint_neg: Vec<String>,
    /// Pairs of labels `(a, b)`: if the models labeled `a` satisfy the
    /// learned formula then so do the models labeled `b`
    pub constraint_imp: Vec<(String, String)>,
}

struct Interp<'a> {
    text: &'a str,
}

impl<'a> Interp<'a> {
    fn error<T>(&self, node: &Node, message: impl Into<String>) -> Result<T, ParseError> {
        let before = &self.text[..node.pos];
        let line = before.matches('\n').count() + 1;
        let column = before.len() - before.rfind('\n').map(|i| i + 1).unwrap_or(0) + 1;
        Err(ParseError::Invalid {
            line,
            column,
            message: message.into(),
        })
    }

    fn atom<'n>(&self, node: &'n Node) -> Result<&'n str, ParseError> {
        match &node.kind {
            Kind::Atom(s) => Ok(s),
            Kind::List(_) => self.error(node, "expected a name"),
        }
    }

    fn list<'n>(&self, node: &'n Node) -> Result<&'n [Node], ParseError> {
        match &node.kind {
            Kind::List(items) => Ok(items),
            Kind::Atom(s) => self.error(node, format!("expected a list, found {s}")),
        }
    }

    /// A list with an atom at its head.
    fn app<'n>(&self, node: &'n Node) -> Result<(&'n str, &'n [Node]), ParseError> {
        match self.list(node)? {
            [head, args @ ..] => Ok((self.atom(head)?, args)),
            [] => self.error(node, "unexpected ()"),
        }
    }

    fn atoms(&self, nodes: &[Node]) -> Result<Vec<String>, ParseError> {
        nodes
            .iter()
            .map(|n| self.atom(n).map(|s| s.to_string()))
            .collect()
    }

    fn term(&self, node: &Node) -> Result<Term, ParseError> {
        match &node.kind {
            Kind::Atom(v) => Ok(Term::var(v)),
            Kind::List(_) => {
                let (f, args) = self.app(node)?;
                let args = args
                    .iter()
                    .map(|a| self.term(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Term::func(f, args))
            }
        }
    }

    fn formula(&self, node: &Node) -> Result<Formula, ParseError> {
        if let Kind::Atom(a) = &node.kind {
            return self.error(node, format!("expected a formula, found {a}"));
        }
        let (head, args) = self.app(node)?;
        let formulas = |args: &[Node]| -> Result<Vec<Formula>, ParseError> {
            args.iter().map(|a| self.formula(a)).collect()
        };
        match (head, args) {
            ("and", args) => Ok(Formula::And(formulas(args)?)),
            ("or", args) => Ok(Formula::Or(formulas(args)?)),
            ("not", [f]) => Ok(Formula::not(self.formula(f)?)),
            ("implies", [a, b]) => Ok(Formula::implies(self.formula(a)?, self.formula(b)?)),
            ("=", [a, b]) => Ok(Formula::equal(self.term(a)?, self.term(b)?)),
            ("forall" | "exists", [var, sort, body]) => {
                let (var, sort) = (self.atom(var)?, self.atom(sort)?);
                let body = self.formula(body)?;
                Ok(if head == "forall" {
                    Formula::forall(var, sort, body)
                } else {
                    Formula::exists(var, sort, body)
                })
            }
            ("not" | "implies" | "=" | "forall" | "exists", _) => {
                self.error(node, format!("wrong number of arguments to {head}"))
            }
            (r, args) => {
                let args = args
                    .iter()
                    .map(|a| self.term(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Formula::rel(r, args))
            }
        }
    }

    /// Apply a declaration to the signature. Returns false if `node` is not a
    /// declaration.
    fn declaration(&self, sig: &mut Signature, node: &Node) -> Result<bool, ParseError> {
        let (head, args) = self.app(node)?;
        let result = match (head, args) {
            ("sort", [s]) => sig.add_sort(self.atom(s)?),
            ("constant", [c, s]) => sig.add_constant(self.atom(c)?, self.atom(s)?),
            ("relation", [r, sorts @ ..]) => sig.add_relation(self.atom(r)?, &self.atoms(sorts)?),
            ("function", [f, sorts @ .., ret]) => {
                sig.add_function(self.atom(f)?, &self.atoms(sorts)?, self.atom(ret)?)
            }
            ("sort" | "constant" | "relation" | "function", _) => {
                return self.error(node, format!("malformed {head} declaration"))
            }
            _ => return Ok(false),
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) => self.error(node, e.to_string()),
        }
    }

    fn model(&self, sig: &Arc<Signature>, node: &Node) -> Result<Model, ParseError> {
        let (head, args) = self.app(node)?;
        if head != "model" {
            return self.error(node, format!("expected model, found {head}"));
        }
        // the label is omitted for unlabeled models
        let (label, elems, facts) = match args {
            [elems @ Node { kind: Kind::List(_), .. }, facts @ ..] => ("", elems, facts),
            [label, elems, facts @ ..] => (self.atom(label)?, elems, facts),
            _ => return self.error(node, "expected (model [LABEL] ((ELEM SORT) ...) FACT ...)"),
        };
        let mut m = Model::new(sig);
        m.label = label.to_string();
        for elem in self.list(elems)? {
            let [e, s] = self.list(elem)? else {
                return self.error(elem, "expected (ELEM SORT)");
            };
            match m.add_elem(self.atom(e)?, self.atom(s)?) {
                Ok(true) => (),
                Ok(false) => return self.error(elem, "duplicate element"),
                Err(err) => return self.error(elem, err.to_string()),
            }
        }
        for fact in facts {
            let added = match self.app(fact)? {
                ("=", [lhs, value]) => {
                    let value = self.atom(value)?;
                    match &lhs.kind {
                        Kind::Atom(c) => m.add_constant(c, value),
                        Kind::List(_) => {
                            let (f, args) = self.app(lhs)?;
                            m.add_function(f, &self.atoms(args)?, value)
                        }
                    }
                }
                (r, args) => m.add_relation(r, &self.atoms(args)?),
            };
            if let Err(err) = added {
                return self.error(fact, err.to_string());
            }
        }
        if let Err(err) = m.check_complete() {
            return self.error(node, err.to_string());
        }
        Ok(m)
    }

    fn constraints(&self, file: &mut FolFile, args: &[Node]) -> Result<(), ParseError> {
        for c in args {
            match &c.kind {
                Kind::Atom(label) => file.constraint_pos.push(label.clone()),
                Kind::List(_) => match self.app(c)? {
                    ("not", [label]) => file.constraint_neg.push(self.atom(label)?.to_string()),
                    ("implies", [a, b]) => file
                        .constraint_imp
                        .push((self.atom(a)?.to_string(), self.atom(b)?.to_string())),
                    _ => return self.error(c, "expected LABEL, (not LABEL) or (implies LABEL LABEL)"),
                },
            }
        }
        Ok(())
    }
}

/// Parse a single formula.
pub fn parse_formula(text: &str) -> Result<Formula, ParseError> {
    let node = sexp::single(text)?;
    Interp { text }.formula(&node)
}

/// Parse a single term.
pub fn parse_term(text: &str) -> Result<Term, ParseError> {
    let node = sexp::single(text)?;
    Interp { text }.term(&node)
}

/// Parse a sequence of declarations into a signature with finalized sorts.
pub fn parse_signature(text: &str) -> Result<Signature, ParseError> {
    let interp = Interp { text };
    let mut sig = Signature::new();
    for node in sexp::nodes(text)? {
        if !interp.declaration(&mut sig, &node)? {
            return interp.error(&node, "expected a declaration");
        }
    }
    sig.finalize_sorts();
    Ok(sig)
}

/// Parse a single `(model ...)` over `sig`. The model must be complete.
pub fn parse_model(sig: &Arc<Signature>, text: &str) -> Result<Model, ParseError> {
    let node = sexp::single(text)?;
    Interp { text }.model(sig, &node)
}

/// Parse a whole file. All declarations must come before the first model.
pub fn parse_file(text: &str) -> Result<FolFile, ParseError> {
    let interp = Interp { text };
    let mut sig = Signature::new();
    let mut finalized: Option<Arc<Signature>> = None;
    let mut axioms = vec![];
    let mut models = vec![];
    let mut file = FolFile {
        sig: Arc::new(Signature::new()),
        axioms: vec![],
        models: vec![],
        constraint_pos: vec![],
        constraint_neg: vec![],
        constraint_imp: vec![],
    };
    for node in sexp::nodes(text)? {
        let (head, args) = interp.app(&node)?;
        match head {
            "sort" | "constant" | "relation" | "function" => {
                if finalized.is_some() {
                    return interp.error(&node, "declarations must come before models");
                }
                interp.declaration(&mut sig, &node)?;
            }
            "axiom" => match args {
                [f] => axioms.push(interp.formula(f)?),
                _ => return interp.error(&node, "expected (axiom FORMULA)"),
            },
            "model" => {
                let sig = finalized.get_or_insert_with(|| {
                    sig.finalize_sorts();
                    Arc::new(sig.clone())
                });
                models.push(interp.model(sig, &node)?);
            }
            "constraint" => interp.constraints(&mut file, args)?,
            _ => return interp.error(&node, format!("unexpected {head}")),
        }
    }
    file.sig = finalized.unwrap_or_else(|| {
        sig.finalize_sorts();
        Arc::new(sig)
    });
    file.axioms = axioms;
    file.models = models;
    Ok(file)
}
