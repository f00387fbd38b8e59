// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Free variables and renaming of free variables.

use std::collections::{BTreeSet, HashMap};

use crate::syntax::{Formula, Term};

/// A renaming of variables.
pub type Renaming = HashMap<String, String>;

/// The variables occurring in a term. Constants of the signature are also
/// represented as variables, so they are included.
pub fn free_vars_term(term: &Term) -> BTreeSet<String> {
    let mut vars = BTreeSet::new();
    collect_term(term, &mut vars);
    vars
}

fn collect_term(term: &Term, vars: &mut BTreeSet<String>) {
    match term {
        Term::Var(v) => {
            vars.insert(v.clone());
        }
        Term::Func(_, args) => args.iter().for_each(|a| collect_term(a, vars)),
    }
}

/// The free variables of a formula. A quantified variable is never free in
/// its quantifier, even if it occurs in the body.
pub fn free_vars(formula: &Formula) -> BTreeSet<String> {
    match formula {
        Formula::And(fs) | Formula::Or(fs) => fs.iter().flat_map(free_vars).collect(),
        Formula::Not(f) => free_vars(f),
        Formula::Equal(a, b) => {
            let mut vars = free_vars_term(a);
            collect_term(b, &mut vars);
            vars
        }
        Formula::Relation(_, args) => {
            let mut vars = BTreeSet::new();
            args.iter().for_each(|a| collect_term(a, &mut vars));
            vars
        }
        Formula::Forall { var, body, .. } | Formula::Exists { var, body, .. } => {
            let mut vars = free_vars(body);
            vars.remove(var);
            vars
        }
    }
}

/// Rename the variables of a term.
pub fn rename_free_vars_term(term: &Term, mapping: &Renaming) -> Term {
    match term {
        Term::Var(v) => Term::Var(mapping.get(v).unwrap_or(v).clone()),
        Term::Func(f, args) => Term::Func(
            f.clone(),
            args.iter()
                .map(|a| rename_free_vars_term(a, mapping))
                .collect(),
        ),
    }
}

/// Rename the free variables of a formula.
///
/// Under a quantifier whose variable is a key of `mapping`, that one entry is
/// dropped for the body; the rest of the mapping still applies there, and
/// occurrences outside the quantifier are renamed as usual. The renaming is
/// not capture-avoiding: a free variable renamed to the name of an enclosing
/// quantifier's variable becomes bound by it.
pub fn rename_free_vars(formula: &Formula, mapping: &Renaming) -> Formula {
    let terms = |args: &[Term]| -> Vec<Term> {
        args.iter()
            .map(|a| rename_free_vars_term(a, mapping))
            .collect()
    };
    match formula {
        Formula::And(fs) => Formula::And(fs.iter().map(|f| rename_free_vars(f, mapping)).collect()),
        Formula::Or(fs) => Formula::Or(fs.iter().map(|f| rename_free_vars(f, mapping)).collect()),
        Formula::Not(f) => Formula::not(rename_free_vars(f, mapping)),
        Formula::Equal(a, b) => Formula::Equal(
            rename_free_vars_term(a, mapping),
            rename_free_vars_term(b, mapping),
        ),
        Formula::Relation(r, args) => Formula::Relation(r.clone(), terms(args)),
        Formula::Forall { var, sort, body } | Formula::Exists { var, sort, body } => {
            let body = if mapping.contains_key(var) {
                let mut inner = mapping.clone();
                inner.remove(var);
                rename_free_vars(body, &inner)
            } else {
                rename_free_vars(body, mapping)
            };
            if matches!(formula, Formula::Forall { .. }) {
                Formula::forall(var, sort, body)
            } else {
                Formula::exists(var, sort, body)
            }
        }
    }
}
