// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Translate terms and formulas to SMT-LIB s-expressions.

use logic::syntax::{Environment, Formula, Term};
use smtlib::sexp::{app, atom_s, sexp_l, Sexp};
use thiserror::Error;

use crate::context::SolverContext;

/// An error translating an ill-formed formula.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TranslateError {
    /// A variable that is neither bound nor a constant.
    #[error("unbound variable {0}")]
    UnknownVariable(String),
    /// A relation or function that is not declared.
    #[error("undeclared symbol {0}")]
    UnknownSymbol(String),
    /// A quantifier over a sort that is not declared.
    #[error("undeclared sort {0}")]
    UnknownSort(String),
}

fn nary(head: &str, mut args: Vec<Sexp>) -> Sexp {
    // CVC rejects (and x) and (or x) under strict parsing
    if args.len() == 1 {
        args.remove(0)
    } else {
        app(head, args)
    }
}

fn symbol_app(name: &str, args: Vec<Sexp>) -> Sexp {
    if args.is_empty() {
        atom_s(name)
    } else {
        app(name, args)
    }
}

/// Translate a term whose variables are bound in `env`.
pub fn term(t: &Term, env: &Environment, ctx: &SolverContext) -> Result<Sexp, TranslateError> {
    match t {
        Term::Var(v) => match env.lookup_var(v) {
            Some(_) => Ok(atom_s(v)),
            None => Err(TranslateError::UnknownVariable(v.clone())),
        },
        Term::Func(f, args) => {
            if !ctx.signature().functions().contains_key(f) {
                return Err(TranslateError::UnknownSymbol(f.clone()));
            }
            let args = args
                .iter()
                .map(|a| term(a, env, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(symbol_app(f, args))
        }
    }
}

/// Translate a formula whose free variables are bound in `env`. Quantified
/// variables are bound in `env` while translating their body.
pub fn formula(
    f: &Formula,
    env: &mut Environment,
    ctx: &SolverContext,
) -> Result<Sexp, TranslateError> {
    match f {
        Formula::And(fs) if fs.is_empty() => Ok(atom_s("true")),
        Formula::Or(fs) if fs.is_empty() => Ok(atom_s("false")),
        Formula::And(fs) | Formula::Or(fs) => {
            let args = fs
                .iter()
                .map(|f| formula(f, env, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            let head = if matches!(f, Formula::And(_)) { "and" } else { "or" };
            Ok(nary(head, args))
        }
        Formula::Not(f) => Ok(app("not", [formula(f, env, ctx)?])),
        Formula::Equal(a, b) => Ok(app("=", [term(a, env, ctx)?, term(b, env, ctx)?])),
        Formula::Relation(r, args) => {
            if !ctx.signature().relations().contains_key(r) {
                return Err(TranslateError::UnknownSymbol(r.clone()));
            }
            let args = args
                .iter()
                .map(|a| term(a, env, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(symbol_app(r, args))
        }
        Formula::Forall { var, sort, body } | Formula::Exists { var, sort, body } => {
            let sort_symbol = ctx
                .sort_symbol(sort)
                .ok_or_else(|| TranslateError::UnknownSort(sort.clone()))?;
            env.bind(var, sort);
            let body = formula(body, env, ctx);
            env.pop();
            let q = if matches!(f, Formula::Forall { .. }) {
                "forall"
            } else {
                "exists"
            };
            Ok(app(
                q,
                [
                    sexp_l([sexp_l([atom_s(var), atom_s(sort_symbol)])]),
                    body?,
                ],
            ))
        }
    }
}
