// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Evaluate formulas directly on finite models.

use thiserror::Error;

use crate::{
    model::{ElemId, Model},
    syntax::{Formula, Term},
};

/// An assignment maps bound variables to elements of a model.
pub type Assignment = im::HashMap<String, ElemId>;

/// An error evaluating a term or formula on a model.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EvalError {
    /// A variable that is neither bound nor a constant of the model.
    #[error("variable {0} not defined")]
    UndefinedVariable(String),
    /// A function applied to a tuple it has no value at.
    #[error("function {func} is not defined at ({args})")]
    #[allow(missing_docs)]
    UndefinedFunctionApplication { func: String, args: String },
    /// A function, relation, or sort the model does not interpret.
    #[error("symbol {0} is not interpreted by the model")]
    UnknownSymbol(String),
}

/// Find the element a term denotes. Variables are looked up in the
/// assumptions first, then among the model's constants.
pub fn resolve(term: &Term, model: &Model, assumptions: &Assignment) -> Result<ElemId, EvalError> {
    match term {
        Term::Var(v) => assumptions
            .get(v)
            .copied()
            .or_else(|| model.constant(v))
            .ok_or_else(|| EvalError::UndefinedVariable(v.clone())),
        Term::Func(f, args) => {
            let interp = model
                .function(f)
                .ok_or_else(|| EvalError::UnknownSymbol(f.clone()))?;
            let args = args
                .iter()
                .map(|a| resolve(a, model, assumptions))
                .collect::<Result<Vec<_>, _>>()?;
            interp.get(&args).copied().ok_or_else(|| {
                let names = args.iter().map(|&e| model.name(e)).collect::<Vec<_>>();
                EvalError::UndefinedFunctionApplication {
                    func: f.clone(),
                    args: names.join(", "),
                }
            })
        }
    }
}

/// Evaluate a formula on a model under an assignment to its free variables.
///
/// Conjunctions and disjunctions short-circuit left to right, so an error in a
/// conjunct after a false one is not reported. Quantifiers range over the
/// elements of their sort in the model.
pub fn evaluate(
    formula: &Formula,
    model: &Model,
    assumptions: &Assignment,
) -> Result<bool, EvalError> {
    match formula {
        Formula::And(fs) => {
            for f in fs {
                if !evaluate(f, model, assumptions)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Formula::Or(fs) => {
            for f in fs {
                if evaluate(f, model, assumptions)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Formula::Not(f) => Ok(!evaluate(f, model, assumptions)?),
        Formula::Equal(a, b) => {
            Ok(resolve(a, model, assumptions)? == resolve(b, model, assumptions)?)
        }
        Formula::Relation(r, args) => {
            let tuples = model
                .relation(r)
                .ok_or_else(|| EvalError::UnknownSymbol(r.clone()))?;
            let args = args
                .iter()
                .map(|a| resolve(a, model, assumptions))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tuples.contains(&args))
        }
        Formula::Forall { var, sort, body } => {
            for &e in universe(model, sort)? {
                if !evaluate(body, model, &assumptions.update(var.clone(), e))? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Formula::Exists { var, sort, body } => {
            for &e in universe(model, sort)? {
                if evaluate(body, model, &assumptions.update(var.clone(), e))? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

fn universe<'a>(model: &'a Model, sort: &str) -> Result<&'a [ElemId], EvalError> {
    if !model.signature().contains_sort(sort) {
        return Err(EvalError::UnknownSymbol(sort.to_string()));
    }
    Ok(model.elems_of_sort(sort))
}

/// Evaluate a closed formula on a model.
pub fn check(formula: &Formula, model: &Model) -> Result<bool, EvalError> {
    evaluate(formula, model, &Assignment::new())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::syntax::Signature;

    /// A three node graph with edges 0->1 and 1->2, and `succ` mapping each
    /// node to the next one (wrapping around).
    fn graph() -> Model {
        let mut sig = Signature::new();
        sig.add_sort("node").unwrap();
        sig.add_constant("root", "node").unwrap();
        sig.add_relation("edge", &["node", "node"]).unwrap();
        sig.add_function("succ", &["node"], "node").unwrap();
        sig.finalize_sorts();
        let mut m = Model::new(&Arc::new(sig));
        for n in ["n0", "n1", "n2"] {
            m.add_elem(n, "node").unwrap();
        }
        m.add_constant("root", "n0").unwrap();
        m.add_relation("edge", &["n0", "n1"]).unwrap();
        m.add_relation("edge", &["n1", "n2"]).unwrap();
        m.add_function("succ", &["n0"], "n1").unwrap();
        m.add_function("succ", &["n1"], "n2").unwrap();
        m.add_function("succ", &["n2"], "n0").unwrap();
        m
    }

    fn x() -> Term {
        Term::var("x")
    }

    fn y() -> Term {
        Term::var("y")
    }

    #[test]
    fn test_vacuous_connectives() {
        let m = graph();
        assert_eq!(check(&Formula::true_(), &m), Ok(true));
        assert_eq!(check(&Formula::false_(), &m), Ok(false));
    }

    #[test]
    fn test_resolve() {
        let m = graph();
        let t = Term::func("succ", [Term::func("succ", [Term::var("root")])]);
        assert_eq!(resolve(&t, &m, &Assignment::new()), Ok(2));
        let a = Assignment::new().update("root".to_string(), 1);
        assert_eq!(resolve(&Term::var("root"), &m, &a), Ok(1), "assumptions shadow constants");
        assert_eq!(
            resolve(&x(), &m, &Assignment::new()),
            Err(EvalError::UndefinedVariable("x".to_string()))
        );
    }

    #[test]
    fn test_quantifiers() {
        let m = graph();
        let irreflexive = Formula::forall("x", "node", Formula::not(Formula::rel("edge", [x(), x()])));
        assert_eq!(check(&irreflexive, &m), Ok(true));
        let has_source = Formula::exists(
            "x",
            "node",
            Formula::forall("y", "node", Formula::not(Formula::rel("edge", [y(), x()]))),
        );
        assert_eq!(check(&has_source, &m), Ok(true));
        let succ_is_edge = Formula::forall(
            "x",
            "node",
            Formula::rel("edge", [x(), Term::func("succ", [x()])]),
        );
        assert_eq!(check(&succ_is_edge, &m), Ok(false));
    }

    #[test]
    fn test_quantifier_duality() {
        let m = graph();
        let bodies = [
            Formula::rel("edge", [Term::var("root"), x()]),
            Formula::equal(Term::func("succ", [x()]), Term::var("root")),
            Formula::exists("y", "node", Formula::rel("edge", [y(), x()])),
        ];
        for body in bodies {
            let forall = Formula::forall("x", "node", body.clone());
            let dual = Formula::not(Formula::exists("x", "node", Formula::not(body)));
            assert_eq!(check(&forall, &m), check(&dual, &m));
        }
    }

    #[test]
    fn test_short_circuit() {
        let m = graph();
        let undefined = Formula::rel("edge", [x(), x()]);
        let f = Formula::and([Formula::false_(), undefined.clone()]);
        assert_eq!(check(&f, &m), Ok(false));
        let f = Formula::or([Formula::true_(), undefined.clone()]);
        assert_eq!(check(&f, &m), Ok(true));
        assert!(check(&undefined, &m).is_err());
    }

    #[test]
    fn test_undefined_function_application() {
        let mut sig = Signature::new();
        sig.add_sort("s").unwrap();
        sig.add_function("f", &["s"], "s").unwrap();
        sig.finalize_sorts();
        let mut m = Model::new(&Arc::new(sig));
        m.add_elem("e0", "s").unwrap();
        let f = Formula::exists("x", "s", Formula::equal(Term::func("f", [x()]), x()));
        assert!(matches!(
            check(&f, &m),
            Err(EvalError::UndefinedFunctionApplication { .. })
        ));
    }
}
