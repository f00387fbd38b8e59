// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Finite relational structures over a [`Signature`].

use itertools::Itertools;
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};
use thiserror::Error;

use crate::syntax::Signature;

/// An element of a model, identified by its (dense, 0-based) insertion order.
pub type ElemId = usize;

/// An error from building a model or checking it against its signature.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ModelError {
    /// An element name that was never added.
    #[error("unknown element {0}")]
    UnknownElement(String),
    /// A constant, relation, or function not in the signature.
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),
    /// A sort not in the signature.
    #[error("unknown sort {0}")]
    UnknownSort(String),
    /// A symbol was given the wrong number of arguments.
    #[allow(missing_docs)]
    #[error("{symbol} expected {expected} args but found {found} args")]
    Arity {
        symbol: String,
        expected: usize,
        found: usize,
    },
    /// An element of the wrong sort was used for a symbol.
    #[allow(missing_docs)]
    #[error("{symbol} expected an element of sort {expected} but {element} has sort {found}")]
    SortMismatch {
        symbol: String,
        element: String,
        expected: String,
        found: String,
    },
    /// The model does not interpret every part of its signature.
    #[error("model is incomplete: {0}")]
    Incomplete(String),
}

/// A finite model: named elements, each of one sort, and an interpretation of
/// the constants, relations and functions of a signature.
///
/// Once labeled and handed to the rest of the system a model is treated as
/// immutable.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Model {
    /// Role of the model: "+" (positive), "-" (negative), or a user label.
    pub label: String,
    #[serde(skip)]
    sig: Arc<Signature>,
    names: Vec<String>,
    elems: HashMap<String, ElemId>,
    /// The sort of each element
    sorts: Vec<String>,
    elems_of_sort: BTreeMap<String, Vec<ElemId>>,
    /// Same as `elems_of_sort`, indexed by the signature's sort order
    elems_of_sort_index: Vec<Vec<ElemId>>,
    constants: BTreeMap<String, ElemId>,
    relations: BTreeMap<String, BTreeSet<Vec<ElemId>>>,
    functions: BTreeMap<String, BTreeMap<Vec<ElemId>, ElemId>>,
}

impl Model {
    /// An empty model over `sig`, with every relation and function present
    /// but empty. The signature's sorts must be finalized.
    pub fn new(sig: &Arc<Signature>) -> Self {
        assert!(
            sig.is_finalized(),
            "models can only be built over a signature with finalized sorts"
        );
        Self {
            label: String::new(),
            sig: sig.clone(),
            names: vec![],
            elems: HashMap::new(),
            sorts: vec![],
            elems_of_sort: BTreeMap::new(),
            elems_of_sort_index: vec![vec![]; sig.sort_names().len()],
            constants: BTreeMap::new(),
            relations: sig
                .relations()
                .keys()
                .map(|r| (r.clone(), BTreeSet::new()))
                .collect(),
            functions: sig
                .functions()
                .keys()
                .map(|f| (f.clone(), BTreeMap::new()))
                .collect(),
        }
    }

    /// The signature this model interprets.
    pub fn signature(&self) -> &Arc<Signature> {
        &self.sig
    }

    /// Add an element. Returns false (and does nothing) if the name is taken.
    pub fn add_elem(&mut self, name: &str, sort: &str) -> Result<bool, ModelError> {
        if !self.sig.contains_sort(sort) {
            return Err(ModelError::UnknownSort(sort.to_string()));
        }
        if self.elems.contains_key(name) {
            return Ok(false);
        }
        let id = self.names.len();
        self.elems.insert(name.to_string(), id);
        self.elems_of_sort
            .entry(sort.to_string())
            .or_default()
            .push(id);
        self.elems_of_sort_index[self.sig.sort_idx(sort)].push(id);
        self.sorts.push(sort.to_string());
        self.names.push(name.to_string());
        Ok(true)
    }

    /// Look up the id of an element by name.
    pub fn elem(&self, name: &str) -> Result<ElemId, ModelError> {
        self.elems
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::UnknownElement(name.to_string()))
    }

    fn elem_of_sort(&self, symbol: &str, name: &str, sort: &str) -> Result<ElemId, ModelError> {
        let id = self.elem(name)?;
        if self.sorts[id] != sort {
            return Err(ModelError::SortMismatch {
                symbol: symbol.to_string(),
                element: name.to_string(),
                expected: sort.to_string(),
                found: self.sorts[id].clone(),
            });
        }
        Ok(id)
    }

    fn tuple<S: AsRef<str>>(
        &self,
        symbol: &str,
        sorts: &[String],
        args: &[S],
    ) -> Result<Vec<ElemId>, ModelError> {
        if sorts.len() != args.len() {
            return Err(ModelError::Arity {
                symbol: symbol.to_string(),
                expected: sorts.len(),
                found: args.len(),
            });
        }
        sorts
            .iter()
            .zip(args)
            .map(|(sort, a)| self.elem_of_sort(symbol, a.as_ref(), sort))
            .collect()
    }

    /// Assign a constant. Returns false (and does nothing) if it is already assigned.
    pub fn add_constant(&mut self, name: &str, elem: &str) -> Result<bool, ModelError> {
        let sort = self
            .sig
            .constants()
            .get(name)
            .ok_or_else(|| ModelError::UnknownSymbol(name.to_string()))?;
        let id = self.elem_of_sort(name, elem, sort)?;
        if self.constants.contains_key(name) {
            return Ok(false);
        }
        self.constants.insert(name.to_string(), id);
        Ok(true)
    }

    /// Add a tuple to a relation. Returns false if it was already present.
    pub fn add_relation<S: AsRef<str>>(&mut self, rel: &str, args: &[S]) -> Result<bool, ModelError> {
        let sorts = self
            .sig
            .relations()
            .get(rel)
            .ok_or_else(|| ModelError::UnknownSymbol(rel.to_string()))?;
        let t = self.tuple(rel, sorts, args)?;
        Ok(self.relations.entry(rel.to_string()).or_default().insert(t))
    }

    /// Set a function's value at a tuple. Returns false (keeping the old
    /// value) if the function is already defined there.
    pub fn add_function<S: AsRef<str>>(
        &mut self,
        func: &str,
        args: &[S],
        result: &str,
    ) -> Result<bool, ModelError> {
        let (sorts, ret) = self
            .sig
            .functions()
            .get(func)
            .ok_or_else(|| ModelError::UnknownSymbol(func.to_string()))?;
        let t = self.tuple(func, sorts, args)?;
        let r = self.elem_of_sort(func, result, ret)?;
        let interp = self.functions.entry(func.to_string()).or_default();
        if interp.contains_key(&t) {
            return Ok(false);
        }
        interp.insert(t, r);
        Ok(true)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the model has no elements.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The name of an element.
    pub fn name(&self, id: ElemId) -> &str {
        &self.names[id]
    }

    /// All element names, by id.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The sort of a named element, if it exists.
    pub fn sort_of(&self, name: &str) -> Option<&str> {
        self.elems.get(name).map(|&id| self.sorts[id].as_str())
    }

    /// The sort of an element.
    pub fn sort_of_elem(&self, id: ElemId) -> &str {
        &self.sorts[id]
    }

    /// The elements of a sort, in insertion order.
    pub fn elems_of_sort(&self, sort: &str) -> &[ElemId] {
        self.elems_of_sort
            .get(sort)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The elements of the sort at index `idx` in the signature's sort order.
    pub fn elems_of_sort_index(&self, idx: usize) -> &[ElemId] {
        &self.elems_of_sort_index[idx]
    }

    /// The number of elements of each sort, in sort order.
    pub fn universe_sizes(&self) -> Vec<usize> {
        self.elems_of_sort_index.iter().map(|v| v.len()).collect()
    }

    #[allow(missing_docs)]
    pub fn constant(&self, name: &str) -> Option<ElemId> {
        self.constants.get(name).copied()
    }

    #[allow(missing_docs)]
    pub fn constants(&self) -> &BTreeMap<String, ElemId> {
        &self.constants
    }

    #[allow(missing_docs)]
    pub fn relation(&self, name: &str) -> Option<&BTreeSet<Vec<ElemId>>> {
        self.relations.get(name)
    }

    #[allow(missing_docs)]
    pub fn relations(&self) -> &BTreeMap<String, BTreeSet<Vec<ElemId>>> {
        &self.relations
    }

    #[allow(missing_docs)]
    pub fn function(&self, name: &str) -> Option<&BTreeMap<Vec<ElemId>, ElemId>> {
        self.functions.get(name)
    }

    #[allow(missing_docs)]
    pub fn functions(&self) -> &BTreeMap<String, BTreeMap<Vec<ElemId>, ElemId>> {
        &self.functions
    }

    /// All argument tuples for a list of sorts, over the current universes.
    pub fn tuples(&self, sorts: &[String]) -> Vec<Vec<ElemId>> {
        if sorts.is_empty() {
            return vec![vec![]];
        }
        sorts
            .iter()
            .map(|s| self.elems_of_sort(s).iter().copied())
            .multi_cartesian_product()
            .collect()
    }

    /// Check that every sort is non-empty, every constant is assigned, and every
    /// relation and function is interpreted (functions on every tuple).
    pub fn check_complete(&self) -> Result<(), ModelError> {
        for sort in self.sig.sorts() {
            if self.elems_of_sort(sort).is_empty() {
                return Err(ModelError::Incomplete(format!("sort {sort} is empty")));
            }
        }
        for c in self.sig.constants().keys() {
            if !self.constants.contains_key(c) {
                return Err(ModelError::Incomplete(format!("constant {c} is unassigned")));
            }
        }
        for r in self.sig.relations().keys() {
            if !self.relations.contains_key(r) {
                return Err(ModelError::Incomplete(format!("relation {r} is missing")));
            }
        }
        for (f, (sorts, _)) in self.sig.functions() {
            let Some(interp) = self.functions.get(f) else {
                return Err(ModelError::Incomplete(format!("function {f} is missing")));
            };
            for t in self.tuples(sorts) {
                if !interp.contains_key(&t) {
                    let args = t.iter().map(|&e| self.name(e)).join(", ");
                    return Err(ModelError::Incomplete(format!(
                        "function {f} is undefined at ({args})"
                    )));
                }
            }
        }
        Ok(())
    }

    /// See [`Model::check_complete`].
    pub fn is_complete(&self) -> bool {
        self.check_complete().is_ok()
    }

    /// Fill in everything the model does not interpret with defaults: the first
    /// element of the sort for constants and function values, and the empty set
    /// for relations. Every sort must already be non-empty.
    pub fn complete_with_defaults(&mut self) -> Result<(), ModelError> {
        let sig = self.sig.clone();
        let first = |m: &Model, sort: &str| -> Result<String, ModelError> {
            m.elems_of_sort(sort)
                .first()
                .map(|&e| m.name(e).to_string())
                .ok_or_else(|| ModelError::Incomplete(format!("sort {sort} is empty")))
        };
        for (c, sort) in sig.constants() {
            if !self.constants.contains_key(c) {
                let v = first(self, sort)?;
                self.add_constant(c, &v)?;
            }
        }
        for r in sig.relations().keys() {
            self.relations.entry(r.clone()).or_default();
        }
        for (f, (sorts, ret)) in sig.functions() {
            let v = first(self, ret)?;
            for t in self.tuples(sorts) {
                let args = t.iter().map(|&e| self.name(e).to_string()).collect_vec();
                self.add_function(f, &args, &v)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig() -> Arc<Signature> {
        let mut sig = Signature::new();
        sig.add_sort("node").unwrap();
        sig.add_sort("value").unwrap();
        sig.add_constant("leader", "node").unwrap();
        sig.add_relation("decided", &["node", "value"]).unwrap();
        sig.add_function("pref", &["node"], "value").unwrap();
        sig.finalize_sorts();
        Arc::new(sig)
    }

    #[test]
    fn test_add_reports_new_entries() {
        let mut m = Model::new(&sig());
        assert_eq!(m.add_elem("n0", "node"), Ok(true));
        assert_eq!(m.add_elem("n0", "node"), Ok(false));
        assert_eq!(m.add_elem("v0", "value"), Ok(true));
        assert_eq!(m.add_elem("n1", "node"), Ok(true));
        assert_eq!(m.elem("n1"), Ok(2));
        assert_eq!(m.elems_of_sort("node"), &[0, 2]);
        assert_eq!(m.elems_of_sort_index(1), &[1]);

        assert_eq!(m.add_constant("leader", "n1"), Ok(true));
        assert_eq!(m.add_constant("leader", "n0"), Ok(false));
        assert_eq!(m.constant("leader"), Some(2));

        assert_eq!(m.add_relation("decided", &["n0", "v0"]), Ok(true));
        assert_eq!(m.add_relation("decided", &["n0", "v0"]), Ok(false));
        assert_eq!(m.add_function("pref", &["n0"], "v0"), Ok(true));
        assert_eq!(m.add_function("pref", &["n0"], "v0"), Ok(false));
    }

    #[test]
    fn test_add_errors() {
        let mut m = Model::new(&sig());
        m.add_elem("n0", "node").unwrap();
        m.add_elem("v0", "value").unwrap();
        assert_eq!(
            m.add_elem("x", "thread"),
            Err(ModelError::UnknownSort("thread".to_string()))
        );
        assert_eq!(
            m.add_constant("follower", "n0"),
            Err(ModelError::UnknownSymbol("follower".to_string()))
        );
        assert!(matches!(
            m.add_relation("decided", &["n0"]),
            Err(ModelError::Arity { expected: 2, found: 1, .. })
        ));
        assert!(matches!(
            m.add_relation("decided", &["v0", "n0"]),
            Err(ModelError::SortMismatch { .. })
        ));
        assert_eq!(
            m.add_function("pref", &["n7"], "v0"),
            Err(ModelError::UnknownElement("n7".to_string()))
        );
    }

    #[test]
    fn test_completeness() {
        let mut m = Model::new(&sig());
        m.add_elem("n0", "node").unwrap();
        assert!(matches!(m.check_complete(), Err(ModelError::Incomplete(_))));
        m.add_elem("v0", "value").unwrap();
        m.add_elem("n1", "node").unwrap();
        m.add_constant("leader", "n0").unwrap();
        m.add_function("pref", &["n0"], "v0").unwrap();
        assert!(!m.is_complete(), "pref is undefined on n1");
        m.complete_with_defaults().unwrap();
        assert!(m.is_complete());
        assert_eq!(m.function("pref").unwrap().len(), 2);
        assert!(m.relation("decided").unwrap().is_empty());
    }
}
