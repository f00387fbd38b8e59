// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Print signatures and models in the text format read by [`crate::parser`].

use itertools::Itertools;
use std::fmt;

use crate::{model::Model, syntax::Signature};

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for sort in self.sorts() {
            writeln!(f, "(sort {sort})")?;
        }
        for (c, sort) in self.constants() {
            writeln!(f, "(constant {c} {sort})")?;
        }
        for (r, sorts) in self.relations() {
            writeln!(f, "(relation {r} {})", sorts.iter().join(" "))?;
        }
        for (func, (sorts, ret)) in self.functions() {
            writeln!(f, "(function {func} {} {ret})", sorts.iter().join(" "))?;
        }
        Ok(())
    }
}

/// Print a model as a `(model ...)` block: its elements with their sorts,
/// then one fact per line. Constants and relations are sorted by name and
/// relation tuples and function arguments in element order.
pub fn model(m: &Model) -> String {
    let elems = (0..m.len())
        .map(|e| format!("({} {})", m.name(e), m.sort_of_elem(e)))
        .join(" ");
    let names = |t: &[usize]| t.iter().map(|&e| m.name(e)).join(" ");
    let mut facts = vec![];
    for (c, &e) in m.constants() {
        facts.push(format!("(= {c} {})", m.name(e)));
    }
    for (r, tuples) in m.relations() {
        for t in tuples {
            if t.is_empty() {
                facts.push(format!("({r})"));
            } else {
                facts.push(format!("({r} {})", names(t)));
            }
        }
    }
    for (func, interp) in m.functions() {
        for (args, &result) in interp {
            facts.push(format!("(= ({func} {}) {})", names(args), m.name(result)));
        }
    }
    let label = if m.label.is_empty() {
        String::new()
    } else {
        format!(" {}", m.label)
    };
    format!(
        "(model{label}\n  ({elems})\n{}\n)\n",
        facts.iter().map(|f| format!("  {f}")).join("\n")
    )
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", model(self))
    }
}
