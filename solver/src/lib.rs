// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Decide equivalence of first-order formulas with an SMT solver, producing
//! finite counterexample models when they differ.
//!
//! Two backends are supported: an incremental Z3 session ([`z3`]) and one-shot
//! CVC4/CVC5 runs with finite model finding ([`cvc`]). Both implement the
//! [`oracle::EquivalenceOracle`] state machine.

// configure clippy
#![allow(clippy::needless_return)]
#![allow(clippy::large_enum_variant)]
#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::type_complexity)]
// documentation-related lints (only checked when running rustdoc)
#![warn(missing_docs)]
#![allow(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod context;
pub mod cvc;
pub mod models;
pub mod oracle;
pub mod translate;
pub mod z3;

pub use smtlib::path::solver_path;
pub use smtlib::proc::{SatResp, SolverError};
