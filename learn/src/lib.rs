// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Counterexample-guided learning of first-order formulas.
//!
//! The loop in [`learn`] alternates between asking an equivalence oracle for a
//! model that distinguishes the current hypothesis from a target, and asking a
//! [`separator::Separator`] for a new hypothesis consistent with every model
//! labeled so far.

// configure clippy
#![allow(clippy::needless_return)]
#![allow(clippy::type_complexity)]
#![allow(clippy::new_without_default)]
#![deny(clippy::uninlined_format_args)]
// documentation-related lints (only checked when running rustdoc)
#![warn(missing_docs)]
#![allow(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod learn;
pub mod separator;
pub mod timer;
