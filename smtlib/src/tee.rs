// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Record SMT output and save to a file for debugging purposes.

use std::{
    collections::hash_map::DefaultHasher,
    fs::OpenOptions,
    hash::{Hash, Hasher},
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::sexp::Sexp;

/// Track and save SMT sent to solver so far.
#[derive(Debug)]
pub struct Tee {
    dir: PathBuf,
    prefix: String,
    contents: Vec<Sexp>,
}

fn calculate_hash<T: Hash>(v: T) -> String {
    let mut hash_state = DefaultHasher::new();
    v.hash(&mut hash_state);
    let h = hash_state.finish();
    format!("{h:016x}")[..8].to_string()
}

impl Tee {
    /// Create a new empty `Tee` saving files named `{prefix}-{hash}.smt2` in `dir`.
    pub fn new<P: AsRef<Path>>(dir: P, prefix: &str) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            prefix: prefix.to_string(),
            contents: vec![],
        }
    }

    /// Append a raw s-expression sent to solver.
    pub fn append(&mut self, s: Sexp) {
        self.contents.push(s)
    }

    /// Render everything appended so far as SMT-LIB text, one command per line.
    pub fn render(&self) -> String {
        self.contents
            .iter()
            .map(|s| match s {
                Sexp::Comment(c) if c.is_empty() => "".to_string(),
                Sexp::Comment(c) => format!(";; {c}"),
                s => s.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Save the SMT2 input currently sent to the solver to a file based on
    /// content hash. Returns the path of the saved file.
    pub fn save(&self) -> io::Result<PathBuf> {
        let contents = self.render();
        let hash = calculate_hash(&contents);
        let dest = self.dir.join(format!("{}-{hash}.smt2", self.prefix));
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&dest)?;
        write!(&mut f, "{contents}")?;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::Tee;
    use crate::sexp::{app, atom_s, Sexp};

    #[test]
    fn test_render() {
        let mut tee = Tee::new(".", "query");
        tee.append(Sexp::Comment("oracle query".to_string()));
        tee.append(app("declare-sort", [atom_s("node")]));
        tee.append(Sexp::Comment("".to_string()));
        tee.append(app("check-sat", []));
        insta::assert_snapshot!(tee.render(), @r###"
        ;; oracle query
        (declare-sort node)

        (check-sat)
        "###);
    }
}
