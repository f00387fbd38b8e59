// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Construct launch and option configurations for Z3 and CVC.

/// The full invocation of a solver binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverCmd {
    /// Binary to launch
    pub cmd: String,
    /// Arguments to pass
    pub args: Vec<String>,
    /// SMT options to send on startup
    pub options: Vec<(String, String)>,
}

impl SolverCmd {
    fn new(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            args: vec![],
            options: vec![],
        }
    }

    fn args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().to_string()));
    }

    /// Set an option.
    pub fn option<S: AsRef<str>>(&mut self, name: &str, val: S) {
        self.options
            .push((name.to_string(), val.as_ref().to_string()));
    }

    /// Build the command line string, for printing purposes.
    pub fn cmdline(&self) -> String {
        let args: Vec<_> = self
            .args
            .iter()
            .map(|a| {
                if a.contains(' ') {
                    format!("\"{a}\"")
                } else {
                    a.clone()
                }
            })
            .collect();
        format!("{} {}", &self.cmd, args.join(" "))
    }
}

/// Builder for an incremental Z3 [`SolverCmd`].
#[derive(Debug, Clone)]
pub struct Z3Conf(SolverCmd);

impl Z3Conf {
    /// Create a Z3Conf with some default options. Uses `cmd` as the path to Z3.
    pub fn new(cmd: &str) -> Self {
        let mut cmd = SolverCmd::new(cmd);
        cmd.args(["-in", "-smt2"]);
        cmd.option("model.completion", "true");
        Self(cmd)
    }

    /// Get the final command to run the solver.
    pub fn done(self) -> SolverCmd {
        self.0
    }
}

/// Builder for a one-shot CVC4 or CVC5 [`SolverCmd`], which reads a whole
/// query on stdin and dumps a finite model if it is sat.
#[derive(Debug, Clone)]
pub struct CvcConf {
    version5: bool,
    cmd: SolverCmd,
}

impl CvcConf {
    fn new_cvc(cmd: &str, version5: bool) -> Self {
        let mut cmd = SolverCmd::new(cmd);
        cmd.args(Self::one_shot_args());
        Self { version5, cmd }
    }

    /// Create a new CVC4 builder.
    pub fn new_cvc4(cmd: &str) -> Self {
        Self::new_cvc(cmd, /*version5*/ false)
    }

    /// Create a new CVC5 builder.
    pub fn new_cvc5(cmd: &str) -> Self {
        Self::new_cvc(cmd, /*version5*/ true)
    }

    /// The flags for finite model finding with full quantifier saturation,
    /// printing the model after a sat result.
    pub fn one_shot_args() -> [&'static str; 5] {
        [
            "--lang=smt2.6",
            "--finite-model-find",
            "--full-saturate-quant",
            "--produce-models",
            "--dump-models",
        ]
    }

    /// Whether this runs CVC5 (rather than CVC4).
    pub fn is_cvc5(&self) -> bool {
        self.version5
    }

    /// Get the final command to run the solver.
    pub fn done(self) -> SolverCmd {
        self.cmd
    }
}
