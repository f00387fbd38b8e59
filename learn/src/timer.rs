// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Stopwatches with an optional time limit.

use std::{
    fmt,
    time::{Duration, Instant},
};

use thiserror::Error;

/// Raised when a timer runs past its limit.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("timeout")]
pub struct Timeout;

/// An accumulating stopwatch. Time is only counted between [`Timer::start`]
/// and [`Timer::stop`], across any number of such intervals.
#[derive(Debug, Clone)]
pub struct Timer {
    limit: Option<Duration>,
    elapsed: Duration,
    started: Option<Instant>,
}

impl Timer {
    /// A stopped timer that times out after `limit` of running time.
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            limit,
            elapsed: Duration::ZERO,
            started: None,
        }
    }

    /// A stopped timer with no limit.
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Start counting. Does nothing if the timer is already running.
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    /// Stop counting. Does nothing if the timer is not running.
    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.elapsed += started.elapsed();
        }
    }

    /// Total running time so far.
    pub fn elapsed(&self) -> Duration {
        self.elapsed + self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Running time left before the limit, or `None` without a limit.
    pub fn remaining(&self) -> Option<Duration> {
        self.limit.map(|l| l.saturating_sub(self.elapsed()))
    }

    /// The instant the limit will be reached if the timer keeps running.
    pub fn deadline(&self) -> Option<Instant> {
        self.remaining().map(|r| Instant::now() + r)
    }

    /// Fail if the limit has been reached.
    pub fn check_time(&self) -> Result<(), Timeout> {
        match self.remaining() {
            Some(r) if r.is_zero() => Err(Timeout),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.elapsed().as_secs_f64())
    }
}
