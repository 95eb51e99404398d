// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use regex::Regex;
use slog::{Drain, Logger};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

pub(crate) static NAME_REGEX: &str = r"^[A-Za-z][A-Za-z0-9_.\-]*$";

#[macro_export]
macro_rules! die {
    ($x:expr, $($xs:expr),*) => {
        eprintln!($x,$($xs),*);
        std::process::exit(1);
    };

    ($x:expr) => {
        eprintln!($x);
        std::process::exit(1);
    };
}

/// Check that `name` can be safely spliced into an HMC command line.
pub fn check_name(name: &str, what: &str) -> Result<(), Error> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(NAME_REGEX).expect("name regex compilation failed")
    });
    if !re.is_match(name) {
        return Err(Error::Configuration(format!(
            "{what} name '{name}' must match {NAME_REGEX}"
        )));
    }
    Ok(())
}

/// Build the root logger. `RUST_LOG` wins when set, otherwise the level is
/// `info`, or `debug` when `debug` is true.
pub fn logger(debug: bool) -> Logger {
    let filter = match std::env::var("RUST_LOG") {
        Ok(s) if !s.is_empty() => s,
        _ if debug => "debug".to_string(),
        _ => "info".to_string(),
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::LogBuilder::new(drain).parse(&filter).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}

/// How often and how many times to look for a condition before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        PollPolicy { attempts, interval }
    }

    /// Evaluate `check` until it yields `true` or attempts run out. The first
    /// check happens after one interval. Errors from `check` end the poll.
    pub fn wait<F>(&self, mut check: F) -> Result<bool, Error>
    where
        F: FnMut(u32) -> Result<bool, Error>,
    {
        for attempt in 1..=self.attempts {
            thread::sleep(self.interval);
            if check(attempt)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
