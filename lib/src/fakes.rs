// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A scripted [`Session`] that never leaves the process.

use crate::error::Error;
use crate::session::Session;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

struct Rule {
    pattern: String,
    responses: VecDeque<String>,
}

#[derive(Default)]
struct FakeSessionInner {
    rules: Vec<Rule>,
    commands: Vec<String>,
}

/// A session which answers commands from a script and records every command
/// it was asked to run.
///
/// A command is answered by the first rule whose pattern it contains. Each
/// rule holds a queue of responses: they are handed out in order and the last
/// one repeats. Commands no rule matches get empty output.
///
/// Clones share their script and record, so a test can keep one handle and
/// give another to the code under test.
#[derive(Clone, Default)]
pub struct FakeSession {
    inner: Arc<Mutex<FakeSessionInner>>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeSessionInner> {
        self.inner.lock().unwrap()
    }

    /// Queue `output` as the next response to commands containing `pattern`.
    pub fn respond(&self, pattern: &str, output: &str) -> &Self {
        let mut inner = self.lock();
        match inner.rules.iter_mut().find(|r| r.pattern == pattern) {
            Some(rule) => rule.responses.push_back(output.to_string()),
            None => inner.rules.push(Rule {
                pattern: pattern.to_string(),
                responses: VecDeque::from([output.to_string()]),
            }),
        }
        self
    }

    /// Every command run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// How many commands run so far contain `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.lock().commands.iter().filter(|c| c.contains(pattern)).count()
    }

    pub fn boxed(&self) -> Box<dyn Session> {
        Box::new(self.clone())
    }
}

impl Session for FakeSession {
    fn execute(&mut self, command: &str) -> Result<String, Error> {
        let mut inner = self.lock();
        inner.commands.push(command.to_string());
        let output = match inner
            .rules
            .iter_mut()
            .find(|r| command.contains(r.pattern.as_str()))
        {
            Some(rule) if rule.responses.len() > 1 => {
                rule.responses.pop_front().unwrap_or_default()
            }
            Some(rule) => rule.responses.front().cloned().unwrap_or_default(),
            None => String::new(),
        };
        Ok(output)
    }
}
