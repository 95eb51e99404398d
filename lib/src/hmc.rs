// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use crate::parse::SystemRecord;
use crate::session::{Endpoint, Gateway, Session};
use slog::{debug, warn, Logger};
use std::sync::Mutex;

pub const DEFAULT_HMC_USER: &str = "hscroot";

const HMC_PROBE_COMMAND: &str = "lshmc -V";
const LIST_SYSTEMS: &str = "lssyscfg -r sys";

/// Printed by the HMC when a command line does not parse.
pub const INVALID_PARAMETER_MARKER: &str =
    "The command entered is either missing a required parameter or a parameter value is invalid";

/// A Hardware Management Console and the managed systems it knows about.
pub struct Hmc {
    gateway: Gateway,
    frames: Mutex<Vec<SystemRecord>>,
    pub log: Logger,
}

impl Hmc {
    /// Connect to the HMC at `endpoint` and load its managed system list.
    pub fn connect(endpoint: &Endpoint, log: &Logger) -> Result<Self, Error> {
        let log = log.new(slog::o!("hmc" => endpoint.host.clone()));
        debug!(log, "new hmc instance {}", endpoint.host);
        let gateway = Gateway::connect(endpoint, HMC_PROBE_COMMAND, log.clone())?;
        Self::from_gateway(gateway, log)
    }

    /// Build an HMC on top of an already open session.
    pub fn with_session(
        name: &str,
        session: Box<dyn Session>,
        log: &Logger,
    ) -> Result<Self, Error> {
        let log = log.new(slog::o!("hmc" => name.to_string()));
        let gateway = Gateway::with_session(name, session, log.clone());
        Self::from_gateway(gateway, log)
    }

    fn from_gateway(gateway: Gateway, log: Logger) -> Result<Self, Error> {
        let hmc = Hmc {
            gateway,
            frames: Mutex::new(Vec::new()),
            log,
        };
        hmc.refresh_frames()?;
        Ok(hmc)
    }

    pub fn name(&self) -> &str {
        &self.gateway.name
    }

    /// Whether the connectivity probe succeeded when the HMC was set up.
    pub fn is_reachable(&self) -> bool {
        self.gateway.is_reachable()
    }

    /// Run an HMC command and return its output.
    ///
    /// The HMC reports malformed command lines only through its output, so the
    /// output is searched for the invalid parameter message.
    pub fn run_command(&self, command: &str) -> Result<String, Error> {
        let output = self.gateway.run_command(command)?;
        if output.contains(INVALID_PARAMETER_MARKER) {
            return Err(Error::command(command, output));
        }
        Ok(output)
    }

    /// Reload the managed system list from `lssyscfg -r sys`.
    pub fn refresh_frames(&self) -> Result<Vec<SystemRecord>, Error> {
        let output = self.run_command(LIST_SYSTEMS)?;
        let mut frames = Vec::new();
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            frames.push(line.parse::<SystemRecord>()?);
        }
        if frames.is_empty() {
            warn!(self.log, "no managed systems managed by this hmc");
        }
        *self.lock_frames() = frames.clone();
        Ok(frames)
    }

    /// The managed system list as of the last refresh.
    pub fn frames(&self) -> Vec<SystemRecord> {
        self.lock_frames().clone()
    }

    pub fn frame_exists(&self, name: &str) -> bool {
        let exists = self.lock_frames().iter().any(|f| f.name == name);
        debug!(self.log, "frame exists => {} | {}", name, exists);
        exists
    }

    /// Names of the managed systems whose state is `state`, e.g. `Operating`.
    pub fn frames_by_status(&self, state: &str) -> Vec<String> {
        self.lock_frames()
            .iter()
            .filter(|f| f.state == state)
            .map(|f| f.name.clone())
            .collect()
    }

    fn lock_frames(&self) -> std::sync::MutexGuard<'_, Vec<SystemRecord>> {
        self.frames.lock().unwrap_or_else(|p| p.into_inner())
    }
}
