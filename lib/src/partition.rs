// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Behavior shared by client partitions and VIO servers.

use crate::error::Error;
use crate::hmc::Hmc;
use crate::parse::{parse_profile, AdapterKind, Profile};
use serde::Serialize;
use slog::{debug, error, info, Logger};
use std::fmt;
use std::str::FromStr;

const NOT_ACTIVATED: &str = "Not Activated";
const RUNNING: &str = "Running";
const OPEN_FIRMWARE: &str = "Open Firmware";

const POWER_ERROR_MARKERS: &[&str] = &["An invalid parameter value was entered", "HSCL"];
const DLPAR_ERROR_MARKERS: &[&str] = &[
    "HSCL294D Dynamic remove of virtual I/O resources failed",
    "The format of the configuration data is invalid.",
];

/// Partition power state as reported by `lssyscfg -F state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PowerState {
    NotActivated,
    Running,
    OpenFirmware,
    Other(String),
}

impl PowerState {
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            NOT_ACTIVATED => PowerState::NotActivated,
            RUNNING => PowerState::Running,
            OPEN_FIRMWARE => PowerState::OpenFirmware,
            other => PowerState::Other(other.to_string()),
        }
    }

    pub fn is_activated(&self) -> bool {
        *self != PowerState::NotActivated
    }
}

impl FromStr for PowerState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PowerState::from_label(s))
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::NotActivated => write!(f, "{NOT_ACTIVATED}"),
            PowerState::Running => write!(f, "{RUNNING}"),
            PowerState::OpenFirmware => write!(f, "{OPEN_FIRMWARE}"),
            PowerState::Other(s) => write!(f, "{s}"),
        }
    }
}

/// What the HMC knows about a defined partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionIdentity {
    pub id: u32,
    /// Current configuration, from `lssyscfg -r lpar`.
    pub config: Profile,
    pub profiles: Vec<Profile>,
    /// The current profile, or the default profile when none is current.
    pub profile: Profile,
}

impl PartitionIdentity {
    /// Read the configuration and profiles of partition `name` on `frame`.
    pub fn load(hmc: &Hmc, frame: &str, name: &str) -> Result<Self, Error> {
        debug!(hmc.log, "getting lpar configuration for {}", name);
        let output = hmc.run_command(&format!(
            "lssyscfg -r lpar -m {frame} --filter \"lpar_names={name}\""
        ))?;
        let config = parse_profile(&output);
        let id = match config.get("lpar_id").map(str::parse::<u32>) {
            Some(Ok(id)) => id,
            _ => return Err(Error::NotDefined(name.to_string())),
        };

        debug!(hmc.log, "getting all profiles for {}", name);
        let output = hmc.run_command(&format!(
            "lssyscfg -r prof -m {frame} --filter \"lpar_names={name}\""
        ))?;
        let profiles: Vec<Profile> = output
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(parse_profile)
            .collect();

        let selected = config
            .get_set("curr_profile")
            .or_else(|| config.get("default_profile"))
            .unwrap_or_default()
            .to_string();
        let profile = profiles
            .iter()
            .find(|p| p.name() == Some(selected.as_str()))
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("profile '{selected}' of partition {name}"))
            })?;

        Ok(PartitionIdentity { id, config, profiles, profile })
    }

    pub fn profile_name(&self) -> &str {
        self.profile.name().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerOffOptions {
    /// Ask the operating system to shut down instead of stopping the
    /// partition.
    pub os: bool,
    pub immediate: bool,
    pub restart: bool,
}

/// Which side of a virtual adapter pair an adapter is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterRole {
    Server,
    Client,
}

impl fmt::Display for AdapterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterRole::Server => write!(f, "server"),
            AdapterRole::Client => write!(f, "client"),
        }
    }
}

/// A dynamic (DLPAR) change to the virtual adapters of a running partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterChange {
    Add {
        kind: AdapterKind,
        slot: u32,
        role: AdapterRole,
        remote_lpar_name: String,
        remote_slot: u32,
    },
    Remove {
        kind: AdapterKind,
        slot: u32,
    },
}

/// Operations common to every partition on a managed system.
///
/// Implementors supply identity and plumbing; power and profile handling are
/// provided.
pub trait Partition {
    fn name(&self) -> &str;
    fn hmc(&self) -> &Hmc;
    fn frame_name(&self) -> &str;
    fn log(&self) -> &Logger;

    /// A snapshot of the partition's identity as of the last refresh.
    fn identity(&self) -> Result<PartitionIdentity, Error>;

    /// Fails when the partition can no longer be operated on.
    fn ensure_live(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Query the power state. Never cached.
    fn state(&self) -> Result<PowerState, Error> {
        self.ensure_live()?;
        debug!(self.log(), "getting status for {}", self.name());
        let output = self.hmc().run_command(&format!(
            "lssyscfg -r lpar -m {} -F state --filter lpar_names={}",
            self.frame_name(),
            self.name()
        ))?;
        Ok(PowerState::from_label(&output))
    }

    fn power_on(&self) -> Result<(), Error> {
        let identity = self.identity()?;
        let state = self.state()?;
        if state != PowerState::NotActivated {
            let e = Error::PowerState {
                expected: NOT_ACTIVATED.to_string(),
                actual: state,
                subject: self.name().to_string(),
            };
            error!(self.log(), "{}", e);
            return Err(e);
        }

        let mut command = format!(
            "chsysstate -m {} --id {} -o on -r lpar",
            self.frame_name(),
            identity.id
        );
        if identity.config.get("curr_profile").unwrap_or_default().is_empty() {
            let default = identity.config.get("default_profile").unwrap_or_default();
            command.push_str(&format!(" -f {default}"));
        }
        info!(self.log(), "powering on {}", self.name());
        run_power_command(self, &command)
    }

    fn power_off(&self, opts: PowerOffOptions) -> Result<(), Error> {
        let identity = self.identity()?;
        let state = self.state()?;
        if !state.is_activated() {
            let e = Error::PowerState {
                expected: "activated".to_string(),
                actual: state,
                subject: self.name().to_string(),
            };
            error!(self.log(), "{}", e);
            return Err(e);
        }

        let mut command = format!(
            "chsysstate -m {} --id {} -o {} -r lpar",
            self.frame_name(),
            identity.id,
            if opts.os { "osshutdown" } else { "shutdown" },
        );
        if opts.restart {
            command.push_str(" --restart");
        }
        if opts.immediate {
            command.push_str(" --immed");
        }
        info!(self.log(), "powering off {}", self.name());
        run_power_command(self, &command)
    }

    /// Save the running configuration over the current profile.
    fn save_profile(&self) -> Result<(), Error> {
        let id = self.identity()?.id;
        let frame = self.frame_name();
        debug!(self.log(), "saving running profile for {}", self.name());
        self.hmc().run_command(&format!(
            "mksyscfg -r prof -m {frame} -o save --id {id} -n \
             $(lssyscfg -r lpar -m {frame} --filter \\\"lpar_ids={id}\\\" -F curr_profile) \
             --force"
        ))?;
        Ok(())
    }

    fn change_adapter(&self, change: AdapterChange) -> Result<(), Error> {
        let id = self.identity()?.id;
        let frame = self.frame_name();
        let command = match &change {
            AdapterChange::Add {
                kind,
                slot,
                role,
                remote_lpar_name,
                remote_slot,
            } => {
                debug!(self.log(), "hot adding {} adapter to {}", kind, self.name());
                format!(
                    "chhwres -m {frame} -r virtualio -o a --id {id} --rsubtype {} \
                     -s {slot} -a \"adapter_type={role},\
                     remote_lpar_name={remote_lpar_name},remote_slot_num={remote_slot}\"",
                    kind.subtype()
                )
            }
            AdapterChange::Remove { kind, slot } => {
                debug!(self.log(), "hot removing {} adapter from {}", kind, self.name());
                format!(
                    "chhwres -m {frame} -r virtualio -o r --id {id} --rsubtype {} -s {slot}",
                    kind.subtype()
                )
            }
        };
        let output = self.hmc().run_command(&command)?;
        check_markers(&command, output, DLPAR_ERROR_MARKERS)?;
        Ok(())
    }
}

fn run_power_command<P: Partition + ?Sized>(p: &P, command: &str) -> Result<(), Error> {
    let output = p.hmc().run_command(command)?;
    check_markers(command, output, POWER_ERROR_MARKERS).map_err(|e| {
        error!(p.log(), "power change of {} failed: {}", p.name(), e);
        e
    })?;
    Ok(())
}

/// Turn output containing any of `markers` into a command error.
pub(crate) fn check_markers(
    command: &str,
    output: String,
    markers: &[&str],
) -> Result<String, Error> {
    if markers.iter().any(|m| output.contains(m)) {
        return Err(Error::command(command, output));
    }
    Ok(output)
}
