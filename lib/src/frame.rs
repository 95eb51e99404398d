// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use crate::hmc::Hmc;
use crate::parse::ParseError;
use crate::vios::Vios;
use regex::Regex;
use ron::ser::{to_string_pretty, PrettyConfig};
use serde::Serialize;
use slog::{debug, error, Logger};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// A virtual network defined on a managed system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualNetwork {
    pub vnetwork: String,
    pub is_tagged: bool,
    pub vswitch: String,
    pub vlan_id: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViosSummary {
    pub name: String,
    pub id: u32,
}

/// Serializable picture of a managed system.
#[derive(Debug, Clone, Serialize)]
pub struct Topology {
    pub frame: String,
    pub vioservers: Vec<ViosSummary>,
    pub lpars: Vec<String>,
    pub networks: Vec<VirtualNetwork>,
}

fn network_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"vnetwork=(\S+),is_tagged=(\d),vswitch=(\S+),vlan_id=(\d+)")
            .expect("vnetwork regex compilation failed")
    })
}

/// Parse `lshwres --rsubtype vnetwork` output.
pub fn parse_networks(output: &str) -> Result<Vec<VirtualNetwork>, ParseError> {
    network_regex()
        .captures_iter(output)
        .map(|c| {
            let vlan_id = c[4]
                .parse::<u32>()
                .map_err(|e| ParseError(format!("bad vlan id '{}': {e}", &c[4])))?;
            Ok(VirtualNetwork {
                vnetwork: c[1].to_string(),
                is_tagged: &c[2] == "1",
                vswitch: c[3].to_string(),
                vlan_id,
            })
        })
        .collect()
}

/// A managed system (frame) and the VIO servers that serve its partitions.
pub struct ManagedSystem {
    pub name: String,
    hmc: Arc<Hmc>,
    vioservers: Vec<Vios>,
    lpars: Mutex<Vec<String>>,
    networks: Mutex<Option<Vec<VirtualNetwork>>>,
    pub log: Logger,
}

impl std::fmt::Debug for ManagedSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedSystem")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ManagedSystem {
    /// Attach to managed system `name`. The system must be known to the HMC.
    pub fn new(hmc: Arc<Hmc>, name: &str) -> Result<Self, Error> {
        let log = hmc.log.new(slog::o!("frame" => name.to_string()));
        debug!(log, "new frame instance {}", name);
        if !hmc.frame_exists(name) {
            error!(log, "frame {} does not exist on this hmc", name);
            return Err(Error::NotFound(format!("managed system {name}")));
        }

        let command =
            format!("lssyscfg -r lpar -m {name} -F lpar_type,lpar_id,name | grep vioserver");
        let output = hmc.run_command(&command)?;
        if output.starts_with("HSCL") {
            return Err(Error::command(command, output));
        }

        let mut vioservers = Vec::new();
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            let vios_name = line.split(',').nth(2).ok_or_else(|| {
                ParseError(format!("vio server line without name: {line}"))
            })?;
            vioservers.push(Vios::new(hmc.clone(), name, vios_name.trim(), &log)?);
        }

        Ok(ManagedSystem {
            name: name.to_string(),
            hmc,
            vioservers,
            lpars: Mutex::new(Vec::new()),
            networks: Mutex::new(None),
            log,
        })
    }

    pub fn hmc(&self) -> &Hmc {
        &self.hmc
    }

    pub fn vioservers(&self) -> &[Vios] {
        &self.vioservers
    }

    pub fn vioserver(&self, id: u32) -> Option<&Vios> {
        debug!(self.log, "getting vio object for vioid {}", id);
        self.vioservers.iter().find(|v| v.id() == id)
    }

    /// Like `vioserver`, but a missing VIO server is an error.
    pub fn require_vioserver(&self, id: u32) -> Result<&Vios, Error> {
        self.vioserver(id).ok_or(Error::UnknownVios(id))
    }

    /// Partition names as of the last refresh.
    pub fn lpars(&self) -> Vec<String> {
        lock(&self.lpars).clone()
    }

    pub fn refresh_lpars(&self) -> Result<Vec<String>, Error> {
        debug!(self.log, "getting lpar list on {}", self.name);
        let command = format!("lssyscfg -r lpar -m {} -F name", self.name);
        let output = self.hmc.run_command(&command)?;
        if output.starts_with("HSCL") {
            return Err(Error::command(command, output));
        }
        let lpars: Vec<String> = output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        *lock(&self.lpars) = lpars.clone();
        Ok(lpars)
    }

    /// Whether partition `name` is defined. Always lists the partitions anew.
    pub fn lpar_exists(&self, name: &str) -> Result<bool, Error> {
        debug!(self.log, "checking if lpar {} exists on {}", name, self.name);
        Ok(self.refresh_lpars()?.iter().any(|l| l == name))
    }

    /// Virtual networks of the managed system, loaded on first use.
    pub fn networks(&self) -> Result<Vec<VirtualNetwork>, Error> {
        let mut cache = lock(&self.networks);
        if let Some(networks) = cache.as_ref() {
            return Ok(networks.clone());
        }
        debug!(self.log, "getting networks list on {}", self.name);
        let output = self.hmc.run_command(&format!(
            "lshwres --rsubtype vnetwork -r virtualio -m {}",
            self.name
        ))?;
        let networks = parse_networks(&output)?;
        *cache = Some(networks.clone());
        Ok(networks)
    }

    pub fn topology(&self) -> Result<Topology, Error> {
        Ok(Topology {
            frame: self.name.clone(),
            vioservers: self
                .vioservers
                .iter()
                .map(|v| ViosSummary {
                    name: crate::partition::Partition::name(v).to_string(),
                    id: v.id(),
                })
                .collect(),
            lpars: self.refresh_lpars()?,
            networks: self.networks()?,
        })
    }

    /// The topology rendered as RON.
    pub fn topology_ron(&self) -> Result<String, Error> {
        let pretty = PrettyConfig::new().separate_tuple_members(true);
        Ok(format!("{}\n", to_string_pretty(&self.topology()?, pretty)?))
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}
