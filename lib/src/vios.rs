// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Virtual I/O server resource control.
//!
//! Commands for the VIO server's restricted shell are relayed through the HMC
//! with `viosvrcmd`, so a VIO server needs no session of its own.

use crate::error::Error;
use crate::hmc::Hmc;
use crate::parse::ParseError;
use crate::partition::{Partition, PartitionIdentity};
use regex::Regex;
use serde::Serialize;
use slog::{debug, info, warn, Logger};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Device name `lsdev -slots` shows for an adapter that is not configured yet.
const UNKNOWN_DEVICE: &str = "Unknown";

/// Root device handed to `cfgdev` after adapter changes.
pub const VIO_ROOT_DEVICE: &str = "vio0";

/// One row of the `chkdev` disk inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageDevice {
    pub name: String,
    /// Storage array serial number.
    pub serial: String,
    /// Logical device id within the array.
    pub ldev: String,
    pub pvid: Option<String>,
    pub vtd: Option<String>,
}

/// A server virtual adapter slot and the device configured in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualAdapterEntry {
    pub server_adapter_id: u32,
    pub device: String,
}

/// A disk exported through a vSCSI server adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageMapping {
    pub vtd: String,
    pub lun: String,
    pub backing_device: String,
    pub pvid: Option<String>,
    pub serial: Option<String>,
    pub ldev: Option<String>,
    pub size: String,
}

/// NPIV state of a virtual fibre channel server adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FcMapping {
    pub status: Option<String>,
    pub fc_name: Option<String>,
    pub physical_location: Option<String>,
    pub port_status: Option<String>,
    pub flags: Option<String>,
    pub client_fc_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingOptions {
    pub force: bool,
    pub vtd_name: Option<String>,
}

fn inventory_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(\w+):\w+\s(\w{5})(\w{4}).{20}:(\w{4,16}):?0{0,16}:(\w+)?")
            .expect("inventory regex compilation failed")
    })
}

fn slots_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"-C(\d+)\s+.+\b(\w+)").expect("slots regex compilation failed")
    })
}

fn vlan_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"[,"](\d+)"#).expect("vlan regex compilation failed")
    })
}

/// Parse `chkdev -verbose -field name identifier pvid vtd -fmt :` output.
///
/// Only disks whose identifier follows the Hitachi layout (5 character array
/// serial, 4 character logical device id) are recognized.
pub fn parse_inventory(output: &str) -> Vec<StorageDevice> {
    inventory_regex()
        .captures_iter(output)
        .map(|c| StorageDevice {
            name: c[1].to_string(),
            serial: c[2].to_string(),
            ldev: c[3].to_string(),
            pvid: Some(c[4].to_string()).filter(|p| p != "none"),
            vtd: c.get(5).map(|m| m.as_str().to_string()),
        })
        .collect()
}

/// Parse `lsdev -slots` output into server adapter slots.
pub fn parse_slots(output: &str) -> Result<Vec<VirtualAdapterEntry>, ParseError> {
    slots_regex()
        .captures_iter(output)
        .map(|c| {
            let server_adapter_id = c[1]
                .parse::<u32>()
                .map_err(|e| ParseError(format!("bad slot number '{}': {e}", &c[1])))?;
            Ok(VirtualAdapterEntry {
                server_adapter_id,
                device: c[2].to_string(),
            })
        })
        .collect()
}

/// Parse `lsmap -npiv -fmt ':'` output. Fields 5 through 10 carry the
/// mapping; empty fields are absent values.
pub fn parse_fc_mapping(output: &str) -> Result<Option<FcMapping>, ParseError> {
    let output = output.trim();
    if output.is_empty() {
        return Ok(None);
    }
    let fields: Vec<&str> = output.split(':').collect();
    if fields.len() < 6 {
        return Err(ParseError(format!("short npiv mapping: {output}")));
    }
    let field = |i: usize| {
        fields
            .get(i)
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .map(str::to_string)
    };
    Ok(Some(FcMapping {
        status: field(5),
        fc_name: field(6),
        physical_location: field(7),
        port_status: field(8),
        flags: field(9),
        client_fc_name: field(10),
    }))
}

pub struct Vios {
    name: String,
    frame: String,
    hmc: Arc<Hmc>,
    identity: PartitionIdentity,
    adapters: Mutex<Option<Vec<VirtualAdapterEntry>>>,
    inventory: Mutex<Option<Vec<StorageDevice>>>,
    pub log: Logger,
}

impl Vios {
    pub fn new(hmc: Arc<Hmc>, frame: &str, name: &str, log: &Logger) -> Result<Self, Error> {
        let log = log.new(slog::o!("vios" => name.to_string()));
        debug!(log, "new vios instance {}", name);
        let identity = PartitionIdentity::load(&hmc, frame, name)?;
        Ok(Vios {
            name: name.to_string(),
            frame: frame.to_string(),
            hmc,
            identity,
            adapters: Mutex::new(None),
            inventory: Mutex::new(None),
            log,
        })
    }

    pub fn id(&self) -> u32 {
        self.identity.id
    }

    /// Run `command` in the VIO server's shell.
    pub fn run_command(&self, command: &str) -> Result<String, Error> {
        debug!(self.log, "command on {} => {}", self.name, command);
        self.hmc.run_command(&format!(
            "viosvrcmd -m {} --id {} -c \"{}\"",
            self.frame,
            self.id(),
            command
        ))
    }

    /// Disk inventory of the VIO server, loaded on first use.
    pub fn storage_inventory(&self) -> Result<Vec<StorageDevice>, Error> {
        let mut cache = lock(&self.inventory);
        if let Some(inventory) = cache.as_ref() {
            return Ok(inventory.clone());
        }
        debug!(self.log, "loading disk inventory");
        let output = self.run_command("chkdev -verbose -field name identifier pvid vtd -fmt :")?;
        let inventory = parse_inventory(&output);
        *cache = Some(inventory.clone());
        Ok(inventory)
    }

    /// Server adapter slots of the VIO server, loaded on first use.
    pub fn adapter_table(&self) -> Result<Vec<VirtualAdapterEntry>, Error> {
        if let Some(table) = lock(&self.adapters).as_ref() {
            return Ok(table.clone());
        }
        self.reload_adapter_table()
    }

    /// List the adapter slots again. Adapters that show up as `Unknown` get
    /// one round of `cfgdev` and one more listing; if some are still unknown
    /// the listing fails.
    pub fn reload_adapter_table(&self) -> Result<Vec<VirtualAdapterEntry>, Error> {
        let mut table = self.list_slots()?;
        if has_unknown(&table) {
            warn!(self.log, "unknown devices in slot listing, running cfgdev");
            self.configure_devices(Some(VIO_ROOT_DEVICE))?;
            table = self.list_slots()?;
            if has_unknown(&table) {
                return Err(Error::Command {
                    command: Some("lsdev -slots".to_string()),
                    message: format!("unknown devices remain on {} after cfgdev", self.name),
                    action: None,
                });
            }
        }
        *lock(&self.adapters) = Some(table.clone());
        Ok(table)
    }

    fn list_slots(&self) -> Result<Vec<VirtualAdapterEntry>, Error> {
        debug!(self.log, "getting vadapters list on {}", self.name);
        let output = self.run_command("lsdev -slots")?;
        Ok(parse_slots(&output)?)
    }

    /// Device name of the adapter in server slot `server_adapter_id`. A slot
    /// missing from the cached table causes one reload.
    pub fn resolve_adapter_name(&self, server_adapter_id: u32) -> Result<Option<String>, Error> {
        let find = |table: &[VirtualAdapterEntry]| {
            table
                .iter()
                .find(|e| e.server_adapter_id == server_adapter_id)
                .map(|e| e.device.clone())
        };
        let mut name = find(&self.adapter_table()?);
        if name.is_none() {
            name = find(&self.reload_adapter_table()?);
        }
        debug!(self.log, "vadapter device name for {} => {:?}", server_adapter_id, name);
        Ok(name)
    }

    /// Disks exported through vSCSI server adapter `device`.
    pub fn mappings(&self, device: &str) -> Result<Vec<StorageMapping>, Error> {
        debug!(self.log, "getting mappings for {}", device);
        let inventory = self.storage_inventory()?;
        let output = self.run_command(&format!(
            "lsmap -vadapter {device} -field 'Backing device' VTD LUN -fmt \":\""
        ))?;
        let items: Vec<&str> = output.trim().split([':', '\n']).map(str::trim).collect();

        let mut result = Vec::new();
        for triplet in items.chunks(3) {
            let [backing, vtd, lun] = triplet else { continue };
            if !backing.starts_with("hdisk") {
                continue;
            }
            let disk = inventory.iter().find(|d| d.name == *backing);
            let size = self.run_command(&format!("lspv -size {backing}"))?;
            result.push(StorageMapping {
                vtd: vtd.to_string(),
                lun: lun.chars().take(4).collect(),
                backing_device: backing.to_string(),
                pvid: disk.and_then(|d| d.pvid.clone()),
                serial: disk.map(|d| d.serial.clone()),
                ldev: disk.map(|d| d.ldev.clone()),
                size: size.trim().to_string(),
            });
        }
        Ok(result)
    }

    /// NPIV mapping of virtual fibre channel server adapter `device`.
    pub fn fc_mapping(&self, device: &str) -> Result<Option<FcMapping>, Error> {
        debug!(self.log, "getting vfc mapping for {}", device);
        let output = self.run_command(&format!("lsmap -vadapter {device} -npiv -fmt ':'"))?;
        Ok(parse_fc_mapping(&output)?)
    }

    pub fn remove_mapping(&self, vtd: &str) -> Result<String, Error> {
        info!(self.log, "removing mapping {}", vtd);
        self.run_command(&format!("rmvdev -vtd {vtd}"))
    }

    pub fn remove_device(&self, device: &str) -> Result<String, Error> {
        info!(self.log, "removing device {}", device);
        self.run_command(&format!("rmdev -dev {device}"))
    }

    /// Export `device` through vSCSI server adapter `adapter`.
    pub fn create_mapping(
        &self,
        device: &str,
        adapter: &str,
        opts: &MappingOptions,
    ) -> Result<String, Error> {
        info!(self.log, "creating mapping {}/{}", device, adapter);
        let mut args = vec!["mkvdev"];
        if opts.force {
            args.push("-f");
        }
        args.extend(["-vdev", device, "-vadapter", adapter]);
        if let Some(vtd) = &opts.vtd_name {
            args.extend(["-dev", vtd.as_str()]);
        }
        self.run_command(&args.join(" "))
    }

    /// Bind virtual fibre channel adapter `vfc` to physical port `fc`.
    pub fn create_fc_mapping(&self, vfc: &str, fc: &str) -> Result<String, Error> {
        info!(self.log, "creating vfc mapping {}/{}", vfc, fc);
        self.run_command(&format!("vfcmap -vadapter {vfc} -fcp {fc}"))
    }

    /// Run `cfgdev`, optionally rooted at `root`.
    pub fn configure_devices(&self, root: Option<&str>) -> Result<String, Error> {
        debug!(self.log, "running cfgdev on {}", self.name);
        match root {
            Some(root) => self.run_command(&format!("cfgdev -dev {root}")),
            None => self.run_command("cfgdev"),
        }
    }

    /// Additional VLAN ids bridged by the VIO server, sorted.
    pub fn vlans(&self) -> Result<Vec<u32>, Error> {
        debug!(self.log, "getting networks list on {}", self.name);
        let output = self.hmc.run_command(&format!(
            "lshwres -r virtualio --rsubtype eth --level lpar -m {} \
             -F lpar_name,addl_vlan_ids --filter lpar_names={}",
            self.frame, self.name
        ))?;
        let mut vlans = Vec::new();
        for c in vlan_regex().captures_iter(&output) {
            let vlan = c[1]
                .parse::<u32>()
                .map_err(|e| ParseError(format!("bad vlan id '{}': {e}", &c[1])))?;
            vlans.push(vlan);
        }
        vlans.sort_unstable();
        Ok(vlans)
    }
}

fn has_unknown(table: &[VirtualAdapterEntry]) -> bool {
    table.iter().any(|e| e.device == UNKNOWN_DEVICE)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl Partition for Vios {
    fn name(&self) -> &str {
        &self.name
    }

    fn hmc(&self) -> &Hmc {
        &self.hmc
    }

    fn frame_name(&self) -> &str {
        &self.frame
    }

    fn log(&self) -> &Logger {
        &self.log
    }

    fn identity(&self) -> Result<PartitionIdentity, Error> {
        Ok(self.identity.clone())
    }
}
