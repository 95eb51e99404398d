// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client partition lifecycle: definition, provisioning of its virtual
//! adapters on the VIO servers, activation and deletion.

use crate::error::{Action, Error};
use crate::frame::ManagedSystem;
use crate::hmc::Hmc;
use crate::parse::{join_wwn_pairs, parse_adapter_line, AdapterKind, AdapterMapping};
use crate::partition::{
    check_markers, AdapterChange, AdapterRole, Partition, PartitionIdentity, PowerOffOptions,
    PowerState,
};
use crate::util::{check_name, PollPolicy};
use crate::vios::{FcMapping, StorageMapping, VIO_ROOT_DEVICE};
use serde::{Deserialize, Serialize};
use slog::{debug, error, info, warn, Logger};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// How long a new partition gets to reach an activated state.
pub const ACTIVATION_POLICY: PollPolicy = PollPolicy::new(60, Duration::from_secs(1));

const CREATE_ERROR_MARKERS: &[&str] = &[
    "The format of the configuration data is invalid.",
    "of the memory region size for the managed system.",
];

/// Memory sizes in megabytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemRange {
    pub min: u64,
    pub desired: u64,
    pub max: u64,
}

/// Virtual processor counts and entitled processing units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuRange {
    pub min_vp: u32,
    pub desired_vp: u32,
    pub max_vp: u32,
    pub min_units: f64,
    pub desired_units: f64,
    pub max_units: f64,
}

fn default_mem_expansion() -> f64 {
    0.0
}

/// Settings a partition is defined with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSettings {
    pub profile_name: String,
    pub mem: MemRange,
    /// Active memory expansion factor, 0 disables it.
    #[serde(default = "default_mem_expansion")]
    pub mem_expansion: f64,
    pub proc_mode: String,
    pub cpu: CpuRange,
    pub sharing_mode: String,
    pub uncap_weight: u32,
    pub max_virtual_slots: u32,
    pub virtual_eth_adapters: Option<String>,
    pub virtual_scsi_adapters: Option<String>,
    pub virtual_fc_adapters: Option<String>,
}

impl CreateSettings {
    /// The `mksyscfg` command defining partition `name` on `frame`. Absent
    /// adapter lists are sent as `none`.
    pub fn definition_command(&self, frame: &str, name: &str) -> String {
        let list = |l: &Option<String>| l.clone().unwrap_or_else(|| "none".to_string());
        format!(
            "mksyscfg -m {frame} -r lpar -i \"name={name},profile_name={},lpar_env=aixlinux,\
             min_mem={},desired_mem={},max_mem={},mem_expansion={},proc_mode={},\
             min_procs={},desired_procs={},max_procs={},\
             min_proc_units={},desired_proc_units={},max_proc_units={},\
             sharing_mode={},uncap_weight={},boot_mode=norm,max_virtual_slots={},\
             \\\"virtual_eth_adapters={}\\\",\\\"virtual_scsi_adapters={}\\\",\
             \\\"virtual_fc_adapters={}\\\"\"",
            self.profile_name,
            self.mem.min,
            self.mem.desired,
            self.mem.max,
            self.mem_expansion,
            self.proc_mode,
            self.cpu.min_vp,
            self.cpu.desired_vp,
            self.cpu.max_vp,
            self.cpu.min_units,
            self.cpu.desired_units,
            self.cpu.max_units,
            self.sharing_mode,
            self.uncap_weight,
            self.max_virtual_slots,
            list(&self.virtual_eth_adapters),
            list(&self.virtual_scsi_adapters),
            list(&self.virtual_fc_adapters),
        )
    }

    fn adapters(&self) -> Result<Vec<AdapterMapping>, Error> {
        let mut result = Vec::new();
        if let Some(line) = &self.virtual_scsi_adapters {
            result.extend(parse_adapter_line(line, AdapterKind::Scsi)?);
        }
        if let Some(line) = &self.virtual_fc_adapters {
            result.extend(parse_adapter_line(&join_wwn_pairs(line), AdapterKind::Fc)?);
        }
        Ok(result)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Log the definition command instead of running anything.
    pub test: bool,
    /// Delete the partition again when provisioning fails after it has been
    /// defined.
    pub rollback_on_failure: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetBootOptions {
    pub ip: Option<String>,
    pub netmask: Option<String>,
    pub gateway: Option<String>,
    pub server: Option<String>,
}

/// A vSCSI client adapter and the disks behind its server adapter.
#[derive(Debug, Clone, Serialize)]
pub struct ScsiAdapter {
    pub mapping: AdapterMapping,
    pub storage: Vec<StorageMapping>,
}

/// A virtual fibre channel client adapter and the NPIV state of its server
/// adapter.
#[derive(Debug, Clone, Serialize)]
pub struct FcAdapter {
    pub mapping: AdapterMapping,
    pub npiv: Option<FcMapping>,
}

enum Lifecycle {
    /// `None` until the partition is defined on the managed system.
    Live(Option<PartitionIdentity>),
    Destroyed,
}

pub struct Lpar {
    name: String,
    frame: Arc<ManagedSystem>,
    lifecycle: Mutex<Lifecycle>,
    settings: Mutex<Option<CreateSettings>>,
    activation: PollPolicy,
    pub log: Logger,
}

impl Lpar {
    /// A handle on partition `name`, which need not be defined yet.
    pub fn new(frame: Arc<ManagedSystem>, name: &str) -> Result<Self, Error> {
        check_name(name, "lpar")?;
        let log = frame.log.new(slog::o!("lpar" => name.to_string()));
        debug!(log, "new lpar instance {}", name);
        let lpar = Lpar {
            name: name.to_string(),
            frame,
            lifecycle: Mutex::new(Lifecycle::Live(None)),
            settings: Mutex::new(None),
            activation: ACTIVATION_POLICY,
            log,
        };
        lpar.refresh()?;
        Ok(lpar)
    }

    pub fn with_activation_policy(mut self, policy: PollPolicy) -> Self {
        self.activation = policy;
        self
    }

    pub fn frame(&self) -> &ManagedSystem {
        &self.frame
    }

    pub fn is_defined(&self) -> bool {
        matches!(&*lock(&self.lifecycle), Lifecycle::Live(Some(_)))
    }

    pub fn id(&self) -> Result<u32, Error> {
        Ok(self.identity()?.id)
    }

    /// Reload configuration and profiles from the HMC.
    pub fn refresh(&self) -> Result<(), Error> {
        self.ensure_live()?;
        let identity = if self.frame.lpar_exists(&self.name)? {
            debug!(self.log, "updating {} settings", self.name);
            Some(PartitionIdentity::load(self.frame.hmc(), &self.frame.name, &self.name)?)
        } else {
            None
        };
        *lock(&self.lifecycle) = Lifecycle::Live(identity);
        Ok(())
    }

    pub fn set_settings(&self, settings: CreateSettings) {
        debug!(self.log, "setting creation settings for {}", self.name);
        *lock(&self.settings) = Some(settings);
    }

    pub fn settings(&self) -> Option<CreateSettings> {
        lock(&self.settings).clone()
    }

    /// Define the partition, provision its server adapters, and cycle its
    /// power once so the profile takes effect.
    pub fn create(&self, opts: CreateOptions) -> Result<(), Error> {
        self.ensure_live()?;
        // a rollback would otherwise tear down a partition this call never made
        if self.is_defined() {
            let e = Error::Configuration(format!("{} is already defined", self.name));
            error!(self.log, "{}", e);
            return Err(e);
        }
        let settings = self.settings().ok_or_else(|| {
            Error::Configuration(format!("no creation settings for {}", self.name))
        })?;
        let command = settings.definition_command(&self.frame.name, &self.name);
        if opts.test {
            info!(self.log, "command not executed => {}", command);
            return Ok(());
        }

        info!(self.log, "creating partition {}", self.name);
        let output = self
            .hmc()
            .run_command(&command)
            .map_err(|e| e.with_action(Action::Create))?;
        check_markers(&command, output, CREATE_ERROR_MARKERS).map_err(|e| {
            let e = e.with_action(Action::Create);
            error!(self.log, "{}", e);
            e
        })?;

        let Err(e) = self.provision(&settings) else {
            info!(self.log, "created partition {}", self.name);
            return Ok(());
        };
        error!(self.log, "provisioning {} failed: {}", self.name, e);
        if opts.rollback_on_failure && e.is_command() {
            warn!(self.log, "rolling back creation of {}", self.name);
            if let Err(re) = self.refresh().and_then(|_| self.delete()) {
                error!(self.log, "rollback of {} failed: {}", self.name, re);
            }
        }
        Err(e)
    }

    fn provision(&self, settings: &CreateSettings) -> Result<(), Error> {
        let mut touched = BTreeSet::new();
        for adapter in settings.adapters()? {
            let vios = self.frame.require_vioserver(adapter.vios_id)?;
            touched.insert(adapter.vios_id);
            vios.change_adapter(AdapterChange::Add {
                kind: adapter.kind,
                slot: adapter.server_adapter_id,
                role: AdapterRole::Server,
                remote_lpar_name: self.name.clone(),
                remote_slot: adapter.client_adapter_id,
            })?;
        }
        self.sync_vioses(&touched)?;

        self.refresh()?;
        self.power_on()?;
        self.wait_for_activation()?;
        self.power_off(PowerOffOptions {
            immediate: true,
            ..Default::default()
        })?;
        self.refresh()
    }

    fn wait_for_activation(&self) -> Result<(), Error> {
        if self.state()?.is_activated() {
            return Ok(());
        }
        let up = self.activation.wait(|attempt| {
            debug!(self.log, "waiting for lpar {} to start ({})", self.name, attempt);
            Ok(self.state()?.is_activated())
        })?;
        if !up {
            return Err(Error::Command {
                command: None,
                message: "timeout waiting for lpar to come up".to_string(),
                action: Some(Action::Startup),
            });
        }
        Ok(())
    }

    /// Save the running profile and rescan devices once on each VIO server.
    fn sync_vioses(&self, ids: &BTreeSet<u32>) -> Result<(), Error> {
        for id in ids {
            let vios = self.frame.require_vioserver(*id)?;
            vios.save_profile()?;
            vios.configure_devices(Some(VIO_ROOT_DEVICE))?;
        }
        Ok(())
    }

    /// Remove the partition and everything provisioned for it on the VIO
    /// servers. The partition must not be activated.
    pub fn delete(&self) -> Result<(), Error> {
        self.ensure_live()?;
        info!(self.log, "deleting partition {}", self.name);
        let state = self.state()?;
        if state != PowerState::NotActivated {
            let e = Error::PowerState {
                expected: PowerState::NotActivated.to_string(),
                actual: state,
                subject: self.name.clone(),
            };
            error!(self.log, "{}", e);
            return Err(e);
        }

        // Everything is resolved before the first removal. Teardown needs no
        // NPIV state, so fibre channel entries are only resolved to devices.
        let mut teardown: Vec<(AdapterMapping, Vec<StorageMapping>)> = self
            .vscsi_adapters()?
            .into_iter()
            .map(|a| (a.mapping, a.storage))
            .collect();
        for mapping in self.resolve(AdapterKind::Fc, "virtual_fc_adapters")? {
            teardown.push((mapping, Vec::new()));
        }

        let mut touched = BTreeSet::new();
        for (mapping, storage) in &teardown {
            let Some(device) = &mapping.device else {
                warn!(self.log, "no device in slot {}, skipping", mapping.server_adapter_id);
                continue;
            };
            let vios = self.frame.require_vioserver(mapping.vios_id)?;
            for s in storage {
                vios.remove_mapping(&s.vtd)?;
            }
            self.remove_server_adapter(mapping, device)?;
            touched.insert(mapping.vios_id);
        }
        self.sync_vioses(&touched)?;

        self.hmc().run_command(&format!(
            "rmsyscfg -r lpar -m {} -n {}",
            self.frame.name, self.name
        ))?;
        self.frame.refresh_lpars()?;
        *lock(&self.lifecycle) = Lifecycle::Destroyed;
        info!(self.log, "deleted partition {}", self.name);
        Ok(())
    }

    fn remove_server_adapter(&self, mapping: &AdapterMapping, device: &str) -> Result<(), Error> {
        let vios = self.frame.require_vioserver(mapping.vios_id)?;
        vios.remove_device(device)?;
        vios.change_adapter(AdapterChange::Remove {
            kind: mapping.kind,
            slot: mapping.server_adapter_id,
        })
    }

    fn resolve(&self, kind: AdapterKind, key: &str) -> Result<Vec<AdapterMapping>, Error> {
        let identity = self.identity()?;
        let Some(line) = identity.profile.get_set(key) else {
            debug!(self.log, "no {} adapters for {}", kind, self.name);
            return Ok(Vec::new());
        };
        let mut adapters = parse_adapter_line(line, kind)?;
        for adapter in adapters.iter_mut() {
            let vios = self.frame.require_vioserver(adapter.vios_id)?;
            adapter.device = vios.resolve_adapter_name(adapter.server_adapter_id)?;
        }
        Ok(adapters)
    }

    /// vSCSI adapters of the selected profile with their storage mappings.
    pub fn vscsi_adapters(&self) -> Result<Vec<ScsiAdapter>, Error> {
        debug!(self.log, "getting all vscsi mappings for {}", self.name);
        let mut result = Vec::new();
        for mapping in self.resolve(AdapterKind::Scsi, "virtual_scsi_adapters")? {
            let storage = match &mapping.device {
                Some(device) => self.frame.require_vioserver(mapping.vios_id)?.mappings(device)?,
                None => Vec::new(),
            };
            result.push(ScsiAdapter { mapping, storage });
        }
        Ok(result)
    }

    /// Virtual fibre channel adapters of the selected profile with their
    /// NPIV mappings.
    pub fn vfc_adapters(&self) -> Result<Vec<FcAdapter>, Error> {
        debug!(self.log, "getting all vfc mappings for {}", self.name);
        let mut result = Vec::new();
        for mapping in self.resolve(AdapterKind::Fc, "virtual_fc_adapters")? {
            let npiv = match &mapping.device {
                Some(device) => {
                    self.frame.require_vioserver(mapping.vios_id)?.fc_mapping(device)?
                }
                None => None,
            };
            result.push(FcAdapter { mapping, npiv });
        }
        Ok(result)
    }

    /// Server adapter slots and device names used by this partition, by VIO
    /// server id.
    pub fn adapter_names(&self) -> Result<BTreeMap<u32, Vec<(u32, Option<String>)>>, Error> {
        let mut names: BTreeMap<u32, Vec<(u32, Option<String>)>> = BTreeMap::new();
        let adapters = self
            .resolve(AdapterKind::Scsi, "virtual_scsi_adapters")?
            .into_iter()
            .chain(self.resolve(AdapterKind::Fc, "virtual_fc_adapters")?);
        for a in adapters {
            names
                .entry(a.vios_id)
                .or_default()
                .push((a.server_adapter_id, a.device));
        }
        Ok(names)
    }

    /// Boot the partition from the network.
    pub fn net_boot(&self, opts: &NetBootOptions) -> Result<String, Error> {
        let (Some(ip), Some(netmask), Some(gateway), Some(server)) =
            (&opts.ip, &opts.netmask, &opts.gateway, &opts.server)
        else {
            return Err(Error::Configuration(
                "net boot needs ip, netmask, gateway and server".to_string(),
            ));
        };
        let identity = self.identity()?;
        info!(self.log, "net booting {} from {}", self.name, server);
        self.hmc().run_command(&format!(
            "lpar_netboot -f -T off -t ent -s auto -d auto -D -K {netmask} -G {gateway} \
             -S {server} -C {ip} {} {} {}",
            self.name,
            identity.profile_name(),
            self.frame.name
        ))
    }
}

impl Partition for Lpar {
    fn name(&self) -> &str {
        &self.name
    }

    fn hmc(&self) -> &Hmc {
        self.frame.hmc()
    }

    fn frame_name(&self) -> &str {
        &self.frame.name
    }

    fn log(&self) -> &Logger {
        &self.log
    }

    fn identity(&self) -> Result<PartitionIdentity, Error> {
        match &*lock(&self.lifecycle) {
            Lifecycle::Live(Some(identity)) => Ok(identity.clone()),
            Lifecycle::Live(None) => Err(Error::NotDefined(self.name.clone())),
            Lifecycle::Destroyed => Err(Error::UseAfterDestroy(self.name.clone())),
        }
    }

    fn ensure_live(&self) -> Result<(), Error> {
        match &*lock(&self.lifecycle) {
            Lifecycle::Destroyed => Err(Error::UseAfterDestroy(self.name.clone())),
            Lifecycle::Live(_) => Ok(()),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}
