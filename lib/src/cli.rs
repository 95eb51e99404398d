// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::config::{load_settings, Config};
use crate::error::Error;
use crate::frame::ManagedSystem;
use crate::hmc::Hmc;
use crate::lpar::{CreateOptions, Lpar, NetBootOptions};
use crate::nim::Nim;
use crate::partition::{Partition, PowerOffOptions, PowerState};
use crate::util::logger;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::io::{stdout, Write};
use std::sync::Arc;
use tabwriter::TabWriter;

#[derive(Parser, Debug)]
#[clap(name = "pvmctl", version, about = "Manage PowerVM partitions through an HMC")]
struct Cli {
    #[clap(short, long, default_value = "pvmctl.toml", help = "Configuration file")]
    config: Utf8PathBuf,

    #[clap(short, long, help = "Log at debug level")]
    debug: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct LparArgs {
    /// Managed system the partition lives on
    frame: String,
    /// Partition name
    lpar: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the managed systems of the HMC
    Frames {
        #[clap(long, help = "Only list systems in this state, e.g. Operating")]
        state: Option<String>,
    },
    /// List the partitions of a managed system
    Lpars { frame: String },
    /// List the VIO servers of a managed system
    Vioses { frame: String },
    /// List the virtual networks of a managed system
    Networks { frame: String },
    /// Print a managed system's topology as RON
    Topology { frame: String },
    /// Show the power state of a partition
    State(LparArgs),
    PowerOn(LparArgs),
    PowerOff {
        #[clap(flatten)]
        lpar: LparArgs,
        #[clap(long, help = "Shut down through the operating system")]
        os: bool,
        #[clap(long)]
        immediate: bool,
        #[clap(long)]
        restart: bool,
    },
    /// Define a partition and provision its virtual adapters
    Create {
        #[clap(flatten)]
        lpar: LparArgs,
        #[clap(long, help = "TOML file with the creation settings")]
        settings: Utf8PathBuf,
        #[clap(long, help = "Delete the partition again if provisioning fails")]
        rollback: bool,
        #[clap(long, help = "Only print the definition command")]
        test: bool,
    },
    /// Delete a partition and its server adapters
    Delete(LparArgs),
    /// Show the storage behind a partition's virtual adapters
    Mappings(LparArgs),
    /// Boot a partition from the network
    NetBoot {
        #[clap(flatten)]
        lpar: LparArgs,
        #[clap(long)]
        ip: Option<String>,
        #[clap(long)]
        netmask: Option<String>,
        #[clap(long)]
        gateway: Option<String>,
        #[clap(long)]
        server: Option<String>,
    },
    /// Query the NIM master
    #[clap(subcommand)]
    Nim(NimCommand),
}

#[derive(Subcommand, Debug)]
enum NimCommand {
    LppSources,
    Spots,
    Mksysbs,
    Networks,
}

/// Entry point for the command line application. Parses command line
/// arguments, connects to the configured endpoints and acts accordingly.
pub fn run() -> Result<(), Error> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;
    let log = logger(cli.debug || config.debug);

    if let Command::Nim(cmd) = cli.command {
        let endpoint = config.nim_endpoint().ok_or_else(|| {
            Error::Cli(format!("{}: no [nim] section", cli.config))
        })?;
        let nim = Nim::connect(&endpoint, &log)?;
        return nim_command(&nim, cmd);
    }

    let hmc = Arc::new(Hmc::connect(&config.hmc_endpoint(), &log)?);
    let mut tw = TabWriter::new(stdout());
    match cli.command {
        Command::Frames { state } => list_frames(&mut tw, &hmc, state.as_deref())?,
        Command::Lpars { frame } => {
            for lpar in frame_or_die(&hmc, &frame)?.refresh_lpars()? {
                writeln!(tw, "{lpar}")?;
            }
        }
        Command::Vioses { frame } => {
            let frame = frame_or_die(&hmc, &frame)?;
            writeln!(
                tw,
                "{}\t{}\t{}\t{}",
                "NAME".dimmed(),
                "ID".dimmed(),
                "STATE".dimmed(),
                "VLANS".dimmed()
            )?;
            for vios in frame.vioservers() {
                let vlans: Vec<String> = vios.vlans()?.iter().map(u32::to_string).collect();
                writeln!(
                    tw,
                    "{}\t{}\t{}\t{}",
                    vios.name(),
                    vios.id(),
                    color_state(&vios.state()?),
                    vlans.join(",")
                )?;
            }
        }
        Command::Networks { frame } => {
            writeln!(
                tw,
                "{}\t{}\t{}\t{}",
                "VNETWORK".dimmed(),
                "VSWITCH".dimmed(),
                "VLAN".dimmed(),
                "TAGGED".dimmed()
            )?;
            for n in frame_or_die(&hmc, &frame)?.networks()? {
                writeln!(tw, "{}\t{}\t{}\t{}", n.vnetwork, n.vswitch, n.vlan_id, n.is_tagged)?;
            }
        }
        Command::Topology { frame } => {
            print!("{}", frame_or_die(&hmc, &frame)?.topology_ron()?);
        }
        Command::State(args) => {
            let lpar = lpar(&hmc, &args)?;
            writeln!(tw, "{}\t{}", args.lpar, color_state(&lpar.state()?))?;
        }
        Command::PowerOn(args) => lpar(&hmc, &args)?.power_on()?,
        Command::PowerOff { lpar: args, os, immediate, restart } => {
            lpar(&hmc, &args)?.power_off(PowerOffOptions { os, immediate, restart })?
        }
        Command::Create { lpar: args, settings, rollback, test } => {
            let lpar = lpar(&hmc, &args)?;
            lpar.set_settings(load_settings(&settings)?);
            lpar.create(CreateOptions { test, rollback_on_failure: rollback })?;
        }
        Command::Delete(args) => lpar(&hmc, &args)?.delete()?,
        Command::Mappings(args) => mappings(&mut tw, &lpar(&hmc, &args)?)?,
        Command::NetBoot { lpar: args, ip, netmask, gateway, server } => {
            let opts = NetBootOptions { ip, netmask, gateway, server };
            let output = lpar(&hmc, &args)?.net_boot(&opts)?;
            writeln!(tw, "{output}")?;
        }
        Command::Nim(_) => {}
    }
    tw.flush()?;
    Ok(())
}

/// Managed systems of the HMC, optionally only those in `state`.
fn list_frames<W: Write>(
    tw: &mut TabWriter<W>,
    hmc: &Hmc,
    state: Option<&str>,
) -> Result<(), Error> {
    let wanted = state.map(|s| hmc.frames_by_status(s));
    writeln!(tw, "{}\t{}\t{}", "NAME".dimmed(), "STATE".dimmed(), "MODEL".dimmed())?;
    for f in hmc.frames() {
        if wanted.as_ref().is_some_and(|names| !names.contains(&f.name)) {
            continue;
        }
        let model = f.fields.get("type_model").unwrap_or_default().to_string();
        writeln!(tw, "{}\t{}\t{}", f.name, color_frame_state(&f.state), model)?;
    }
    Ok(())
}

fn nim_command(nim: &Nim, cmd: NimCommand) -> Result<(), Error> {
    let mut tw = TabWriter::new(stdout());
    match cmd {
        NimCommand::LppSources => {
            for name in nim.lpp_sources()? {
                writeln!(tw, "{name}")?;
            }
        }
        NimCommand::Spots | NimCommand::Mksysbs => {
            let images = match cmd {
                NimCommand::Spots => nim.spots()?,
                _ => nim.mksysbs()?,
            };
            writeln!(tw, "{}\t{}", "NAME".dimmed(), "OSLEVEL".dimmed())?;
            for image in images {
                writeln!(tw, "{}\t{}", image.name, image.oslevel)?;
            }
        }
        NimCommand::Networks => {
            writeln!(
                tw,
                "{}\t{}\t{}\t{}",
                "NAME".dimmed(),
                "ADDRESS".dimmed(),
                "NETMASK".dimmed(),
                "GATEWAY".dimmed()
            )?;
            for n in nim.networks()? {
                writeln!(tw, "{}\t{}\t{}\t{}", n.name, n.address, n.netmask, n.gateway)?;
            }
        }
    }
    tw.flush()?;
    Ok(())
}

fn mappings(tw: &mut TabWriter<std::io::Stdout>, lpar: &Lpar) -> Result<(), Error> {
    writeln!(
        tw,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}",
        "VIOS".dimmed(),
        "SLOT".dimmed(),
        "DEVICE".dimmed(),
        "VTD".dimmed(),
        "LUN".dimmed(),
        "DISK".dimmed(),
        "SIZE".dimmed()
    )?;
    for adapter in lpar.vscsi_adapters()? {
        let m = &adapter.mapping;
        let device = m.device.as_deref().unwrap_or("-");
        if adapter.storage.is_empty() {
            writeln!(tw, "{}\t{}\t{}\t-\t-\t-\t-", m.vios_id, m.server_adapter_id, device)?;
        }
        for s in &adapter.storage {
            writeln!(
                tw,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                m.vios_id, m.server_adapter_id, device, s.vtd, s.lun, s.backing_device, s.size
            )?;
        }
    }
    for adapter in lpar.vfc_adapters()? {
        let m = &adapter.mapping;
        let npiv = adapter.npiv.unwrap_or_default();
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t-\t{}\t-",
            m.vios_id,
            m.server_adapter_id,
            m.device.as_deref().unwrap_or("-"),
            npiv.status.as_deref().unwrap_or("-"),
            npiv.fc_name.as_deref().unwrap_or("-"),
        )?;
    }
    Ok(())
}

/// Attach to a managed system. A system the HMC does not know is fatal.
fn frame_or_die(hmc: &Arc<Hmc>, name: &str) -> Result<Arc<ManagedSystem>, Error> {
    match ManagedSystem::new(hmc.clone(), name) {
        Ok(frame) => Ok(Arc::new(frame)),
        Err(Error::NotFound(_)) => {
            die!("frame {} does not exist on {}", name, hmc.name());
        }
        Err(e) => Err(e),
    }
}

fn lpar(hmc: &Arc<Hmc>, args: &LparArgs) -> Result<Lpar, Error> {
    Lpar::new(frame_or_die(hmc, &args.frame)?, &args.lpar)
}

fn color_state(state: &PowerState) -> colored::ColoredString {
    let label = state.to_string();
    match state {
        PowerState::Running => label.as_str().green(),
        PowerState::NotActivated => label.as_str().dimmed(),
        PowerState::OpenFirmware => label.as_str().yellow(),
        PowerState::Other(_) => label.as_str().normal(),
    }
}

fn color_frame_state(state: &str) -> colored::ColoredString {
    match state {
        "Operating" => state.green(),
        "Power Off" => state.dimmed(),
        _ => state.yellow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeSession;
    use slog::Logger;

    #[test]
    fn frames_filter_by_state() -> anyhow::Result<()> {
        colored::control::set_override(false);
        let fake = FakeSession::new();
        fake.respond(
            "lssyscfg -r sys",
            "name=sys1,type_model=9117-MMD,state=Operating\n\
             name=sys2,type_model=8286-42A,state=Power Off",
        );
        let log = Logger::root(slog::Discard, slog::o!());
        let hmc = Hmc::with_session("hmc01", fake.boxed(), &log)?;

        let mut tw = TabWriter::new(Vec::new());
        list_frames(&mut tw, &hmc, Some("Power Off"))?;
        tw.flush()?;
        let out = String::from_utf8(tw.into_inner().ok().unwrap_or_default())?;
        assert!(out.contains("sys2"));
        assert!(out.contains("8286-42A"));
        assert!(!out.contains("sys1"));

        let mut tw = TabWriter::new(Vec::new());
        list_frames(&mut tw, &hmc, None)?;
        tw.flush()?;
        let out = String::from_utf8(tw.into_inner().ok().unwrap_or_default())?;
        assert!(out.contains("sys1") && out.contains("sys2"));
        Ok(())
    }
}
