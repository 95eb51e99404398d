// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Network Installation Manager master.

use crate::error::Error;
use crate::parse::Profile;
use crate::session::{Endpoint, Gateway, Session};
use regex::Regex;
use serde::Serialize;
use slog::{debug, info, Logger};
use std::sync::OnceLock;

pub const DEFAULT_NIM_USER: &str = "root";

const NIM_PROBE_COMMAND: &str = "lsnim -t master";

/// A named NIM resource and the AIX level it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NimImage {
    pub name: String,
    pub oslevel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NimNetwork {
    pub name: String,
    pub address: String,
    pub netmask: String,
    pub gateway: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NimOperationOptions {
    /// Attributes passed with `-a`, e.g. `spot=spot71`.
    pub objects: Vec<String>,
    pub force: bool,
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("nim regex compilation failed"))
}

fn setting_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\s+(\S+)\s+=\s(.+)")
}

fn resource_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?m)^\w+")
}

fn image_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(\w+):[^:]*oslevel_r\s+=\s(\S+)[^:]")
}

fn network_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"(\w+):[^:]*net_addr\s+=\s(.+)\s+snm\s+=\s(.+)\s+routing1\s+=\s\w+\s(.+)[^:]",
    )
}

/// Parse `lsnim -l <object>` output into its attributes.
pub fn parse_settings(output: &str) -> Profile {
    let mut settings = Profile::default();
    for c in setting_regex().captures_iter(output) {
        settings.insert(&c[1], c[2].trim());
    }
    settings
}

/// Parse `lsnim -l -t spot` or `lsnim -l -t mksysb` output.
pub fn parse_images(output: &str) -> Vec<NimImage> {
    image_regex()
        .captures_iter(output)
        .map(|c| NimImage {
            name: c[1].to_string(),
            oslevel: c[2].to_string(),
        })
        .collect()
}

/// Parse `lsnim -l -t ent` output.
pub fn parse_networks(output: &str) -> Vec<NimNetwork> {
    // the trailing class needs one character after the gateway
    let output = format!("{output}\n");
    network_regex()
        .captures_iter(&output)
        .map(|c| NimNetwork {
            name: c[1].to_string(),
            address: c[2].trim().to_string(),
            netmask: c[3].trim().to_string(),
            gateway: c[4].trim().to_string(),
        })
        .collect()
}

pub struct Nim {
    gateway: Gateway,
    pub log: Logger,
}

impl Nim {
    pub fn connect(endpoint: &Endpoint, log: &Logger) -> Result<Self, Error> {
        let log = log.new(slog::o!("nim" => endpoint.host.clone()));
        debug!(log, "new nim instance {}", endpoint.host);
        let gateway = Gateway::connect(endpoint, NIM_PROBE_COMMAND, log.clone())?;
        Ok(Nim { gateway, log })
    }

    pub fn with_session(name: &str, session: Box<dyn Session>, log: &Logger) -> Self {
        let log = log.new(slog::o!("nim" => name.to_string()));
        Nim {
            gateway: Gateway::with_session(name, session, log.clone()),
            log,
        }
    }

    pub fn name(&self) -> &str {
        &self.gateway.name
    }

    pub fn run_command(&self, command: &str) -> Result<String, Error> {
        self.gateway.run_command(command)
    }

    pub fn client_exists(&self, client: &str) -> Result<bool, Error> {
        let output = self.run_command(&format!("odmget -q name={client} nim_object"))?;
        Ok(!output.trim().is_empty())
    }

    /// Define `client` as a standalone machine. Returns false when it was
    /// already defined.
    pub fn create_client(&self, client: &str) -> Result<bool, Error> {
        if self.client_exists(client)? {
            debug!(self.log, "client {} already defined", client);
            return Ok(false);
        }
        info!(self.log, "defining nim client {}", client);
        self.run_command(&format!(
            "nim -o define -t standalone -a platform=chrp -a if1=\"find_net {client} 0\" \
             -a cable_type1=tp -a net_settings1=\"auto auto\" -a netboot_kernel=64 {client}"
        ))?;
        Ok(true)
    }

    pub fn client_settings(&self, client: &str) -> Result<Profile, Error> {
        let output = self.run_command(&format!("lsnim -l {client}"))?;
        Ok(parse_settings(&output))
    }

    /// Run NIM operation `op`, such as `bos_inst` or `reset`, on `target`.
    pub fn run_operation(
        &self,
        op: &str,
        target: &str,
        opts: &NimOperationOptions,
    ) -> Result<String, Error> {
        let mut args = vec!["nim".to_string()];
        if opts.force {
            args.push("-F".to_string());
        }
        args.push(format!("-o {op}"));
        args.extend(opts.objects.iter().map(|o| format!("-a {o}")));
        args.push(target.to_string());
        info!(self.log, "nim operation {} on {}", op, target);
        self.run_command(&args.join(" "))
    }

    pub fn lpp_sources(&self) -> Result<Vec<String>, Error> {
        let output = self.run_command("lsnim -t lpp_source")?;
        Ok(resource_name_regex()
            .find_iter(&output)
            .map(|m| m.as_str().to_string())
            .collect())
    }

    pub fn spots(&self) -> Result<Vec<NimImage>, Error> {
        Ok(parse_images(&self.run_command("lsnim -l -t spot")?))
    }

    pub fn mksysbs(&self) -> Result<Vec<NimImage>, Error> {
        Ok(parse_images(&self.run_command("lsnim -l -t mksysb")?))
    }

    pub fn networks(&self) -> Result<Vec<NimNetwork>, Error> {
        Ok(parse_networks(&self.run_command("lsnim -l -t ent")?))
    }
}
