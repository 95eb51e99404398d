// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration files: where the HMC and NIM master are and how to log in,
//! and partition creation settings.

use crate::hmc::DEFAULT_HMC_USER;
use crate::lpar::CreateSettings;
use crate::nim::DEFAULT_NIM_USER;
use crate::session::Endpoint;
use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[serde(default)]
    pub debug: bool,
    pub hmc: EndpointConfig,
    pub nim: Option<EndpointConfig>,
}

/// Login details of one administrative endpoint. Unset fields take the
/// defaults of the endpoint's role.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EndpointConfig {
    pub host: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
    /// Connect timeout in seconds.
    pub timeout: Option<u64>,
}

impl EndpointConfig {
    pub fn endpoint(&self, default_user: &str) -> Endpoint {
        let mut endpoint = Endpoint::new(
            self.host.clone(),
            self.user.clone().unwrap_or_else(|| default_user.to_string()),
        );
        if let Some(password) = &self.password {
            endpoint = endpoint.password(password.clone());
        }
        if let Some(port) = self.port {
            endpoint = endpoint.port(port);
        }
        if let Some(timeout) = self.timeout {
            endpoint.timeout = Duration::from_secs(timeout);
        }
        endpoint
    }
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        load_toml(path)
    }

    pub fn hmc_endpoint(&self) -> Endpoint {
        self.hmc.endpoint(DEFAULT_HMC_USER)
    }

    pub fn nim_endpoint(&self) -> Option<Endpoint> {
        self.nim.as_ref().map(|n| n.endpoint(DEFAULT_NIM_USER))
    }
}

/// Load partition creation settings from the given TOML file.
pub fn load_settings(path: &Utf8Path) -> Result<CreateSettings, LoadError> {
    load_toml(path)
}

fn load_toml<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, LoadError> {
    let file_contents = std::fs::read_to_string(path)
        .map_err(|err| LoadError::Io { path: path.into(), err })?;
    toml::from_str(&file_contents).map_err(|err| LoadError::Parse { path: path.into(), err })
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("error reading \"{path}\": {err}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\": {err}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
}
