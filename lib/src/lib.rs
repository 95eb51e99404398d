// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drive IBM PowerVM partitions through a Hardware Management Console.
//!
//! An [`Hmc`] owns the one remote session everything else goes through. A
//! [`ManagedSystem`] discovers its VIO servers at construction, and an
//! [`Lpar`] is created, provisioned, power cycled and deleted against it.
//!
//! ```no_run
//! use camino::Utf8Path;
//! use libpowervm::{
//!     config::{load_settings, Config},
//!     util::logger,
//!     CreateOptions, Hmc, Lpar, ManagedSystem,
//! };
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), libpowervm::error::Error> {
//!     let config = Config::from_file(Utf8Path::new("pvmctl.toml"))?;
//!     let log = logger(config.debug);
//!     let hmc = Arc::new(Hmc::connect(&config.hmc_endpoint(), &log)?);
//!     let frame = Arc::new(ManagedSystem::new(hmc, "sys1")?);
//!     let lpar = Lpar::new(frame, "lpar1")?;
//!     lpar.set_settings(load_settings(Utf8Path::new("lpar1.toml"))?);
//!     lpar.create(CreateOptions { test: false, rollback_on_failure: true })?;
//!     Ok(())
//! }
//! ```

#[cfg(test)]
mod test;
#[macro_use]
pub mod util;

pub mod cli;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fakes;
pub mod frame;
pub mod hmc;
pub mod lpar;
pub mod nim;
pub mod parse;
pub mod partition;
pub mod session;
pub mod vios;

pub use frame::{ManagedSystem, VirtualNetwork};
pub use hmc::Hmc;
pub use lpar::{CreateOptions, CreateSettings, Lpar, NetBootOptions};
pub use nim::Nim;
pub use partition::{Partition, PowerOffOptions, PowerState};
pub use session::{Endpoint, Session};
pub use vios::Vios;
