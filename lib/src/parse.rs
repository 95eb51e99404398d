// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parsers for the record formats printed by the HMC and the VIO servers.
//!
//! HMC listings are comma separated `key=value` records whose values may
//! themselves contain commas (quoted adapter lists). Adapter lists are a
//! small slash separated language of their own.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to parse output: {0}")]
pub struct ParseError(pub String);

/// One parsed `key=value` record, such as an LPAR configuration or profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Profile(BTreeMap<String, String>);

impl Profile {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Like `get`, but treats the HMC's `none` placeholder and empty values as
    /// absent.
    pub fn get_set(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty() && *v != "none")
    }

    /// The profile or partition name carried by the `name` field.
    pub fn name(&self) -> Option<&str> {
        self.get("name")
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn wwn_pair_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([[:xdigit:]]{16}),([[:xdigit:]]{16})")
            .expect("wwn pair regex compilation failed")
    })
}

/// Parse a comma delimited `key=value` record.
///
/// Tokens are split on commas and whitespace. A token without an `=` is not a
/// field of its own: it is folded back, comma joined, into the value of the
/// most recent key bearing token. This restores values such as adapter lists
/// that the HMC prints with embedded commas. Backslashes and double quotes are
/// stripped from keys and values.
///
/// In `virtual_fc_adapters` the comma between the two WWNs of an adapter is
/// rewritten to a slash so that [`parse_adapter_line`] can tell it apart from
/// the comma separating adapters.
pub fn parse_profile(text: &str) -> Profile {
    let mut fields: Vec<String> = Vec::new();
    for token in text.split(|c: char| c == ',' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        if token.contains('=') {
            fields.push(token.to_string());
        } else if let Some(last) = fields.last_mut() {
            last.push(',');
            last.push_str(token);
        }
    }

    let mut profile = Profile::default();
    for field in fields {
        let (key, value) = field.split_once('=').unwrap_or((&field, ""));
        let key = strip_quoting(key);
        if key.is_empty() {
            continue;
        }
        profile.insert(key, strip_quoting(value));
    }

    if let Some(fc) = profile.0.get_mut("virtual_fc_adapters") {
        *fc = join_wwn_pairs(fc);
    }

    profile
}

/// Rewrite the comma between the two WWNs of each fibre channel adapter entry
/// to a slash.
pub fn join_wwn_pairs(line: &str) -> String {
    wwn_pair_regex().replace_all(line, "$1/$2").into_owned()
}

fn strip_quoting(s: &str) -> String {
    s.chars().filter(|c| *c != '\\' && *c != '"').collect()
}

/// Which adapter list a line came from. Fibre channel entries carry a WWN
/// pair after the server adapter id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdapterKind {
    Scsi,
    Fc,
}

impl AdapterKind {
    /// The `--rsubtype` used by `chhwres` for this kind of adapter.
    pub fn subtype(&self) -> &'static str {
        match self {
            AdapterKind::Scsi => "scsi",
            AdapterKind::Fc => "fc",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.subtype())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WwnPair {
    pub wwn1: String,
    pub wwn2: String,
}

/// A client adapter of a partition profile and the VIO server adapter it is
/// connected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterMapping {
    pub kind: AdapterKind,
    pub client_adapter_id: u32,
    pub vios_id: u32,
    pub server_adapter_id: u32,
    /// Device name of the server adapter on the VIO server, e.g. `vhost3`.
    /// Filled in once resolved against the VIO server's adapter table.
    pub device: Option<String>,
    pub wwns: Option<WwnPair>,
}

/// Parse a profile adapter list such as
/// `20/client/1/viosrv1/2/0,21/client/2/viosrv2/7/0`.
///
/// Fields are positional: 0 is the client adapter id, 2 the numeric id of the
/// owning VIO server and 4 the server adapter id. Fibre channel entries add
/// the two WWNs at positions 5 and 6.
pub fn parse_adapter_line(
    line: &str,
    kind: AdapterKind,
) -> Result<Vec<AdapterMapping>, ParseError> {
    let line = line.trim();
    if line.is_empty() || line == "none" {
        return Ok(Vec::new());
    }

    let mut result = Vec::new();
    for entry in line.split(',').filter(|e| !e.is_empty()) {
        let fields: Vec<&str> = entry.split('/').collect();
        let id_at = |index: usize, what: &str| -> Result<u32, ParseError> {
            let raw = fields.get(index).ok_or_else(|| {
                ParseError(format!("missing {what} in adapter entry '{entry}'"))
            })?;
            raw.parse::<u32>().map_err(|e| {
                ParseError(format!(
                    "bad {what} '{raw}' in adapter entry '{entry}': {e}"
                ))
            })
        };

        let client_adapter_id = id_at(0, "client adapter id")?;
        let vios_id = id_at(2, "vio server id")?;
        let server_adapter_id = id_at(4, "server adapter id")?;

        let wwns = match kind {
            AdapterKind::Scsi => None,
            AdapterKind::Fc => match (fields.get(5), fields.get(6)) {
                (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => {
                    Some(WwnPair {
                        wwn1: a.to_string(),
                        wwn2: b.to_string(),
                    })
                }
                _ => None,
            },
        };

        result.push(AdapterMapping {
            kind,
            client_adapter_id,
            vios_id,
            server_adapter_id,
            device: None,
            wwns,
        });
    }

    Ok(result)
}

/// One line of `lssyscfg -r sys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemRecord {
    pub name: String,
    pub state: String,
    pub fields: Profile,
}

impl std::str::FromStr for SystemRecord {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = parse_profile(s);
        let name = fields
            .name()
            .ok_or_else(|| {
                ParseError(format!("managed system record without name: {s}"))
            })?
            .to_string();
        // multi word states come back comma joined from parse_profile
        let state = fields.get("state").unwrap_or_default().replace(',', " ");
        Ok(SystemRecord { name, state, fields })
    }
}
