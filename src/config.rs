// config.rs - Application configuration assembled from CLI arguments
use crate::network::types::IpVersion;
use anyhow::{anyhow, Result};
use clap::ArgMatches;
use std::collections::BTreeSet;
use std::str::FromStr;

/// Processes selected on the command line, as a mix of pids and
/// name substrings.
#[derive(Debug, Clone, Default)]
pub struct SelectedProcesses {
    names: BTreeSet<String>,
    pids: BTreeSet<i32>,
}

impl SelectedProcesses {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.pids.is_empty()
    }

    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    pub fn pids(&self) -> &BTreeSet<i32> {
        &self.pids
    }
}

impl FromIterator<String> for SelectedProcesses {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut selection = SelectedProcesses::default();
        for item in iter {
            // All-digit selectors are pids, everything else is a name
            // substring.
            match item.parse::<i32>() {
                Ok(pid) => {
                    selection.pids.insert(pid);
                }
                Err(_) => {
                    selection.names.insert(item);
                }
            }
        }
        selection
    }
}

/// Columns of the traffic display, selectable via `--cols`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Path,
    Proto,
    Source,
    Dest,
}

impl Column {
    pub const DEFAULT: [Column; 4] = [Column::Path, Column::Proto, Column::Source, Column::Dest];
}

impl FromStr for Column {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "path" => Ok(Column::Path),
            "proto" => Ok(Column::Proto),
            "source" | "src" => Ok(Column::Source),
            "dest" | "dst" => Ok(Column::Dest),
            other => Err(anyhow!(
                "unknown column '{}' (expected path, proto, source, dest)",
                other
            )),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interface the capture session binds to.
    pub interface: String,
    /// Processes whose traffic/lifecycle is of interest; empty = all.
    pub processes: SelectedProcesses,
    /// Parent processes whose children are of interest; empty = all.
    pub parents: SelectedProcesses,
    pub ip_version: IpVersion,
    /// Full executable paths instead of basenames.
    pub verbose: bool,
    pub columns: Vec<Column>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interface: "en0".to_string(),
            processes: SelectedProcesses::default(),
            parents: SelectedProcesses::default(),
            ip_version: IpVersion::Both,
            verbose: false,
            columns: Column::DEFAULT.to_vec(),
        }
    }
}

impl Config {
    /// Build the configuration from parsed command-line arguments.
    pub fn from_matches(matches: &ArgMatches) -> Result<Config> {
        let mut config = Config::default();

        if let Some(interface) = matches.get_one::<String>("interface") {
            config.interface = interface.clone();
        }

        if let Some(processes) = matches.get_many::<String>("process") {
            config.processes = processes.cloned().collect();
        }
        if let Some(parents) = matches.get_many::<String>("parent") {
            config.parents = parents.cloned().collect();
        }

        config.ip_version = resolve_ip_version(matches.get_flag("inet"), matches.get_flag("inet6"));
        config.verbose = matches.get_flag("verbose");

        if let Some(cols) = matches.get_many::<String>("cols") {
            config.columns = cols
                .map(|col| col.parse())
                .collect::<Result<Vec<Column>>>()?;
        }

        Ok(config)
    }
}

/// Asking for both versions, or for neither, means both.
fn resolve_ip_version(inet: bool, inet6: bool) -> IpVersion {
    match (inet, inet6) {
        (true, false) => IpVersion::V4,
        (false, true) => IpVersion::V6,
        _ => IpVersion::Both,
    }
}
