//! Configuration for the MemOSD daemon
//!
//! The merged options (config file plus CLI, CLI winning) are carried as an
//! immutable struct into server construction; there is no process-global
//! option state.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use uuid::Uuid;

/// Daemon options
#[derive(Clone, Debug, Deserialize)]
pub struct OsdOptions {
    /// Monitor addresses (required, at least one)
    pub mon_addrs: Vec<SocketAddr>,
    /// Numeric id of this OSD within the cluster
    pub osd_id: i32,
    /// Cluster fsid
    #[serde(default = "default_fsid")]
    pub fsid: Uuid,
    /// Address to accept peer connections on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Directory holding object-class plugins for CALL ops
    #[serde(default)]
    pub class_dir: Option<PathBuf>,
    /// Log level filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Treat writes of 4 KiB and larger as no-ops (network benchmarking)
    #[serde(default)]
    pub noop_write: bool,
    /// Placement weight announced to the monitors
    #[serde(default = "default_weight")]
    pub weight: String,
}

fn default_fsid() -> Uuid {
    Uuid::nil()
}

fn default_listen() -> SocketAddr {
    "0.0.0.0:6802".parse().unwrap()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_weight() -> String {
    "0.0010".to_string()
}

impl OsdOptions {
    /// Check required options
    pub fn validate(&self) -> Result<()> {
        if self.mon_addrs.is_empty() {
            return Err(Error::invalid_argument("no 'mon_addrs' option is provided"));
        }
        if self.osd_id < 0 {
            return Err(Error::invalid_argument(format!(
                "invalid osd id {}",
                self.osd_id
            )));
        }
        Ok(())
    }
}

/// Parse the daemon 'name' option, which must be a numeric OSD id
pub fn parse_osd_id(name: &str) -> Result<i32> {
    name.parse::<i32>()
        .ok()
        .filter(|id| *id >= 0)
        .ok_or_else(|| {
            Error::invalid_argument(format!(
                "'name' option does not contain a valid osd id: {name:?}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_osd_id() {
        assert_eq!(parse_osd_id("0").unwrap(), 0);
        assert_eq!(parse_osd_id("17").unwrap(), 17);
        assert!(parse_osd_id("-1").is_err());
        assert!(parse_osd_id("osd.0").is_err());
        assert!(parse_osd_id("").is_err());
    }

    #[test]
    fn test_validate() {
        let opts = OsdOptions {
            mon_addrs: vec!["127.0.0.1:6789".parse().unwrap()],
            osd_id: 0,
            fsid: Uuid::nil(),
            listen: default_listen(),
            class_dir: None,
            log_level: default_log_level(),
            noop_write: false,
            weight: default_weight(),
        };
        assert!(opts.validate().is_ok());

        let mut no_mons = opts.clone();
        no_mons.mon_addrs.clear();
        assert!(no_mons.validate().is_err());
    }
}
