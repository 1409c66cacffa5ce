//! Command-line configuration.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use corelib::{HashRing, Locator, PartitionedRing, RingConfig, RingMember, TOP_WEIGHT};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::commands::Command;

/// Inspect consistent-hash routing over a set of members.
#[derive(Parser, Debug)]
#[command(name = "hashring", author, version, about, long_about = None)]
pub struct CliConfig {
    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Ring members as `address[=weight]`, comma separated
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub members: Vec<String>,

    /// Virtual replicas per member at weight 100
    #[arg(long, default_value_t = corelib::config::DEFAULT_REPLICATION_FACTOR)]
    pub replicas: u32,

    /// Use the bounded-load partitioned ring
    #[arg(long)]
    pub partitioned: bool,

    #[arg(long, default_value_t = corelib::config::DEFAULT_PARTITION_COUNT)]
    pub partition_count: u32,

    #[arg(long, default_value_t = corelib::config::DEFAULT_LOAD)]
    pub load: f64,

    #[arg(long, default_value_t = corelib::config::DEFAULT_PICKER_WIDTH)]
    pub picker_width: u32,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    pub fn ring_config(&self) -> RingConfig {
        RingConfig {
            partition_count: self.partition_count,
            replication_factor: self.replicas,
            load: self.load,
            picker_width: self.picker_width,
        }
        .normalized()
    }

    /// Builds the ring described by the flags.
    pub fn build_ring(&self) -> Result<Arc<dyn Locator>> {
        let config = self.ring_config();
        let ring: Arc<dyn Locator> = if self.partitioned {
            Arc::new(PartitionedRing::new(config))
        } else {
            Arc::new(HashRing::with_config(config))
        };
        for arg in &self.members {
            let (member, weight) = parse_member(arg)?;
            if !ring.add_with_weight(member.clone(), weight) {
                bail!("duplicate member {member}");
            }
        }
        debug!(ring = ring.name(), members = ring.member_count(), "ring built");
        Ok(ring)
    }

    pub fn run(self) -> Result<()> {
        init_tracing(&self.log_level);
        let ring = self.build_ring()?;
        let result = self.command.execute(ring.as_ref())?;
        print!("{result}");
        Ok(())
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A subscriber may already be installed (tests).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Parses `address[=weight]`.
pub fn parse_member(arg: &str) -> Result<(RingMember, u32)> {
    let arg = arg.trim();
    let (address, weight) = match arg.rsplit_once('=') {
        Some((address, weight)) => {
            let weight = weight
                .parse::<u32>()
                .with_context(|| format!("invalid weight in member {arg:?}"))?;
            (address, weight)
        }
        None => (arg, TOP_WEIGHT),
    };
    if address.is_empty() {
        bail!("empty member address in {arg:?}");
    }
    if weight == 0 {
        bail!("member {address} has weight 0");
    }
    Ok((RingMember::new(address), weight))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_member() {
        let (m, w) = parse_member("10.0.0.1:3478").unwrap();
        assert_eq!(m.address, "10.0.0.1:3478");
        assert_eq!(w, TOP_WEIGHT);

        let (m, w) = parse_member(" 10.0.0.2:3478=250 ").unwrap();
        assert_eq!(m.address, "10.0.0.2:3478");
        assert_eq!(w, 250);

        assert!(parse_member("10.0.0.3:3478=heavy").is_err());
        assert!(parse_member("=10").is_err());
        assert!(parse_member("a:1=0").is_err());
    }

    #[test]
    fn test_parse_flags_and_build() {
        let config = CliConfig::try_parse_from([
            "hashring",
            "--members",
            "a:1,b:1=50",
            "--replicas",
            "10",
            "locate",
            "some-key",
        ])
        .unwrap();
        let ring = config.build_ring().unwrap();
        assert_eq!(ring.name(), "HashRing");
        assert_eq!(ring.member_count(), 2);
        assert_eq!(ring.config().replication_factor, 10);
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let config =
            CliConfig::try_parse_from(["hashring", "-m", "a:1,a:1", "distribution"]).unwrap();
        assert!(config.build_ring().is_err());
    }

    #[test]
    fn test_partitioned_flag() {
        let config = CliConfig::try_parse_from([
            "hashring",
            "-m",
            "a:1,b:1,c:1",
            "--partitioned",
            "--partition-count",
            "31",
            "distribution",
        ])
        .unwrap();
        let ring = config.build_ring().unwrap();
        assert_eq!(ring.name(), "PartitionedRing");
        assert_eq!(ring.config().partition_count, 31);
    }
}
