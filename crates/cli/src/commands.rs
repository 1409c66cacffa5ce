//! Subcommands and their rendered output.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use anyhow::{bail, Result};
use clap::Subcommand;
use corelib::{Locator, RingMember};
use tracing::{debug, info};

use crate::config::parse_member;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the owner (and successors) of each key
    Locate {
        /// Routing keys to look up
        #[arg(required = true)]
        keys: Vec<String>,

        /// Number of distinct members to list per key
        #[arg(short = 'n', long, default_value_t = 1)]
        closest: usize,
    },

    /// Show how a sample of keys spreads across members
    Distribution {
        /// Number of sample keys
        #[arg(short, long, default_value_t = 10_000)]
        samples: usize,
    },

    /// Add or remove members and report how many sample keys moved
    Churn {
        /// Members to add as `address[=weight]`
        #[arg(long, value_delimiter = ',')]
        add: Vec<String>,

        /// Member addresses to remove
        #[arg(long, value_delimiter = ',')]
        remove: Vec<String>,

        #[arg(short, long, default_value_t = 10_000)]
        samples: usize,
    },

    /// Print the balancer service config for the ring flags
    ServiceConfig,
}

/// Rendered output of a command, one line per entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandResult {
    pub lines: Vec<String>,
}

impl CommandResult {
    fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

fn sample_key(i: usize) -> String {
    format!("key-{i}")
}

fn owners(ring: &dyn Locator, samples: usize) -> Vec<Option<RingMember>> {
    (0..samples)
        .map(|i| ring.locate(sample_key(i).as_bytes()))
        .collect()
}

impl Command {
    pub fn execute(&self, ring: &dyn Locator) -> Result<CommandResult> {
        match self {
            Command::Locate { keys, closest } => locate(ring, keys, *closest),
            Command::Distribution { samples } => distribution(ring, *samples),
            Command::Churn {
                add,
                remove,
                samples,
            } => churn(ring, add, remove, *samples),
            Command::ServiceConfig => {
                let json = ring.config().service_config_json(balancer::POLICY_NAME)?;
                Ok(CommandResult { lines: vec![json] })
            }
        }
    }
}

fn locate(ring: &dyn Locator, keys: &[String], closest: usize) -> Result<CommandResult> {
    if ring.member_count() == 0 {
        bail!("ring has no members");
    }
    let mut result = CommandResult::default();
    for key in keys {
        let members = ring.closest_n(key.as_bytes(), closest.max(1));
        let rendered: Vec<String> = members.iter().map(ToString::to_string).collect();
        result.push(format!("{key} -> {}", rendered.join(", ")));
    }
    Ok(result)
}

fn distribution(ring: &dyn Locator, samples: usize) -> Result<CommandResult> {
    if samples == 0 {
        bail!("at least one sample key is required");
    }
    let mut counts: BTreeMap<String, usize> = ring
        .members()
        .into_iter()
        .map(|m| (m.key(), 0))
        .collect();
    for owner in owners(ring, samples).into_iter().flatten() {
        *counts.entry(owner.key()).or_default() += 1;
    }
    debug!(ring = ring.name(), samples, "sampled distribution");

    let mut result = CommandResult::default();
    result.push(format!("{} members, {samples} sample keys", counts.len()));
    for (member, count) in counts {
        let share = count as f64 / samples as f64 * 100.0;
        result.push(format!("{member:<24} {count:>8} {share:>6.2}%"));
    }
    Ok(result)
}

fn churn(
    ring: &dyn Locator,
    add: &[String],
    remove: &[String],
    samples: usize,
) -> Result<CommandResult> {
    if add.is_empty() && remove.is_empty() {
        bail!("nothing to change: pass --add or --remove");
    }
    if samples == 0 {
        bail!("at least one sample key is required");
    }
    let before = owners(ring, samples);

    let mut added = HashSet::new();
    for arg in add {
        let (member, weight) = parse_member(arg)?;
        if !ring.add_with_weight(member.clone(), weight) {
            bail!("member {member} is already on the ring");
        }
        added.insert(member.key());
    }
    let mut removed = HashSet::new();
    for address in remove {
        let member = RingMember::new(address.trim());
        if !ring.remove(&member) {
            bail!("member {member} is not on the ring");
        }
        removed.insert(member.key());
    }

    let after = owners(ring, samples);
    let mut moved = 0usize;
    // Moves between members that were on the ring both before and after.
    let mut reshuffled = 0usize;
    for (old, new) in before.iter().zip(&after) {
        if old == new {
            continue;
        }
        moved += 1;
        let between_survivors = match (old, new) {
            (Some(o), Some(n)) => !removed.contains(&o.key()) && !added.contains(&n.key()),
            _ => false,
        };
        if between_survivors {
            reshuffled += 1;
        }
    }
    info!(added = added.len(), removed = removed.len(), moved, "churn measured");

    let mut result = CommandResult::default();
    result.push(format!(
        "moved {moved}/{samples} keys ({:.2}%)",
        moved as f64 / samples as f64 * 100.0
    ));
    result.push(format!("moved between unchanged members: {reshuffled}"));
    Ok(result)
}
