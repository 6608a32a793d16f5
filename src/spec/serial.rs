//! Serial spec (serial.json): which operators run on synchronized data.
//!
//! JSON shape:
//! {
//!   "names": ["fc8", "loss"],
//!   "patterns": ["^fc[0-9]+$"]      // regexes matched against operator names
//! }

use crate::diagnostics;
use crate::graph::Graph;
use crate::rewrite::SerialSet;
use crate::Result;

use anyhow::Context;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use tracing::warn;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SerialSpec {
    #[serde(default)]
    pub names: Vec<String>,

    #[serde(default)]
    pub patterns: Vec<String>,
}

impl SerialSpec {
    pub fn from_file(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| diagnostics::error_message(format!("read serial file {}", path)))?;
        serde_json::from_str(&text)
            .with_context(|| diagnostics::error_message(format!("parse serial file {}", path)))
    }

    pub fn merge(mut self, names: &[String]) -> Self {
        self.names.extend(names.iter().cloned());
        self
    }

    /// Resolve names and patterns against the operators of `graph`.
    ///
    /// Explicit names that match no operator are kept (they are harmless) but
    /// reported, since they usually mean a typo in the serial list.
    pub fn resolve(&self, graph: &Graph) -> Result<SerialSet> {
        let mut set = SerialSet::new();

        for name in &self.names {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if graph.position(name).is_none() {
                warn!(operator = name, "serial operator not found in net");
            }
            set.insert(name.to_string());
        }

        for pat in &self.patterns {
            let re = Regex::new(pat).with_context(|| {
                diagnostics::error_message(format!("bad serial pattern {:?}", pat))
            })?;
            let before = set.len();
            set.extend(
                graph
                    .operators()
                    .iter()
                    .filter(|op| re.is_match(&op.name))
                    .map(|op| op.name.clone()),
            );
            if set.len() == before {
                warn!(pattern = %pat, "serial pattern matched no new operators");
            }
        }

        Ok(set)
    }
}
