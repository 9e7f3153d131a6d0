//! Endpoint map and port allocation.
//!
//! Every sub-module runs as its own backend service at
//! `scheme://host:port/path`. New services get the next free port above a
//! fixed base. Allocation happens on the freshly read map, inside the same
//! compare-and-swap that writes it back, so two provisioning runs can never
//! both commit the same port: the second write is rejected as stale.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::EndpointsConfig;
use crate::error::{Result, ToolboxError};

/// Sub-module name → backend base URL.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointMap(BTreeMap<String, String>);

impl EndpointMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sub_module: &str) -> Option<&str> {
        self.0.get(sub_module).map(String::as_str)
    }

    pub fn contains(&self, sub_module: &str) -> bool {
        self.0.contains_key(sub_module)
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

    pub fn insert(&mut self, sub_module: impl Into<String>, base_url: impl Into<String>) {
        self.0.insert(sub_module.into(), base_url.into());
    }

    /// Ports already claimed by some entry.
    pub fn ports(&self) -> HashSet<u16> {
        self.0.values().filter_map(|url| port_of(url)).collect()
    }
}

impl FromIterator<(String, String)> for EndpointMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Extract the explicit port of `scheme://host:port/...`.
fn port_of(url: &str) -> Option<u16> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split('/').next()?;
    let (_, port) = authority.rsplit_once(':')?;
    port.parse().ok()
}

/// Result of [`PortAllocator::assign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// A new entry was added to the map.
    New(String),
    /// The sub-module already had an endpoint; the map is unchanged.
    Existing(String),
}

impl Assignment {
    pub fn url(&self) -> &str {
        match self {
            Assignment::New(u) | Assignment::Existing(u) => u,
        }
    }
}

/// Assigns base URLs to new sub-modules.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    scheme: String,
    host: String,
    base_port: u16,
}

impl PortAllocator {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, base_port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            base_port,
        }
    }

    pub fn from_config(cfg: &EndpointsConfig) -> Self {
        Self::new(&cfg.scheme, &cfg.host, cfg.base_port)
    }

    /// `base + entry count`, moved past any port an entry already holds.
    ///
    /// `PortsExhausted` when the search runs past 65535.
    pub fn next_port(&self, map: &EndpointMap, sub_module: &str) -> Result<u16> {
        let used = map.ports();
        let mut candidate = u32::from(self.base_port) + map.len() as u32;
        while candidate <= u32::from(u16::MAX) && used.contains(&(candidate as u16)) {
            candidate += 1;
        }
        u16::try_from(candidate).map_err(|_| ToolboxError::PortsExhausted {
            sub_module: sub_module.to_string(),
            base_port: self.base_port,
        })
    }

    pub fn base_url(&self, sub_module: &str, port: u16) -> String {
        format!(
            "{}://{}:{}/{}",
            self.scheme,
            self.host,
            port,
            sub_module.to_lowercase()
        )
    }

    /// Give `sub_module` an endpoint in `map` unless it already has one.
    pub fn assign(&self, map: &mut EndpointMap, sub_module: &str) -> Result<Assignment> {
        if let Some(url) = map.get(sub_module) {
            return Ok(Assignment::Existing(url.to_string()));
        }
        let port = self.next_port(map, sub_module)?;
        let url = self.base_url(sub_module, port);
        map.insert(sub_module, url.clone());
        Ok(Assignment::New(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> PortAllocator {
        PortAllocator::new("http", "127.0.0.1", 5000)
    }

    fn map(entries: &[(&str, &str)]) -> EndpointMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn first_endpoint_uses_base_port() {
        let mut m = EndpointMap::new();
        let a = allocator().assign(&mut m, "k-anonymity").unwrap();
        assert_eq!(a, Assignment::New("http://127.0.0.1:5000/k-anonymity".into()));
    }

    #[test]
    fn next_port_follows_entry_count() {
        let m = map(&[
            ("k-anonymity", "http://127.0.0.1:5000/k-anonymity"),
            ("l-diversity", "http://127.0.0.1:5001/l-diversity"),
        ]);
        assert_eq!(allocator().next_port(&m, "x").unwrap(), 5002);
        assert_eq!(
            allocator().base_url("TVAE Synthesis", 5002),
            "http://127.0.0.1:5002/tvae synthesis"
        );
    }

    #[test]
    fn next_port_skips_ports_in_use() {
        let m = map(&[
            ("a", "http://127.0.0.1:5000/a"),
            ("b", "http://127.0.0.1:5002/b"),
        ]);
        assert_eq!(allocator().next_port(&m, "x").unwrap(), 5003);
    }

    #[test]
    fn existing_entry_is_not_reassigned() {
        let mut m = map(&[("a", "http://127.0.0.1:5007/a")]);
        let a = allocator().assign(&mut m, "a").unwrap();
        assert_eq!(a, Assignment::Existing("http://127.0.0.1:5007/a".into()));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn port_parsing() {
        assert_eq!(port_of("http://127.0.0.1:5009/dp-queries-lp"), Some(5009));
        assert_eq!(port_of("https://example.org/x"), None);
        assert_eq!(port_of("127.0.0.1:80"), Some(80));
    }

    #[test]
    fn exhausted_port_space() {
        let alloc = PortAllocator::new("http", "h", u16::MAX);
        let m = map(&[("a", "http://h:1/a")]);
        let err = alloc.next_port(&m, "b").unwrap_err();
        assert!(matches!(
            err,
            ToolboxError::PortsExhausted { ref sub_module, base_port: u16::MAX } if sub_module == "b"
        ));
        assert_eq!(err.code(), "ports_exhausted");
    }
}
