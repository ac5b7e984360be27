// Routes module - the netplan-style data model for static routes and routing policies

pub mod parser;
pub mod prefix;

pub use prefix::NetworkPrefix;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Metric applied to a route that does not declare one
pub const DEFAULT_ROUTE_METRIC: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub to: NetworkPrefix,
    pub via: IpAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<u32>,
    pub table: u32,
}

impl Route {
    /// Metric handed to the kernel
    pub fn effective_metric(&self) -> u32 {
        self.metric.unwrap_or(DEFAULT_ROUTE_METRIC)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<NetworkPrefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<NetworkPrefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    pub table: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<Route>>,
    #[serde(
        rename = "routing-policy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub routing_policy: Option<Vec<RoutingPolicy>>,
}

impl InterfaceConfig {
    pub fn routes(&self) -> &[Route] {
        self.routes.as_deref().unwrap_or_default()
    }

    pub fn policies(&self) -> &[RoutingPolicy] {
        self.routing_policy.as_deref().unwrap_or_default()
    }
}

/// Interface name to its desired routes and policies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub ethernets: BTreeMap<String, InterfaceConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(metric: Option<u32>) -> Route {
        Route {
            to: "10.0.0.0/24".parse().unwrap(),
            via: "192.168.1.1".parse().unwrap(),
            metric,
            table: 100,
        }
    }

    #[test]
    fn test_effective_metric() {
        assert_eq!(route(None).effective_metric(), 1024);
        assert_eq!(route(Some(0)).effective_metric(), 0);
        assert_eq!(route(Some(50)).effective_metric(), 50);
    }

    #[test]
    fn test_absent_lists_are_empty() {
        let iface = InterfaceConfig::default();
        assert!(iface.routes().is_empty());
        assert!(iface.policies().is_empty());
    }
}
