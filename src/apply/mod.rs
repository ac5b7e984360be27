// Apply module - turns a parsed NetworkConfig into kernel rule and route additions

pub mod dry_run;
#[cfg(target_os = "linux")]
pub mod netlink;

use crate::error::{AppError, AppResult};
use crate::routes::{NetworkConfig, NetworkPrefix, Route, RoutingPolicy};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// Failure reported by a routing backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("no such device")]
    NotFound,

    #[error("{0}")]
    Kernel(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    /// Plain network device, no link-info kind attached
    Device,
    Other(String),
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::Device => f.write_str("device"),
            LinkKind::Other(kind) => f.write_str(kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHandle {
    pub name: String,
    pub index: u32,
    pub kind: LinkKind,
}

/// Arguments of one "add rule" call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleRequest {
    pub table: u32,
    pub source: Option<NetworkPrefix>,
    pub destination: Option<NetworkPrefix>,
    /// `None` leaves the priority to the kernel
    pub priority: Option<u32>,
}

impl RuleRequest {
    pub fn from_policy(policy: &RoutingPolicy) -> Self {
        RuleRequest {
            table: policy.table,
            source: policy.from,
            destination: policy.to,
            priority: policy.priority,
        }
    }
}

impl fmt::Display for RuleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table {}", self.table)?;
        if let Some(src) = &self.source {
            write!(f, " from {}", src)?;
        }
        if let Some(dst) = &self.destination {
            write!(f, " to {}", dst)?;
        }
        if let Some(priority) = self.priority {
            write!(f, " priority {}", priority)?;
        }
        Ok(())
    }
}

/// Arguments of one "add route" call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteRequest {
    pub destination: NetworkPrefix,
    pub gateway: IpAddr,
    pub table: u32,
    pub priority: u32,
    pub link_index: u32,
}

impl RouteRequest {
    pub fn from_route(route: &Route, link: &LinkHandle) -> Self {
        RouteRequest {
            destination: route.to,
            gateway: route.via,
            table: route.table,
            priority: route.effective_metric(),
            link_index: link.index,
        }
    }
}

impl fmt::Display for RouteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} via {} table {} metric {}",
            self.destination, self.gateway, self.table, self.priority
        )
    }
}

/// The kernel routing primitives the applier needs
pub trait RoutingBackend {
    fn resolve_link(&mut self, name: &str) -> Result<LinkHandle, BackendError>;

    fn add_rule(&mut self, rule: &RuleRequest) -> Result<(), BackendError>;

    fn add_route(&mut self, route: &RouteRequest) -> Result<(), BackendError>;
}

impl<B: RoutingBackend + ?Sized> RoutingBackend for &mut B {
    fn resolve_link(&mut self, name: &str) -> Result<LinkHandle, BackendError> {
        (**self).resolve_link(name)
    }

    fn add_rule(&mut self, rule: &RuleRequest) -> Result<(), BackendError> {
        (**self).add_rule(rule)
    }

    fn add_route(&mut self, route: &RouteRequest) -> Result<(), BackendError> {
        (**self).add_route(route)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub interfaces: usize,
    pub rules: usize,
    pub routes: usize,
}

impl ApplySummary {
    pub fn describe(&self, dry_run: bool) -> String {
        format!(
            "{} {} routing policies and {} routes on {} interface(s)",
            if dry_run { "planned" } else { "applied" },
            self.rules,
            self.routes,
            self.interfaces
        )
    }
}

pub struct Applier<B> {
    backend: B,
}

impl<B: RoutingBackend> Applier<B> {
    pub fn new(backend: B) -> Self {
        Applier { backend }
    }

    /// Apply every interface's policies, then its routes. Stops at the first
    /// failure; nothing already added is removed.
    pub fn apply(&mut self, config: &NetworkConfig) -> AppResult<ApplySummary> {
        let mut summary = ApplySummary::default();

        for (name, iface) in &config.ethernets {
            let link = self.resolve_device(name)?;

            for policy in iface.policies() {
                self.add_policy(name, policy)?;
                summary.rules += 1;
            }

            for route in iface.routes() {
                self.add_route(name, route, &link)?;
                summary.routes += 1;
            }

            summary.interfaces += 1;
        }

        Ok(summary)
    }

    fn resolve_device(&mut self, name: &str) -> AppResult<LinkHandle> {
        let link = self.backend.resolve_link(name).map_err(|e| match e {
            BackendError::NotFound => AppError::LinkNotFound(name.to_string()),
            source => AppError::LinkLookup {
                name: name.to_string(),
                source,
            },
        })?;

        if link.kind != LinkKind::Device {
            return Err(AppError::UnsupportedLinkType {
                name: name.to_string(),
                kind: link.kind.to_string(),
            });
        }

        tracing::debug!("resolved interface {} to link index {}", link.name, link.index);
        Ok(link)
    }

    fn add_policy(&mut self, name: &str, policy: &RoutingPolicy) -> AppResult<()> {
        let rule = RuleRequest::from_policy(policy);

        if let Some(from) = &rule.source {
            tracing::info!("adding routing policy on table {} from {}", rule.table, from);
        }
        if let Some(to) = &rule.destination {
            tracing::info!("adding routing policy on table {} to {}", rule.table, to);
        }
        if rule.source.is_none() && rule.destination.is_none() {
            tracing::info!("adding routing policy on table {}", rule.table);
        }

        self.backend
            .add_rule(&rule)
            .map_err(|source| AppError::RuleAdd {
                interface: name.to_string(),
                rule: rule.to_string(),
                source,
            })
    }

    fn add_route(&mut self, name: &str, route: &Route, link: &LinkHandle) -> AppResult<()> {
        let request = RouteRequest::from_route(route, link);
        tracing::info!("adding route for {} via {}", request.destination, request.gateway);

        self.backend
            .add_route(&request)
            .map_err(|source| AppError::RouteAdd {
                interface: name.to_string(),
                route: request.to_string(),
                source,
            })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Op {
        Resolve(String),
        Rule(RuleRequest),
        Route(RouteRequest),
    }

    /// Backend that records every call and can be told to fail
    #[derive(Default)]
    pub struct RecordingBackend {
        pub links: HashMap<String, LinkHandle>,
        pub ops: Vec<Op>,
        pub fail_rule_table: Option<u32>,
        pub fail_route_table: Option<u32>,
        /// Link lookups of this name fail with EPERM
        pub fail_resolve: Option<String>,
    }

    impl RecordingBackend {
        pub fn with_devices(names: &[&str]) -> Self {
            let mut backend = RecordingBackend::default();
            for (i, name) in names.iter().enumerate() {
                backend.add_link(name, LinkKind::Device, i as u32 + 2);
            }
            backend
        }

        pub fn add_link(&mut self, name: &str, kind: LinkKind, index: u32) {
            self.links.insert(
                name.to_string(),
                LinkHandle {
                    name: name.to_string(),
                    index,
                    kind,
                },
            );
        }

        pub fn mutations(&self) -> Vec<&Op> {
            self.ops
                .iter()
                .filter(|op| !matches!(op, Op::Resolve(_)))
                .collect()
        }
    }

    impl RoutingBackend for RecordingBackend {
        fn resolve_link(&mut self, name: &str) -> Result<LinkHandle, BackendError> {
            self.ops.push(Op::Resolve(name.to_string()));
            if self.fail_resolve.as_deref() == Some(name) {
                return Err(BackendError::Kernel(std::io::Error::from_raw_os_error(1)));
            }
            self.links.get(name).cloned().ok_or(BackendError::NotFound)
        }

        fn add_rule(&mut self, rule: &RuleRequest) -> Result<(), BackendError> {
            if self.fail_rule_table == Some(rule.table) {
                return Err(BackendError::Kernel(std::io::Error::from_raw_os_error(17)));
            }
            self.ops.push(Op::Rule(rule.clone()));
            Ok(())
        }

        fn add_route(&mut self, route: &RouteRequest) -> Result<(), BackendError> {
            if self.fail_route_table == Some(route.table) {
                return Err(BackendError::Kernel(std::io::Error::from_raw_os_error(101)));
            }
            self.ops.push(Op::Route(route.clone()));
            Ok(())
        }
    }
}
