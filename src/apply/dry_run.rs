// Dry-run backend: resolves links for real, prints planned changes instead of applying them

use super::{BackendError, LinkHandle, RouteRequest, RoutingBackend, RuleRequest};
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum PlannedOp<'a> {
    AddRule(&'a RuleRequest),
    AddRoute(&'a RouteRequest),
}

/// Writes one JSON object per planned mutation to `out`
pub struct DryRunBackend<B, W> {
    inner: B,
    out: W,
}

impl<B: RoutingBackend, W: Write> DryRunBackend<B, W> {
    pub fn new(inner: B, out: W) -> Self {
        DryRunBackend { inner, out }
    }

    fn emit(&mut self, op: PlannedOp<'_>) -> Result<(), BackendError> {
        serde_json::to_writer(&mut self.out, &op)
            .map_err(|e| BackendError::Protocol(format!("Failed to write plan: {}", e)))?;
        writeln!(self.out)?;
        Ok(())
    }
}

impl<B: RoutingBackend, W: Write> RoutingBackend for DryRunBackend<B, W> {
    fn resolve_link(&mut self, name: &str) -> Result<LinkHandle, BackendError> {
        self.inner.resolve_link(name)
    }

    fn add_rule(&mut self, rule: &RuleRequest) -> Result<(), BackendError> {
        self.emit(PlannedOp::AddRule(rule))
    }

    fn add_route(&mut self, route: &RouteRequest) -> Result<(), BackendError> {
        self.emit(PlannedOp::AddRoute(route))
    }
}
