// Netplan document parsing

use super::NetworkConfig;
use crate::error::AppResult;
use serde::Deserialize;

/// Top level of a netplan file; only `network.ethernets` is of interest.
#[derive(Debug, Deserialize)]
struct NetplanDocument {
    #[serde(default)]
    network: NetworkConfig,
}

/// Decode a netplan YAML document. Any syntax, shape or CIDR error fails
/// the whole document.
pub fn parse_network_config(bytes: &[u8]) -> AppResult<NetworkConfig> {
    let doc: NetplanDocument = serde_yaml::from_slice(bytes)?;
    tracing::debug!(
        "parsed configuration for {} interface(s)",
        doc.network.ethernets.len()
    );
    Ok(doc.network)
}
