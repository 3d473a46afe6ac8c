//! Connection kind definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of network connection the device currently has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    #[default]
    Wifi,
    Cellular,
    Offline,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Wifi => write!(f, "wifi"),
            ConnectionKind::Cellular => write!(f, "cellular"),
            ConnectionKind::Offline => write!(f, "offline"),
        }
    }
}

impl FromStr for ConnectionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wifi" | "wi-fi" => Ok(ConnectionKind::Wifi),
            "cellular" | "mobile" => Ok(ConnectionKind::Cellular),
            "offline" | "none" => Ok(ConnectionKind::Offline),
            _ => Err(format!("Unknown connection kind: {}", s)),
        }
    }
}
