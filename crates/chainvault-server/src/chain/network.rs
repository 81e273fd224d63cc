//! Supported networks and their defaults

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// EVM network an anchor can be written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ethereum,
    Polygon,
    Bsc,
    Avalanche,
}

impl Network {
    pub const ALL: [Network; 4] = [
        Network::Ethereum,
        Network::Polygon,
        Network::Bsc,
        Network::Avalanche,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Polygon => "polygon",
            Network::Bsc => "bsc",
            Network::Avalanche => "avalanche",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Network::Ethereum => "Ethereum",
            Network::Polygon => "Polygon",
            Network::Bsc => "BSC",
            Network::Avalanche => "Avalanche",
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::Polygon => 137,
            Network::Bsc => 56,
            Network::Avalanche => 43114,
        }
    }

    /// Blocks on top of the inclusion block before an anchor counts as final
    pub fn default_confirmations(&self) -> u64 {
        match self {
            Network::Ethereum => 12,
            Network::Polygon => 64,
            Network::Bsc => 15,
            Network::Avalanche => 1,
        }
    }

    pub fn native_symbol(&self) -> &'static str {
        match self {
            Network::Ethereum => "ETH",
            Network::Polygon => "MATIC",
            Network::Bsc => "BNB",
            Network::Avalanche => "AVAX",
        }
    }

    /// Prefix for this network's environment variables (`ETHEREUM_RPC_URL`, ...)
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Network::Ethereum => "ETHEREUM",
            Network::Polygon => "POLYGON",
            Network::Bsc => "BSC",
            Network::Avalanche => "AVALANCHE",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown network '{0}'. Expected one of: ethereum, polygon, bsc, avalanche")]
pub struct UnknownNetwork(pub String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Network::Ethereum),
            "polygon" | "matic" => Ok(Network::Polygon),
            "bsc" | "bnb" | "binance" => Ok(Network::Bsc),
            "avalanche" | "avax" => Ok(Network::Avalanche),
            _ => Err(UnknownNetwork(s.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dashboard_names() {
        assert_eq!("Ethereum".parse::<Network>().unwrap(), Network::Ethereum);
        assert_eq!("BSC".parse::<Network>().unwrap(), Network::Bsc);
        assert_eq!(" avax ".parse::<Network>().unwrap(), Network::Avalanche);
        assert!("solana".parse::<Network>().is_err());
    }

    #[test]
    fn test_network_defaults() {
        assert_eq!(Network::Ethereum.default_confirmations(), 12);
        assert_eq!(Network::Polygon.chain_id(), 137);
        assert_eq!(Network::Bsc.native_symbol(), "BNB");
        assert_eq!(Network::Avalanche.default_confirmations(), 1);
    }

    #[test]
    fn test_as_str_round_trips() {
        for network in Network::ALL {
            assert_eq!(network.as_str().parse::<Network>().unwrap(), network);
        }
    }
}
