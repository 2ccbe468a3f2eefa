use std::fmt;

use serde::{Deserialize, Serialize};

/// Chain family, only EVM chains carry the Railgun contracts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ChainType {
    Evm,
}

impl ChainType {
    /// Numeric tag used by the engine (`ChainType.EVM = 0`)
    pub fn tag(&self) -> u8 {
        match self {
            Self::Evm => 0,
        }
    }
}

impl From<ChainType> for u8 {
    fn from(value: ChainType) -> Self {
        value.tag()
    }
}

impl TryFrom<u8> for ChainType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Evm),
            other => Err(format!("unsupported chain type {}", other)),
        }
    }
}

/// Chain identifier as understood by the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Chain {
    #[serde(rename = "type")]
    pub chain_type: ChainType,
    pub id: u64,
}

impl Chain {
    pub const fn evm(id: u64) -> Self {
        Self {
            chain_type: ChainType::Evm,
            id,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_type.tag(), self.id)
    }
}

/// TXID merkletree protocol version
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TxidVersion {
    #[serde(rename = "V2_PoseidonMerkle")]
    V2PoseidonMerkle,
    #[serde(rename = "V3_PoseidonMerkle")]
    V3PoseidonMerkle,
}

impl TxidVersion {
    /// Every version the POI reporter walks, oldest first
    pub const ALL: [TxidVersion; 2] = [Self::V2PoseidonMerkle, Self::V3PoseidonMerkle];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V2PoseidonMerkle => "V2_PoseidonMerkle",
            Self::V3PoseidonMerkle => "V3_PoseidonMerkle",
        }
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::V2PoseidonMerkle => "V2",
            Self::V3PoseidonMerkle => "V3",
        }
    }
}

impl Default for TxidVersion {
    fn default() -> Self {
        Self::V2PoseidonMerkle
    }
}

impl fmt::Display for TxidVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
