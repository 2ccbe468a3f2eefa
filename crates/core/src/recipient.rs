//! Amount recipients for shield, transfer and unshield operations

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix of Railgun private (0zk) addresses
pub const RAILGUN_ADDRESS_PREFIX: &str = "0zk1";

const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecipientError {
    #[error("Recipient amount must be greater than zero")]
    ZeroAmount,

    #[error("Invalid recipient address: {0}")]
    InvalidAddress(String),

    #[error("Token address must not be the zero address")]
    ZeroToken,

    #[error("Recipient list is empty")]
    Empty,

    #[error("Expected a {expected} recipient, got {got}")]
    WrongAddressKind {
        expected: &'static str,
        got: String,
    },
}

/// Where the funds land: inside the overlay (0zk) or on the public chain (0x)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RecipientAddress {
    Private(String),
    Public(Address),
}

impl RecipientAddress {
    pub fn is_private(&self) -> bool {
        matches!(self, Self::Private(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Private(_) => "private",
            Self::Public(_) => "public",
        }
    }
}

impl FromStr for RecipientAddress {
    type Err = RecipientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(data) = s.strip_prefix(RAILGUN_ADDRESS_PREFIX) {
            // Bech32m data part after the "0zk" hrp and separator
            if data.len() < 8 || !data.chars().all(|c| BECH32_CHARSET.contains(c)) {
                return Err(RecipientError::InvalidAddress(s.to_string()));
            }
            return Ok(Self::Private(s.to_string()));
        }

        if s.starts_with("0x") && s.len() == 42 {
            let address: Address = s
                .parse()
                .map_err(|_| RecipientError::InvalidAddress(s.to_string()))?;
            return Ok(Self::Public(address));
        }

        Err(RecipientError::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for RecipientAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Private(addr) => f.write_str(addr),
            Self::Public(addr) => write!(f, "{}", addr),
        }
    }
}

impl Serialize for RecipientAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecipientAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// ERC-20 amount recipient
///
/// Construction goes through [`Recipient::new`], so a value of this type always
/// carries a non-zero amount and well-formed addresses.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    token_address: Address,
    /// Amount in the token's native decimal precision
    amount: U256,
    recipient_address: RecipientAddress,
}

impl Recipient {
    pub fn new(
        token_address: Address,
        amount: U256,
        recipient_address: RecipientAddress,
    ) -> Result<Self, RecipientError> {
        if amount.is_zero() {
            return Err(RecipientError::ZeroAmount);
        }
        if token_address.is_zero() {
            return Err(RecipientError::ZeroToken);
        }
        Ok(Self {
            token_address,
            amount,
            recipient_address,
        })
    }

    /// Parse the recipient from its textual form (0zk or 0x)
    pub fn parse(
        token_address: Address,
        amount: U256,
        recipient_address: &str,
    ) -> Result<Self, RecipientError> {
        Self::new(token_address, amount, recipient_address.parse()?)
    }

    pub fn token_address(&self) -> Address {
        self.token_address
    }

    pub fn amount(&self) -> U256 {
        self.amount
    }

    pub fn recipient_address(&self) -> &RecipientAddress {
        &self.recipient_address
    }

    /// Re-check the construction invariants, used on values that crossed a
    /// deserialization boundary
    pub fn validate(&self) -> Result<(), RecipientError> {
        Self::new(self.token_address, self.amount, self.recipient_address.clone()).map(|_| ())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecipientWire {
    token_address: Address,
    amount: U256,
    recipient_address: RecipientAddress,
}

impl<'de> Deserialize<'de> for Recipient {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = RecipientWire::deserialize(deserializer)?;
        Recipient::new(wire.token_address, wire.amount, wire.recipient_address)
            .map_err(serde::de::Error::custom)
    }
}

/// Total amount per token across a recipient list
pub fn total_by_token(recipients: &[Recipient]) -> Vec<(Address, U256)> {
    let mut totals: Vec<(Address, U256)> = Vec::new();
    for recipient in recipients {
        match totals
            .iter_mut()
            .find(|(token, _)| *token == recipient.token_address)
        {
            Some((_, total)) => *total = total.saturating_add(recipient.amount),
            None => totals.push((recipient.token_address, recipient.amount)),
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZK_ADDR: &str = "0zk1qyk9nn28x0u3rwn5pknglda68wrn7gw6anjw8gg94mcj6eq5u48tlrv7j6fe3z53lama02nutwtcqc979wnce0qwly4y7w4rls5cq040g7z8eagshxrw5ajy990";

    fn token() -> Address {
        "0xb7F1CAD2080fA7EfF168eB1d3CD25a6094FD4A99".parse().unwrap()
    }

    #[test]
    fn test_zero_amount_rejected() {
        let err = Recipient::parse(token(), U256::ZERO, ZK_ADDR).unwrap_err();
        assert_eq!(err, RecipientError::ZeroAmount);
    }

    #[test]
    fn test_address_kinds() {
        let private: RecipientAddress = ZK_ADDR.parse().unwrap();
        assert!(private.is_private());

        let public: RecipientAddress = "0x1000000000000000000000000000000000000000"
            .parse()
            .unwrap();
        assert_eq!(public.kind(), "public");

        assert!("0zk1OOPS".parse::<RecipientAddress>().is_err());
        assert!("0x1234".parse::<RecipientAddress>().is_err());
        assert!("railgun".parse::<RecipientAddress>().is_err());
    }

    #[test]
    fn test_zero_token_rejected() {
        let err = Recipient::parse(Address::ZERO, U256::from(1u64), ZK_ADDR).unwrap_err();
        assert_eq!(err, RecipientError::ZeroToken);
    }

    #[test]
    fn test_deserialize_enforces_invariants() {
        let json = serde_json::json!({
            "tokenAddress": format!("{:?}", token()),
            "amount": "0x0",
            "recipientAddress": ZK_ADDR,
        });
        assert!(serde_json::from_value::<Recipient>(json).is_err());
    }

    #[test]
    fn test_total_by_token() {
        let a = Recipient::parse(token(), U256::from(5u64), ZK_ADDR).unwrap();
        let b = Recipient::parse(token(), U256::from(7u64), ZK_ADDR).unwrap();
        let totals = total_by_token(&[a, b]);
        assert_eq!(totals, vec![(token(), U256::from(12u64))]);
    }
}
