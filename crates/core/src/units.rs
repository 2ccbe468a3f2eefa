use alloy_primitives::{utils::parse_units, U256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitsError {
    #[error("Invalid token amount '{0}'")]
    InvalidAmount(String),

    #[error("Token amount must be positive: '{0}'")]
    NotPositive(String),
}

/// Convert a human amount ("1.5") to the token's base units
pub fn parse_token_amount(amount: &str, decimals: u8) -> Result<U256, UnitsError> {
    let trimmed = amount.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') {
        return Err(UnitsError::NotPositive(amount.to_string()));
    }

    let parsed = parse_units(trimmed, decimals)
        .map_err(|e| UnitsError::InvalidAmount(format!("{}: {}", amount, e)))?;
    let value: U256 = parsed.into();

    if value.is_zero() {
        return Err(UnitsError::NotPositive(amount.to_string()));
    }
    Ok(value)
}
