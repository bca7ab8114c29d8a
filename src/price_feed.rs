//! Index price ingestion.
//!
//! Prices arrive as signed `(symbol, timestamp, price)` tuples. Signature
//! recovery happens upstream; the engine validates the recovered signer
//! against a whitelist, requires each new timestamp to exceed the previously
//! committed one, and rejects timestamps more than one day ahead of now.

use crate::error::{EngineError, ValidationError};
use crate::market::Market;
use crate::types::{Price, SignerKey, Timestamp, MS_PER_DAY};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPricePayload {
    pub base_asset_symbol: String,
    pub timestamp: Timestamp,
    pub price: Price,
    /// Signer recovered from the payload signature by the transport layer.
    pub signer: SignerKey,
}

pub fn validate_index_price(
    payload: &IndexPricePayload,
    signers: &HashSet<SignerKey>,
    market: &Market,
    now: Timestamp,
) -> Result<(), EngineError> {
    if !signers.contains(&payload.signer) {
        return Err(ValidationError::UnknownPriceSigner(payload.signer).into());
    }
    if let Some(committed) = market.last_index_timestamp {
        if payload.timestamp <= committed {
            return Err(ValidationError::NonMonotonicPriceTimestamp {
                submitted: payload.timestamp,
                committed,
            }
            .into());
        }
    }
    if payload.timestamp.as_millis() > now.as_millis() + MS_PER_DAY {
        return Err(ValidationError::TimestampTooFarAhead {
            submitted: payload.timestamp,
            now,
        }
        .into());
    }
    Ok(())
}
