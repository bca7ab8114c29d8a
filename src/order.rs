// 4.0: orders and trades. orders arrive pre-matched; this module carries the
// request payloads, their keccak fingerprints, and the authority / nonce /
// fee validation that gates settlement. signature recovery itself happens in
// the transport layer, so an order arrives with the signing authority the
// gateway recovered for it.

use crate::error::{EngineError, ValidationError};
use crate::nonces::NonceBook;
use crate::types::{Hash32, Nonce, Pips, Price, Side, SignerKey, Timestamp, Wallet};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// Which authority signed an order, as recovered by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSigner {
    /// The wallet's own key.
    Wallet,
    /// A delegated signing key; must be covered by an authorization.
    DelegatedKey(SignerKey),
}

/// A wallet-signed grant letting `key` sign orders on its behalf. The nonce
/// timestamp doubles as the grant's creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedKeyAuthorization {
    pub wallet: Wallet,
    pub key: SignerKey,
    pub nonce: Nonce,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub wallet: Wallet,
    pub market: String,
    pub side: Side,
    /// Total order quantity in base pips; must be positive.
    pub quantity: Pips,
    pub limit_price: Price,
    pub nonce: Nonce,
    pub signer: OrderSigner,
    pub delegated_key_authorization: Option<DelegatedKeyAuthorization>,
}

impl Order {
    pub fn hash(&self) -> Hash32 {
        let mut hasher = Keccak256::new();
        hasher.update(self.wallet.0.to_le_bytes());
        hasher.update(self.market.as_bytes());
        hasher.update([match self.side {
            Side::Long => 0u8,
            Side::Short => 1u8,
        }]);
        update_decimal(&mut hasher, self.quantity.value());
        update_decimal(&mut hasher, self.limit_price.value());
        hasher.update(self.nonce.0.to_le_bytes());
        Hash32(hasher.finalize().into())
    }
}

/// One pre-matched fill between a buy and a sell order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub market: String,
    /// Base quantity filled; positive.
    pub base_quantity: Pips,
    /// Gross quote quantity exchanged; positive.
    pub quote_quantity: Pips,
    pub price: Price,
    /// Which side rested on the book; fees are assessed per side.
    pub maker_side: Side,
    pub maker_fee: Pips,
    pub taker_fee: Pips,
}

impl Trade {
    /// Fingerprint for the replay guard: both order hashes plus the fill.
    pub fn hash(&self, buy: &Order, sell: &Order) -> Hash32 {
        let mut hasher = Keccak256::new();
        hasher.update(buy.hash().0);
        hasher.update(sell.hash().0);
        update_decimal(&mut hasher, self.base_quantity.value());
        update_decimal(&mut hasher, self.price.value());
        Hash32(hasher.finalize().into())
    }

    pub fn fee_for(&self, side: Side) -> Pips {
        if side == self.maker_side {
            self.maker_fee
        } else {
            self.taker_fee
        }
    }
}

fn update_decimal(hasher: &mut Keccak256, value: Decimal) {
    let normalized = value.normalize();
    hasher.update(normalized.mantissa().to_le_bytes());
    hasher.update(normalized.scale().to_le_bytes());
}

/// Structural validation of a matched order pair: opposing sides, matching
/// market, positive quantities, a consistent quote quantity, and a trade
/// price inside both limits.
pub fn validate_order_pair(buy: &Order, sell: &Order, trade: &Trade) -> Result<(), EngineError> {
    if buy.side != Side::Long || sell.side != Side::Short {
        return Err(ValidationError::SameSide.into());
    }
    if buy.market != trade.market || sell.market != trade.market {
        return Err(ValidationError::MarketMismatch.into());
    }
    if !trade.base_quantity.is_positive()
        || !trade.quote_quantity.is_positive()
        || !buy.quantity.is_positive()
        || !sell.quantity.is_positive()
    {
        return Err(ValidationError::NonPositiveQuantity.into());
    }
    if trade.price.value() > buy.limit_price.value()
        || trade.price.value() < sell.limit_price.value()
    {
        return Err(ValidationError::PriceOutsideLimit.into());
    }

    let expected_quote = trade.base_quantity.mul_price(trade.price)?;
    let diff = expected_quote.checked_sub(trade.quote_quantity)?.abs();
    if diff > Pips::one_pip() {
        return Err(ValidationError::InconsistentQuoteQuantity.into());
    }
    Ok(())
}

/// Authority and time-window validation for one order: the order nonce must
/// survive every effective invalidation, and a delegated signer must be
/// covered by a matching, live, un-invalidated authorization.
pub fn validate_order_authorization(
    order: &Order,
    nonces: &NonceBook,
    now: Timestamp,
    delegated_key_expiration_ms: i64,
) -> Result<(), EngineError> {
    nonces.validate_nonce_timestamp(order.wallet, order.nonce.timestamp_ms(), now)?;

    match order.signer {
        OrderSigner::Wallet => Ok(()),
        OrderSigner::DelegatedKey(signed) => {
            let auth = order
                .delegated_key_authorization
                .as_ref()
                .ok_or(ValidationError::MissingDelegatedKeyAuthorization)?;
            if auth.wallet != order.wallet {
                return Err(ValidationError::DelegatedKeyWalletMismatch.into());
            }
            if auth.key != signed {
                return Err(ValidationError::DelegatedKeySignerMismatch {
                    signed,
                    authorized: auth.key,
                }
                .into());
            }
            let authorized_at = auth.nonce.timestamp_ms();
            let order_at = order.nonce.timestamp_ms();
            if order_at < authorized_at {
                return Err(ValidationError::DelegatedKeyNotYetValid.into());
            }
            if order_at >= authorized_at + delegated_key_expiration_ms {
                return Err(ValidationError::DelegatedKeyExpired.into());
            }
            // an effective nonce invalidation also revokes older grants
            nonces.validate_nonce_timestamp(order.wallet, authorized_at, now)?;
            Ok(())
        }
    }
}
