// transfer and withdrawal request payloads, with their replay fingerprints.
// both are margin-gated on the sending wallet and fee-capped; validation of
// those gates lives in the engine, this module only carries the payloads.

use crate::types::{Hash32, Nonce, Pips, Wallet};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub source: Wallet,
    pub destination: Wallet,
    /// Gross quote quantity debited from the source.
    pub gross_quantity: Pips,
    /// Fee retained by the fee wallet; destination receives gross - fee.
    pub fee: Pips,
    pub nonce: Nonce,
}

impl Transfer {
    pub fn hash(&self) -> Hash32 {
        let mut hasher = Keccak256::new();
        hasher.update(b"transfer");
        hasher.update(self.source.0.to_le_bytes());
        hasher.update(self.destination.0.to_le_bytes());
        hasher.update(self.nonce.0.to_le_bytes());
        Hash32(hasher.finalize().into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub wallet: Wallet,
    /// Gross quote quantity debited; the net paid out by custody is
    /// gross - fee.
    pub gross_quantity: Pips,
    pub fee: Pips,
    pub nonce: Nonce,
}

impl Withdrawal {
    pub fn hash(&self) -> Hash32 {
        let mut hasher = Keccak256::new();
        hasher.update(b"withdrawal");
        hasher.update(self.wallet.0.to_le_bytes());
        hasher.update(self.nonce.0.to_le_bytes());
        Hash32(hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprints_differ_by_nonce() {
        let base = Transfer {
            source: Wallet(1),
            destination: Wallet(2),
            gross_quantity: Pips::from_int(100),
            fee: Pips::zero(),
            nonce: Nonce::from_parts(1_000, 1),
        };
        let mut replay = base.clone();
        assert_eq!(base.hash(), replay.hash());
        replay.nonce = Nonce::from_parts(1_000, 2);
        assert_ne!(base.hash(), replay.hash());
    }

    #[test]
    fn transfer_and_withdrawal_domains_are_separated() {
        let transfer = Transfer {
            source: Wallet(1),
            destination: Wallet(1),
            gross_quantity: Pips::from_int(1),
            fee: Pips::zero(),
            nonce: Nonce::from_parts(5, 5),
        };
        let withdrawal = Withdrawal {
            wallet: Wallet(1),
            gross_quantity: Pips::from_int(1),
            fee: Pips::zero(),
            nonce: Nonce::from_parts(5, 5),
        };
        assert_ne!(transfer.hash(), withdrawal.hash());
    }
}
