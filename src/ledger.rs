// 2.0: the balance ledger. per-wallet, per-asset signed pip balances with a
// one-time fallback migration from a predecessor ledger. pure storage: no
// validation logic lives here, only settlement components write through it.

use crate::types::{Pips, Timestamp, Wallet, QUOTE_ASSET};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One (wallet, asset) row. Created lazily on first touch, never deleted;
/// a closed position rests at zero so its funding timestamp survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Signed quantity. For a base asset: positive = long, negative = short.
    pub quantity: Pips,
    /// Signed quote value paid to acquire the current position. Tracks the
    /// entry price as cost_basis / quantity; zero for quote-asset rows.
    pub cost_basis: Pips,
    /// Last time outstanding funding was settled into this row.
    pub last_funding_time: Timestamp,
    /// Set once the row has been materialized from the migration source.
    pub migrated: bool,
}

impl Balance {
    pub fn empty() -> Self {
        Self {
            quantity: Pips::zero(),
            cost_basis: Pips::zero(),
            last_funding_time: Timestamp::from_millis(0),
            migrated: false,
        }
    }
}

/// Read-only view of a predecessor ledger, consulted at most once per row.
pub trait BalanceMigrationSource {
    fn load_balance(&self, wallet: Wallet, asset: &str) -> Option<Balance>;
}

#[derive(Default)]
pub struct BalanceLedger {
    // wallet -> asset -> row. the inner key set doubles as the touched-asset
    // index used to find positions needing funding settlement.
    balances: HashMap<Wallet, BTreeMap<String, Balance>>,
    migration_source: Option<Box<dyn BalanceMigrationSource + Send>>,
}

impl std::fmt::Debug for BalanceLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceLedger")
            .field("balances", &self.balances)
            .field("has_migration_source", &self.migration_source.is_some())
            .finish()
    }
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_migration_source(source: Box<dyn BalanceMigrationSource + Send>) -> Self {
        Self {
            balances: HashMap::new(),
            migration_source: Some(source),
        }
    }

    /// Read a row. Falls back to the migration source when the row was never
    /// set locally; the fallback does not materialize anything.
    pub fn balance(&self, wallet: Wallet, asset: &str) -> Balance {
        if let Some(row) = self.balances.get(&wallet).and_then(|m| m.get(asset)) {
            return *row;
        }
        self.migrated_row(wallet, asset).unwrap_or_else(Balance::empty)
    }

    /// Mutable access for settlement components. Materializes the row on
    /// first touch, migrating it exactly once if a source holds it.
    pub fn balance_mut(&mut self, wallet: Wallet, asset: &str) -> &mut Balance {
        let migrated = if self
            .balances
            .get(&wallet)
            .map_or(true, |m| !m.contains_key(asset))
        {
            self.migrated_row(wallet, asset)
        } else {
            None
        };

        let row = self
            .balances
            .entry(wallet)
            .or_default()
            .entry(asset.to_string())
            .or_insert_with(Balance::empty);
        if let Some(mut source_row) = migrated {
            source_row.migrated = true;
            *row = source_row;
        }
        row
    }

    fn migrated_row(&self, wallet: Wallet, asset: &str) -> Option<Balance> {
        self.migration_source
            .as_ref()
            .and_then(|s| s.load_balance(wallet, asset))
    }

    pub fn quote_balance(&self, wallet: Wallet) -> Pips {
        self.balance(wallet, QUOTE_ASSET).quantity
    }

    /// Base symbols this wallet has ever touched, open or resting at zero.
    /// Deterministic order (the inner map is a BTreeMap).
    pub fn touched_position_symbols(&self, wallet: Wallet) -> Vec<String> {
        self.balances
            .get(&wallet)
            .map(|m| m.keys().filter(|k| *k != QUOTE_ASSET).cloned().collect())
            .unwrap_or_default()
    }

    /// Base symbols with a non-zero position.
    pub fn open_position_symbols(&self, wallet: Wallet) -> Vec<String> {
        self.balances
            .get(&wallet)
            .map(|m| {
                m.iter()
                    .filter(|(k, b)| *k != QUOTE_ASSET && !b.quantity.is_zero())
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn position(&self, wallet: Wallet, symbol: &str) -> Balance {
        self.balance(wallet, symbol)
    }

    pub fn wallets(&self) -> impl Iterator<Item = &Wallet> {
        self.balances.keys()
    }

    /// Snapshot all rows of the given wallets so a failed multi-step
    /// operation can be rolled back without partial effects.
    pub fn snapshot(&self, wallets: &[Wallet]) -> LedgerSnapshot {
        LedgerSnapshot {
            rows: wallets
                .iter()
                .map(|w| (*w, self.balances.get(w).cloned()))
                .collect(),
        }
    }

    pub fn restore(&mut self, snapshot: LedgerSnapshot) {
        for (wallet, rows) in snapshot.rows {
            match rows {
                Some(rows) => {
                    self.balances.insert(wallet, rows);
                }
                None => {
                    self.balances.remove(&wallet);
                }
            }
        }
    }
}

/// Saved wallet rows for rollback. Consumed by [`BalanceLedger::restore`].
#[derive(Debug)]
pub struct LedgerSnapshot {
    rows: Vec<(Wallet, Option<BTreeMap<String, Balance>>)>,
}

/// Apply a signed size delta acquired at `quote_cost` to a position row,
/// keeping the cost basis consistent: additions extend the basis by their
/// cost, reductions shrink it pro-rata (entry price unchanged), and a flip
/// through zero re-opens the basis from the flipping portion of the cost.
pub fn acquire_position(
    row: &mut Balance,
    delta: Pips,
    quote_cost: Pips,
) -> Result<(), crate::error::EngineError> {
    let old = row.quantity;
    let new = old.checked_add(delta)?;

    if delta.is_zero() {
        return Ok(());
    }
    if old.is_zero() || old.side() == delta.side() {
        row.cost_basis = row.cost_basis.checked_add(quote_cost)?;
    } else if new.is_zero() {
        row.cost_basis = Pips::zero();
    } else if old.side() == new.side() {
        let fraction = new.ratio(old)?;
        row.cost_basis = row.cost_basis.mul_fraction(fraction)?;
    } else {
        // flipped: only the portion of the cost past zero opens the basis
        let fraction = new.ratio(delta)?;
        row.cost_basis = quote_cost.mul_fraction(fraction)?;
    }
    row.quantity = new;
    Ok(())
}

/// [`acquire_position`] with the cost derived from a fill price.
pub fn apply_position_delta(
    row: &mut Balance,
    delta: Pips,
    price: crate::types::Price,
) -> Result<(), crate::error::EngineError> {
    let cost = delta.mul_price(price)?;
    acquire_position(row, delta, cost)
}
