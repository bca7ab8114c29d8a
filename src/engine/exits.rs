// engine/exits.rs: two-phase wallet self-exit. phase one flags the wallet
// (deposits blocked at once, trading and ordinary withdrawal blocked once
// effective); phase two force-closes all remaining exposure to the exit
// fund and releases the positive quote remainder. the flag clears only
// after the finalization delay has fully elapsed.

use super::liquidations::ClosurePricing;
use super::Engine;
use crate::error::{EngineError, StateError};
use crate::events::{
    EventPayload, WalletExitClearedEvent, WalletExitInitiatedEvent, WalletExitWithdrawnEvent,
};
use crate::exit::{ExitPricing, ExitRecord};
use crate::types::{Pips, SignerKey, Wallet, QUOTE_ASSET};
use log::info;

impl Engine {
    /// Wallet self-service: set the exit flag. Deposits are blocked
    /// immediately; trading and ordinary withdrawal once effective.
    pub fn exit_wallet(&mut self, wallet: Wallet) -> Result<(), EngineError> {
        if self.exits.contains_key(&wallet) {
            return Err(StateError::WalletExited(wallet).into());
        }
        let record = ExitRecord::new(self.current_time, self.config.propagation_delay_ms);
        let effective_at = record.effective_at;
        self.exits.insert(wallet, record);

        info!("exit initiated: wallet={wallet:?} effective_at={effective_at}");
        self.emit_event(EventPayload::WalletExitInitiated(WalletExitInitiatedEvent {
            wallet,
            effective_at,
        }));
        Ok(())
    }

    /// Phase two: deterministic forced close-out. Transfers all remaining
    /// exposure to the exit fund at exit/bankruptcy pricing and releases
    /// any positive remaining quote balance to the wallet via custody.
    pub fn withdraw_exit(&mut self, operator: SignerKey, wallet: Wallet) -> Result<Pips, EngineError> {
        self.require_operator(operator)?;
        let record = *self
            .exits
            .get(&wallet)
            .ok_or(StateError::WalletNotExited(wallet))?;
        if !record.withdraw_allowed(self.current_time, self.config.withdrawal_release_delay_ms) {
            return Err(StateError::ExitDelayNotElapsed(wallet).into());
        }

        let fund = self.config.exit_fund_wallet;
        let snapshot = self.ledger.snapshot(&[wallet, fund]);
        let result = (|| -> Result<Pips, EngineError> {
            self.settle_all_funding(wallet)?;
            self.settle_all_funding(fund)?;
            for symbol in self.ledger.open_position_symbols(wallet) {
                self.settle_funding_for(fund, &symbol)?;
            }

            let pricing = self.resolve_exit_pricing(wallet)?;
            let plan = self.closure_plan(
                wallet,
                match pricing {
                    ExitPricing::ExitPrice => ClosurePricing::Exit,
                    ExitPricing::BankruptcyPrice => ClosurePricing::Bankruptcy,
                },
            )?;

            let max_sizes: Vec<(String, Pips)> = plan
                .iter()
                .map(|(symbol, _, _)| {
                    self.registry
                        .get(symbol)
                        .map(|m| (symbol.clone(), m.max_position_size))
                })
                .collect::<Result<_, _>>()?;

            for (symbol, _, quote_quantity) in &plan {
                self.close_position_to(wallet, fund, symbol, *quote_quantity)?;
            }
            if pricing == ExitPricing::BankruptcyPrice && !plan.is_empty() {
                self.settle_rounding_dust(wallet, fund, plan.len())?;
            }
            // the exit fund absorbs with no margin check, but its per-market
            // capacity still binds
            for (symbol, max_size) in &max_sizes {
                self.validate_fund_position_capacity(fund, symbol, *max_size)?;
            }

            // release whatever positive quote value remains
            let remaining = self.ledger.quote_balance(wallet);
            let released = if remaining.is_positive() {
                self.ledger.balance_mut(wallet, QUOTE_ASSET).quantity = Pips::zero();
                remaining
            } else {
                Pips::zero()
            };

            info!("exit withdrawn: wallet={wallet:?} released={released}");
            self.emit_event(EventPayload::WalletExitWithdrawn(WalletExitWithdrawnEvent {
                wallet,
                released,
                pricing,
            }));
            Ok(released)
        })();
        if result.is_err() {
            self.ledger.restore(snapshot);
        }
        result
    }

    /// Clear the exit flag once the finalization delay has fully elapsed,
    /// re-enabling normal participation.
    pub fn clear_wallet_exit(&mut self, wallet: Wallet) -> Result<(), EngineError> {
        let record = *self
            .exits
            .get(&wallet)
            .ok_or(StateError::WalletNotExited(wallet))?;
        if !record.clear_allowed(self.current_time, self.config.finalization_delay_ms) {
            return Err(StateError::ExitDelayNotElapsed(wallet).into());
        }
        self.exits.remove(&wallet);

        info!("exit cleared: wallet={wallet:?}");
        self.emit_event(EventPayload::WalletExitCleared(WalletExitClearedEvent {
            wallet,
        }));
        Ok(())
    }

    /// Wallet self-service: append a nonce invalidation. It becomes
    /// effective after the propagation delay; orders already in flight
    /// still settle in the window.
    pub fn invalidate_nonce(
        &mut self,
        wallet: Wallet,
        nonce: crate::types::Nonce,
    ) -> Result<(), EngineError> {
        let record = self.nonces.invalidate(
            wallet,
            nonce,
            self.current_time,
            self.config.propagation_delay_ms,
        )?;
        self.emit_event(EventPayload::NonceInvalidated(
            crate::events::NonceInvalidatedEvent {
                wallet,
                nonce_timestamp: record.nonce_timestamp,
                effective_at: record.effective_at,
            },
        ));
        Ok(())
    }
}
