use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use crate::error::AccountError;

/// Account/position collaborator called by settlement.
///
/// Calls are synchronous and may block. A failed call must leave the
/// account untouched.
pub trait AccountService: Send + Sync {
    /// Buy side: open (or add to) a position. `order_cash` is the cash the
    /// order was placed for, `actual_cash` what the fill costs. Both in cents.
    fn open_position(
        &self,
        account_id: &str,
        symbol: &str,
        quantity: Decimal,
        order_cash: i64,
        actual_cash: i64,
    ) -> Result<(), AccountError>;

    /// Sell side: liquidate `quantity` of a position for `actual_cash` cents.
    fn close_position(
        &self,
        account_id: &str,
        symbol: &str,
        quantity: Decimal,
        actual_cash: i64,
    ) -> Result<(), AccountError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Position {
    pub quantity: Decimal,
    pub cost_cents: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Account {
    pub cash_cents: i64,
    pub positions: HashMap<String, Position>,
}

/// Accounts held in memory. Unknown accounts are created on first use with
/// `default_cash_cents`.
#[derive(Debug, Default)]
pub struct InMemoryAccountService {
    accounts: DashMap<String, Account>,
    default_cash_cents: i64,
}

impl InMemoryAccountService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_cash(default_cash_cents: i64) -> Self {
        Self {
            accounts: DashMap::new(),
            default_cash_cents,
        }
    }

    pub fn deposit(&self, account_id: &str, cents: i64) -> Result<(), AccountError> {
        let mut account = self
            .accounts
            .entry(account_id.to_string())
            .or_insert_with(|| self.fresh_account());
        account.cash_cents = account
            .cash_cents
            .checked_add(cents)
            .ok_or_else(|| overflow(account_id))?;
        Ok(())
    }

    pub fn set_position(&self, account_id: &str, symbol: &str, quantity: Decimal) {
        self.accounts
            .entry(account_id.to_string())
            .or_insert_with(|| self.fresh_account())
            .positions
            .entry(symbol.to_string())
            .or_default()
            .quantity = quantity;
    }

    pub fn account(&self, account_id: &str) -> Option<Account> {
        self.accounts.get(account_id).map(|a| a.clone())
    }

    pub fn position(&self, account_id: &str, symbol: &str) -> Option<Position> {
        self.accounts
            .get(account_id)
            .and_then(|a| a.positions.get(symbol).cloned())
    }

    fn fresh_account(&self) -> Account {
        Account {
            cash_cents: self.default_cash_cents,
            positions: HashMap::new(),
        }
    }
}

fn overflow(account_id: &str) -> AccountError {
    AccountError::Overflow {
        account_id: account_id.to_string(),
    }
}

impl AccountService for InMemoryAccountService {
    fn open_position(
        &self,
        account_id: &str,
        symbol: &str,
        quantity: Decimal,
        order_cash: i64,
        actual_cash: i64,
    ) -> Result<(), AccountError> {
        let insufficient = |available: i64| AccountError::InsufficientFunds {
            account_id: account_id.to_string(),
            required: actual_cash,
            available,
        };
        // The entry guard holds the shard lock, so check-then-debit is atomic.
        let mut account = match self.accounts.entry(account_id.to_string()) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(_) if self.default_cash_cents < actual_cash => {
                return Err(insufficient(self.default_cash_cents));
            }
            Entry::Vacant(entry) => entry.insert(self.fresh_account()),
        };
        if account.cash_cents < actual_cash {
            return Err(insufficient(account.cash_cents));
        }
        let held = account.positions.get(symbol).cloned().unwrap_or_default();
        let updated = Position {
            quantity: held
                .quantity
                .checked_add(quantity)
                .ok_or_else(|| overflow(account_id))?,
            cost_cents: held
                .cost_cents
                .checked_add(actual_cash)
                .ok_or_else(|| overflow(account_id))?,
        };
        account.cash_cents -= actual_cash;
        account.positions.insert(symbol.to_string(), updated);
        debug!(account_id, symbol, %quantity, order_cash, actual_cash, "position opened");
        Ok(())
    }

    fn close_position(
        &self,
        account_id: &str,
        symbol: &str,
        quantity: Decimal,
        actual_cash: i64,
    ) -> Result<(), AccountError> {
        let insufficient = || AccountError::InsufficientPosition {
            account_id: account_id.to_string(),
            symbol: symbol.to_string(),
        };
        let mut account = self.accounts.get_mut(account_id).ok_or_else(insufficient)?;
        let held = account.positions.get(symbol).cloned().unwrap_or_default();
        if held.quantity < quantity {
            return Err(insufficient());
        }

        // Cost basis is released pro rata. Dividing first keeps the product
        // within the cost itself.
        let released = if quantity == held.quantity {
            held.cost_cents
        } else {
            quantity
                .checked_div(held.quantity)
                .and_then(|ratio| ratio.checked_mul(Decimal::from(held.cost_cents)))
                .and_then(|share| share.round().to_i64())
                .ok_or_else(|| overflow(account_id))?
        };
        let cash_cents = account
            .cash_cents
            .checked_add(actual_cash)
            .ok_or_else(|| overflow(account_id))?;

        if quantity == held.quantity {
            account.positions.remove(symbol);
        } else {
            account.positions.insert(
                symbol.to_string(),
                Position {
                    quantity: held.quantity - quantity,
                    cost_cents: held.cost_cents - released,
                },
            );
        }
        account.cash_cents = cash_cents;
        debug!(account_id, symbol, %quantity, actual_cash, "position closed");
        Ok(())
    }
}
