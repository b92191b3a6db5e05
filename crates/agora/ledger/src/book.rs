//! Per-principal book: cached account aggregates plus the transaction log
//! they are folded from.

use std::collections::BTreeMap;

use agora_types::{AccountKind, AccountState, Amount, PrincipalId, Transaction, TxOp};

use crate::error::LedgerError;

/// Apply one transaction to an account aggregate.
///
/// This is the single fold step shared by the live mutation path and by
/// verification replay, so the cached state can never drift from the log by
/// construction: anything the live path commits, replay re-derives.
pub(crate) fn apply(
    state: &mut AccountState,
    op: TxOp,
    amount: Amount,
) -> Result<(), String> {
    match op {
        TxOp::Open => {
            state.balance = amount;
            if state.kind.is_quota() {
                state.limit = Some(amount);
            }
        }
        TxOp::Credit => {
            state.balance = state
                .balance
                .checked_add(amount)
                .ok_or_else(|| format!("credit of {} overflows balance {}", amount, state.balance))?;
            state.total_credited = state.total_credited.saturating_add(amount);
            if let Some(limit) = state.limit {
                if state.balance > limit {
                    state.limit = Some(state.balance);
                }
            }
        }
        TxOp::Debit => {
            state.balance = state.balance.checked_sub(amount).ok_or_else(|| {
                format!("debit of {} exceeds balance {}", amount, state.balance)
            })?;
            state.total_debited = state.total_debited.saturating_add(amount);
        }
        TxOp::Refund => {
            let balance = state
                .balance
                .checked_add(amount)
                .ok_or_else(|| format!("refund of {} overflows balance {}", amount, state.balance))?;
            if let Some(limit) = state.limit {
                if balance > limit {
                    return Err(format!("refund lifts balance {} above limit {}", balance, limit));
                }
            }
            state.balance = balance;
            state.total_credited = state.total_credited.saturating_add(amount);
        }
        TxOp::Reset { boundary } => {
            let limit = state
                .limit
                .ok_or_else(|| "reset applied to a currency account".to_string())?;
            let balance = state.balance.saturating_add(amount);
            if balance != limit {
                return Err(format!(
                    "reset to boundary {} yields {} instead of limit {}",
                    boundary, balance, limit
                ));
            }
            if state.last_reset.is_some_and(|last| last >= boundary) {
                return Err(format!("reset boundary {} is not newer than the last", boundary));
            }
            state.balance = balance;
            state.last_reset = Some(boundary);
        }
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) struct Book {
    pub principal: PrincipalId,
    pub active: bool,
    pub accounts: BTreeMap<AccountKind, AccountState>,
    pub log: Vec<Transaction>,
}

/// Sequence and tick stamped onto every transaction appended in one
/// critical section.
pub(crate) struct Stamp<'a> {
    pub next_seq: &'a dyn Fn() -> u64,
    pub tick: u64,
}

impl Book {
    pub fn new(principal: PrincipalId) -> Self {
        Self {
            principal,
            active: true,
            accounts: BTreeMap::new(),
            log: Vec::new(),
        }
    }

    pub fn account(&self, kind: &AccountKind) -> Result<&AccountState, LedgerError> {
        self.accounts.get(kind).ok_or_else(|| self.missing(kind))
    }

    pub fn missing(&self, kind: &AccountKind) -> LedgerError {
        match kind {
            AccountKind::Quota(quota) => LedgerError::UnknownQuotaKind {
                principal: self.principal.clone(),
                kind: quota.clone(),
            },
            AccountKind::Currency => LedgerError::Inconsistent {
                principal: self.principal.clone(),
                detail: "principal has no currency account".into(),
            },
        }
    }

    /// Fold `op` into the account and append the matching transaction.
    ///
    /// Callers check preconditions first; a fold failure here means the
    /// caller broke an invariant, so it surfaces as `InvalidOperation`.
    pub fn commit(
        &mut self,
        stamp: &Stamp<'_>,
        account: AccountKind,
        op: TxOp,
        amount: Amount,
        reason: &str,
    ) -> Result<(), LedgerError> {
        let state = self
            .accounts
            .entry(account.clone())
            .or_insert_with(|| AccountState::empty(account.clone()));
        apply(state, op, amount).map_err(|reason| LedgerError::InvalidOperation {
            account: account.clone(),
            reason,
        })?;
        self.log.push(Transaction {
            seq: (stamp.next_seq)(),
            principal: self.principal.clone(),
            account,
            op,
            amount,
            reason: reason.to_string(),
            tick: stamp.tick,
        });
        Ok(())
    }

    /// Re-fold the log from nothing and compare with the cached aggregates.
    pub fn verify(&self) -> Result<(), LedgerError> {
        let inconsistent = |detail: String| LedgerError::Inconsistent {
            principal: self.principal.clone(),
            detail,
        };

        let mut replay: BTreeMap<AccountKind, AccountState> = BTreeMap::new();
        let mut last_seq: Option<u64> = None;
        for tx in &self.log {
            if tx.principal != self.principal {
                return Err(inconsistent(format!(
                    "transaction {} belongs to {}",
                    tx.seq, tx.principal
                )));
            }
            if last_seq.is_some_and(|last| tx.seq <= last) {
                return Err(inconsistent(format!("sequence {} is out of order", tx.seq)));
            }
            last_seq = Some(tx.seq);

            let opened = replay.contains_key(&tx.account);
            match (tx.op, opened) {
                (TxOp::Open, true) => {
                    return Err(inconsistent(format!("{} opened twice", tx.account)))
                }
                (TxOp::Open, false) => {}
                (_, false) => {
                    return Err(inconsistent(format!(
                        "transaction {} touches unopened {}",
                        tx.seq, tx.account
                    )))
                }
                _ => {}
            }
            let state = replay
                .entry(tx.account.clone())
                .or_insert_with(|| AccountState::empty(tx.account.clone()));
            apply(state, tx.op, tx.amount)
                .map_err(|e| inconsistent(format!("transaction {}: {}", tx.seq, e)))?;
        }

        if replay != self.accounts {
            return Err(inconsistent(
                "cached balances differ from the folded transaction log".into(),
            ));
        }
        Ok(())
    }
}
