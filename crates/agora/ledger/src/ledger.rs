//! The ledger: a concurrent map of per-principal books.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agora_types::{
    AccountKind, AccountState, Amount, PrincipalId, QuotaKind, QuotaReset, TxOp,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::book::{Book, Stamp};
use crate::error::LedgerError;
use crate::history::History;
use crate::snapshot::{LedgerSnapshot, PrincipalSnapshot};

/// Authoritative record of every principal's balances.
///
/// Lock order is always quiesce gate, then map shard, then book. The shard
/// guard is dropped before a book is locked, so a long critical section on
/// one principal never stalls lookups for another.
#[derive(Debug)]
pub struct Ledger {
    books: DashMap<PrincipalId, Arc<Mutex<Book>>>,
    next_seq: AtomicU64,
    tick: AtomicU64,
    /// Mutations hold the read side; `snapshot` takes the write side so it
    /// observes no half-applied reservation.
    quiesce: RwLock<()>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            books: DashMap::new(),
            next_seq: AtomicU64::new(1),
            tick: AtomicU64::new(0),
            quiesce: RwLock::new(()),
        }
    }

    /// Tick stamped onto transactions appended from now on.
    pub fn set_tick(&self, tick: u64) {
        self.tick.store(tick, Ordering::SeqCst);
    }

    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    /// Create a principal with its starting scrip and quota allotments.
    pub fn open_principal(
        &self,
        principal: PrincipalId,
        starting_scrip: Amount,
        quotas: &BTreeMap<QuotaKind, Amount>,
    ) -> Result<(), LedgerError> {
        let _guard = self.quiesce.read();
        match self.books.entry(principal.clone()) {
            Entry::Occupied(_) => Err(LedgerError::DuplicatePrincipal(principal)),
            Entry::Vacant(slot) => {
                let next = || self.allocate_seq();
                let stamp = Stamp {
                    next_seq: &next,
                    tick: self.tick(),
                };
                let mut book = Book::new(principal.clone());
                book.commit(
                    &stamp,
                    AccountKind::Currency,
                    TxOp::Open,
                    starting_scrip,
                    "open",
                )?;
                for (kind, limit) in quotas {
                    book.commit(
                        &stamp,
                        AccountKind::Quota(kind.clone()),
                        TxOp::Open,
                        *limit,
                        "open",
                    )?;
                }
                slot.insert(Arc::new(Mutex::new(book)));
                info!(
                    principal = %principal,
                    scrip = %starting_scrip,
                    quotas = quotas.len(),
                    "Principal opened"
                );
                Ok(())
            }
        }
    }

    /// Subtract `amount` from one account. Rejects, never clamps.
    ///
    /// Returns the new balance.
    pub fn debit(
        &self,
        principal: &PrincipalId,
        account: &AccountKind,
        amount: Amount,
        reason: &str,
    ) -> Result<Amount, LedgerError> {
        self.with_book(principal, |book, stamp| {
            debit_book(book, stamp, principal, &[(account.clone(), amount)], reason)?;
            Ok(book.account(account)?.balance)
        })
    }

    /// Debit several accounts of one principal atomically: either every
    /// charge is applied or none is.
    pub fn debit_all(
        &self,
        principal: &PrincipalId,
        charges: &[(AccountKind, Amount)],
        reason: &str,
    ) -> Result<(), LedgerError> {
        self.with_book(principal, |book, stamp| {
            debit_book(book, stamp, principal, charges, reason)
        })
    }

    /// Debit up to `amount`, charging only what is available.
    ///
    /// The one explicit floor-clamp in the ledger; used when a post-hoc cost
    /// exceeds what the principal can still pay. Returns the amount charged.
    pub fn debit_available(
        &self,
        principal: &PrincipalId,
        account: &AccountKind,
        amount: Amount,
        reason: &str,
    ) -> Result<Amount, LedgerError> {
        self.with_book(principal, |book, stamp| {
            let available = book.account(account)?.balance;
            let charged = amount.min(available);
            if !charged.is_zero() {
                book.commit(stamp, account.clone(), TxOp::Debit, charged, reason)?;
            }
            if charged < amount {
                warn!(
                    principal = %principal,
                    account = %account,
                    requested = %amount,
                    charged = %charged,
                    "Debit clamped to available balance"
                );
            }
            Ok(charged)
        })
    }

    /// Unconditionally add `amount`. Returns the new balance.
    pub fn credit(
        &self,
        principal: &PrincipalId,
        account: &AccountKind,
        amount: Amount,
        reason: &str,
    ) -> Result<Amount, LedgerError> {
        self.with_book(principal, |book, stamp| {
            book.account(account)?;
            if !amount.is_zero() {
                book.commit(stamp, account.clone(), TxOp::Credit, amount, reason)?;
            }
            Ok(book.account(account)?.balance)
        })
    }

    /// Return a prior reservation. Quota refunds stop at the limit.
    ///
    /// Returns the amount actually refunded.
    pub fn refund(
        &self,
        principal: &PrincipalId,
        account: &AccountKind,
        amount: Amount,
        reason: &str,
    ) -> Result<Amount, LedgerError> {
        self.refund_all(principal, &[(account.clone(), amount)], reason)
            .map(|refunded| refunded.into_iter().map(|(_, amount)| amount).sum())
    }

    /// Refund several accounts of one principal in a single critical section.
    pub fn refund_all(
        &self,
        principal: &PrincipalId,
        refunds: &[(AccountKind, Amount)],
        reason: &str,
    ) -> Result<Vec<(AccountKind, Amount)>, LedgerError> {
        self.with_book(principal, |book, stamp| {
            for (kind, _) in refunds {
                book.account(kind)?;
            }
            let mut applied = Vec::with_capacity(refunds.len());
            for (kind, amount) in refunds {
                let state = book.account(kind)?;
                let effective = match state.limit {
                    Some(limit) => (*amount).min(limit.saturating_sub(state.balance)),
                    None => *amount,
                };
                if !effective.is_zero() {
                    book.commit(stamp, kind.clone(), TxOp::Refund, effective, reason)?;
                }
                applied.push((kind.clone(), effective));
            }
            Ok(applied)
        })
    }

    /// Restore a quota to its limit for a reset boundary.
    ///
    /// Idempotent per boundary: returns `false` when the boundary (or a later
    /// one) was already applied.
    pub fn apply_reset(&self, reset: &QuotaReset) -> Result<bool, LedgerError> {
        self.with_book(&reset.principal, |book, stamp| {
            let account = AccountKind::Quota(reset.kind.clone());
            let state = book.account(&account)?;
            if state
                .last_reset
                .is_some_and(|last| last >= reset.boundary)
            {
                return Ok(false);
            }
            let limit = state.limit.unwrap_or(state.balance);
            let restore = limit.saturating_sub(state.balance);
            book.commit(
                stamp,
                account,
                TxOp::Reset {
                    boundary: reset.boundary,
                },
                restore,
                "quota reset",
            )?;
            debug!(
                principal = %reset.principal,
                kind = %reset.kind,
                boundary = reset.boundary,
                restored = %restore,
                "Quota reset applied"
            );
            Ok(true)
        })
    }

    /// Current balance of one account.
    pub fn balance(
        &self,
        principal: &PrincipalId,
        account: &AccountKind,
    ) -> Result<Amount, LedgerError> {
        self.account(principal, account).map(|state| state.balance)
    }

    /// Copy of one account's aggregate.
    pub fn account(
        &self,
        principal: &PrincipalId,
        account: &AccountKind,
    ) -> Result<AccountState, LedgerError> {
        let book = self.book(principal)?;
        let book = book.lock();
        book.account(account).cloned()
    }

    /// All accounts of a principal, currency first.
    pub fn accounts(&self, principal: &PrincipalId) -> Result<Vec<AccountState>, LedgerError> {
        let book = self.book(principal)?;
        let book = book.lock();
        Ok(book.accounts.values().cloned().collect())
    }

    /// Known principals in id order.
    pub fn principals(&self) -> Vec<PrincipalId> {
        let mut ids: Vec<PrincipalId> = self.books.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, principal: &PrincipalId) -> bool {
        self.books.contains_key(principal)
    }

    pub fn is_active(&self, principal: &PrincipalId) -> Result<bool, LedgerError> {
        Ok(self.book(principal)?.lock().active)
    }

    /// Mark a principal inactive; the scheduler and gateway skip it from now on.
    pub fn deactivate(&self, principal: &PrincipalId) -> Result<(), LedgerError> {
        let _guard = self.quiesce.read();
        let book = self.book(principal)?;
        let mut book = book.lock();
        if book.active {
            book.active = false;
            info!(principal = %principal, "Principal deactivated");
        }
        Ok(())
    }

    /// Lazy, restartable iterator over a principal's transactions.
    pub fn history(&self, principal: &PrincipalId) -> Result<History, LedgerError> {
        Ok(History::new(self.book(principal)?))
    }

    /// Total transactions across every principal.
    pub fn transaction_count(&self) -> usize {
        self.books.iter().map(|e| e.value().lock().log.len()).sum()
    }

    /// Re-fold every principal's log and compare against the cached balances.
    pub fn verify(&self) -> Result<(), LedgerError> {
        for principal in self.principals() {
            let book = self.book(&principal)?;
            let book = book.lock();
            book.verify()?;
        }
        Ok(())
    }

    /// Consistent copy of the whole ledger.
    ///
    /// Waits for in-flight mutations to finish and blocks new ones while the
    /// copy is taken.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let _guard = self.quiesce.write();
        let mut books: Vec<(PrincipalId, Arc<Mutex<Book>>)> = self
            .books
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        books.sort_by(|a, b| a.0.cmp(&b.0));

        let principals = books
            .into_iter()
            .map(|(id, book)| {
                let book = book.lock();
                PrincipalSnapshot {
                    id,
                    active: book.active,
                    accounts: book.accounts.values().cloned().collect(),
                    transactions: book.log.clone(),
                }
            })
            .collect();

        LedgerSnapshot {
            next_seq: self.next_seq.load(Ordering::SeqCst),
            tick: self.tick(),
            principals,
        }
    }

    /// Rebuild a ledger from a snapshot, verifying every book before use.
    pub fn restore(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        let ledger = Ledger::new();
        let mut max_seq = 0u64;

        for principal in snapshot.principals {
            let mut book = Book::new(principal.id.clone());
            book.active = principal.active;
            for state in principal.accounts {
                book.accounts.insert(state.kind.clone(), state);
            }
            book.log = principal.transactions;
            book.verify()?;
            if let Some(last) = book.log.last() {
                max_seq = max_seq.max(last.seq);
            }

            match ledger.books.entry(principal.id.clone()) {
                Entry::Occupied(_) => return Err(LedgerError::DuplicatePrincipal(principal.id)),
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(Mutex::new(book)));
                }
            }
        }

        if snapshot.next_seq <= max_seq {
            return Err(LedgerError::Inconsistent {
                principal: PrincipalId::new("<ledger>"),
                detail: format!(
                    "next sequence {} does not follow recorded sequence {}",
                    snapshot.next_seq, max_seq
                ),
            });
        }
        ledger.next_seq.store(snapshot.next_seq, Ordering::SeqCst);
        ledger.set_tick(snapshot.tick);
        info!(
            principals = ledger.books.len(),
            tick = snapshot.tick,
            "Ledger restored"
        );
        Ok(ledger)
    }

    fn allocate_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    fn book(&self, principal: &PrincipalId) -> Result<Arc<Mutex<Book>>, LedgerError> {
        self.books
            .get(principal)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| LedgerError::UnknownPrincipal(principal.clone()))
    }

    /// Run a mutation inside the principal's critical section.
    fn with_book<R>(
        &self,
        principal: &PrincipalId,
        f: impl FnOnce(&mut Book, &Stamp<'_>) -> Result<R, LedgerError>,
    ) -> Result<R, LedgerError> {
        let _guard = self.quiesce.read();
        let book = self.book(principal)?;
        let mut book = book.lock();
        let next = || self.allocate_seq();
        let stamp = Stamp {
            next_seq: &next,
            tick: self.tick(),
        };
        f(&mut book, &stamp)
    }
}

/// Check every merged charge against its balance, then commit them all.
fn debit_book(
    book: &mut Book,
    stamp: &Stamp<'_>,
    principal: &PrincipalId,
    charges: &[(AccountKind, Amount)],
    reason: &str,
) -> Result<(), LedgerError> {
    // Merge repeated kinds so one account is checked against the sum.
    let mut merged: BTreeMap<&AccountKind, Amount> = BTreeMap::new();
    for (kind, amount) in charges {
        let total = merged.entry(kind).or_insert(Amount::ZERO);
        *total = total.saturating_add(*amount);
    }

    for (kind, amount) in &merged {
        let state = book.account(kind)?;
        if state.balance < *amount {
            return Err(LedgerError::InsufficientBalance {
                principal: principal.clone(),
                account: (*kind).clone(),
                requested: *amount,
                available: state.balance,
            });
        }
    }

    for (kind, amount) in merged {
        if !amount.is_zero() {
            book.commit(stamp, kind.clone(), TxOp::Debit, amount, reason)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_types::Transaction;
    use proptest::prelude::*;

    fn quotas(compute: u64, disk: u64) -> BTreeMap<QuotaKind, Amount> {
        let mut quotas = BTreeMap::new();
        quotas.insert(QuotaKind::compute(), Amount::whole(compute));
        quotas.insert(QuotaKind::disk(), Amount::whole(disk));
        quotas
    }

    fn ledger_with(id: &str, scrip: u64) -> (Ledger, PrincipalId) {
        let ledger = Ledger::new();
        let principal = PrincipalId::new(id);
        ledger
            .open_principal(principal.clone(), Amount::whole(scrip), &quotas(1000, 10_000))
            .unwrap();
        (ledger, principal)
    }

    fn compute() -> AccountKind {
        AccountKind::Quota(QuotaKind::compute())
    }

    #[test]
    fn debit_reduces_balance_and_records_transaction() {
        let (ledger, p) = ledger_with("test_agent", 100);
        let balance = ledger
            .debit(&p, &AccountKind::Currency, Amount::whole(7), "llm call")
            .unwrap();
        assert_eq!(balance, Amount::whole(93));

        let last: Transaction = ledger.history(&p).unwrap().last().unwrap();
        assert_eq!(last.op, TxOp::Debit);
        assert_eq!(last.amount, Amount::whole(7));
        assert_eq!(last.reason, "llm call");
    }

    #[test]
    fn overdraft_rejected_without_side_effects() {
        let (ledger, p) = ledger_with("a", 5);
        let before = ledger.history(&p).unwrap().count();
        let err = ledger
            .debit(&p, &AccountKind::Currency, Amount::whole(6), "too much")
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                principal: p.clone(),
                account: AccountKind::Currency,
                requested: Amount::whole(6),
                available: Amount::whole(5),
            }
        );
        assert_eq!(ledger.balance(&p, &AccountKind::Currency).unwrap(), Amount::whole(5));
        assert_eq!(ledger.history(&p).unwrap().count(), before);
    }

    #[test]
    fn debit_all_is_all_or_nothing() {
        let (ledger, p) = ledger_with("a", 100);
        let charges = [
            (AccountKind::Currency, Amount::whole(10)),
            (compute(), Amount::whole(2000)),
        ];
        assert!(matches!(
            ledger.debit_all(&p, &charges, "reserve"),
            Err(LedgerError::InsufficientBalance { .. })
        ));
        assert_eq!(ledger.balance(&p, &AccountKind::Currency).unwrap(), Amount::whole(100));
        assert_eq!(ledger.balance(&p, &compute()).unwrap(), Amount::whole(1000));
    }

    #[test]
    fn unknown_principal_and_quota_kind() {
        let (ledger, p) = ledger_with("a", 1);
        let ghost = PrincipalId::new("ghost");
        assert_eq!(
            ledger.balance(&ghost, &AccountKind::Currency).unwrap_err(),
            LedgerError::UnknownPrincipal(ghost.clone())
        );
        assert!(matches!(
            ledger.debit(&p, &AccountKind::quota("gpu"), Amount::whole(1), "x"),
            Err(LedgerError::UnknownQuotaKind { .. })
        ));
    }

    #[test]
    fn duplicate_principal_rejected() {
        let (ledger, p) = ledger_with("a", 1);
        assert_eq!(
            ledger
                .open_principal(p.clone(), Amount::ZERO, &BTreeMap::new())
                .unwrap_err(),
            LedgerError::DuplicatePrincipal(p)
        );
    }

    #[test]
    fn refund_restores_exactly_and_caps_quota() {
        let (ledger, p) = ledger_with("a", 100);
        ledger
            .debit_all(
                &p,
                &[(AccountKind::Currency, Amount::whole(7)), (compute(), Amount::whole(50))],
                "reserve",
            )
            .unwrap();
        ledger
            .refund_all(
                &p,
                &[(AccountKind::Currency, Amount::whole(7)), (compute(), Amount::whole(50))],
                "failed call",
            )
            .unwrap();
        assert_eq!(ledger.balance(&p, &AccountKind::Currency).unwrap(), Amount::whole(100));
        assert_eq!(ledger.balance(&p, &compute()).unwrap(), Amount::whole(1000));

        let refunded = ledger.refund(&p, &compute(), Amount::whole(5), "extra").unwrap();
        assert_eq!(refunded, Amount::ZERO);
        assert_eq!(ledger.balance(&p, &compute()).unwrap(), Amount::whole(1000));
    }

    #[test]
    fn reset_is_idempotent_per_boundary() {
        let (ledger, p) = ledger_with("a", 100);
        ledger.debit(&p, &compute(), Amount::whole(400), "work").unwrap();
        let reset = QuotaReset {
            principal: p.clone(),
            kind: QuotaKind::compute(),
            boundary: 2,
        };
        assert!(ledger.apply_reset(&reset).unwrap());
        ledger.debit(&p, &compute(), Amount::whole(100), "more").unwrap();
        assert!(!ledger.apply_reset(&reset).unwrap());
        assert_eq!(ledger.balance(&p, &compute()).unwrap(), Amount::whole(900));

        let next = QuotaReset { boundary: 3, ..reset };
        assert!(ledger.apply_reset(&next).unwrap());
        assert_eq!(ledger.balance(&p, &compute()).unwrap(), Amount::whole(1000));
        ledger.verify().unwrap();
    }

    #[test]
    fn debit_available_clamps_explicitly() {
        let (ledger, p) = ledger_with("a", 3);
        let charged = ledger
            .debit_available(&p, &AccountKind::Currency, Amount::whole(5), "post-hoc")
            .unwrap();
        assert_eq!(charged, Amount::whole(3));
        assert_eq!(ledger.balance(&p, &AccountKind::Currency).unwrap(), Amount::ZERO);
    }

    #[test]
    fn history_is_restartable_and_stamped_with_tick() {
        let (ledger, p) = ledger_with("a", 10);
        ledger.set_tick(4);
        ledger.credit(&p, &AccountKind::Currency, Amount::whole(1), "grant").unwrap();

        let mut history = ledger.history(&p).unwrap();
        let first: Vec<_> = history.by_ref().collect();
        assert_eq!(first.last().unwrap().tick, 4);
        assert!(history.next().is_none());
        history.restart();
        assert_eq!(history.count(), first.len());
    }

    #[test]
    fn snapshot_restore_preserves_state() {
        let (ledger, p) = ledger_with("a", 100);
        ledger.debit(&p, &AccountKind::Currency, Amount::whole(7), "x").unwrap();
        ledger.deactivate(&p).unwrap();
        let snapshot = ledger.snapshot();

        let restored = Ledger::restore(snapshot.clone()).unwrap();
        assert_eq!(restored.snapshot(), snapshot);
        assert!(!restored.is_active(&p).unwrap());

        // Sequence numbers continue after the restored log.
        restored.credit(&p, &AccountKind::Currency, Amount::whole(1), "y").unwrap();
        let seqs: Vec<u64> = restored.history(&p).unwrap().map(|tx| tx.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn restore_rejects_tampered_balance() {
        let (ledger, _) = ledger_with("a", 100);
        let mut snapshot = ledger.snapshot();
        snapshot.principals[0].accounts[0].balance = Amount::whole(1_000_000);
        assert!(Ledger::restore(snapshot).unwrap_err().is_fatal());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_debits_never_overdraw() {
        let (ledger, p) = ledger_with("contended", 50);
        let ledger = Arc::new(ledger);

        let mut handles = Vec::new();
        for _ in 0..100 {
            let ledger = Arc::clone(&ledger);
            let p = p.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .debit(&p, &AccountKind::Currency, Amount::whole(1), "race")
                    .is_ok()
            }));
        }
        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 50);
        assert_eq!(ledger.balance(&p, &AccountKind::Currency).unwrap(), Amount::ZERO);
        ledger.verify().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_debits_report_their_own_balance() {
        let (ledger, p) = ledger_with("contended", 50);
        let ledger = Arc::new(ledger);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let ledger = Arc::clone(&ledger);
            let p = p.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .debit(&p, &AccountKind::Currency, Amount::whole(1), "race")
                    .unwrap()
            }));
        }
        let mut reported = Vec::new();
        for handle in handles {
            reported.push(handle.await.unwrap());
        }
        reported.sort();

        // Each debit sees exactly the balance it left behind.
        let expected: Vec<Amount> = (0..50).map(Amount::whole).collect();
        assert_eq!(reported, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn snapshots_never_observe_half_applied_reservations() {
        let ledger = Arc::new(Ledger::new());
        let ids: Vec<PrincipalId> = ["a", "b", "c"].into_iter().map(|id| PrincipalId::new(id)).collect();
        for id in &ids {
            ledger
                .open_principal(id.clone(), Amount::whole(1000), &quotas(1000, 1000))
                .unwrap();
        }
        let charges = vec![
            (AccountKind::Currency, Amount::whole(3)),
            (compute(), Amount::whole(1)),
        ];

        let mut workers = Vec::new();
        for id in ids.iter().cloned() {
            for _ in 0..2 {
                let ledger = Arc::clone(&ledger);
                let id = id.clone();
                let charges = charges.clone();
                workers.push(tokio::spawn(async move {
                    for _ in 0..200 {
                        ledger.debit_all(&id, &charges, "reserve").unwrap();
                        tokio::task::yield_now().await;
                        ledger.refund_all(&id, &charges, "release").unwrap();
                    }
                }));
            }
        }

        let observer = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                for _ in 0..100 {
                    let snapshot = ledger.snapshot();
                    for principal in &snapshot.principals {
                        let balance = |kind: &AccountKind| {
                            principal
                                .accounts
                                .iter()
                                .find(|a| &a.kind == kind)
                                .map(|a| a.balance)
                                .unwrap()
                        };
                        let held_scrip = Amount::whole(1000).saturating_sub(balance(&AccountKind::Currency));
                        let held_compute = Amount::whole(1000).saturating_sub(balance(&compute()));
                        assert_eq!(held_scrip, held_compute.saturating_mul(3), "{}", principal.id);
                    }
                    Ledger::restore(snapshot).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        for worker in workers {
            worker.await.unwrap();
        }
        observer.await.unwrap();

        for id in &ids {
            assert_eq!(ledger.balance(id, &AccountKind::Currency).unwrap(), Amount::whole(1000));
            assert_eq!(ledger.balance(id, &compute()).unwrap(), Amount::whole(1000));
        }
        ledger.verify().unwrap();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Debit(u64),
        Credit(u64),
        Refund(u64),
        Reset,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..300).prop_map(Op::Debit),
            (0u64..100).prop_map(Op::Credit),
            (0u64..300).prop_map(Op::Refund),
            Just(Op::Reset),
        ]
    }

    proptest! {
        #[test]
        fn balances_always_equal_folded_log(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let (ledger, p) = ledger_with("p", 100);
            let account = compute();
            for (i, op) in ops.iter().enumerate() {
                let _ = match op {
                    Op::Debit(n) => ledger.debit(&p, &account, Amount::whole(*n), "d").map(|_| ()),
                    Op::Credit(n) => ledger.credit(&p, &AccountKind::Currency, Amount::whole(*n), "c").map(|_| ()),
                    Op::Refund(n) => ledger.refund(&p, &account, Amount::whole(*n), "r").map(|_| ()),
                    Op::Reset => ledger
                        .apply_reset(&QuotaReset { principal: p.clone(), kind: QuotaKind::compute(), boundary: i as u64 })
                        .map(|_| ()),
                };
                let state = ledger.account(&p, &account).unwrap();
                prop_assert!(state.balance <= state.limit.unwrap());
            }
            prop_assert!(ledger.verify().is_ok());

            let folded: i128 = ledger
                .history(&p)
                .unwrap()
                .filter(|tx| tx.account == AccountKind::Currency)
                .map(|tx| tx.delta())
                .sum();
            let balance = ledger.balance(&p, &AccountKind::Currency).unwrap();
            prop_assert_eq!(folded, i128::from(balance.micros()));
        }
    }
}
