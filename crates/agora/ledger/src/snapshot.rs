use agora_types::{AccountState, PrincipalId, Transaction};
use serde::{Deserialize, Serialize};

/// Serializable copy of the entire ledger.
///
/// Principals are sorted by id and accounts by kind, so two snapshots of the
/// same state compare equal and serialize identically.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub next_seq: u64,
    pub tick: u64,
    pub principals: Vec<PrincipalSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalSnapshot {
    pub id: PrincipalId,
    pub active: bool,
    pub accounts: Vec<AccountState>,
    pub transactions: Vec<Transaction>,
}

impl LedgerSnapshot {
    pub fn principal(&self, id: &PrincipalId) -> Option<&PrincipalSnapshot> {
        self.principals.iter().find(|p| &p.id == id)
    }

    pub fn transaction_count(&self) -> usize {
        self.principals.iter().map(|p| p.transactions.len()).sum()
    }
}
