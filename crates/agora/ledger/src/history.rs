//! Lazy, restartable transaction history.

use std::sync::Arc;

use agora_types::Transaction;
use parking_lot::Mutex;

use crate::book::Book;

/// Iterator over one principal's transactions in append order.
///
/// Holds a handle to the live book rather than a copy; each `next` locks the
/// book briefly, so transactions appended while iterating are observed.
/// Cloning yields an independent cursor at the same position.
#[derive(Clone)]
pub struct History {
    book: Arc<Mutex<Book>>,
    cursor: usize,
}

impl History {
    pub(crate) fn new(book: Arc<Mutex<Book>>) -> Self {
        Self { book, cursor: 0 }
    }

    /// Rewind to the first transaction.
    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    /// Number of transactions already yielded.
    pub fn position(&self) -> usize {
        self.cursor
    }
}

impl Iterator for History {
    type Item = Transaction;

    fn next(&mut self) -> Option<Self::Item> {
        let tx = self.book.lock().log.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(tx)
    }
}

impl std::fmt::Debug for History {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("History")
            .field("principal", &self.book.lock().principal)
            .field("cursor", &self.cursor)
            .finish()
    }
}
