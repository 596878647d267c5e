//! In-memory transaction store (spec §4.3): an append-only ordered log
//! with monotonic sequence numbers and an id→index map for O(1) lookup.
//!
//! Grounded on the teacher's `storage/transaction_store.rs` CRUD/query
//! shape, with the SQLite-backed ring buffer replaced by a plain
//! `Vec`/`HashMap` pair — persistence is an explicit Non-goal (spec §1),
//! so there is no database to keep in sync.

use crate::events::{Event, EventBus};
use crate::models::{matches, HTTPTransaction, SortColumn, SortDirection, TransactionFilter, TransactionSummary};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

struct Inner {
    transactions: Vec<HTTPTransaction>,
    index_by_id: HashMap<Uuid, usize>,
    next_seq: u64,
}

pub struct TransactionStore {
    inner: RwLock<Inner>,
    events: EventBus,
}

impl TransactionStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            inner: RwLock::new(Inner {
                transactions: Vec::new(),
                index_by_id: HashMap::new(),
                next_seq: 1,
            }),
            events,
        }
    }

    /// Assign `tx.seq_number = prev + 1`, append, and broadcast
    /// `new_transaction`. Returns the assigned sequence number.
    pub async fn append(&self, mut tx: HTTPTransaction) -> u64 {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        tx.seq_number = seq;

        let index = inner.transactions.len();
        inner.index_by_id.insert(tx.id, index);
        inner.transactions.push(tx.clone());
        drop(inner);

        self.events.publish(Event::NewTransaction(Box::new(tx)));
        seq
    }

    /// Replace an already-appended transaction in place (used when the
    /// response leg completes after the request leg was recorded).
    pub async fn update(&self, tx: HTTPTransaction) -> bool {
        let mut inner = self.inner.write().await;
        match inner.index_by_id.get(&tx.id).copied() {
            Some(idx) => {
                inner.transactions[idx] = tx.clone();
                drop(inner);
                self.events.publish(Event::NewTransaction(Box::new(tx)));
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<HTTPTransaction> {
        let inner = self.inner.read().await;
        let idx = *inner.index_by_id.get(&id)?;
        inner.transactions.get(idx).cloned()
    }

    pub async fn list_summaries(&self) -> Vec<TransactionSummary> {
        let inner = self.inner.read().await;
        let mut summaries: Vec<_> = inner.transactions.iter().map(|tx| tx.summary()).collect();
        summaries.sort_by(|a, b| b.seq_number.cmp(&a.seq_number));
        summaries
    }

    /// Summaries for everything appended strictly after `id`, newest first.
    pub async fn list_after(&self, id: Uuid) -> Vec<TransactionSummary> {
        let inner = self.inner.read().await;
        let after_seq = inner
            .index_by_id
            .get(&id)
            .and_then(|&idx| inner.transactions.get(idx))
            .map(|tx| tx.seq_number)
            .unwrap_or(0);

        let mut summaries: Vec<_> = inner
            .transactions
            .iter()
            .filter(|tx| tx.seq_number > after_seq)
            .map(|tx| tx.summary())
            .collect();
        summaries.sort_by(|a, b| b.seq_number.cmp(&a.seq_number));
        summaries
    }

    pub async fn get_metadata(&self, id: Uuid) -> Option<TransactionMetadata> {
        let tx = self.get(id).await?;
        Some(TransactionMetadata::from_transaction(&tx))
    }

    /// Apply `filter` over every summary, then stable-sort by `sort_col` in
    /// `sort_dir` (empty direction normalizes to `desc`, spec §4.3).
    pub async fn search(
        &self,
        filter: &TransactionFilter,
        sort_col: SortColumn,
        sort_dir: Option<SortDirection>,
    ) -> Vec<TransactionSummary> {
        let inner = self.inner.read().await;
        let mut matched: Vec<TransactionSummary> = inner
            .transactions
            .iter()
            .map(|tx| (tx, tx.summary()))
            .filter(|(tx, summary)| matches(tx, summary, filter))
            .map(|(_, summary)| summary)
            .collect();
        drop(inner);

        matched.sort_by(|a, b| compare_by_column(a, b, sort_col));
        if SortDirection::normalize(sort_dir) == SortDirection::Desc {
            matched.reverse();
        }
        matched
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.transactions.len()
    }
}

fn compare_by_column(a: &TransactionSummary, b: &TransactionSummary, col: SortColumn) -> std::cmp::Ordering {
    match col {
        SortColumn::Id => a.seq_number.cmp(&b.seq_number),
        SortColumn::Timestamp => a.timestamp.cmp(&b.timestamp),
        SortColumn::Method => a.method.cmp(&b.method),
        SortColumn::Url => a.url.cmp(&b.url),
        SortColumn::StatusCode => a.status_code.cmp(&b.status_code),
        SortColumn::Size => a.response_size.cmp(&b.response_size),
    }
}

/// Presence flags and chunk counts for the chunked transfer API (§4.9).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetadata {
    pub has_request: bool,
    pub has_response: bool,
    pub request_chunks: usize,
    pub response_chunks: usize,
}

impl TransactionMetadata {
    fn from_transaction(tx: &HTTPTransaction) -> Self {
        Self {
            has_request: !tx.request_dump.is_empty(),
            has_response: tx.response_dump.is_some(),
            request_chunks: crate::chunked::chunk_count(tx.request_dump.len()),
            response_chunks: tx
                .response_dump
                .as_ref()
                .map(|d| crate::chunked::chunk_count(d.len()))
                .unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HTTPTransaction;

    fn tx_with_dump(host: &str, dump: &str) -> HTTPTransaction {
        HTTPTransaction::new("https", host, 443, dump.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn seq_number_strictly_increases_across_appends() {
        let store = TransactionStore::new(EventBus::new());
        let seq_a = store.append(tx_with_dump("a.test", "GET / HTTP/1.1\r\n\r\n")).await;
        let seq_b = store.append(tx_with_dump("b.test", "GET / HTTP/1.1\r\n\r\n")).await;
        assert!(seq_a < seq_b);
    }

    #[tokio::test]
    async fn list_summaries_are_newest_first() {
        let store = TransactionStore::new(EventBus::new());
        store.append(tx_with_dump("first.test", "GET / HTTP/1.1\r\n\r\n")).await;
        store.append(tx_with_dump("second.test", "GET / HTTP/1.1\r\n\r\n")).await;

        let summaries = store.list_summaries().await;
        assert_eq!(summaries.len(), 2);
        assert!(summaries[0].seq_number > summaries[1].seq_number);
    }

    #[tokio::test]
    async fn list_after_excludes_transactions_up_to_and_including_the_given_id() {
        let store = TransactionStore::new(EventBus::new());
        let first = tx_with_dump("first.test", "GET / HTTP/1.1\r\n\r\n");
        let first_id = first.id;
        store.append(first).await;
        store.append(tx_with_dump("second.test", "GET / HTTP/1.1\r\n\r\n")).await;

        let after = store.list_after(first_id).await;
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].url, "https://second.test/");
    }

    #[tokio::test]
    async fn search_filters_and_sorts() {
        let store = TransactionStore::new(EventBus::new());
        store.append(tx_with_dump("zzz.test", "GET / HTTP/1.1\r\n\r\n")).await;
        store.append(tx_with_dump("aaa.test", "GET / HTTP/1.1\r\n\r\n")).await;

        let results = store
            .search(&TransactionFilter::default(), SortColumn::Url, Some(SortDirection::Asc))
            .await;
        assert_eq!(results[0].url, "https://aaa.test/");
        assert_eq!(results[1].url, "https://zzz.test/");
    }
}
