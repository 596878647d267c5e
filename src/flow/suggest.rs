//! Phantom/suggested-request advisory interface (spec §4.7's "phantom
//! requests"): given the transaction a flow step just produced and the
//! surrounding history, offer zero or more candidate follow-up requests a
//! user might want to paste into the flow next.
//!
//! This is an advisory surface only — nothing calls `suggest` and acts on
//! its output automatically; the command layer exposes it so a caller can
//! show suggestions and let a human accept one. Kept as a pluggable trait
//! because the heuristic worth shipping first (same host, recency) is
//! deliberately minimal; grounded on the teacher's `replay` module's
//! `reqwest`-based request reconstruction for what an `HTTPRequest`-shaped
//! suggestion needs to carry.

use crate::models::{HTTPRequest, HTTPTransaction};
use std::time::{Duration, Instant};

pub trait PhantomSuggester: Send + Sync {
    /// Offer candidate next requests given the transaction a step just
    /// produced (`last_tx`) and everything the flow has run so far.
    fn suggest(&self, host: &str, last_tx: &HTTPTransaction, history: &[HTTPTransaction]) -> Vec<HTTPRequest>;
}

/// Suggests re-sending the most recent distinct requests seen against the
/// same host, most recent first, capped at `MAX_SUGGESTIONS`.
pub struct SameHostRecencySuggester {
    max_suggestions: usize,
}

const MAX_SUGGESTIONS: usize = 5;

impl Default for SameHostRecencySuggester {
    fn default() -> Self {
        Self { max_suggestions: MAX_SUGGESTIONS }
    }
}

impl PhantomSuggester for SameHostRecencySuggester {
    fn suggest(&self, host: &str, last_tx: &HTTPTransaction, history: &[HTTPTransaction]) -> Vec<HTTPRequest> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();

        for tx in history.iter().rev() {
            if !tx.host.eq_ignore_ascii_case(host) || tx.id == last_tx.id {
                continue;
            }
            if !seen.insert(tx.request_dump.clone()) {
                continue;
            }
            out.push(HTTPRequest {
                host: tx.host.clone(),
                tls: tx.scheme.eq_ignore_ascii_case("https"),
                dump: tx.request_dump.clone(),
            });
            if out.len() >= self.max_suggestions {
                break;
            }
        }

        out
    }
}

/// Debounces phantom-suggestion generation so a fast-running flow doesn't
/// recompute suggestions after every single step. `forced` bypasses the
/// interval, for an explicit "suggest now" call from a user.
pub struct SuggestionRateLimiter {
    minimum_interval: Duration,
    last_refresh: Option<Instant>,
}

impl SuggestionRateLimiter {
    pub fn new(minimum_interval: Duration) -> Self {
        Self { minimum_interval, last_refresh: None }
    }

    /// Returns true if a refresh should run now, and records that instant
    /// as the new last-refresh point when it does.
    pub fn should_refresh(&mut self, forced: bool) -> bool {
        let now = Instant::now();
        let due = match self.last_refresh {
            Some(last) => now.duration_since(last) >= self.minimum_interval,
            None => true,
        };
        if forced || due {
            self.last_refresh = Some(now);
            true
        } else {
            false
        }
    }
}
