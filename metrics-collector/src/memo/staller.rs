//! Execution deduplication guard.
//!
//! Calls are identified by a normalized signature. While one caller holds the
//! in-flight marker of a signature, later callers with the same signature
//! wait in fixed ticks until the marker is released or the expiry bound is
//! reached, then re-check the cache themselves.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use regex::Regex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::StallSettings;

fn volatile_fragments() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r" object at \w+|0x[0-9a-fA-F]+").unwrap_or_else(|e| unreachable!("{e}"))
    })
}

/// Builds the dedup signature of `function` called with `args`.
///
/// Object identity fragments (`<Foo object at 0x7f..>`, raw addresses) are
/// stripped so equal calls on distinct instances agree.
#[must_use]
pub fn signature(function: &str, args: &[String]) -> String {
    let raw = format!("{function}({})", args.join(", "));
    volatile_fragments().replace_all(&raw, "").into_owned()
}

/// How a call to [`Staller::stall`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallOutcome {
    /// Nothing was in flight.
    Clear,
    /// The in-flight call finished while waiting.
    Released {
        /// Time spent waiting.
        waited: Duration,
    },
    /// The expiry bound was reached first.
    Expired {
        /// Time spent waiting.
        waited: Duration,
    },
}

/// Tracks in-flight signatures.
#[derive(Debug)]
pub struct Staller {
    running: DashMap<String, Instant>,
    expiry: Duration,
    cleanup_after: Duration,
    tick: Duration,
}

impl Default for Staller {
    fn default() -> Self {
        Self::new(&StallSettings::default())
    }
}

impl Staller {
    /// Creates a guard with the given bounds.
    #[must_use]
    pub fn new(settings: &StallSettings) -> Self {
        Self {
            running: DashMap::new(),
            expiry: settings.expiry(),
            cleanup_after: settings.cleanup_after(),
            tick: settings.tick(),
        }
    }

    /// True when `signature` is marked in flight.
    #[must_use]
    pub fn is_running(&self, signature: &str) -> bool {
        self.running.contains_key(signature)
    }

    /// Number of in-flight markers.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    fn cleanup(&self) {
        let cutoff = self.cleanup_after;
        self.running.retain(|sig, started| {
            let keep = started.elapsed() < cutoff;
            if !keep {
                warn!(signature = %sig, "Dropping abandoned in-flight marker");
            }
            keep
        });
    }

    fn refresh(&self, signature: &str) -> bool {
        match self.running.get_mut(signature) {
            Some(mut started) => {
                *started = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Waits while `signature` is in flight, at most the expiry bound.
    ///
    /// Blocks the calling thread.
    pub fn stall(&self, signature: &str) -> StallOutcome {
        self.cleanup();
        if !self.refresh(signature) {
            return StallOutcome::Clear;
        }
        debug!(signature = %signature, "Waiting for in-flight call");
        let start = Instant::now();
        loop {
            std::thread::sleep(self.tick);
            if let Some(outcome) = self.check(signature, start) {
                return outcome;
            }
        }
    }

    fn check(&self, signature: &str, start: Instant) -> Option<StallOutcome> {
        let waited = start.elapsed();
        if !self.is_running(signature) {
            return Some(StallOutcome::Released { waited });
        }
        if waited >= self.expiry {
            warn!(signature = %signature, waited_ms = waited.as_millis(), "Gave up waiting for in-flight call");
            return Some(StallOutcome::Expired { waited });
        }
        None
    }

    /// Marks `signature` in flight unless it already is.
    ///
    /// The check and the insert are one atomic step, so of two racing callers
    /// exactly one gets the marker.
    pub fn try_begin(&self, signature: &str) -> Option<InFlight<'_>> {
        self.cleanup();
        match self.running.entry(signature.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Some(InFlight {
                    staller: self,
                    signature: signature.to_string(),
                })
            }
        }
    }

    /// Marks `signature` in flight, taking over any existing marker.
    pub fn begin(&self, signature: &str) -> InFlight<'_> {
        self.running.insert(signature.to_string(), Instant::now());
        InFlight {
            staller: self,
            signature: signature.to_string(),
        }
    }
}

/// In-flight marker; released on drop.
#[derive(Debug)]
pub struct InFlight<'a> {
    staller: &'a Staller,
    signature: String,
}

impl InFlight<'_> {
    /// The marked signature.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.staller.running.remove(&self.signature);
    }
}
