//! Delay-guard engine
//!
//! Per-fingerprint state machine:
//!
//! ```text
//! ABSENT --check--> QUEUED --check (now >= queued_at + delay)--> CONSUMED
//!                     |  ^
//!                     +--+ check (now < queued_at + delay)
//! ```
//!
//! A consumed fingerprint is simply absent again, so the next identical
//! request starts a fresh cycle. Every check is synchronous: the caller
//! re-presents the request after the cooldown, nothing here waits.
//!
//! Read-then-write on one fingerprint runs under a per-fingerprint lock.
//! Distinct fingerprints take distinct locks and never serialize.
//!
//! A state change and its event are committed together: if the sink rejects
//! the event, the store change is undone before the error is returned.

use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::auth::{AuthorizationGate, Unauthorized};
use super::clock::Clock;
use super::events::{EventSink, GuardEvent, GuardEventKind, GuardOperation, SinkError};
use super::store::{GuardStore, StoreError};
use super::types::{Address, CheckContext, Fingerprint, SafeTransaction};
use crate::error::{Error, Result};

/// Cooldown used when none is configured: 24 hours
pub const DEFAULT_DELAY_SECS: u64 = 86_400;

/// Immutable guard configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    /// The only identity allowed to drive the guard
    pub principal: Address,

    /// Cooldown in seconds between queueing and permitting
    pub delay_secs: u64,

    /// Identity allowed to release queued entries; releases are disabled
    /// when unset
    pub administrator: Option<Address>,
}

impl GuardConfig {
    pub fn new(principal: Address) -> Self {
        Self {
            principal,
            delay_secs: DEFAULT_DELAY_SECS,
            administrator: None,
        }
    }

    pub fn with_delay(mut self, delay_secs: u64) -> Self {
        self.delay_secs = delay_secs;
        self
    }

    pub fn with_administrator(mut self, administrator: Address) -> Self {
        self.administrator = Some(administrator);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.delay_secs == 0 {
            return Err(Error::Config("delay_secs must be positive".to_string()));
        }
        if self.principal.is_zero() {
            return Err(Error::Config("principal must not be the zero address".to_string()));
        }
        if self.administrator == Some(self.principal) {
            return Err(Error::Config(
                "administrator must differ from the guarded principal".to_string(),
            ));
        }
        Ok(())
    }
}

/// Proof that a request waited out its cooldown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    /// Queue key that was consumed
    pub fingerprint: Fingerprint,

    /// Identifier to pass to [`DelayGuard::check_after_execution`]
    pub acknowledgment: Fingerprint,

    pub queued_at: u64,

    pub permitted_at: u64,
}

/// Pending entry as reported by [`DelayGuard::pending`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEntry {
    pub fingerprint: Fingerprint,
    pub queued_at: u64,
    pub ready_at: u64,
    /// Seconds left; zero once ready
    pub remaining: u64,
}

impl PendingEntry {
    pub fn is_ready(&self) -> bool {
        self.remaining == 0
    }
}

/// Why a guard call did not succeed
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Queued {fingerprint}; retry at {ready_at}")]
    Queued {
        fingerprint: Fingerprint,
        ready_at: u64,
    },

    #[error("Still locked {fingerprint}; {remaining}s remaining (ready at {ready_at})")]
    StillLocked {
        fingerprint: Fingerprint,
        ready_at: u64,
        remaining: u64,
    },

    #[error(transparent)]
    Unauthorized(#[from] Unauthorized),

    #[error("Guard store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Guard event sink failure: {0}")]
    Sink(#[from] SinkError),

    /// The event was rejected and the store change could not be undone
    #[error("Rollback failed for {fingerprint}: sink error {sink}; store error {store}")]
    RollbackFailed {
        fingerprint: Fingerprint,
        sink: SinkError,
        store: StoreError,
    },

    #[error("Administrative release is not configured")]
    ReleaseDisabled,

    #[error("No pending entry for {0}")]
    NotPending(Fingerprint),
}

impl GuardError {
    /// Expected outcome; re-present the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, GuardError::Queued { .. } | GuardError::StillLocked { .. })
    }

    /// Earliest time a retry can succeed
    pub fn ready_at(&self) -> Option<u64> {
        match self {
            GuardError::Queued { ready_at, .. } | GuardError::StillLocked { ready_at, .. } => {
                Some(*ready_at)
            }
            _ => None,
        }
    }
}

/// Per-fingerprint mutexes, dropped again once nobody holds them
///
/// The in-process mutex is taken first, then the store's own lock for the
/// key, so other processes sharing the store are excluded too.
#[derive(Default)]
struct KeyLocks {
    locks: DashMap<Fingerprint, Arc<Mutex<()>>>,
}

impl KeyLocks {
    fn with_lock<T>(
        &self,
        fingerprint: &Fingerprint,
        store: &dyn GuardStore,
        f: impl FnOnce() -> std::result::Result<T, GuardError>,
    ) -> std::result::Result<T, GuardError> {
        let handle = Arc::clone(self.locks.entry(*fingerprint).or_default().value());

        let out = {
            let _held = handle.lock().unwrap_or_else(PoisonError::into_inner);
            // `_entry` stays held until `f` returns
            store
                .lock(fingerprint)
                .map_err(GuardError::from)
                .and_then(|_entry| f())
        };

        drop(handle);
        self.locks
            .remove_if(fingerprint, |_, lock| Arc::strong_count(lock) == 1);
        out
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

/// The delay guard
pub struct DelayGuard {
    gate: AuthorizationGate,
    admin_gate: Option<AuthorizationGate>,
    delay_secs: u64,
    store: Arc<dyn GuardStore>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    locks: KeyLocks,
}

impl DelayGuard {
    pub fn new(
        config: GuardConfig,
        store: Arc<dyn GuardStore>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        info!(
            principal = %config.principal,
            delay_secs = config.delay_secs,
            release_enabled = config.administrator.is_some(),
            "Delay guard initialized"
        );

        Ok(Self {
            gate: AuthorizationGate::new(config.principal),
            admin_gate: config.administrator.map(AuthorizationGate::new),
            delay_secs: config.delay_secs,
            store,
            sink,
            clock,
            locks: KeyLocks::default(),
        })
    }

    pub fn principal(&self) -> Address {
        self.gate.principal()
    }

    pub fn delay_secs(&self) -> u64 {
        self.delay_secs
    }

    /// Pre-execution check
    ///
    /// Returns a [`Permit`] only when this exact transaction was queued at
    /// least `delay_secs` ago. Otherwise the request is queued or reported
    /// as still locked, and the action must not proceed.
    pub fn check_pending(
        &self,
        caller: &Address,
        tx: &SafeTransaction,
    ) -> std::result::Result<Permit, GuardError> {
        let fingerprint = tx.fingerprint(CheckContext::Pending);
        let now = self.clock.now();

        if let Err(denied) = self.gate.authorize(caller) {
            return Err(self.reject(denied, GuardOperation::CheckPending, Some(fingerprint), now));
        }

        self.locks
            .with_lock(&fingerprint, self.store.as_ref(), || {
                match self.store.get(&fingerprint)? {
                    None => self.enqueue(fingerprint, now),
                    Some(queued_at) => {
                        let ready_at = queued_at.saturating_add(self.delay_secs);
                        if now < ready_at {
                            self.still_locked(fingerprint, ready_at, now)
                        } else {
                            self.consume(tx, fingerprint, queued_at, now)
                        }
                    }
                }
            })
    }

    fn enqueue(&self, fingerprint: Fingerprint, now: u64) -> std::result::Result<Permit, GuardError> {
        let ready_at = now.saturating_add(self.delay_secs);

        self.store.set(&fingerprint, now)?;
        self.commit(
            GuardEvent::new(Some(fingerprint), now, GuardEventKind::Queued { ready_at }),
            || self.store.delete(&fingerprint),
        )?;

        info!(
            fingerprint = %fingerprint.short(),
            ready_at,
            "Transaction queued for cooldown"
        );
        Err(GuardError::Queued {
            fingerprint,
            ready_at,
        })
    }

    fn still_locked(
        &self,
        fingerprint: Fingerprint,
        ready_at: u64,
        now: u64,
    ) -> std::result::Result<Permit, GuardError> {
        let remaining = ready_at - now;

        self.sink.emit(&GuardEvent::new(
            Some(fingerprint),
            now,
            GuardEventKind::StillLocked {
                ready_at,
                remaining,
            },
        ))?;

        debug!(
            fingerprint = %fingerprint.short(),
            remaining,
            "Transaction still locked"
        );
        Err(GuardError::StillLocked {
            fingerprint,
            ready_at,
            remaining,
        })
    }

    fn consume(
        &self,
        tx: &SafeTransaction,
        fingerprint: Fingerprint,
        queued_at: u64,
        now: u64,
    ) -> std::result::Result<Permit, GuardError> {
        self.store.delete(&fingerprint)?;
        self.commit(
            GuardEvent::new(Some(fingerprint), now, GuardEventKind::Executed { queued_at }),
            || self.store.set(&fingerprint, queued_at),
        )?;

        info!(
            fingerprint = %fingerprint.short(),
            queued_at,
            waited_secs = now.saturating_sub(queued_at),
            "Cooldown elapsed, transaction permitted"
        );
        Ok(Permit {
            fingerprint,
            acknowledgment: tx.fingerprint(CheckContext::AfterExecution),
            queued_at,
            permitted_at: now,
        })
    }

    /// Post-execution acknowledgment
    ///
    /// Records the outcome of a permitted action. Never touches the store.
    pub fn check_after_execution(
        &self,
        caller: &Address,
        fingerprint: &Fingerprint,
        succeeded: bool,
    ) -> std::result::Result<(), GuardError> {
        let now = self.clock.now();

        if let Err(denied) = self.gate.authorize(caller) {
            return Err(self.reject(
                denied,
                GuardOperation::CheckAfterExecution,
                Some(*fingerprint),
                now,
            ));
        }

        self.sink.emit(&GuardEvent::new(
            Some(*fingerprint),
            now,
            GuardEventKind::Acknowledged { succeeded },
        ))?;

        if succeeded {
            debug!(fingerprint = %fingerprint.short(), "Execution acknowledged");
        } else {
            warn!(fingerprint = %fingerprint.short(), "Guarded execution reported failure");
        }
        Ok(())
    }

    /// List queued entries, oldest first
    ///
    /// Open to the principal and the administrator only.
    pub fn pending(&self, caller: &Address) -> std::result::Result<Vec<PendingEntry>, GuardError> {
        let now = self.clock.now();

        let allowed = self.gate.authorize(caller).or_else(|denied| {
            match &self.admin_gate {
                Some(admin) => admin.authorize(caller),
                None => Err(denied),
            }
        });
        if let Err(denied) = allowed {
            return Err(self.reject(denied, GuardOperation::ListPending, None, now));
        }

        let mut entries: Vec<PendingEntry> = self
            .store
            .entries()?
            .into_iter()
            .map(|(fingerprint, queued_at)| {
                let ready_at = queued_at.saturating_add(self.delay_secs);
                PendingEntry {
                    fingerprint,
                    queued_at,
                    ready_at,
                    remaining: ready_at.saturating_sub(now),
                }
            })
            .collect();
        entries.sort_by_key(|e| (e.queued_at, e.fingerprint));

        Ok(entries)
    }

    /// Administrative release of a queued entry before its cooldown
    ///
    /// Not part of the queue/permit protocol: it exists so abandoned
    /// proposals can be cleared instead of lingering forever. Requires the
    /// configured administrator and is audited as its own event kind.
    pub fn release(
        &self,
        caller: &Address,
        fingerprint: &Fingerprint,
    ) -> std::result::Result<u64, GuardError> {
        let now = self.clock.now();

        let Some(admin) = &self.admin_gate else {
            let denied = Unauthorized { caller: *caller };
            return match self.reject(denied, GuardOperation::Release, Some(*fingerprint), now) {
                GuardError::Sink(sink) => Err(GuardError::Sink(sink)),
                _ => Err(GuardError::ReleaseDisabled),
            };
        };

        if let Err(denied) = admin.authorize(caller) {
            return Err(self.reject(denied, GuardOperation::Release, Some(*fingerprint), now));
        }

        self.locks.with_lock(fingerprint, self.store.as_ref(), || {
            let Some(queued_at) = self.store.get(fingerprint)? else {
                self.sink.emit(&GuardEvent::new(
                    Some(*fingerprint),
                    now,
                    GuardEventKind::ReleaseNotPending { by: *caller },
                ))?;
                warn!(fingerprint = %fingerprint.short(), "Release requested for absent entry");
                return Err(GuardError::NotPending(*fingerprint));
            };

            self.store.delete(fingerprint)?;
            self.commit(
                GuardEvent::new(
                    Some(*fingerprint),
                    now,
                    GuardEventKind::Released {
                        queued_at,
                        by: *caller,
                    },
                ),
                || self.store.set(fingerprint, queued_at),
            )?;

            warn!(
                fingerprint = %fingerprint.short(),
                queued_at,
                by = %caller,
                "Queued transaction released by administrator"
            );
            Ok(queued_at)
        })
    }

    /// Emit the event for a store change that already happened, undoing the
    /// change if the sink refuses it
    fn commit(
        &self,
        event: GuardEvent,
        revert: impl FnOnce() -> std::result::Result<(), StoreError>,
    ) -> std::result::Result<(), GuardError> {
        let Err(sink) = self.sink.emit(&event) else {
            return Ok(());
        };

        // Fingerprint is always present on mutating events
        let fingerprint = event
            .fingerprint
            .unwrap_or_else(|| Fingerprint::from_bytes([0u8; 32]));

        match revert() {
            Ok(()) => {
                warn!(
                    fingerprint = %fingerprint.short(),
                    event = event.kind.name(),
                    "Event sink rejected transition, store change reverted: {}",
                    sink
                );
                Err(GuardError::Sink(sink))
            }
            Err(store) => {
                error!(
                    fingerprint = %fingerprint.short(),
                    event = event.kind.name(),
                    "Event sink rejected transition and revert failed: {} / {}",
                    sink,
                    store
                );
                Err(GuardError::RollbackFailed {
                    fingerprint,
                    sink,
                    store,
                })
            }
        }
    }

    /// Record an authorization failure and build the error to return
    ///
    /// Runs before any store access. If the sink fails too, that failure is
    /// what the caller sees.
    fn reject(
        &self,
        denied: Unauthorized,
        operation: GuardOperation,
        fingerprint: Option<Fingerprint>,
        now: u64,
    ) -> GuardError {
        warn!(caller = %denied.caller, operation = %operation, "Unauthorized guard call");

        let event = GuardEvent::new(
            fingerprint,
            now,
            GuardEventKind::Unauthorized {
                caller: denied.caller,
                operation,
            },
        );
        match self.sink.emit(&event) {
            Ok(()) => GuardError::Unauthorized(denied),
            Err(sink) => GuardError::Sink(sink),
        }
    }
}
