//! Per-conversation pending operations.
//!
//! A multi-step command flow ("generate → confirm → apply") parks its draft
//! here between messages. Each conversation owns one slot guarded by its own
//! mutex; the outer map is only locked long enough to find or create a slot,
//! so unrelated conversations never wait on each other. Slots that hold
//! nothing are retired from the map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// What kind of flow a pending operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Generate,
    /// Guided generation waiting for the user's supplement reply.
    Guided,
    Refine,
    Compress,
    Convert,
}

impl OperationKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Generate => "生成",
            Self::Guided => "引导生成",
            Self::Refine => "优化",
            Self::Compress => "压缩",
            Self::Convert => "格式转换",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct PendingOperation<P> {
    pub conversation_id: String,
    pub kind: OperationKind,
    pub draft_payload: P,
    pub created_at: DateTime<Utc>,
    /// Changes every time the slot is filled with a new operation. Callers
    /// that read a draft and write back later compare against it.
    pub revision: u64,
}

impl<P> PendingOperation<P> {
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("conversation already has an unconfirmed {existing} operation")]
    Conflict { existing: OperationKind },
}

/// The operation a caller read earlier is no longer the pending one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("pending operation changed since it was read")]
pub struct StaleOperation {
    /// What is pending now, if anything.
    pub current: Option<OperationKind>,
}

/// Result of [`SessionLocks::expire_if_stale`].
#[derive(Debug, Clone)]
pub enum Expiry<P> {
    /// Nothing was pending.
    Absent,
    /// Pending and younger than the threshold; left in place.
    Fresh,
    /// Pending and too old; it has been released.
    Expired(PendingOperation<P>),
}

impl<P> Expiry<P> {
    pub fn is_expired(&self) -> bool {
        matches!(self, Expiry::Expired(_))
    }
}

struct Slot<P> {
    pending: Option<PendingOperation<P>>,
    /// Persona the conversation is currently working on.
    selected_persona: Option<String>,
}

impl<P> Default for Slot<P> {
    fn default() -> Self {
        Self {
            pending: None,
            selected_persona: None,
        }
    }
}

impl<P> Slot<P> {
    fn is_idle(&self) -> bool {
        self.pending.is_none() && self.selected_persona.is_none()
    }
}

type SharedSlot<P> = Arc<Mutex<Slot<P>>>;

/// The session operation lock, generic over the draft payload.
pub struct SessionLocks<P> {
    slots: Mutex<HashMap<String, SharedSlot<P>>>,
    revisions: AtomicU64,
}

impl<P> Default for SessionLocks<P> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            revisions: AtomicU64::new(1),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic in another holder leaves plain data behind, still usable.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<P: Clone> SessionLocks<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a new pending operation. Fails if one already exists; the
    /// existing one is left untouched.
    pub fn acquire(
        &self,
        conversation_id: &str,
        kind: OperationKind,
        payload: P,
    ) -> Result<(), AcquireError> {
        let slot = self.slot(conversation_id);
        let mut guard = lock(&slot);
        if let Some(existing) = &guard.pending {
            tracing::debug!(
                conversation = conversation_id,
                existing = ?existing.kind,
                requested = ?kind,
                "Pending operation conflict"
            );
            return Err(AcquireError::Conflict {
                existing: existing.kind,
            });
        }
        guard.pending = Some(self.operation(conversation_id, kind, payload));
        tracing::debug!(conversation = conversation_id, ?kind, "Pending operation acquired");
        Ok(())
    }

    /// Put a previously released operation back, keeping its timestamp and
    /// revision. Fails if something else took the slot in the meantime.
    pub fn restore(&self, op: PendingOperation<P>) -> Result<(), AcquireError> {
        let slot = self.slot(&op.conversation_id);
        let mut guard = lock(&slot);
        if let Some(existing) = &guard.pending {
            return Err(AcquireError::Conflict {
                existing: existing.kind,
            });
        }
        tracing::debug!(conversation = %op.conversation_id, kind = ?op.kind, "Pending operation restored");
        guard.pending = Some(op);
        Ok(())
    }

    /// Explicitly replace whatever is pending. Returns the replaced operation.
    pub fn replace(
        &self,
        conversation_id: &str,
        kind: OperationKind,
        payload: P,
    ) -> Option<PendingOperation<P>> {
        let slot = self.slot(conversation_id);
        let mut guard = lock(&slot);
        let previous = guard
            .pending
            .replace(self.operation(conversation_id, kind, payload));
        if let Some(prev) = &previous {
            tracing::debug!(
                conversation = conversation_id,
                replaced = ?prev.kind,
                with = ?kind,
                "Pending operation replaced"
            );
        }
        previous
    }

    /// Replace the pending operation only if it is still the one with
    /// `expected_revision`. Returns the replaced operation.
    pub fn replace_if(
        &self,
        conversation_id: &str,
        expected_revision: u64,
        kind: OperationKind,
        payload: P,
    ) -> Result<PendingOperation<P>, StaleOperation> {
        let slot = self.slot(conversation_id);
        let outcome = {
            let mut guard = lock(&slot);
            match guard.pending.as_ref().map(|op| (op.kind, op.revision)) {
                Some((_, revision)) if revision == expected_revision => {
                    let next = self.operation(conversation_id, kind, payload);
                    guard.pending.replace(next).ok_or(StaleOperation { current: None })
                }
                current => Err(StaleOperation {
                    current: current.map(|(existing, _)| existing),
                }),
            }
        };
        drop(slot);
        match &outcome {
            Ok(prev) => tracing::debug!(
                conversation = conversation_id,
                replaced = ?prev.kind,
                with = ?kind,
                "Pending operation replaced"
            ),
            Err(stale) => {
                tracing::debug!(
                    conversation = conversation_id,
                    current = ?stale.current,
                    "Pending operation changed, replace skipped"
                );
                self.retire_if_idle(conversation_id);
            }
        }
        outcome
    }

    pub fn peek(&self, conversation_id: &str) -> Option<PendingOperation<P>> {
        let slot = self.existing(conversation_id)?;
        let guard = lock(&slot);
        guard.pending.clone()
    }

    /// Clear the pending operation and hand it to the caller.
    ///
    /// Of two concurrent callers only one receives `Some`, which is what makes
    /// confirm and cancel mutually exclusive.
    pub fn release(&self, conversation_id: &str) -> Option<PendingOperation<P>> {
        let released = {
            let slot = self.existing(conversation_id)?;
            let mut guard = lock(&slot);
            guard.pending.take()
        };
        self.retire_if_idle(conversation_id);
        released
    }

    /// Like [`release`](Self::release), but only takes the operation when
    /// `take` accepts it; otherwise it stays in place.
    pub fn release_if(
        &self,
        conversation_id: &str,
        take: impl FnOnce(&PendingOperation<P>) -> bool,
    ) -> Option<PendingOperation<P>> {
        let released = {
            let slot = self.existing(conversation_id)?;
            let mut guard = lock(&slot);
            if guard.pending.as_ref().is_some_and(take) {
                guard.pending.take()
            } else {
                None
            }
        };
        if released.is_some() {
            self.retire_if_idle(conversation_id);
        }
        released
    }

    pub fn expire_if_stale(&self, conversation_id: &str, max_age: Duration) -> Expiry<P> {
        self.expire_if_stale_at(conversation_id, max_age, Utc::now())
    }

    /// [`expire_if_stale`](Self::expire_if_stale) against an explicit clock.
    pub fn expire_if_stale_at(
        &self,
        conversation_id: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Expiry<P> {
        let outcome = {
            let Some(slot) = self.existing(conversation_id) else {
                return Expiry::Absent;
            };
            let mut guard = lock(&slot);
            let stale = guard.pending.as_ref().map(|op| op.age_at(now) >= max_age);
            match stale {
                None => Expiry::Absent,
                Some(false) => Expiry::Fresh,
                Some(true) => guard.pending.take().map_or(Expiry::Absent, Expiry::Expired),
            }
        };
        if let Expiry::Expired(op) = &outcome {
            tracing::info!(
                conversation = conversation_id,
                kind = ?op.kind,
                "Pending operation expired"
            );
            self.retire_if_idle(conversation_id);
        }
        outcome
    }

    pub fn select_persona(&self, conversation_id: &str, persona_id: &str) {
        let slot = self.slot(conversation_id);
        lock(&slot).selected_persona = Some(persona_id.to_string());
    }

    pub fn selected_persona(&self, conversation_id: &str) -> Option<String> {
        let slot = self.existing(conversation_id)?;
        let guard = lock(&slot);
        guard.selected_persona.clone()
    }

    /// Drop the selection if it points at `persona_id` (e.g. after deletion).
    pub fn clear_selection_if(&self, conversation_id: &str, persona_id: &str) {
        if let Some(slot) = self.existing(conversation_id) {
            let mut guard = lock(&slot);
            if guard.selected_persona.as_deref() == Some(persona_id) {
                guard.selected_persona = None;
            }
        }
        self.retire_if_idle(conversation_id);
    }

    /// Number of conversations currently holding a slot.
    pub fn active_slots(&self) -> usize {
        lock(&self.slots).len()
    }

    fn operation(&self, conversation_id: &str, kind: OperationKind, payload: P) -> PendingOperation<P> {
        PendingOperation {
            conversation_id: conversation_id.to_string(),
            kind,
            draft_payload: payload,
            created_at: Utc::now(),
            revision: self.revisions.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn slot(&self, conversation_id: &str) -> SharedSlot<P> {
        let mut slots = lock(&self.slots);
        slots
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    fn existing(&self, conversation_id: &str) -> Option<SharedSlot<P>> {
        lock(&self.slots).get(conversation_id).cloned()
    }

    fn retire_if_idle(&self, conversation_id: &str) {
        let mut slots = lock(&self.slots);
        let idle = match slots.get(conversation_id) {
            // Only the map holds it, so nobody can be about to fill it.
            Some(slot) => Arc::strong_count(slot) == 1 && lock(slot).is_idle(),
            None => false,
        };
        if idle {
            slots.remove(conversation_id);
        }
    }
}
