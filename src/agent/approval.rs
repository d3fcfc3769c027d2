//! Confirmation workflow for gated tool calls.
//!
//! When the policy gate decides a call needs confirmation, the
//! [`ConfirmationWorkflow`] parks it under a short base62 token bound to the
//! requesting (user, chat) pair. Redeeming the token runs the capability at
//! most once; later redeems replay the cached result.
//!
//! Each token owns its own async lock. Concurrent redeems of the same token
//! serialize on it while different tokens proceed in parallel. The outer map
//! lock is sync and never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditStage};
use crate::tools::{CapabilityError, ToolDescriptor, ToolRegistry};
use crate::types::{Requester, ToolCall, ToolResponse, ToolStatus};

use super::{GateError, Sinks};

/// Length of generated confirmation tokens.
pub const CONFIRMATION_ID_LEN: usize = 12;

/// Base62 alphabet used for confirmation tokens.
const BASE62_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Message returned by a successful cancel.
const CANCELLED_MESSAGE: &str = "Confirmation cancelled.";

/// A parked call waiting for its requester.
#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    /// Token the requester must present.
    pub confirmation_id: String,
    /// The call to run once confirmed.
    pub call: ToolCall,
    /// Who may redeem or cancel the token.
    pub requester: Requester,
    /// When the token was issued.
    pub created_at: DateTime<Utc>,
    /// Deadline after which the token can no longer be redeemed.
    pub expires_at: Instant,
}

impl PendingConfirmation {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug)]
enum Slot {
    Pending(PendingConfirmation),
    Settled {
        response: ToolResponse,
        settled_at: Instant,
    },
    /// Consumed without a cached result; about to leave the map.
    Vacant,
}

type SlotHandle = Arc<tokio::sync::Mutex<Slot>>;

/// Issues, redeems and cancels confirmation tokens.
#[derive(Debug)]
pub struct ConfirmationWorkflow {
    slots: Mutex<HashMap<String, SlotHandle>>,
    ttl: Duration,
    retention: Duration,
    registry: Arc<ToolRegistry>,
    sinks: Sinks,
}

impl ConfirmationWorkflow {
    /// Create a workflow whose tokens live for `ttl` and whose settled
    /// results are kept for `retention`.
    pub(crate) fn new(
        ttl: Duration,
        retention: Duration,
        registry: Arc<ToolRegistry>,
        sinks: Sinks,
    ) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
            retention,
            registry,
            sinks,
        }
    }

    /// Token lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Park `call` and return an `awaiting_confirmation` response carrying
    /// a fresh token.
    pub fn issue(
        &self,
        tool: &ToolDescriptor,
        call: &ToolCall,
        requester: Requester,
    ) -> ToolResponse {
        let created_at = Utc::now();
        let now = Instant::now();
        let expires_at = now.checked_add(self.ttl).unwrap_or(now);

        let confirmation_id = {
            let mut slots = self.lock_slots();
            let id = loop {
                let candidate = generate_base62_id();
                if !slots.contains_key(&candidate) {
                    break candidate;
                }
            };
            let pending = PendingConfirmation {
                confirmation_id: id.clone(),
                call: call.clone(),
                requester,
                created_at,
                expires_at,
            };
            slots.insert(
                id.clone(),
                Arc::new(tokio::sync::Mutex::new(Slot::Pending(pending))),
            );
            id
        };

        if tool.is_audited() {
            self.sinks.audit(
                AuditEntry::new(
                    AuditStage::ConfirmationRequested,
                    tool,
                    requester,
                    &call.arguments,
                )
                .with_confirmation(&confirmation_id),
            );
        }
        info!(
            tool = %tool.name,
            confirmation_id = %confirmation_id,
            user_id = requester.user_id,
            chat_id = requester.chat_id,
            "confirmation requested"
        );

        let message = confirmation_prompt(tool, &confirmation_id, self.ttl);
        ToolResponse::awaiting(confirmation_id, message)
    }

    /// Redeem `confirmation_id` on behalf of `requester`.
    ///
    /// The first valid redeem runs the capability and caches its response;
    /// every later redeem returns that response marked idempotent.
    ///
    /// The capability runs on its own task holding the token's lock, so the
    /// result is settled and logged even if the caller stops waiting.
    pub async fn redeem(&self, confirmation_id: &str, requester: Requester) -> ToolResponse {
        let Some(handle) = self.slot(confirmation_id) else {
            return not_found(confirmation_id);
        };
        let mut slot = Arc::clone(&handle).lock_owned().await;

        let pending = match std::mem::replace(&mut *slot, Slot::Vacant) {
            Slot::Pending(pending) => pending,
            Slot::Settled {
                response,
                settled_at,
            } => {
                debug!(confirmation_id, "replaying settled confirmation");
                let replay = response.replayed();
                *slot = Slot::Settled {
                    response,
                    settled_at,
                };
                return replay;
            }
            Slot::Vacant => return not_found(confirmation_id),
        };

        if pending.is_expired(Instant::now()) {
            self.forget(confirmation_id, &handle);
            info!(confirmation_id, tool = %pending.call.name, "confirmation expired");
            return ToolResponse::from(&GateError::ConfirmationExpired(
                confirmation_id.to_owned(),
            ));
        }

        if pending.requester != requester {
            self.forget(confirmation_id, &handle);
            warn!(
                confirmation_id,
                tool = %pending.call.name,
                expected_user = pending.requester.user_id,
                actual_user = requester.user_id,
                "confirmation redeemed by someone else"
            );
            if let Some(tool) = self.registry.get(&pending.call.name) {
                if tool.is_audited() {
                    self.sinks.audit(
                        AuditEntry::new(
                            AuditStage::ConfirmedAccessDenied,
                            &tool,
                            requester,
                            &pending.call.arguments,
                        )
                        .with_confirmation(confirmation_id)
                        .with_error("binding_mismatch"),
                    );
                }
            }
            return ToolResponse::from(&GateError::ConfirmationBindingMismatch(
                confirmation_id.to_owned(),
            ));
        }

        let Some(tool) = self.registry.get(&pending.call.name) else {
            self.forget(confirmation_id, &handle);
            return ToolResponse::from(&GateError::NotFound(pending.call.name));
        };

        let sinks = self.sinks.clone();
        let token = confirmation_id.to_owned();
        let settle = tokio::spawn(async move {
            let response = sinks
                .run_capability(&tool, &pending.call, requester, Some(token.as_str()))
                .await;
            *slot = Slot::Settled {
                response: response.clone(),
                settled_at: Instant::now(),
            };
            response
        });

        match settle.await {
            Ok(response) => response,
            Err(e) => {
                self.forget(confirmation_id, &handle);
                warn!(confirmation_id, error = %e, "confirmed capability task failed");
                ToolResponse::from(&GateError::CapabilityFailed(CapabilityError::Failed(
                    e.to_string(),
                )))
            }
        }
    }

    /// Withdraw a pending confirmation.
    ///
    /// Only the bound requester may cancel. A settled token cannot be
    /// cancelled and keeps its cached result.
    pub async fn cancel(&self, confirmation_id: &str, requester: Requester) -> ToolResponse {
        let Some(handle) = self.slot(confirmation_id) else {
            return not_found(confirmation_id);
        };
        let mut slot = handle.lock().await;

        let pending = match &*slot {
            Slot::Pending(pending) => pending,
            Slot::Settled { .. } => {
                return ToolResponse::from(&GateError::ConfirmationSettled(
                    confirmation_id.to_owned(),
                ));
            }
            Slot::Vacant => return not_found(confirmation_id),
        };

        if pending.is_expired(Instant::now()) {
            *slot = Slot::Vacant;
            self.forget(confirmation_id, &handle);
            return ToolResponse::from(&GateError::ConfirmationExpired(
                confirmation_id.to_owned(),
            ));
        }

        if pending.requester != requester {
            warn!(confirmation_id, "cancel attempted by someone else");
            return ToolResponse::from(&GateError::ConfirmationBindingMismatch(
                confirmation_id.to_owned(),
            ));
        }

        if let Some(tool) = self.registry.get(&pending.call.name) {
            if tool.is_audited() {
                self.sinks.audit(
                    AuditEntry::new(
                        AuditStage::ConfirmationCancelled,
                        &tool,
                        requester,
                        &pending.call.arguments,
                    )
                    .with_confirmation(confirmation_id),
                );
            }
        }
        info!(confirmation_id, tool = %pending.call.name, "confirmation cancelled");

        *slot = Slot::Vacant;
        self.forget(confirmation_id, &handle);
        ToolResponse::new(ToolStatus::Denied, CANCELLED_MESSAGE)
    }

    /// Drop expired pending tokens and settled results past retention.
    ///
    /// Slots currently being redeemed are skipped. Returns how many tokens
    /// were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.lock_slots();
        let before = slots.len();
        slots.retain(|_, handle| {
            let Ok(slot) = handle.try_lock() else {
                return true;
            };
            match &*slot {
                Slot::Pending(pending) => !pending.is_expired(now),
                Slot::Settled { settled_at, .. } => {
                    now.saturating_duration_since(*settled_at) <= self.retention
                }
                Slot::Vacant => false,
            }
        });
        let removed = before.saturating_sub(slots.len());
        if removed > 0 {
            debug!(removed, "purged confirmation tokens");
        }
        removed
    }

    /// Snapshot of a token's pending call, if it is still pending.
    pub fn pending(&self, confirmation_id: &str) -> Option<PendingConfirmation> {
        let handle = self.slot(confirmation_id)?;
        let slot = handle.try_lock().ok()?;
        match &*slot {
            Slot::Pending(pending) => Some(pending.clone()),
            _ => None,
        }
    }

    /// Number of tokens still awaiting a decision.
    ///
    /// Tokens locked by an in-flight redeem or cancel are not counted.
    pub fn pending_count(&self) -> usize {
        self.lock_slots()
            .values()
            .filter(|handle| {
                handle
                    .try_lock()
                    .is_ok_and(|slot| matches!(&*slot, Slot::Pending(_)))
            })
            .count()
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, SlotHandle>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, confirmation_id: &str) -> Option<SlotHandle> {
        self.lock_slots().get(confirmation_id).cloned()
    }

    /// Remove the map entry if it still points at `handle`.
    fn forget(&self, confirmation_id: &str, handle: &SlotHandle) {
        let mut slots = self.lock_slots();
        if slots
            .get(confirmation_id)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            slots.remove(confirmation_id);
        }
    }
}

fn not_found(confirmation_id: &str) -> ToolResponse {
    ToolResponse::from(&GateError::ConfirmationNotFound(confirmation_id.to_owned()))
}

fn confirmation_prompt(tool: &ToolDescriptor, confirmation_id: &str, ttl: Duration) -> String {
    let action = if tool.options.description.is_empty() {
        tool.name.as_str()
    } else {
        tool.options.description.as_str()
    };
    format!(
        "Confirmation required: {action}\nConfirm: /confirm {confirmation_id}\n\
         Cancel: /cancel {confirmation_id}\nExpires in {} seconds.",
        ttl.as_secs()
    )
}

/// Generate a [`CONFIRMATION_ID_LEN`]-character base62 token.
fn generate_base62_id() -> String {
    let mut rng = rand::thread_rng();
    (0..CONFIRMATION_ID_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..BASE62_CHARS.len());
            char::from(BASE62_CHARS[idx])
        })
        .collect()
}
