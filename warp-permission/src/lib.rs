//! Permission request lifecycle: creation, coalescing, response, expiry
//! sweep (spec §4.4).
//!
//! Mirrors the teacher's lock-service typestate: `pending` is the only
//! non-terminal state, and a decided request rejects any further decision.

use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use warp_core::{
    PermissionError, PermissionRequest, PermissionRequestId, PermissionState, PermissionTier,
    SessionId, Timestamp, UserId,
};

/// Hard upper bound on how long any caller may await a permission decision,
/// independent of the request's own `expiresAt` (§5).
pub const MAX_AWAIT: Duration = Duration::from_secs(600);

/// Interval between expiry sweeps (§4.4).
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Terminal outcome of a permission request, delivered to every waiter.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub state: PermissionState,
    pub reason: Option<String>,
}

/// A caller's handle on an in-flight (or just-coalesced) permission
/// request. Cloning the manager's internal receiver lets multiple callers
/// coalesced onto the same request all observe its resolution.
pub struct PermissionAwaitable {
    receiver: watch::Receiver<Option<Resolution>>,
}

impl PermissionAwaitable {
    /// Block until the request is decided, expires, or is cancelled. If
    /// none of those happen within [`MAX_AWAIT`], forces an `expired`
    /// resolution rather than hanging forever (§5).
    pub async fn wait(mut self) -> Resolution {
        let wait_for_change = async {
            loop {
                if let Some(resolution) = self.receiver.borrow().clone() {
                    return resolution;
                }
                if self.receiver.changed().await.is_err() {
                    return Resolution {
                        state: PermissionState::Cancelled,
                        reason: None,
                    };
                }
            }
        };

        match tokio::time::timeout(MAX_AWAIT, wait_for_change).await {
            Ok(resolution) => resolution,
            Err(_) => Resolution {
                state: PermissionState::Expired,
                reason: Some("exceeded the maximum permission wait".to_string()),
            },
        }
    }
}

/// Filter applied to `listPending` (§4.4). `None` fields match anything.
#[derive(Debug, Clone, Default)]
pub struct PendingFilter {
    pub session_id: Option<SessionId>,
    pub user_id: Option<UserId>,
}

impl PendingFilter {
    fn matches(&self, request: &PermissionRequest) -> bool {
        self.session_id.map(|id| id == request.session_id).unwrap_or(true)
            && self.user_id.map(|id| id == request.user_id).unwrap_or(true)
    }
}

struct Entry {
    request: PermissionRequest,
    resolver: watch::Sender<Option<Resolution>>,
}

/// Serialize `details` with sorted keys so two semantically-identical
/// requests coalesce regardless of field insertion order (§4.4). Default
/// `serde_json::Map` is already key-sorted (no `preserve_order` feature),
/// so a plain `to_string` is the canonical form.
fn canonicalize_details(details: &serde_json::Map<String, serde_json::Value>) -> String {
    serde_json::to_string(details).unwrap_or_default()
}

/// Tracks every permission request for the lifetime of the process,
/// coalescing duplicates and sweeping expirations (§4.4).
pub struct PermissionManager {
    requests: DashMap<PermissionRequestId, Entry>,
    default_ttl: Duration,
}

impl PermissionManager {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            requests: DashMap::new(),
            default_ttl,
        }
    }

    /// Create a permission request, or coalesce onto an existing pending
    /// one in the same session matching `(operation, canonicalized
    /// details)` (§4.4).
    pub fn create(
        &self,
        user_id: UserId,
        session_id: SessionId,
        operation: impl Into<String>,
        details: serde_json::Map<String, serde_json::Value>,
        tier: PermissionTier,
        now: Timestamp,
    ) -> (PermissionRequestId, PermissionAwaitable) {
        let operation = operation.into();
        let canonical = canonicalize_details(&details);

        for entry in self.requests.iter() {
            let request = &entry.value().request;
            if request.session_id == session_id
                && request.operation == operation
                && request.state == PermissionState::Pending
                && canonicalize_details(&request.details) == canonical
            {
                tracing::debug!(request_id = ?request.id, %operation, "coalescing onto pending permission request");
                return (
                    request.id,
                    PermissionAwaitable {
                        receiver: entry.value().resolver.subscribe(),
                    },
                );
            }
        }

        let id = PermissionRequestId::now_v7();
        let request = PermissionRequest {
            id,
            user_id,
            session_id,
            operation,
            details,
            tier,
            state: PermissionState::Pending,
            created_at: now,
            decided_at: None,
            expires_at: now
                + chrono::Duration::from_std(self.default_ttl)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            reason: None,
        };
        let (sender, receiver) = watch::channel(None);
        self.requests.insert(id, Entry { request, resolver: sender });

        (id, PermissionAwaitable { receiver })
    }

    /// Resolve a pending request as `granted` or `denied`.
    pub fn respond(
        &self,
        id: PermissionRequestId,
        granted: bool,
        reason: Option<String>,
        now: Timestamp,
    ) -> Result<(), PermissionError> {
        let mut entry = self.requests.get_mut(&id).ok_or(PermissionError::NotFound(id))?;
        if entry.request.state != PermissionState::Pending {
            return Err(PermissionError::AlreadyDecided(id));
        }

        let state = if granted {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        };
        entry.request.state = state;
        entry.request.decided_at = Some(now);
        entry.request.reason = reason.clone();
        let _ = entry.resolver.send(Some(Resolution { state, reason }));
        Ok(())
    }

    /// Cancel a pending request (e.g. the owning session terminated).
    pub fn cancel(&self, id: PermissionRequestId, now: Timestamp) -> Result<(), PermissionError> {
        let mut entry = self.requests.get_mut(&id).ok_or(PermissionError::NotFound(id))?;
        if entry.request.state != PermissionState::Pending {
            return Err(PermissionError::AlreadyDecided(id));
        }
        entry.request.state = PermissionState::Cancelled;
        entry.request.decided_at = Some(now);
        let _ = entry.resolver.send(Some(Resolution {
            state: PermissionState::Cancelled,
            reason: None,
        }));
        Ok(())
    }

    pub fn list_pending(&self, filter: &PendingFilter) -> Vec<PermissionRequest> {
        self.requests
            .iter()
            .map(|entry| entry.value().request.clone())
            .filter(|request| request.state == PermissionState::Pending && filter.matches(request))
            .collect()
    }

    /// Transition every pending request whose `expires_at` has elapsed to
    /// `expired`, waking their waiters. Returns how many were expired.
    pub fn sweep(&self, now: Timestamp) -> usize {
        let mut expired = 0;
        for mut entry in self.requests.iter_mut() {
            if entry.request.state == PermissionState::Pending && now >= entry.request.expires_at {
                entry.request.state = PermissionState::Expired;
                entry.request.decided_at = Some(now);
                let _ = entry.resolver.send(Some(Resolution {
                    state: PermissionState::Expired,
                    reason: None,
                }));
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::debug!(expired, "swept expired permission requests");
        }
        expired
    }

    /// Run the background expiry sweep until `cancellation` fires (§4.4).
    /// Intended to be spawned once per process via `tokio::spawn`.
    pub async fn run_sweep_loop(&self, cancellation: CancellationToken) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = interval.tick() => {
                    self.sweep(chrono::Utc::now());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn details() -> serde_json::Map<String, serde_json::Value> {
        match json!({ "amount": 100, "currency": "usd" }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn respond_granted_resolves_waiter() {
        let manager = PermissionManager::new(Duration::from_secs(300));
        let (id, awaitable) = manager.create(
            UserId::now_v7(),
            SessionId::now_v7(),
            "payment",
            details(),
            PermissionTier::Critical,
            Utc::now(),
        );

        let handle = tokio::spawn(awaitable.wait());
        manager.respond(id, true, Some("ok".to_string()), Utc::now()).unwrap();

        let resolution = handle.await.unwrap();
        assert_eq!(resolution.state, PermissionState::Granted);
        assert_eq!(resolution.reason, Some("ok".to_string()));
    }

    #[test]
    fn second_respond_is_rejected() {
        let manager = PermissionManager::new(Duration::from_secs(300));
        let (id, _) = manager.create(
            UserId::now_v7(),
            SessionId::now_v7(),
            "payment",
            details(),
            PermissionTier::Critical,
            Utc::now(),
        );
        manager.respond(id, true, None, Utc::now()).unwrap();
        let err = manager.respond(id, false, None, Utc::now()).unwrap_err();
        assert!(matches!(err, PermissionError::AlreadyDecided(_)));
    }

    #[test]
    fn duplicate_create_coalesces_by_operation_and_details() {
        let manager = PermissionManager::new(Duration::from_secs(300));
        let session_id = SessionId::now_v7();
        let user_id = UserId::now_v7();
        let (first, _) = manager.create(user_id, session_id, "payment", details(), PermissionTier::Critical, Utc::now());
        let (second, _) = manager.create(user_id, session_id, "payment", details(), PermissionTier::Critical, Utc::now());
        assert_eq!(first, second);
        assert_eq!(manager.list_pending(&PendingFilter::default()).len(), 1);
    }

    #[test]
    fn different_details_do_not_coalesce() {
        let manager = PermissionManager::new(Duration::from_secs(300));
        let session_id = SessionId::now_v7();
        let user_id = UserId::now_v7();
        let other = match json!({ "amount": 200, "currency": "usd" }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        let (first, _) = manager.create(user_id, session_id, "payment", details(), PermissionTier::Critical, Utc::now());
        let (second, _) = manager.create(user_id, session_id, "payment", other, PermissionTier::Critical, Utc::now());
        assert_ne!(first, second);
    }

    #[test]
    fn sweep_expires_past_deadline_requests() {
        let manager = PermissionManager::new(Duration::from_secs(300));
        let (id, _) = manager.create(
            UserId::now_v7(),
            SessionId::now_v7(),
            "payment",
            details(),
            PermissionTier::Critical,
            Utc::now() - chrono::Duration::seconds(301),
        );
        let expired = manager.sweep(Utc::now());
        assert_eq!(expired, 1);
        let pending = manager.list_pending(&PendingFilter::default());
        assert!(pending.iter().all(|r| r.id != id));
    }

    #[tokio::test]
    async fn cancel_resolves_waiter_as_cancelled() {
        let manager = PermissionManager::new(Duration::from_secs(300));
        let (id, awaitable) = manager.create(
            UserId::now_v7(),
            SessionId::now_v7(),
            "booking",
            details(),
            PermissionTier::Sensitive,
            Utc::now(),
        );
        let handle = tokio::spawn(awaitable.wait());
        manager.cancel(id, Utc::now()).unwrap();
        let resolution = handle.await.unwrap();
        assert_eq!(resolution.state, PermissionState::Cancelled);
    }

    #[test]
    fn list_pending_filters_by_session() {
        let manager = PermissionManager::new(Duration::from_secs(300));
        let session_a = SessionId::now_v7();
        let session_b = SessionId::now_v7();
        manager.create(UserId::now_v7(), session_a, "payment", details(), PermissionTier::Critical, Utc::now());
        manager.create(UserId::now_v7(), session_b, "payment", details(), PermissionTier::Critical, Utc::now());

        let filter = PendingFilter { session_id: Some(session_a), user_id: None };
        assert_eq!(manager.list_pending(&filter).len(), 1);
    }
}
