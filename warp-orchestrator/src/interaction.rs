//! Interaction stage: routes an inbound `user_response` to whichever
//! suspended step is waiting on it (spec §4.7).
//!
//! A session only ever has one outstanding question, but the hub is keyed
//! by `QuestionId` rather than session so a caller never has to worry about
//! stale answers crossing turns.

use dashmap::DashMap;
use tokio::sync::oneshot;
use warp_core::{InteractionError, QuestionId};

/// Registers waiters for outstanding `user_query` steps and routes inbound
/// answers to them. Registration must happen before the corresponding
/// `user_question` message is emitted to the client, so a reply that
/// arrives immediately after can never race ahead of the registration.
#[derive(Default)]
pub struct InteractionHub {
    waiters: DashMap<QuestionId, oneshot::Sender<serde_json::Value>>,
}

impl InteractionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new question, returning the receiver half the caller
    /// awaits for the user's answer.
    pub fn register(&self, question_id: QuestionId) -> oneshot::Receiver<serde_json::Value> {
        let (sender, receiver) = oneshot::channel();
        self.waiters.insert(question_id, sender);
        receiver
    }

    /// Deliver an inbound `user_response` to its registered waiter.
    /// Consumes the registration either way: a send that fails because the
    /// waiter was dropped (the step it belonged to already gave up) is not
    /// retried.
    pub fn route_user_response(
        &self,
        question_id: QuestionId,
        content: serde_json::Value,
    ) -> Result<(), InteractionError> {
        let (_, sender) = self
            .waiters
            .remove(&question_id)
            .ok_or(InteractionError::UnroutedQuestion(question_id))?;
        let _ = sender.send(content);
        Ok(())
    }

    /// Drop a registration without routing anything, e.g. the session was
    /// cancelled while a question was outstanding.
    pub fn cancel(&self, question_id: QuestionId) {
        self.waiters.remove(&question_id);
    }

    pub fn is_pending(&self, question_id: QuestionId) -> bool {
        self.waiters.contains_key(&question_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registered_waiter_receives_routed_answer() {
        let hub = InteractionHub::new();
        let question_id = QuestionId::now_v7();
        let receiver = hub.register(question_id);

        hub.route_user_response(question_id, json!("Tokyo")).unwrap();

        assert_eq!(receiver.await.unwrap(), json!("Tokyo"));
    }

    #[test]
    fn routing_unregistered_question_is_an_error() {
        let hub = InteractionHub::new();
        let err = hub.route_user_response(QuestionId::now_v7(), json!("x")).unwrap_err();
        assert!(matches!(err, InteractionError::UnroutedQuestion(_)));
    }

    #[test]
    fn routing_twice_fails_the_second_time() {
        let hub = InteractionHub::new();
        let question_id = QuestionId::now_v7();
        hub.register(question_id);
        hub.route_user_response(question_id, json!("first")).unwrap();
        let err = hub.route_user_response(question_id, json!("second")).unwrap_err();
        assert!(matches!(err, InteractionError::UnroutedQuestion(_)));
    }

    #[test]
    fn cancel_removes_pending_registration() {
        let hub = InteractionHub::new();
        let question_id = QuestionId::now_v7();
        hub.register(question_id);
        assert!(hub.is_pending(question_id));
        hub.cancel(question_id);
        assert!(!hub.is_pending(question_id));
    }
}
