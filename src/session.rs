//! Outstanding-request bookkeeping for the signaling session.

use crate::request::{RequestError, ResponseSender};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use tokio::task::AbortHandle;
use vertocore::requests::ModifyAction;
use vertocore::types::CallId;
use vertocore::{MessageId, Method};

/// What to do with the response once it arrives.
#[derive(Debug)]
pub(crate) enum Purpose {
    /// Consumer request; the response goes back through the channel.
    User(ResponseSender),
    KeepAlive,
    Login,
    Invite(CallId),
    Answer(CallId),
    Modify(CallId, ModifyAction),
    Bye(CallId),
}

impl Purpose {
    fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::Invite(id) | Self::Answer(id) | Self::Modify(id, _) | Self::Bye(id) => Some(id),
            Self::User(_) | Self::KeepAlive | Self::Login => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub id: MessageId,
    pub method: Method,
    pub purpose: Purpose,
    pub issued_at: DateTime<Utc>,
    timer: Option<AbortHandle>,
}

impl PendingRequest {
    /// Completes a consumer request. Internal purposes are left to the caller
    /// and returned unchanged.
    pub fn complete(self, outcome: Result<Value, RequestError>) -> Option<Purpose> {
        match self.purpose {
            Purpose::User(tx) => {
                if tx.send(outcome).is_err() {
                    debug!(
                        target: "Verto/Session",
                        "Response for {} ({}) dropped, caller went away", self.id, self.method
                    );
                }
                None
            }
            other => Some(other),
        }
    }
}

/// Tracks requests awaiting a response, keyed by correlation id.
#[derive(Debug, Default)]
pub(crate) struct SignalingSession {
    pending: HashMap<MessageId, PendingRequest>,
    session_id: Option<String>,
}

impl SignalingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: MessageId,
        method: Method,
        purpose: Purpose,
        timer: Option<AbortHandle>,
    ) {
        let request = PendingRequest {
            id: id.clone(),
            method,
            purpose,
            issued_at: Utc::now(),
            timer,
        };
        if let Some(previous) = self.pending.insert(id, request) {
            warn!(
                target: "Verto/Session",
                "Replaced pending request with duplicate id {}", previous.id
            );
            release(previous).complete(Err(RequestError::InternalChannelClosed));
        }
    }

    /// Removes the pending request for `id` and releases its timer.
    pub fn take(&mut self, id: &MessageId) -> Option<PendingRequest> {
        self.pending.remove(id).map(release)
    }

    #[cfg(test)]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.pending.contains_key(id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Fails every consumer request with `ConnectionLost` and drops the rest.
    pub fn fail_all(&mut self) -> usize {
        let count = self.pending.len();
        for (_, request) in self.pending.drain() {
            let request = release(request);
            let age = Utc::now().signed_duration_since(request.issued_at);
            debug!(
                target: "Verto/Session",
                "Failing {} ({}) after {}ms", request.id, request.method, age.num_milliseconds()
            );
            request.complete(Err(RequestError::ConnectionLost));
        }
        count
    }

    /// Drops the internal requests issued on behalf of `call_id`.
    pub fn cancel_for_call(&mut self, call_id: &CallId) {
        self.pending.retain(|_, request| {
            if request.purpose.call_id() == Some(call_id) {
                if let Some(timer) = request.timer.take() {
                    timer.abort();
                }
                false
            } else {
                true
            }
        });
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn set_session_id(&mut self, session_id: Option<String>) {
        self.session_id = session_id;
    }
}

fn release(mut request: PendingRequest) -> PendingRequest {
    if let Some(timer) = request.timer.take() {
        timer.abort();
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::oneshot;

    #[test]
    fn test_take_removes_request() {
        let mut session = SignalingSession::new();
        let id = MessageId::from("a-1");
        session.register(id.clone(), Method::Ping, Purpose::KeepAlive, None);
        assert!(session.contains(&id));
        let taken = session.take(&id).unwrap();
        assert_eq!(taken.method, Method::Ping);
        assert!(session.take(&id).is_none());
        assert_eq!(session.len(), 0);
    }

    #[test]
    fn test_complete_routes_to_caller() {
        let mut session = SignalingSession::new();
        let (tx, mut rx) = oneshot::channel();
        let id = MessageId::from("a-2");
        session.register(id.clone(), Method::Echo, Purpose::User(tx), None);

        let leftover = session.take(&id).unwrap().complete(Ok(json!({"k": "v"})));
        assert!(leftover.is_none());
        assert_eq!(rx.try_recv().unwrap(), Ok(json!({"k": "v"})));
    }

    #[test]
    fn test_internal_purpose_is_returned() {
        let mut session = SignalingSession::new();
        let call_id = CallId::generate();
        let id = MessageId::from("a-3");
        session.register(id.clone(), Method::Invite, Purpose::Invite(call_id), None);
        match session.take(&id).unwrap().complete(Ok(Value::Null)) {
            Some(Purpose::Invite(c)) => assert_eq!(c, call_id),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fail_all_reports_connection_lost() {
        let mut session = SignalingSession::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        session.register("a".into(), Method::Echo, Purpose::User(tx1), None);
        session.register("b".into(), Method::Echo, Purpose::User(tx2), None);
        session.register("c".into(), Method::Ping, Purpose::KeepAlive, None);

        assert_eq!(session.fail_all(), 3);
        assert_eq!(session.len(), 0);
        assert_eq!(rx1.try_recv().unwrap(), Err(RequestError::ConnectionLost));
        assert_eq!(rx2.try_recv().unwrap(), Err(RequestError::ConnectionLost));
    }

    #[test]
    fn test_cancel_for_call_leaves_other_requests() {
        let mut session = SignalingSession::new();
        let call = CallId::generate();
        let other = CallId::generate();
        session.register("1".into(), Method::Invite, Purpose::Invite(call), None);
        session.register(
            "2".into(),
            Method::Modify,
            Purpose::Modify(call, ModifyAction::Hold),
            None,
        );
        session.register("3".into(), Method::Invite, Purpose::Invite(other), None);
        session.register("4".into(), Method::Ping, Purpose::KeepAlive, None);

        session.cancel_for_call(&call);
        assert_eq!(session.len(), 2);
        assert!(session.contains(&"3".into()));
        assert!(session.contains(&"4".into()));
    }

    #[tokio::test]
    async fn test_take_aborts_timer() {
        let mut session = SignalingSession::new();
        let timer = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        });
        let id = MessageId::from("t-1");
        session.register(id.clone(), Method::Ping, Purpose::KeepAlive, Some(timer.abort_handle()));
        session.take(&id);
        assert!(timer.await.unwrap_err().is_cancelled());
    }
}
