use std::sync::Arc;
use std::time::Instant;

use fnv::FnvHashMap;
use futures::channel::oneshot::Sender as OneshotSender;

use cdpmux_types::{CallId, Message, MethodCall, MethodId, Request, Response};

use crate::cmd::Deadline;
use crate::error::{CdpError, Result};
use crate::stats::DispatchStats;
use crate::subscribe::{EventHandler, EventKey, ListenerId, RawEvent, Subscriptions};

/// A submitted command that waits for its response
#[derive(Debug)]
struct PendingRequest {
    method: MethodId,
    sender: OneshotSender<Result<Response>>,
    deadline: Option<Deadline>,
}

impl PendingRequest {
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.map_or(false, |d| d.is_expired(now))
    }

    /// Counts a request whose caller stopped waiting
    fn record_abandoned(&self, stats: &DispatchStats, now: Instant) {
        if self.is_expired(now) {
            stats.record_timeout();
        } else {
            stats.record_cancelled();
        }
    }
}

/// Matches responses to the requests that caused them and routes events to
/// their listeners.
///
/// The correlator does no io, the [`Handler`](crate::Handler) feeds it the
/// frames it reads and sends the calls it returns.
#[derive(Debug)]
pub(crate) struct Correlator {
    /// The identifier of the next command, starts at 1
    next_id: usize,
    /// Commands that are waiting for a response
    pending: FnvHashMap<CallId, PendingRequest>,
    subscriptions: Subscriptions,
    stats: Arc<DispatchStats>,
}

impl Correlator {
    pub fn new(stats: Arc<DispatchStats>) -> Self {
        Self {
            next_id: 1,
            pending: Default::default(),
            subscriptions: Default::default(),
            stats,
        }
    }

    fn next_call_id(&mut self) -> CallId {
        let id = CallId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Assigns the next id to the request.
    ///
    /// If a `sender` is provided the request is tracked until its response
    /// arrives, its deadline passes or the receiver is dropped. Without a
    /// sender the call is fire and forget.
    pub fn submit(
        &mut self,
        request: Request,
        sender: Option<(OneshotSender<Result<Response>>, Option<Deadline>)>,
    ) -> MethodCall {
        let id = self.next_call_id();
        if let Some((sender, deadline)) = sender {
            self.pending.insert(
                id,
                PendingRequest {
                    method: request.method.clone(),
                    sender,
                    deadline,
                },
            );
            self.stats.set_pending(self.pending.len());
        }
        request.into_call(id)
    }

    /// Rejects a request that was submitted but could not be sent
    pub fn fail(&mut self, id: CallId, err: CdpError) {
        if let Some(req) = self.pending.remove(&id) {
            let _ = req.sender.send(Err(err));
            self.stats.set_pending(self.pending.len());
        }
    }

    /// Processes a single inbound frame
    pub fn dispatch(&mut self, frame: &str, now: Instant) {
        match serde_json::from_str::<Message>(frame) {
            Ok(Message::Response(resp)) => self.on_response(resp, now),
            Ok(Message::Event(event)) => self.on_event(&event),
            Err(err) => {
                self.stats.record_malformed_frame();
                tracing::warn!(%err, "dropping malformed frame");
                tracing::trace!(%frame, "malformed frame");
            }
        }
    }

    /// Resolves the pending request with the response's id
    pub fn on_response(&mut self, resp: Response, now: Instant) {
        let Some(req) = self.pending.remove(&resp.id) else {
            self.stats.record_unmatched_response();
            tracing::trace!(id = %resp.id, "dropping response without a pending request");
            return;
        };
        self.stats.set_pending(self.pending.len());

        if req.sender.is_canceled() || req.is_expired(now) {
            self.stats.record_unmatched_response();
            req.record_abandoned(&self.stats, now);
            tracing::debug!(id = %resp.id, method = %req.method, "dropping late response");
            return;
        }
        self.stats.record_response();
        let _ = req.sender.send(Ok(resp));
    }

    /// Invokes all listeners of the event, an event never resolves a request
    pub fn on_event(&mut self, event: &RawEvent) {
        self.stats.record_event();
        if self.subscriptions.dispatch(event, &self.stats) == 0 {
            self.stats.record_unhandled_event();
            tracing::trace!(method = %event.method, "no listener for event");
        }
    }

    pub fn subscribe(&mut self, key: EventKey, id: ListenerId, handler: Box<dyn EventHandler>) {
        tracing::debug!(%key, listener = ?id, "subscribe");
        self.subscriptions.insert(key, id, handler);
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        tracing::debug!(listener = ?id, "unsubscribe");
        self.subscriptions.remove(id)
    }

    /// Removes requests whose deadline has passed or whose caller went away.
    ///
    /// Callers that still wait receive [`CdpError::Timeout`]. Returns the
    /// number of removed requests.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let evict: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, req)| req.sender.is_canceled() || req.is_expired(now))
            .map(|(id, _)| *id)
            .collect();

        for id in &evict {
            let Some(req) = self.pending.remove(id) else {
                continue;
            };
            if req.sender.is_canceled() {
                req.record_abandoned(&self.stats, now);
                tracing::trace!(%id, method = %req.method, "evicting abandoned request");
            } else if let Some(deadline) = req.deadline {
                self.stats.record_timeout();
                tracing::debug!(
                    %id,
                    method = %req.method,
                    timeout = ?deadline.timeout,
                    "request timed out"
                );
                let _ = req.sender.send(Err(CdpError::Timeout {
                    method: req.method,
                    timeout: deadline.timeout,
                }));
            }
        }
        self.stats.set_pending(self.pending.len());
        evict.len()
    }

    /// Fails every pending request with [`CdpError::ConnectionClosed`]
    pub fn fail_all(&mut self) {
        for (id, req) in self.pending.drain() {
            tracing::debug!(%id, method = %req.method, "failing pending request");
            let _ = req.sender.send(Err(CdpError::ConnectionClosed));
        }
        self.stats.set_pending(0);
    }

    /// Removes all listeners
    pub fn clear_subscribers(&mut self) {
        self.subscriptions.clear();
    }

    /// Number of requests waiting for a response
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of registered listeners
    pub fn subscriber_len(&self) -> usize {
        self.subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::channel::oneshot;
    use serde_json::json;

    use super::*;
    use crate::subscribe::FnHandler;

    fn correlator() -> Correlator {
        Correlator::new(Arc::new(DispatchStats::default()))
    }

    fn request(method: &'static str) -> Request {
        Request::new(method.into(), json!({}))
    }

    #[test]
    fn assigns_increasing_ids() {
        let mut c = correlator();
        let ids: Vec<_> = (0..3)
            .map(|_| c.submit(request("Test.call"), None).id.value())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        // detached calls are not tracked
        assert_eq!(c.pending_len(), 0);
    }

    #[test]
    fn resolves_matching_response() {
        let mut c = correlator();
        let (tx, mut rx) = oneshot::channel();
        let call = c.submit(request("Test.echo"), Some((tx, None)));
        assert_eq!(c.pending_len(), 1);
        assert_eq!(c.stats.pending(), 1);

        c.dispatch(
            &format!(r#"{{"id":{},"result":{{"ok":true}}}}"#, call.id.value()),
            Instant::now(),
        );
        let resp = rx.try_recv().unwrap().unwrap().unwrap();
        assert_eq!(resp.id, call.id);
        assert_eq!(resp.result, Some(json!({ "ok": true })));
        assert_eq!(c.pending_len(), 0);
        assert_eq!(c.stats.responses(), 1);
        assert_eq!(c.stats.pending(), 0);
    }

    #[test]
    fn counts_unknown_responses() {
        let mut c = correlator();
        c.dispatch(r#"{"id":99,"result":{}}"#, Instant::now());
        c.dispatch("not json", Instant::now());
        let snapshot = c.stats.snapshot();
        assert_eq!(snapshot.unmatched_responses, 1);
        assert_eq!(snapshot.malformed_frames, 1);
        assert_eq!(snapshot.responses, 0);
    }

    #[test]
    fn evicts_expired_requests() {
        let mut c = correlator();
        let deadline = Deadline::after(Duration::from_millis(50));
        let now = deadline.at - Duration::from_millis(50);

        let (tx, mut rx) = oneshot::channel();
        let call = c.submit(request("Test.slow"), Some((tx, Some(deadline))));
        let (tx, rx2) = oneshot::channel();
        c.submit(request("Test.gone"), Some((tx, None)));
        drop(rx2);
        let (tx, mut rx3) = oneshot::channel();
        c.submit(request("Test.forever"), Some((tx, None)));

        assert_eq!(c.evict_expired(now), 1);
        assert_eq!(c.stats.cancelled(), 1);

        assert_eq!(c.evict_expired(deadline.at), 1);
        match rx.try_recv().unwrap().unwrap() {
            Err(CdpError::Timeout { method, timeout }) => {
                assert_eq!(method, "Test.slow");
                assert_eq!(timeout, Duration::from_millis(50));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(c.stats.timeouts(), 1);
        assert_eq!(c.pending_len(), 1);
        assert!(rx3.try_recv().unwrap().is_none());

        // a late response is dropped
        c.dispatch(
            &format!(r#"{{"id":{},"result":{{}}}}"#, call.id.value()),
            deadline.at,
        );
        assert_eq!(c.stats.unmatched_responses(), 1);
        assert_eq!(c.stats.responses(), 0);
    }

    #[test]
    fn abandoned_request_counts_as_timeout_after_deadline() {
        let mut c = correlator();
        let deadline = Deadline::after(Duration::from_millis(10));
        let (tx, rx) = oneshot::channel();
        let call = c.submit(request("Test.slow"), Some((tx, Some(deadline))));
        drop(rx);

        c.dispatch(
            &format!(r#"{{"id":{},"result":{{}}}}"#, call.id.value()),
            deadline.at + Duration::from_millis(1),
        );
        let snapshot = c.stats.snapshot();
        assert_eq!(snapshot.unmatched_responses, 1);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.cancelled, 0);
        assert_eq!(snapshot.pending, 0);
    }

    #[test]
    fn drops_response_arriving_after_deadline() {
        let mut c = correlator();
        let deadline = Deadline::after(Duration::from_millis(10));
        let (tx, mut rx) = oneshot::channel();
        let call = c.submit(request("Test.slow"), Some((tx, Some(deadline))));

        // the caller still waits but the deadline passed before eviction ran
        c.dispatch(
            &format!(r#"{{"id":{},"result":{{}}}}"#, call.id.value()),
            deadline.at,
        );
        assert!(rx.try_recv().is_err());
        let snapshot = c.stats.snapshot();
        assert_eq!(snapshot.responses, 0);
        assert_eq!(snapshot.unmatched_responses, 1);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.pending, 0);
    }

    #[test]
    fn events_never_resolve_requests() {
        let mut c = correlator();
        let (tx, mut rx) = oneshot::channel();
        c.submit(request("Test.call"), Some((tx, None)));

        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        c.subscribe(
            EventKey::new("Test", "happened"),
            ListenerId::new(1),
            Box::new(FnHandler(move |_: &RawEvent| -> Result<()> {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })),
        );

        c.dispatch(
            r#"{"method":"Test.happened","params":{"id":1}}"#,
            Instant::now(),
        );
        c.dispatch(r#"{"method":"Test.other","params":{}}"#, Instant::now());
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(rx.try_recv().unwrap().is_none());
        assert_eq!(c.pending_len(), 1);

        let snapshot = c.stats.snapshot();
        assert_eq!(snapshot.events, 2);
        assert_eq!(snapshot.unhandled_events, 1);
    }

    #[test]
    fn fails_all_on_disconnect() {
        let mut c = correlator();
        let (tx, mut rx) = oneshot::channel();
        c.submit(request("Test.call"), Some((tx, None)));
        c.fail_all();
        assert!(matches!(
            rx.try_recv().unwrap(),
            Some(Err(CdpError::ConnectionClosed))
        ));
        assert_eq!(c.stats.pending(), 0);
    }
}
