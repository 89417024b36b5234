use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use futures::StreamExt;
use serde_json::{json, Value};

use cdpmux::cdp::browser_protocol::network::{EnableParams, GetCookiesParams};
use cdpmux::cdp::browser_protocol::page::{EventLoadEventFired, NavigateParams};
use cdpmux::{memory, CdpError, HandlerConfig, MemoryPeer, RawEvent, ResponseMode, Session};

fn config() -> HandlerConfig {
    HandlerConfig::builder()
        .eviction_interval(Duration::from_millis(10))
        .build()
        .unwrap()
}

/// Creates a session whose handler runs in the background
fn setup(config: HandlerConfig) -> (Session, MemoryPeer) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let (transport, peer) = memory();
    let (session, mut handler) = Session::new(transport, config);
    tokio::spawn(async move { while handler.next().await.is_some() {} });
    (session, peer)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

fn event(method: &str, params: Value) -> String {
    json!({ "method": method, "params": params }).to_string()
}

#[tokio::test]
async fn echoes_command() {
    let (session, mut peer) = setup(config());

    let (resp, ()) = tokio::join!(session.send("Test.echo", json!({ "x": 1 })), async {
        let req = peer.next_json().await.unwrap().unwrap();
        assert_eq!(req["id"], json!(1));
        assert_eq!(req["method"], json!("Test.echo"));
        assert!(req.get("sessionId").is_none());
        let resp = json!({ "id": req["id"], "result": req["params"] });
        peer.push(resp.to_string()).unwrap();
    });

    assert_eq!(resp.unwrap(), json!({ "x": 1 }));
    let stats = session.stats().snapshot();
    assert_eq!(stats.responses, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn drops_late_response_after_timeout() {
    let (session, mut peer) = setup(config());

    let (res, req) = tokio::join!(
        session.execute_with_timeout(
            NavigateParams::new("https://example.com"),
            Duration::from_millis(50)
        ),
        peer.next_json()
    );
    match res {
        Err(CdpError::Timeout { method, timeout }) => {
            assert_eq!(method, "Page.navigate");
            assert_eq!(timeout, Duration::from_millis(50));
        }
        other => panic!("unexpected {:?}", other),
    }

    let req = req.unwrap().unwrap();
    let late = json!({ "id": req["id"], "result": { "frameId": "F1" } });
    peer.push(late.to_string()).unwrap();

    eventually(|| session.stats().unmatched_responses() == 1).await;
    let stats = session.stats().snapshot();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.responses, 0);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn timed_out_future_ignores_late_response() {
    // eviction does not run before the late response arrives
    let config = HandlerConfig::builder()
        .eviction_interval(Duration::from_secs(10))
        .build()
        .unwrap();
    let (session, mut peer) = setup(config);

    let mut fut = session
        .command_future(
            &NavigateParams::new("https://example.com"),
            Some(Duration::from_millis(50)),
        )
        .unwrap();
    let (res, req) = tokio::join!(&mut fut, peer.next_json());
    assert!(matches!(res, Err(CdpError::Timeout { .. })));

    // the future outlives its timeout
    let req = req.unwrap().unwrap();
    let late = json!({ "id": req["id"], "result": { "frameId": "F1" } });
    peer.push(late.to_string()).unwrap();

    eventually(|| session.stats().unmatched_responses() == 1).await;
    let stats = session.stats().snapshot();
    assert_eq!(stats.responses, 0);
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.pending, 0);
    drop(fut);
}

#[tokio::test]
async fn invokes_listeners_in_registration_order() {
    let (session, peer) = setup(config());
    let calls = Arc::new(Mutex::new(Vec::new()));

    for name in ["first", "second"] {
        let calls = Arc::clone(&calls);
        let _subscription = session
            .subscribe("Page", "loadEventFired", move |ev: &RawEvent| {
                calls.lock().unwrap().push((name, ev.params["timestamp"].clone()));
                Ok(())
            })
            .unwrap();
    }

    peer.push(event("Page.loadEventFired", json!({ "timestamp": 1.0 })))
        .unwrap();
    peer.push(event("Page.loadEventFired", json!({ "timestamp": 2.0 })))
        .unwrap();
    peer.push(event("Page.domContentEventFired", json!({ "timestamp": 3.0 })))
        .unwrap();

    eventually(|| session.stats().events() == 3).await;
    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            ("first", json!(1.0)),
            ("second", json!(1.0)),
            ("first", json!(2.0)),
            ("second", json!(2.0)),
        ]
    );
    assert_eq!(session.stats().unhandled_events(), 1);
}

#[tokio::test]
async fn resolves_out_of_order_responses() {
    let (session, mut peer) = setup(config());

    let calls = (0..20).map(|n| session.send(format!("Test.call{}", n), json!({ "n": n })));
    let responder = async {
        let mut requests = Vec::new();
        for _ in 0..20 {
            requests.push(peer.next_json().await.unwrap().unwrap());
        }
        let ids: Vec<_> = requests.iter().map(|r| r["id"].as_u64().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        for req in requests.iter().rev() {
            let resp = json!({ "id": req["id"], "result": { "n": req["params"]["n"] } });
            peer.push(resp.to_string()).unwrap();
        }
    };

    let (results, ()) = tokio::join!(join_all(calls), responder);
    for (n, res) in results.into_iter().enumerate() {
        assert_eq!(res.unwrap(), json!({ "n": n }));
    }
    assert_eq!(session.stats().responses(), 20);
    assert_eq!(session.stats().pending(), 0);
}

#[tokio::test]
async fn isolates_failing_listeners() {
    let (session, peer) = setup(config());
    let seen = Arc::new(Mutex::new(0));

    let _panicking = session
        .subscribe("Page", "loadEventFired", |_: &RawEvent| -> cdpmux::Result<()> {
            panic!("listener bug")
        })
        .unwrap();
    let _rejecting = session
        .subscribe("Page", "loadEventFired", |_: &RawEvent| {
            Err(CdpError::msg("rejected"))
        })
        .unwrap();
    let counter = Arc::clone(&seen);
    let _counting = session
        .subscribe("Page", "loadEventFired", move |_: &RawEvent| {
            *counter.lock().unwrap() += 1;
            Ok(())
        })
        .unwrap();

    for ts in 0..2 {
        peer.push(event("Page.loadEventFired", json!({ "timestamp": ts })))
            .unwrap();
    }

    eventually(|| *seen.lock().unwrap() == 2).await;
    assert_eq!(session.stats().listener_failures(), 4);
}

#[tokio::test]
async fn streams_typed_events() {
    let (session, peer) = setup(config());
    let mut loads = session.event_listener::<EventLoadEventFired>().unwrap();

    peer.push(event("Page.loadEventFired", json!({ "timestamp": 42.5 })))
        .unwrap();
    let ev = loads.next().await.unwrap();
    assert_eq!(*ev.timestamp.inner(), 42.5);

    drop(loads);
    peer.push(event("Page.loadEventFired", json!({ "timestamp": 43.0 })))
        .unwrap();
    // the closed stream is removed on the next event of its key
    eventually(|| session.stats().unhandled_events() == 1).await;
}

#[tokio::test]
async fn unsubscribes_listeners() {
    let (session, peer) = setup(config());
    let seen = Arc::new(Mutex::new(0));

    let counter = Arc::clone(&seen);
    let subscription = session
        .subscribe("Page", "loadEventFired", move |_: &RawEvent| {
            *counter.lock().unwrap() += 1;
            Ok(())
        })
        .unwrap();

    peer.push(event("Page.loadEventFired", json!({ "timestamp": 1 })))
        .unwrap();
    eventually(|| *seen.lock().unwrap() == 1).await;

    subscription.unsubscribe().unwrap();
    peer.push(event("Page.loadEventFired", json!({ "timestamp": 2 })))
        .unwrap();
    eventually(|| session.stats().events() == 2).await;
    assert_eq!(*seen.lock().unwrap(), 1);
    assert_eq!(session.stats().unhandled_events(), 1);
}

#[tokio::test]
async fn sends_fire_and_forget() {
    let (session, mut peer) = setup(config());

    session.notify(EnableParams::default()).unwrap();
    let detached = session
        .send_with_mode("Page.enable", json!({}), ResponseMode::Detached)
        .await
        .unwrap();
    assert!(detached.is_none());

    let first = peer.next_json().await.unwrap().unwrap();
    assert_eq!(first["method"], json!("Network.enable"));
    assert_eq!(first["params"], json!({}));
    let second = peer.next_json().await.unwrap().unwrap();
    assert_eq!(second["method"], json!("Page.enable"));
    assert_eq!(session.stats().pending(), 0);

    // nobody waits for the answer
    peer.push(json!({ "id": first["id"], "result": {} }).to_string())
        .unwrap();
    eventually(|| session.stats().unmatched_responses() == 1).await;
}

#[tokio::test]
async fn surfaces_remote_errors() {
    let (session, mut peer) = setup(config());

    let (res, ()) = tokio::join!(session.execute(GetCookiesParams::default()), async {
        let req = peer.next_json().await.unwrap().unwrap();
        let resp = json!({
            "id": req["id"],
            "error": { "code": -32601, "message": "'Network.getCookies' wasn't found" }
        });
        peer.push(resp.to_string()).unwrap();
    });

    match res {
        Err(CdpError::Chrome(err)) => {
            assert_eq!(err.code, -32601);
            assert_eq!(err.message, "'Network.getCookies' wasn't found");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn fails_pending_requests_on_disconnect() {
    let (session, mut peer) = setup(config());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&seen);
    let _subscription = session
        .subscribe("Page", "loadEventFired", move |ev: &RawEvent| {
            log.lock().unwrap().push(ev.params["timestamp"].clone());
            Ok(())
        })
        .unwrap();

    let (res, ()) = tokio::join!(session.send("Test.hang", json!({})), async {
        peer.next_json().await.unwrap().unwrap();
        peer.close();
    });
    assert!(res.unwrap_err().is_connection_closed());

    // disconnected, commands fail fast
    let res = session.send("Test.more", json!({})).await;
    assert!(matches!(res, Err(CdpError::ConnectionClosed)));

    // listeners survive a reconnect
    let (transport, mut peer) = memory();
    session.reconnect(transport).unwrap();
    peer.push(event("Page.loadEventFired", json!({ "timestamp": 7 })))
        .unwrap();
    eventually(|| seen.lock().unwrap().len() == 1).await;
    assert_eq!(*seen.lock().unwrap(), vec![json!(7)]);

    let (res, ()) = tokio::join!(session.send("Test.again", json!({})), async {
        let req = peer.next_json().await.unwrap().unwrap();
        peer.push(json!({ "id": req["id"], "result": { "ok": true } }).to_string())
            .unwrap();
    });
    assert_eq!(res.unwrap(), json!({ "ok": true }));
}

#[tokio::test]
async fn scopes_commands_to_target_session() {
    let (session, mut peer) = setup(config());
    let target = session.with_session_id("S1");
    assert_eq!(target.session_id(), Some("S1"));
    assert!(session.session_id().is_none());

    let evaluate = target.send("Runtime.evaluate", json!({ "expression": "1" }));
    let (res, ()) = tokio::join!(evaluate, async {
        let req = peer.next_json().await.unwrap().unwrap();
        assert_eq!(req["sessionId"], json!("S1"));
        let resp = json!({ "id": req["id"], "result": { "result": { "type": "number" } } });
        peer.push(resp.to_string()).unwrap();
    });
    assert_eq!(res.unwrap()["result"]["type"], json!("number"));

    let seen = Arc::new(Mutex::new(None));
    let log = Arc::clone(&seen);
    let _subscription = session
        .subscribe("Page", "loadEventFired", move |ev: &RawEvent| {
            *log.lock().unwrap() = ev.session_id.clone();
            Ok(())
        })
        .unwrap();
    let frame = json!({
        "method": "Page.loadEventFired",
        "params": { "timestamp": 1 },
        "sessionId": "S1"
    });
    peer.push(frame.to_string()).unwrap();
    eventually(|| seen.lock().unwrap().is_some()).await;
    assert_eq!(seen.lock().unwrap().as_deref(), Some("S1"));
}

#[tokio::test]
async fn close_shuts_down_the_handler() {
    let (transport, mut peer) = memory();
    let (session, mut handler) = Session::new(transport, config());
    let driver = tokio::spawn(async move {
        let mut errors = 0;
        while let Some(res) = handler.next().await {
            if res.is_err() {
                errors += 1;
            }
        }
        errors
    });

    let pending = session.send("Test.hang", json!({}));
    let (res, ()) = tokio::join!(pending, async {
        peer.next_json().await.unwrap().unwrap();
        session.close().unwrap();
    });
    assert!(matches!(res, Err(CdpError::ConnectionClosed)));
    assert_eq!(driver.await.unwrap(), 0);
    assert!(session.is_closed());
    assert!(matches!(
        session.send("Test.after", json!({})).await,
        Err(CdpError::ConnectionClosed)
    ));
    // the transport is dropped with the handler
    assert!(peer.next_frame().await.is_none());
}
