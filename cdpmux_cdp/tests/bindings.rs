use cdpmux_cdp::cdp::browser_protocol::network::{
    self, EventRequestWillBeSent, GetCookiesParams, NetworkDomain, NetworkEvent, ResourceType,
};
use cdpmux_cdp::cdp::browser_protocol::page::{CaptureScreenshotFormat, NavigateParams};
use cdpmux_cdp::cdp::js_protocol::runtime::{
    EvaluateParams, EvaluateReturns, EventExecutionContextsCleared, RuntimeEvent, StackTrace,
};
use cdpmux_cdp::cdp::js_protocol::schema::{SchemaDomain, SchemaEvent};
use cdpmux_types::{Command, Domain, DomainEvents, Method, MethodType, Request};
use serde_json::json;

#[test]
fn command_identifiers() {
    let params = NavigateParams::new("https://example.com");
    assert_eq!(params.identifier(), "Page.navigate");
    assert_eq!(params.domain_name(), "Page");
    assert_eq!(params.method_name(), "navigate");
    assert_eq!(EvaluateParams::method_id(), "Runtime.evaluate");

    assert!(cdpmux_cdp::is_command("Network.getCookies"));
    assert!(cdpmux_cdp::is_event("Network.requestWillBeSent"));
    assert!(!cdpmux_cdp::is_command("Network.requestWillBeSent"));
}

#[test]
fn optional_params_are_omitted() {
    let req = Request::from_command(&NavigateParams::from("https://example.com")).unwrap();
    assert_eq!(req.method, "Page.navigate");
    assert_eq!(req.params, json!({"url": "https://example.com"}));

    let req = Request::from_command(&GetCookiesParams::default()).unwrap();
    assert_eq!(req.params, json!({}));
}

#[test]
fn deserializes_returns() {
    let returns: <EvaluateParams as Command>::Response = serde_json::from_value(json!({
        "result": {"type": "number", "value": 2, "description": "2"}
    }))
    .unwrap();
    let returns: EvaluateReturns = returns;
    assert_eq!(returns.result.value, Some(json!(2)));
    assert!(returns.exception_details.is_none());
}

#[test]
fn enums_use_wire_names() {
    assert_eq!(ResourceType::Xhr.as_str(), "XHR");
    assert_eq!("XHR".parse::<ResourceType>(), Ok(ResourceType::Xhr));
    assert_eq!(
        serde_json::to_value(CaptureScreenshotFormat::Webp).unwrap(),
        json!("webp")
    );
    assert!("xml".parse::<CaptureScreenshotFormat>().is_err());
}

#[test]
fn domain_events() {
    assert_eq!(NetworkDomain::NAME, "Network");
    assert!(NetworkDomain::EVENTS.contains(&"Network.loadingFinished"));
    assert!(SchemaDomain::EVENTS.is_empty());

    let params = json!({
        "requestId": "1000.1",
        "loaderId": "L1",
        "documentURL": "https://example.com/",
        "request": {"url": "https://example.com/", "method": "GET", "headers": {}},
        "timestamp": 1.5,
        "wallTime": 1700000000.0,
        "initiator": {"type": "other"},
        "type": "Document"
    });
    let event = NetworkEvent::from_method("Network.requestWillBeSent", params)
        .unwrap()
        .unwrap();
    assert_eq!(event.identifier(), "Network.requestWillBeSent");
    let payload = event
        .payload()
        .downcast_ref::<EventRequestWillBeSent>()
        .unwrap();
    assert_eq!(payload.request_id.inner(), "1000.1");
    assert_eq!(payload.r#type, Some(ResourceType::Document));
    assert_eq!(payload.initiator.r#type, network::InitiatorType::Other);

    assert!(NetworkEvent::from_method("Page.loadEventFired", json!({}))
        .unwrap()
        .is_none());
    assert!(NetworkEvent::from_method("Network.loadingFinished", json!({"x": 1})).is_err());
    assert!(SchemaEvent::from_method("Schema.anything", json!({}))
        .unwrap()
        .is_none());
}

#[test]
fn events_without_params() {
    let event = RuntimeEvent::from_method("Runtime.executionContextsCleared", json!(null))
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        RuntimeEvent::ExecutionContextsCleared(EventExecutionContextsCleared {})
    );
}

#[test]
fn recursive_stack_traces() {
    let trace: StackTrace = serde_json::from_value(json!({
        "callFrames": [{
            "functionName": "f",
            "scriptId": "1",
            "url": "app.js",
            "lineNumber": 1,
            "columnNumber": 2
        }],
        "parent": {"description": "async", "callFrames": []}
    }))
    .unwrap();
    let parent = trace.parent.as_ref().unwrap();
    assert_eq!(parent.description.as_deref(), Some("async"));
    assert_eq!(trace.to_string(), "f@app.js:1:2\n");
}
