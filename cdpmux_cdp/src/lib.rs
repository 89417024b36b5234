//! Typed Chrome DevTools Protocol bindings generated from the bundled
//! `js_protocol.pdl` and `browser_protocol.pdl`.
//!
//! Every domain module contains the types, `<Name>Params`/`<Name>Returns`
//! pairs for its commands, `Event<Name>` payloads, a `<Domain>Domain` marker
//! and the `<Domain>Event` sum type over all its events.

use std::fmt;

use crate::cdp::browser_protocol::network::{CookieParam, DeleteCookiesParams};
use crate::cdp::browser_protocol::page::NavigateParams;
use crate::cdp::browser_protocol::target::CreateTargetParams;
use crate::cdp::js_protocol::runtime::{EvaluateParams, ExceptionDetails, StackTrace};

// Include all the types
include!(concat!(env!("OUT_DIR"), "/cdp.rs"));

/// Whether `method` is a command of the bundled protocol
pub fn is_command(method: &str) -> bool {
    cdp::COMMANDS.contains(&method)
}

/// Whether `method` is an event of the bundled protocol
pub fn is_event(method: &str) -> bool {
    cdp::EVENTS.contains(&method)
}

impl Default for CreateTargetParams {
    fn default() -> Self {
        CreateTargetParams::new("about:blank")
    }
}

impl DeleteCookiesParams {
    /// Create a new instance from a `CookieParam`
    pub fn from_cookie(param: &CookieParam) -> Self {
        DeleteCookiesParams {
            name: param.name.clone(),
            url: param.url.clone(),
            domain: param.domain.clone(),
            path: param.path.clone(),
        }
    }
}

impl From<&str> for EvaluateParams {
    fn from(expression: &str) -> Self {
        EvaluateParams::new(expression)
    }
}

impl From<String> for EvaluateParams {
    fn from(expression: String) -> Self {
        EvaluateParams::new(expression)
    }
}

impl From<&str> for NavigateParams {
    fn from(url: &str) -> Self {
        NavigateParams::new(url)
    }
}

impl From<String> for NavigateParams {
    fn from(url: String) -> Self {
        NavigateParams::new(url)
    }
}

impl fmt::Display for ExceptionDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}:{}: {}",
            self.line_number, self.column_number, self.text
        )?;

        if let Some(stack) = self.stack_trace.as_ref() {
            stack.fmt(f)?
        }
        Ok(())
    }
}

impl std::error::Error for ExceptionDetails {}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(desc) = self.description.as_ref() {
            writeln!(f, "{}", desc)?;
        }
        for frame in &self.call_frames {
            writeln!(
                f,
                "{}@{}:{}:{}",
                frame.function_name, frame.url, frame.line_number, frame.column_number
            )?;
        }
        Ok(())
    }
}
