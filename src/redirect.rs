//! Redirect URL rules.
//!
//! Every URL the parent page is about to navigate to passes through here.
//! Relative URLs are resolved against the page origin; only `http` and
//! `https` survive.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use url::Url;

/// `type` tag of the same-origin completion message posted by the
/// merchant's fallback spinner page.
pub const COMPLETION_MESSAGE_TYPE: &str = "taptree_payment_complete";

/// Parse `candidate` against `origin` and keep it only if the scheme is
/// `http` or `https`.
pub fn parse_safe_redirect(candidate: &str, origin: &str) -> Option<Url> {
    let base = Url::parse(origin).ok();
    let parsed = Url::options().base_url(base.as_ref()).parse(candidate).ok()?;
    match parsed.scheme() {
        "http" | "https" => Some(parsed),
        _ => None,
    }
}

/// `true` iff `candidate` resolves to an `http`/`https` URL.
pub fn is_safe_redirect_url(candidate: &str, origin: &str) -> bool {
    parse_safe_redirect(candidate, origin).is_some()
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "redirectUrl", default)]
    redirect_url: Option<String>,
}

/// Accept a `message` event from the fallback channel.
///
/// Returns the target to navigate to when the event came from exactly
/// `page_origin`, carries a `taptree_payment_complete` payload and names a
/// safe redirect URL. Anything else yields `None`.
pub fn completion_redirect(event_origin: &str, page_origin: &str, data: &JsonValue) -> Option<Url> {
    if event_origin != page_origin {
        log::debug!("ignoring message from foreign origin {event_origin}");
        return None;
    }
    let message = CompletionMessage::deserialize(data).ok()?;
    if message.kind != COMPLETION_MESSAGE_TYPE {
        return None;
    }
    let target = message.redirect_url.filter(|url| !url.is_empty())?;
    let safe = parse_safe_redirect(&target, page_origin);
    if safe.is_none() {
        log::warn!("completion message carried unsafe redirect {target:?}");
    }
    safe
}
