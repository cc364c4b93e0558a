//! Payment intent creation against the merchant backend.
//!
//! This module provides:
//! - `FormContext`, the serializable snapshot of the submitting checkout form.
//! - `IntentRequest`, the encoded POST built from it before any async work.
//! - `PaymentIntent`, the validated backend answer.
//! - `IntentBackend`, the seam the coordinator talks to, and `FetchBackend`,
//!   its browser implementation on top of `window.fetch`.
//!
//! The backend answers with the WooCommerce checkout JSON shape:
//!
//! ```json
//! { "result": "success", "redirect": "https://checkout.taptree.org/...",
//!   "order_pay_url": "...", "thank_you_url": "..." }
//! ```

use futures::future::{FutureExt, LocalBoxFuture};
use serde::Deserialize;
use url::Url;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::js_sys::Promise;
use web_sys::{Headers, Request, RequestInit, Response};

use crate::error::{js_error, CheckoutError};
use crate::redirect::parse_safe_redirect;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";
const INVALID_RESPONSE: &str = "Invalid response from server";

/// The submitting form, reduced to an endpoint plus its string fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormContext {
    endpoint: String,
    fields: Vec<(String, String)>,
}

impl FormContext {
    /// `endpoint` may be absolute or relative to the page origin.
    pub fn new(endpoint: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            endpoint: endpoint.into(),
            fields,
        }
    }

    /// Append one more field to the payload.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Resolve the endpoint and urlencode the payload.
    pub fn into_request(self, origin: &str) -> Result<IntentRequest, CheckoutError> {
        let base = Url::parse(origin).ok();
        let url = Url::options()
            .base_url(base.as_ref())
            .parse(&self.endpoint)
            .map_err(|e| CheckoutError::MalformedForm(format!("endpoint {:?}: {e}", self.endpoint)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CheckoutError::MalformedForm(format!(
                "endpoint {:?} is not http(s)",
                self.endpoint
            )));
        }
        let body = serde_urlencoded::to_string(&self.fields)
            .map_err(|e| CheckoutError::MalformedForm(e.to_string()))?;
        Ok(IntentRequest { url, body })
    }
}

/// A ready-to-send intent creation request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntentRequest {
    pub url: Url,
    /// `application/x-www-form-urlencoded` body.
    pub body: String,
}

/// Backend verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failure,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    result: ResultStatus,
    #[serde(default)]
    redirect: Option<String>,
    #[serde(default)]
    order_pay_url: Option<String>,
    #[serde(default)]
    thank_you_url: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    messages: Option<String>,
}

/// A successfully created payment intent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentIntent {
    /// Hosted checkout page the popup is sent to.
    pub redirect_url: Url,
    /// Fallback target when the child reports an error.
    pub order_pay_url: Option<String>,
    /// Where the shopper lands after paying.
    pub thank_you_url: Option<String>,
}

impl PaymentIntent {
    /// Validate a raw response body.
    ///
    /// `redirect` must be present and `http(s)` whenever `result` is
    /// `success`; everything else is an [`CheckoutError::IntentCreation`].
    pub fn from_response_body(body: &str, origin: &str) -> Result<Self, CheckoutError> {
        let response: IntentResponse = serde_json::from_str(body)
            .map_err(|e| CheckoutError::IntentCreation(format!("{INVALID_RESPONSE}: {e}")))?;

        if response.result != ResultStatus::Success {
            let reason = response
                .message
                .or(response.messages)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| INVALID_RESPONSE.to_string());
            return Err(CheckoutError::IntentCreation(reason));
        }

        let redirect = response
            .redirect
            .filter(|r| !r.is_empty())
            .ok_or_else(|| CheckoutError::IntentCreation(INVALID_RESPONSE.to_string()))?;
        let redirect_url = parse_safe_redirect(&redirect, origin)
            .ok_or(CheckoutError::InvalidRedirectUrl(redirect))?;

        Ok(PaymentIntent {
            redirect_url,
            order_pay_url: response.order_pay_url.filter(|u| !u.is_empty()),
            thank_you_url: response.thank_you_url.filter(|u| !u.is_empty()),
        })
    }
}

/// Creates payment intents.
///
/// Implementations must put the request on the wire before
/// `create_intent` returns: the coordinator relies on the request running
/// while the popup loads, and Rust futures do nothing until polled.
pub trait IntentBackend {
    fn create_intent(&self, request: IntentRequest) -> LocalBoxFuture<'static, Result<PaymentIntent, CheckoutError>>;
}

/// `window.fetch` backend.
#[derive(Clone, Debug)]
pub struct FetchBackend {
    origin: String,
}

impl FetchBackend {
    /// `origin` resolves relative redirect URLs in responses.
    pub fn new(origin: impl Into<String>) -> Self {
        Self { origin: origin.into() }
    }

    fn start(request: &IntentRequest) -> Result<Promise, CheckoutError> {
        let window = web_sys::window().ok_or_else(|| CheckoutError::Js("no window".into()))?;

        let headers = Headers::new().map_err(js_error)?;
        headers.set("Content-Type", FORM_CONTENT_TYPE).map_err(js_error)?;
        headers.set("Accept", "application/json").map_err(js_error)?;

        let init = RequestInit::new();
        init.set_method("POST");
        init.set_headers(&headers);
        init.set_body(&JsValue::from_str(&request.body));

        let fetch_request = Request::new_with_str_and_init(request.url.as_str(), &init).map_err(js_error)?;
        Ok(window.fetch_with_request(&fetch_request))
    }
}

impl IntentBackend for FetchBackend {
    fn create_intent(&self, request: IntentRequest) -> LocalBoxFuture<'static, Result<PaymentIntent, CheckoutError>> {
        // Started synchronously; only the response is awaited below.
        let in_flight = Self::start(&request);
        let origin = self.origin.clone();

        async move {
            let promise = in_flight.map_err(|e| CheckoutError::IntentCreation(e.to_string()))?;
            let response: Response = JsFuture::from(promise)
                .await
                .map_err(|e| CheckoutError::IntentCreation(js_error(e).to_string()))?
                .dyn_into()
                .map_err(|_| CheckoutError::IntentCreation(INVALID_RESPONSE.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .map_err(|e| CheckoutError::IntentCreation(js_error(e).to_string()))?;
            let body = JsFuture::from(text)
                .await
                .map_err(|e| CheckoutError::IntentCreation(js_error(e).to_string()))?
                .as_string()
                .unwrap_or_default();

            match PaymentIntent::from_response_body(&body, &origin) {
                Err(CheckoutError::IntentCreation(_)) if !response.ok() => {
                    Err(CheckoutError::IntentCreation(format!("backend answered HTTP {status}")))
                }
                other => other,
            }
        }
        .boxed_local()
    }
}
