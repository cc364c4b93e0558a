//! Error taxonomy for the popup checkout flow.
//!
//! Only programming errors escape [`crate::PopupLifecycleCoordinator::run`]
//! as `Err`. Everything that can go wrong once the checkout is underway is
//! folded into a [`crate::TerminalOutcome`] instead.

use serde::Deserialize;
use serde_wasm_bindgen::from_value;
use wasm_bindgen::JsValue;

/// Everything that can fail while driving a checkout popup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutError {
    /// The browser refused to open the popup window.
    #[error("popup blocked: {0}")]
    PopupBlocked(String),

    /// The backend did not hand back a usable payment intent.
    #[error("payment intent creation failed: {0}")]
    IntentCreation(String),

    /// A redirect target used a scheme other than `http`/`https`.
    #[error("refusing to navigate to unsafe URL {0:?}")]
    InvalidRedirectUrl(String),

    /// The submitting form could not be turned into a request payload.
    #[error("malformed checkout form: {0}")]
    MalformedForm(String),

    /// The embedding SDK is missing or misbehaved.
    #[error("checkout embed error: {0}")]
    Embed(String),

    /// Page configuration globals are missing or malformed.
    #[error("invalid checkout configuration: {0}")]
    Config(String),

    /// Any other JavaScript exception.
    #[error("javascript error: {0}")]
    Js(String),
}

impl CheckoutError {
    /// Classify a failure raised while opening the popup.
    ///
    /// The embedding SDK reports blocked popups as errors whose message
    /// contains `Popup` (e.g. `PopupOpenError`).
    pub fn from_popup_failure(message: String) -> Self {
        if message.contains("Popup") {
            CheckoutError::PopupBlocked(message)
        } else {
            CheckoutError::Embed(message)
        }
    }
}

impl From<CheckoutError> for JsValue {
    fn from(err: CheckoutError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}

#[derive(Deserialize)]
struct JsErrorShape {
    message: String,
}

/// Best-effort human readable message for a caught `JsValue`.
pub fn js_error_message(value: &JsValue) -> String {
    if let Ok(err) = from_value::<JsErrorShape>(value.clone()) {
        return err.message;
    }
    value.as_string().unwrap_or_else(|| format!("{:?}", value))
}

/// Convert a caught `JsValue` into [`CheckoutError::Js`].
pub(crate) fn js_error(value: JsValue) -> CheckoutError {
    CheckoutError::Js(js_error_message(&value))
}
