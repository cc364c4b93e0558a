//! Page configuration.
//!
//! WordPress localizes two globals onto checkout pages:
//! `wc_checkout_params` (WooCommerce's own) and `taptree_modal_params`
//! (ours). Their absence means the page is not a checkout page.

use std::collections::HashMap;

use log::LevelFilter;
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use wasm_bindgen::JsValue;
use web_sys::js_sys::Reflect;

use crate::coordinator::CoordinatorSettings;
use crate::error::{js_error, CheckoutError};

pub const DEFAULT_CHECKOUT_ORIGIN: &str = "https://checkout.taptree.org";
pub const DEFAULT_ZOID_SDK_URL: &str = "https://unpkg.com/@krakenjs/zoid/dist/zoid.frameworks.min.js";
pub const DEFAULT_OVERLAY_MESSAGE: &str = "One moment please, we are redirecting you.";
pub const DEFAULT_CHECKOUT_ERROR: &str = "An error occurred during checkout.";
/// Intent endpoint used from the order-pay page.
pub const PAY_FOR_ORDER_ENDPOINT: &str = "/wp-admin/admin-ajax.php?action=taptree_custom_pay_for_order";

/// `wc_checkout_params`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct WcCheckoutParams {
    pub checkout_url: String,
    #[serde(default)]
    pub i18n_checkout_error: Option<String>,
}

/// `taptree_modal_params`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModalParams {
    pub checkout_origin: Option<String>,
    /// Gateway id → truthy when that gateway runs in redirect mode.
    #[serde(deserialize_with = "gateway_flags")]
    pub gateways: HashMap<String, JsonValue>,
    #[serde(deserialize_with = "lenient_string")]
    pub order_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub key: String,
    #[serde(deserialize_with = "lenient_string")]
    pub security: String,
    pub zoid_sdk_url: Option<String>,
    pub overlay_message: Option<String>,
    pub debug: bool,
}

/// Everything the client needs from the page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CheckoutConfig {
    pub wc: WcCheckoutParams,
    pub modal: ModalParams,
}

impl CheckoutConfig {
    /// Read both globals from `window`. `Ok(None)` off checkout pages.
    pub fn from_globals() -> Result<Option<Self>, CheckoutError> {
        let window = web_sys::window().ok_or_else(|| CheckoutError::Js("no window".into()))?;

        let wc = Reflect::get(&window, &JsValue::from_str("wc_checkout_params")).map_err(js_error)?;
        if wc.is_undefined() || wc.is_null() {
            return Ok(None);
        }
        let wc: WcCheckoutParams =
            serde_wasm_bindgen::from_value(wc).map_err(|e| CheckoutError::Config(format!("wc_checkout_params: {e}")))?;

        let modal = Reflect::get(&window, &JsValue::from_str("taptree_modal_params")).map_err(js_error)?;
        let modal = if modal.is_undefined() || modal.is_null() {
            ModalParams::default()
        } else {
            serde_wasm_bindgen::from_value(modal)
                .map_err(|e| CheckoutError::Config(format!("taptree_modal_params: {e}")))?
        };

        Ok(Some(Self { wc, modal }))
    }

    /// The hosted lounge the popup starts on.
    pub fn lounge_url(&self) -> String {
        let origin = self
            .modal
            .checkout_origin
            .as_deref()
            .filter(|o| !o.is_empty())
            .unwrap_or(DEFAULT_CHECKOUT_ORIGIN);
        format!("{}/lounge", origin.trim_end_matches('/'))
    }

    pub fn zoid_sdk_url(&self) -> &str {
        self.modal
            .zoid_sdk_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_ZOID_SDK_URL)
    }

    pub fn checkout_error_message(&self) -> &str {
        self.wc
            .i18n_checkout_error
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_CHECKOUT_ERROR)
    }

    pub fn overlay_message(&self) -> &str {
        self.modal
            .overlay_message
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_OVERLAY_MESSAGE)
    }

    pub fn log_level(&self) -> LevelFilter {
        if self.modal.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        }
    }

    /// Gateways flagged for redirect mode skip the popup. Flags follow JS
    /// truthiness.
    pub fn is_redirect_gateway(&self, gateway_id: &str) -> bool {
        self.modal.gateways.get(gateway_id).is_some_and(js_truthy)
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            checkout_url: self.wc.checkout_url.clone(),
            overlay_message: self.overlay_message().to_string(),
            error_message: self.checkout_error_message().to_string(),
        }
    }
}

fn js_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

/// An empty PHP array is localized as `[]` rather than `{}`.
fn gateway_flags<'de, D>(deserializer: D) -> Result<HashMap<String, JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    })
}

/// PHP happily emits ids as numbers; accept both.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s,
        other => other.to_string(),
    })
}
