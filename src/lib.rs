pub mod bindings;
pub mod browser;
pub mod checkout_component;
pub mod config;
pub mod coordinator;
pub mod embed;
pub mod error;
pub mod form;
pub mod intent;
pub mod interop;
pub mod logging;
pub mod overlay;
pub mod redirect;
pub mod watcher;

use wasm_bindgen::prelude::*;

pub use browser::browser_coordinator;
pub use checkout_component::{TapTreeCheckout, TapTreeCheckoutProps};
pub use config::{CheckoutConfig, DEFAULT_ZOID_SDK_URL};
pub use coordinator::*;
pub use error::CheckoutError;
pub use intent::{FormContext, IntentBackend, PaymentIntent};
pub use interop::{load_zoid_sdk, use_zoid_sdk};
pub use overlay::{DomOverlay, OverlayPresenter};
pub use redirect::{is_safe_redirect_url, COMPLETION_MESSAGE_TYPE};
pub use watcher::{PopupWindow, Timer, WindowCloseWatcher};

/// Page entry point: wire the popup checkout into the WooCommerce form.
///
/// Does nothing on pages without `wc_checkout_params`.
#[wasm_bindgen(js_name = mountTapTreeCheckout)]
pub fn mount_taptree_checkout() -> Result<(), JsValue> {
    let Some(config) = CheckoutConfig::from_globals()? else {
        return Ok(());
    };
    logging::init(config.log_level());
    form::mount(config)?;
    Ok(())
}
