//! interop.rs
//!
//! Runtime loading of the zoid SDK (no inline JS).
//!
//! # Overview
//! `load_zoid_sdk()` injects a single
//! `<script id="taptree-zoid-sdk" src="..." defer>` into `<head>` on first
//! use and resolves once the script's `load` event fires (or immediately if
//! `window.zoid` already exists). `use_zoid_sdk()` wraps it as a Yew hook
//! returning `false` until the SDK is usable.
//!
//! # Usage
//! ```rust,ignore
//! use yew::prelude::*;
//! use taptree_checkout::use_zoid_sdk;
//!
//! #[function_component(App)]
//! fn app() -> Html {
//!     let ready = use_zoid_sdk(taptree_checkout::DEFAULT_ZOID_SDK_URL.to_string());
//!     html! { if ready { <p>{"checkout ready"}</p> } else { <p>{"loading..."}</p> } }
//! }
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::oneshot;
use wasm_bindgen::{prelude::Closure, JsCast};
use web_sys::HtmlScriptElement;
use yew::functional::hook;
use yew::prelude::*;

use crate::bindings::zoid_available;
use crate::error::{js_error, CheckoutError};

/// `id` of the injected `<script>` tag.
pub const ZOID_SCRIPT_ID: &str = "taptree-zoid-sdk";

/// Load the zoid SDK from `src` once per page.
pub async fn load_zoid_sdk(src: &str) -> Result<(), CheckoutError> {
    if zoid_available() {
        return Ok(());
    }

    let document = web_sys::window()
        .and_then(|win| win.document())
        .ok_or_else(|| CheckoutError::Js("no document".into()))?;

    // Someone else may have injected the tag already and still be waiting.
    let (script, fresh) = match document.get_element_by_id(ZOID_SCRIPT_ID) {
        Some(existing) => (
            existing
                .dyn_into::<HtmlScriptElement>()
                .map_err(|_| CheckoutError::Embed(format!("#{ZOID_SCRIPT_ID} is not a script")))?,
            false,
        ),
        None => {
            let script: HtmlScriptElement = document
                .create_element("script")
                .map_err(js_error)?
                .dyn_into()
                .map_err(|_| CheckoutError::Js("cast script".into()))?;
            script.set_id(ZOID_SCRIPT_ID);
            script.set_src(src);
            script.set_defer(true);
            (script, true)
        }
    };

    let (tx, rx) = oneshot::channel::<bool>();
    let tx = Rc::new(RefCell::new(Some(tx)));
    for (event, loaded) in [("load", true), ("error", false)] {
        let tx = tx.clone();
        let listener = Closure::once_into_js(move || {
            if let Some(tx) = tx.borrow_mut().take() {
                let _ = tx.send(loaded);
            }
        });
        script
            .add_event_listener_with_callback(event, listener.unchecked_ref())
            .map_err(js_error)?;
    }

    if fresh {
        document
            .head()
            .ok_or_else(|| CheckoutError::Js("head missing".into()))?
            .append_child(&script)
            .map_err(js_error)?;
    }

    match rx.await {
        Ok(true) if zoid_available() => {
            log::debug!("zoid SDK loaded from {src}");
            Ok(())
        }
        Ok(true) => Err(CheckoutError::Embed(format!("{src} did not define window.zoid"))),
        _ => Err(CheckoutError::Embed(format!("failed to load {src}"))),
    }
}

/// Custom hook: load the zoid SDK exactly once and track readiness.
///
/// # Returns
/// - `false` while the `<script>` is being fetched & parsed (or failed).
/// - `true` once `window.zoid` exists.
#[hook]
pub fn use_zoid_sdk(src: String) -> bool {
    let loaded = use_state(zoid_available);

    {
        let loaded = loaded.clone();
        use_effect_with(src, move |src| {
            if !*loaded {
                let src = src.clone();
                wasm_bindgen_futures::spawn_local(async move {
                    match load_zoid_sdk(&src).await {
                        Ok(()) => loaded.set(true),
                        Err(err) => log::error!("{err}"),
                    }
                });
            }
            || ()
        });
    }

    *loaded
}
