//! Low-level wasm-bindgen bindings to the zoid cross-window component SDK.
//!
//! Exposes the raw handles (`ZoidInstance`, `ZoidActions`) and the
//! component factory. The popup host built on top lives in `embed.rs`.

use wasm_bindgen::prelude::*;
use web_sys::js_sys::{Function, Promise, Reflect};

/// zoid's `CONTEXT.POPUP`.
pub const POPUP_CONTEXT: &str = "popup";

#[wasm_bindgen]
extern "C" {
    //------------------------------------------------------------------------------
    // Core Types
    //------------------------------------------------------------------------------

    /// A rendered (or rendering) component instance.
    #[derive(Debug, Clone)]
    pub type ZoidInstance;

    /// The `actions` object the child hands to `onReady`.
    #[derive(Debug, Clone)]
    pub type ZoidActions;

    //------------------------------------------------------------------------------
    // Constructors
    //------------------------------------------------------------------------------

    /// `zoid.create(options)` → component factory.
    ///
    /// ```js
    ///   const TapTreeCheckout = zoid.create({ tag: "taptree-checkout", url, props });
    /// ```
    #[wasm_bindgen(catch, js_namespace = zoid, js_name = create)]
    pub fn create_component(options: &JsValue) -> Result<Function, JsValue>;

    //------------------------------------------------------------------------------
    // Instance Methods
    //------------------------------------------------------------------------------

    /// `instance.render(container, context)` → JS `Promise`
    #[wasm_bindgen(method, catch, js_name = render)]
    pub fn render(this: &ZoidInstance, container: &str, context: &str) -> Result<Promise, JsValue>;

    /// `instance.close()` → JS `Promise`
    #[wasm_bindgen(method, catch, js_name = close)]
    pub fn close(this: &ZoidInstance) -> Result<Promise, JsValue>;

    /// `actions.navigate(url)`, asks the child page to load `url`.
    #[wasm_bindgen(method, catch, js_name = navigate)]
    pub fn navigate(this: &ZoidActions, url: &str) -> Result<JsValue, JsValue>;

    //------------------------------------------------------------------------------
    // jQuery (WooCommerce checkout hooks)
    //------------------------------------------------------------------------------

    /// A jQuery collection.
    #[derive(Debug, Clone)]
    pub type JQuery;

    /// `jQuery(target)`
    #[wasm_bindgen(catch, js_name = jQuery)]
    pub fn jquery(target: &JsValue) -> Result<JQuery, JsValue>;

    /// `$el.triggerHandler(event)`, returns the last handler's return value.
    #[wasm_bindgen(method, js_name = triggerHandler)]
    pub fn trigger_handler(this: &JQuery, event: &str) -> JsValue;

    /// `$el.trigger(event, extraParameters)`, reaches jQuery-bound handlers
    /// as `function (e, ...extraParameters)`.
    #[wasm_bindgen(method, js_name = trigger)]
    pub fn trigger(this: &JQuery, event: &str, extra: &JsValue) -> JQuery;

    /// `$el.find(selector)`
    #[wasm_bindgen(method, js_name = find)]
    pub fn find(this: &JQuery, selector: &str) -> JQuery;

    /// `$el.one(event, handler)`
    #[wasm_bindgen(method, js_name = one)]
    pub fn one(this: &JQuery, event: &str, handler: &JsValue) -> JQuery;
}

/// `true` when `window.zoid` is defined.
pub fn zoid_available() -> bool {
    has_global("zoid")
}

/// `true` when `window.jQuery` is defined.
pub fn jquery_available() -> bool {
    has_global("jQuery")
}

fn has_global(name: &str) -> bool {
    web_sys::window()
        .and_then(|win| Reflect::has(&win, &JsValue::from_str(name)).ok())
        .unwrap_or(false)
}
