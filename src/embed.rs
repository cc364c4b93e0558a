//! zoid-backed popup host.
//!
//! The TapTree checkout lounge is a zoid component. Its definition here
//! must match the child side (same tag, same props). zoid keeps the child
//! state in `window.name`, so the child survives the detour through an
//! external payment provider and can still report back.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;
use url::Url;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::js_sys::{Function, Object, Promise, Reflect};
use web_sys::Window;

use crate::bindings::{create_component, ZoidActions, ZoidInstance, POPUP_CONTEXT};
use crate::coordinator::{PopupHandle, PopupHost, PopupSignal, SignalSink};
use crate::error::{js_error, js_error_message, CheckoutError};
use crate::watcher::PopupWindow;

const COMPONENT_TAG: &str = "taptree-checkout";
const POPUP_WIDTH: &str = "608px";
const POPUP_HEIGHT: &str = "830px";

#[derive(Serialize)]
struct Dimensions {
    width: &'static str,
    height: &'static str,
}

#[derive(Serialize)]
struct PropSpec {
    #[serde(rename = "type")]
    kind: &'static str,
    required: bool,
}

impl PropSpec {
    const fn function(required: bool) -> Self {
        Self {
            kind: "function",
            required,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ComponentProps {
    on_ready: PropSpec,
    on_payment_complete: PropSpec,
    on_payment_cancel: PropSpec,
    on_error: PropSpec,
}

#[derive(Serialize)]
struct ComponentOptions<'a> {
    tag: &'static str,
    url: &'a str,
    dimensions: Dimensions,
    props: ComponentProps,
}

/// Opens the TapTree lounge as a zoid popup.
pub struct ZoidHost {
    lounge_url: String,
    component: RefCell<Option<Function>>,
}

impl ZoidHost {
    pub fn new(lounge_url: impl Into<String>) -> Self {
        Self {
            lounge_url: lounge_url.into(),
            component: RefCell::new(None),
        }
    }

    /// The component factory, created on first use so the SDK script may
    /// finish loading after the host is built.
    fn component(&self) -> Result<Function, CheckoutError> {
        if let Some(component) = self.component.borrow().as_ref() {
            return Ok(component.clone());
        }

        let options = ComponentOptions {
            tag: COMPONENT_TAG,
            url: &self.lounge_url,
            dimensions: Dimensions {
                width: POPUP_WIDTH,
                height: POPUP_HEIGHT,
            },
            props: ComponentProps {
                on_ready: PropSpec::function(true),
                on_payment_complete: PropSpec::function(true),
                on_payment_cancel: PropSpec::function(false),
                on_error: PropSpec::function(false),
            },
        };
        let options_js = options
            .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
            .map_err(|e| CheckoutError::Embed(e.to_string()))?;

        // No prerender spinner; the popup stays blank until the lounge loads.
        let prerender = Closure::<dyn Fn() -> JsValue>::new(|| JsValue::NULL).into_js_value();
        Reflect::set(&options_js, &JsValue::from_str("prerenderTemplate"), &prerender).map_err(js_error)?;

        let component = create_component(&options_js)
            .map_err(|e| CheckoutError::Embed(js_error_message(&e)))?;
        *self.component.borrow_mut() = Some(component.clone());
        Ok(component)
    }
}

impl PopupHost for ZoidHost {
    fn open(&self, signals: SignalSink) -> Result<Box<dyn PopupHandle>, CheckoutError> {
        let component = self.component()?;
        let actions = Rc::new(RefCell::new(None::<ZoidActions>));
        let props = session_props(&signals, &actions)?;

        let captured = Rc::new(RefCell::new(None::<Window>));
        let instance = {
            // zoid calls window.open() synchronously inside render().
            let _capture = OpenCapture::install(captured.clone())?;
            let instance: ZoidInstance = component
                .call1(&JsValue::NULL, &props)
                .map_err(|e| CheckoutError::from_popup_failure(js_error_message(&e)))?
                .unchecked_into();
            let rendering = instance
                .render("body", POPUP_CONTEXT)
                .map_err(|e| CheckoutError::from_popup_failure(js_error_message(&e)))?;
            forward_render_failure(rendering, signals);
            instance
        };

        let window = captured.borrow_mut().take();
        if window.is_none() {
            log::debug!("popup window handle was not captured");
        }
        Ok(Box::new(ZoidPopup {
            instance,
            actions,
            window,
        }))
    }
}

/// Per-session callbacks. Ownership moves to JS: zoid may call them long
/// after the session settled, where they land on a closed channel.
fn session_props(signals: &SignalSink, actions: &Rc<RefCell<Option<ZoidActions>>>) -> Result<Object, CheckoutError> {
    let props = Object::new();

    let on_ready = {
        let signals = signals.clone();
        let actions = actions.clone();
        Closure::<dyn Fn(JsValue)>::new(move |raw: JsValue| {
            *actions.borrow_mut() = Some(raw.unchecked_into());
            signals.emit(PopupSignal::Ready);
        })
    };
    let on_payment_complete = {
        let signals = signals.clone();
        Closure::<dyn Fn(JsValue)>::new(move |redirect: JsValue| {
            signals.emit(PopupSignal::Complete(redirect.as_string().unwrap_or_default()));
        })
    };
    let on_payment_cancel = {
        let signals = signals.clone();
        Closure::<dyn Fn()>::new(move || signals.emit(PopupSignal::Cancel))
    };
    let on_error = {
        let signals = signals.clone();
        Closure::<dyn Fn(JsValue)>::new(move |err: JsValue| {
            signals.emit(PopupSignal::ChildError(js_error_message(&err)));
        })
    };
    let on_close = {
        let signals = signals.clone();
        Closure::<dyn Fn()>::new(move || signals.emit(PopupSignal::Closed))
    };

    for (name, callback) in [
        ("onReady", on_ready.into_js_value()),
        ("onPaymentComplete", on_payment_complete.into_js_value()),
        ("onPaymentCancel", on_payment_cancel.into_js_value()),
        ("onError", on_error.into_js_value()),
        ("onClose", on_close.into_js_value()),
    ] {
        Reflect::set(&props, &JsValue::from_str(name), &callback).map_err(js_error)?;
    }
    Ok(props)
}

/// A blocked popup may only surface through the render promise.
fn forward_render_failure(rendering: Promise, signals: SignalSink) {
    spawn_local(async move {
        if let Err(err) = JsFuture::from(rendering).await {
            match CheckoutError::from_popup_failure(js_error_message(&err)) {
                CheckoutError::PopupBlocked(reason) => signals.emit(PopupSignal::Blocked(reason)),
                other => log::debug!("popup render settled with {other}"),
            }
        }
    });
}

/// Swaps `window.open` for a shim recording the opened window; the original
/// is put back on drop.
struct OpenCapture {
    window: Window,
    original: JsValue,
    _shim: Closure<dyn FnMut(JsValue, JsValue, JsValue) -> JsValue>,
}

impl OpenCapture {
    fn install(captured: Rc<RefCell<Option<Window>>>) -> Result<Self, CheckoutError> {
        let window = web_sys::window().ok_or_else(|| CheckoutError::Js("no window".into()))?;
        let open_key = JsValue::from_str("open");
        let original = Reflect::get(&window, &open_key).map_err(js_error)?;
        let original_fn: Function = original
            .clone()
            .dyn_into()
            .map_err(|_| CheckoutError::Js("window.open is not a function".into()))?;

        let this = window.clone();
        let shim = Closure::<dyn FnMut(JsValue, JsValue, JsValue) -> JsValue>::new(
            move |url: JsValue, target: JsValue, features: JsValue| {
                let opened = original_fn
                    .call3(&this, &url, &target, &features)
                    .unwrap_or(JsValue::NULL);
                // Cross-realm WindowProxy fails `instanceof Window`.
                if !opened.is_null() && !opened.is_undefined() {
                    *captured.borrow_mut() = Some(opened.clone().unchecked_into());
                }
                opened
            },
        );
        Reflect::set(&window, &open_key, shim.as_ref()).map_err(js_error)?;

        Ok(Self {
            window,
            original,
            _shim: shim,
        })
    }
}

impl Drop for OpenCapture {
    fn drop(&mut self) {
        if Reflect::set(&self.window, &JsValue::from_str("open"), &self.original).is_err() {
            log::error!("could not restore window.open");
        }
    }
}

struct ZoidPopup {
    instance: ZoidInstance,
    actions: Rc<RefCell<Option<ZoidActions>>>,
    window: Option<Window>,
}

impl PopupHandle for ZoidPopup {
    fn navigate(&self, url: &Url) -> Result<(), CheckoutError> {
        let actions = self.actions.borrow();
        let actions = actions
            .as_ref()
            .ok_or_else(|| CheckoutError::Embed("popup is not ready for navigation".into()))?;
        actions
            .navigate(url.as_str())
            .map(|_| ())
            .map_err(|e| CheckoutError::Embed(js_error_message(&e)))
    }

    fn close(&self) {
        match self.instance.close() {
            Ok(closing) => spawn_local(async move {
                // Closing an already closed popup rejects; nothing to do.
                let _ = JsFuture::from(closing).await;
            }),
            Err(err) => log::debug!("popup close failed: {}", js_error_message(&err)),
        }
    }

    fn window(&self) -> Option<Rc<dyn PopupWindow>> {
        self.window
            .clone()
            .map(|window| Rc::new(window) as Rc<dyn PopupWindow>)
    }
}
