//! WooCommerce checkout form integration.
//!
//! Intercepts the checkout (and order-pay) form submission and runs it
//! through the popup coordinator. Falls through to WooCommerce's own
//! redirect flow on mobile, for redirect-mode gateways, when the zoid SDK
//! is unavailable, and once a blocked popup engaged fallback mode.

use std::rc::Rc;

use gloo_utils::format::JsValueSerdeExt;
use serde_json::Value as JsonValue;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;
use web_sys::js_sys::{try_iter, Array};
use web_sys::{
    AddEventListenerOptions, CustomEvent, CustomEventInit, Document, Element, Event, FormData, HtmlElement,
    HtmlFormElement, HtmlInputElement, MessageEvent,
};

use crate::bindings::{jquery, jquery_available, zoid_available};
use crate::browser::{browser_coordinator, BrowserPage};
use crate::config::{CheckoutConfig, PAY_FOR_ORDER_ENDPOINT};
use crate::coordinator::{CheckoutNotices, ParentPage, PopupLifecycleCoordinator, TerminalOutcome};
use crate::error::{js_error, js_error_message, CheckoutError};
use crate::intent::FormContext;
use crate::interop::load_zoid_sdk;

pub const FORM_SELECTOR: &str = "form.checkout, form#order_review";
pub const GATEWAY_PREFIX: &str = "taptree_wc_gateway_";
const ORDER_REVIEW_ID: &str = "order_review";
const PROCESSING_CLASS: &str = "processing";
const STALE_NOTICES: &str = ".woocommerce-NoticeGroup-checkout, .woocommerce-error, .woocommerce-message";
const NOTICE_CLASSES: &str = "woocommerce-NoticeGroup woocommerce-NoticeGroup-checkout";
/// Fields WooCommerce re-validates after a failed checkout.
const REVALIDATED_FIELDS: &str = ".input-text, select, input:checkbox";
const CHECKOUT_ERROR_EVENT: &str = "checkout_error";

const MOBILE_AGENT_TOKENS: [&str; 8] = [
    "android",
    "webos",
    "iphone",
    "ipad",
    "ipod",
    "blackberry",
    "iemobile",
    "opera mini",
];

/// Mobile browsers get WooCommerce's native redirect instead of a popup.
pub fn is_mobile_user_agent(user_agent: &str) -> bool {
    let user_agent = user_agent.to_ascii_lowercase();
    MOBILE_AGENT_TOKENS.iter().any(|token| user_agent.contains(token))
}

pub fn is_taptree_gateway(payment_method: &str) -> bool {
    payment_method.starts_with(GATEWAY_PREFIX)
}

/// WooCommerce's validation hooks for a submission with `payment_method`.
fn place_order_hooks(payment_method: &str) -> [String; 2] {
    [
        "checkout_place_order".to_string(),
        format!("checkout_place_order_{payment_method}"),
    ]
}

fn document() -> Result<Document, CheckoutError> {
    web_sys::window()
        .and_then(|win| win.document())
        .ok_or_else(|| CheckoutError::Js("no document".into()))
}

fn body() -> Result<HtmlElement, CheckoutError> {
    document()?
        .body()
        .ok_or_else(|| CheckoutError::Js("no body".into()))
}

fn is_mobile() -> bool {
    web_sys::window()
        .and_then(|win| win.navigator().user_agent().ok())
        .is_some_and(|ua| is_mobile_user_agent(&ua))
}

/// Attach the popup checkout to the page's checkout form, if there is one.
pub fn mount(config: CheckoutConfig) -> Result<(), CheckoutError> {
    let Some(form) = document()?.query_selector(FORM_SELECTOR).map_err(js_error)? else {
        log::debug!("no checkout form on this page");
        return Ok(());
    };
    let form: HtmlFormElement = form
        .dyn_into()
        .map_err(|_| CheckoutError::Config("checkout form is not a <form>".into()))?;

    let sdk_url = config.zoid_sdk_url().to_string();
    spawn_local(async move {
        if let Err(err) = load_zoid_sdk(&sdk_url).await {
            log::error!("{err}; popup checkout disabled");
        }
    });

    CheckoutFormHandler::new(form, Rc::new(config)).attach()
}

/// Error notices rendered the way WooCommerce renders its own.
pub struct WooNotices {
    form: HtmlFormElement,
}

impl WooNotices {
    pub fn new(form: HtmlFormElement) -> Self {
        Self { form }
    }

    fn try_show(&self, message: &str) -> Result<(), CheckoutError> {
        let document = document()?;

        let stale = document.query_selector_all(STALE_NOTICES).map_err(js_error)?;
        for index in 0..stale.length() {
            if let Some(element) = stale.item(index).and_then(|node| node.dyn_into::<Element>().ok()) {
                element.remove();
            }
        }

        let notice = document.create_element("div").map_err(js_error)?;
        notice.set_class_name(NOTICE_CLASSES);
        notice.set_text_content(Some(message));
        self.form.prepend_with_node_1(&notice).map_err(js_error)?;

        if jquery_available() {
            jquery(&self.form)
                .map_err(js_error)?
                .find(REVALIDATED_FIELDS)
                .trigger("validate", &JsValue::UNDEFINED)
                .trigger("blur", &JsValue::UNDEFINED);
        }
        notice.scroll_into_view();
        announce_checkout_error(message)
    }
}

impl CheckoutNotices for WooNotices {
    fn show_error(&self, message: &str) {
        if let Err(err) = self.try_show(message) {
            log::error!("could not render checkout error {message:?}: {err}");
        }
    }
}

/// Fire `checkout_error` on `document.body`. jQuery handlers receive the
/// message as their second argument, native listeners as `event.detail`.
fn announce_checkout_error(message: &str) -> Result<(), CheckoutError> {
    let body = body()?;
    if jquery_available() {
        let extra = Array::of1(&JsValue::from_str(message));
        jquery(&body).map_err(js_error)?.trigger(CHECKOUT_ERROR_EVENT, &extra);
        return Ok(());
    }
    let init = CustomEventInit::new();
    init.set_bubbles(true);
    init.set_detail(&JsValue::from_str(message));
    let event = CustomEvent::new_with_event_init_dict(CHECKOUT_ERROR_EVENT, &init).map_err(js_error)?;
    body.dispatch_event(&event).map_err(js_error)?;
    Ok(())
}

/// Run `release` on the next `checkout_error`, however it is fired.
fn release_on_checkout_error(release: Rc<dyn Fn()>) -> Result<(), CheckoutError> {
    let body = body()?;
    let handler = Closure::once_into_js(move || release());
    if jquery_available() {
        jquery(&body).map_err(js_error)?.one(CHECKOUT_ERROR_EVENT, &handler);
    } else {
        let options = AddEventListenerOptions::new();
        options.set_once(true);
        body.add_event_listener_with_callback_and_add_event_listener_options(
            CHECKOUT_ERROR_EVENT,
            handler.unchecked_ref(),
            &options,
        )
        .map_err(js_error)?;
    }
    Ok(())
}

/// Capture-phase submit handler for the checkout form.
pub struct CheckoutFormHandler {
    form: HtmlFormElement,
    config: Rc<CheckoutConfig>,
    coordinator: PopupLifecycleCoordinator,
}

impl CheckoutFormHandler {
    pub fn new(form: HtmlFormElement, config: Rc<CheckoutConfig>) -> Rc<Self> {
        let notices = Rc::new(WooNotices::new(form.clone()));
        let coordinator = browser_coordinator(&config, notices);
        Rc::new(Self {
            form,
            config,
            coordinator,
        })
    }

    /// Listen for submits (capture phase, ahead of WooCommerce's jQuery
    /// handlers) and for completion messages from the fallback page.
    pub fn attach(self: Rc<Self>) -> Result<(), CheckoutError> {
        let window = web_sys::window().ok_or_else(|| CheckoutError::Js("no window".into()))?;

        let on_message = {
            let coordinator = self.coordinator.clone();
            Closure::<dyn Fn(MessageEvent)>::new(move |event: MessageEvent| {
                // Foreign messages are never inspected.
                if event.origin() != BrowserPage.origin() {
                    return;
                }
                let data = event.data().into_serde::<JsonValue>().unwrap_or(JsonValue::Null);
                coordinator.handle_window_message(&event.origin(), data);
            })
        };
        window
            .add_event_listener_with_callback("message", on_message.as_ref().unchecked_ref())
            .map_err(js_error)?;
        on_message.forget();

        let form = self.form.clone();
        let on_submit = Closure::<dyn Fn(Event)>::new(move |event: Event| self.handle_submit(&event));
        form.add_event_listener_with_callback_and_bool("submit", on_submit.as_ref().unchecked_ref(), true)
            .map_err(js_error)?;
        on_submit.forget();
        Ok(())
    }

    fn handle_submit(&self, event: &Event) {
        if !self.coordinator.is_intercepting() {
            return;
        }
        let Some(method) = self.selected_payment_method() else {
            return;
        };
        if !is_taptree_gateway(&method) || self.config.is_redirect_gateway(&method) {
            return;
        }
        if is_mobile() || !zoid_available() {
            return;
        }

        event.prevent_default();
        event.stop_propagation();
        event.stop_immediate_propagation();

        let classes = self.form.class_list();
        if classes.contains(PROCESSING_CLASS) || !self.place_order_hooks_pass(&method) {
            return;
        }
        if let Err(err) = classes.add_1(PROCESSING_CLASS) {
            log::debug!("could not mark form as processing: {}", js_error_message(&err));
        }

        let started = self
            .form_context()
            .and_then(|context| self.coordinator.run(context));
        match started {
            Ok(Some(checkout)) => {
                let form = self.form.clone();
                let coordinator = self.coordinator.clone();
                let release_overlay: Rc<dyn Fn()> = Rc::new(move || coordinator.release_overlay());
                spawn_local(async move {
                    let outcome = checkout.await;
                    finish(&form, &outcome, release_overlay);
                });
            }
            Ok(None) => release(&self.form),
            Err(err) => {
                log::error!("Error during form submission: {err}");
                release(&self.form);
            }
        }
    }

    fn selected_payment_method(&self) -> Option<String> {
        self.form
            .query_selector("input[name=\"payment_method\"]:checked")
            .ok()
            .flatten()
            .and_then(|input| input.dyn_into::<HtmlInputElement>().ok())
            .map(|input| input.value())
    }

    /// WooCommerce's `checkout_place_order` hooks; a handler returning
    /// `false` vetoes the submission.
    fn place_order_hooks_pass(&self, method: &str) -> bool {
        if !jquery_available() {
            return true;
        }
        let form = match jquery(&self.form) {
            Ok(form) => form,
            Err(err) => {
                log::debug!("jQuery unavailable: {}", js_error_message(&err));
                return true;
            }
        };
        let vetoed = place_order_hooks(method)
            .iter()
            .any(|hook| form.trigger_handler(hook).as_bool() == Some(false));
        !vetoed
    }

    fn form_context(&self) -> Result<FormContext, CheckoutError> {
        let data = FormData::new_with_form(&self.form).map_err(js_error)?;
        let entries = try_iter(&data)
            .map_err(js_error)?
            .ok_or_else(|| CheckoutError::MalformedForm("form data is not iterable".into()))?;

        let mut fields = Vec::new();
        for entry in entries {
            let pair: Array = entry.map_err(js_error)?.unchecked_into();
            // File inputs are skipped, as jQuery's serialize() does.
            if let (Some(name), Some(value)) = (pair.get(0).as_string(), pair.get(1).as_string()) {
                fields.push((name, value));
            }
        }

        if self.form.id() == ORDER_REVIEW_ID {
            let modal = &self.config.modal;
            Ok(FormContext::new(PAY_FOR_ORDER_ENDPOINT, fields)
                .with_field("order_id", modal.order_id.as_str())
                .with_field("key", modal.key.as_str())
                .with_field("security", modal.security.as_str()))
        } else {
            Ok(FormContext::new(self.config.wc.checkout_url.as_str(), fields))
        }
    }
}

fn release(form: &HtmlFormElement) {
    if let Err(err) = form.class_list().remove_1(PROCESSING_CLASS) {
        log::debug!("could not clear processing state: {}", js_error_message(&err));
    }
}

/// The overlay stays up through a fallback submit and comes down when
/// WooCommerce rejects it or no submission happens at all.
fn finish(form: &HtmlFormElement, outcome: &TerminalOutcome, release_overlay: Rc<dyn Fn()>) {
    release(form);
    if *outcome != TerminalOutcome::FallbackRedirect {
        return;
    }
    if let Err(err) = release_on_checkout_error(release_overlay.clone()) {
        log::debug!("cannot watch for checkout errors: {err}");
    }
    if !resubmit(form) {
        release_overlay();
    }
}

/// Hand the form to WooCommerce. Interception is off by now, so the submit
/// passes through. `false` when no submission will take place.
fn resubmit(form: &HtmlFormElement) -> bool {
    match form.request_submit() {
        // An invalid form blocks the submit without reporting it.
        Ok(()) => form.check_validity(),
        Err(err) => {
            log::error!("fallback submit failed: {}", js_error_message(&err));
            false
        }
    }
}
