//! A drop-in Yew pay button backed by the popup checkout.
//!
//! The component loads the zoid SDK, builds a coordinator from the page
//! configuration, and runs it straight from the button's click handler so
//! the popup opens inside the user gesture. Exactly one
//! [`TerminalOutcome`] is emitted per click that started a checkout.

use std::cell::RefCell;
use std::rc::Rc;

use wasm_bindgen_futures::spawn_local;
use yew::prelude::*;

use crate::browser::browser_coordinator;
use crate::config::CheckoutConfig;
use crate::coordinator::{CheckoutNotices, TerminalOutcome};
use crate::intent::FormContext;
use crate::interop::use_zoid_sdk;

/// Properties for the [`TapTreeCheckout`] component.
///
/// # Fields
///
/// * `config` – Page configuration, usually from [`CheckoutConfig::from_globals`].
/// * `endpoint` – Intent endpoint; defaults to `config.wc.checkout_url`.
/// * `fields` – Form fields posted to the endpoint.
/// * `on_outcome` – Invoked once per checkout with its [`TerminalOutcome`].
///   [`TerminalOutcome::FallbackRedirect`] means the app should send the
///   shopper through the classic redirect flow; the overlay is already
///   gone by then.
/// * `on_error` – Invoked with the shopper-facing message when no payment
///   intent could be created.
/// * `button_label` – Override the button text (default: `"Pay Now"`).
/// * `children` – Extra Yew nodes (e.g. order summary) rendered above the button.
#[derive(Properties, PartialEq, Clone)]
pub struct TapTreeCheckoutProps {
    pub config: Rc<CheckoutConfig>,
    #[prop_or_default]
    pub endpoint: Option<String>,
    #[prop_or_default]
    pub fields: Vec<(String, String)>,
    #[prop_or_default]
    pub on_outcome: Callback<TerminalOutcome>,
    #[prop_or_default]
    pub on_error: Callback<String>,
    #[prop_or_default]
    pub button_label: Option<String>,
    #[prop_or_default]
    pub children: Children,
}

/// Routes coordinator notices to whatever callback the latest render installed.
struct CallbackNotices(Rc<RefCell<Callback<String>>>);

impl CheckoutNotices for CallbackNotices {
    fn show_error(&self, message: &str) {
        let notify = self.0.borrow().clone();
        notify.emit(message.to_string());
    }
}

/// Yew function component rendering a TapTree pay button.
///
/// # Example
///
/// ```rust,ignore
/// use std::rc::Rc;
/// use yew::prelude::*;
/// use taptree_checkout::{CheckoutConfig, TapTreeCheckout, TerminalOutcome};
///
/// #[function_component(App)]
/// fn app() -> Html {
///     let config = Rc::new(CheckoutConfig::from_globals().ok().flatten().unwrap_or_default());
///     let on_outcome = Callback::from(|outcome: TerminalOutcome| {
///         log::info!("checkout finished: {:?}", outcome);
///     });
///
///     html! {
///         <TapTreeCheckout
///             config={config}
///             fields={vec![("billing_email".to_string(), "jane@example.com".to_string())]}
///             on_outcome={on_outcome}
///             button_label={Some("Complete Purchase".into())}
///         >
///             <p>{ "Your order: Awesome T-shirt – €25.00" }</p>
///         </TapTreeCheckout>
///     }
/// }
/// ```
#[function_component(TapTreeCheckout)]
pub fn taptree_checkout(props: &TapTreeCheckoutProps) -> Html {
    let sdk_ready = use_zoid_sdk(props.config.zoid_sdk_url().to_string());
    let error = use_state(|| None::<String>);
    let loading = use_state(|| false);

    // The coordinator outlives renders; its notices follow the current props.
    let notify = use_mut_ref(Callback::<String>::default);
    {
        let error = error.clone();
        let on_error = props.on_error.clone();
        *notify.borrow_mut() = Callback::from(move |message: String| {
            error.set(Some(message.clone()));
            on_error.emit(message);
        });
    }

    let coordinator = {
        let notify = notify.clone();
        use_memo(props.config.clone(), move |config| {
            browser_coordinator(config, Rc::new(CallbackNotices(notify)))
        })
    };

    let on_click = {
        let loading = loading.clone();
        let error = error.clone();
        let on_outcome = props.on_outcome.clone();
        let on_error = props.on_error.clone();
        let endpoint = props
            .endpoint
            .clone()
            .unwrap_or_else(|| props.config.wc.checkout_url.clone());
        let fields = props.fields.clone();

        Callback::from(move |_: MouseEvent| {
            if *loading {
                return;
            }
            error.set(None);

            // Synchronous: the popup must open inside this click.
            match coordinator.run(FormContext::new(endpoint.clone(), fields.clone())) {
                Ok(Some(checkout)) => {
                    loading.set(true);
                    let loading = loading.clone();
                    let on_outcome = on_outcome.clone();
                    let coordinator = coordinator.clone();
                    spawn_local(async move {
                        let outcome = checkout.await;
                        // No form resubmit follows here; the app takes over.
                        if outcome == TerminalOutcome::FallbackRedirect {
                            coordinator.release_overlay();
                        }
                        loading.set(false);
                        on_outcome.emit(outcome);
                    });
                }
                Ok(None) => on_outcome.emit(TerminalOutcome::FallbackRedirect),
                Err(err) => {
                    log::error!("Error during checkout: {err}");
                    error.set(Some(err.to_string()));
                    on_error.emit(err.to_string());
                }
            }
        })
    };

    html! {
        <div class="flex flex-col gap-4 items-center w-full">
            { for props.children.iter() }
            <button
                type="button"
                onclick={on_click}
                disabled={!sdk_ready || *loading}
                class="rounded bg-blue-600 text-white font-semibold px-5 py-2 shadow hover:bg-blue-700 transition disabled:opacity-50">
                {
                    if *loading {
                        "Processing…".to_string()
                    } else {
                        props.button_label.clone().unwrap_or_else(|| "Pay Now".to_string())
                    }
                }
            </button>
            {
                if let Some(msg) = &*error {
                    html!{ <div class="text-red-500 text-sm">{ msg }</div> }
                } else {
                    Html::default()
                }
            }
        </div>
    }
}
