//! Popup checkout lifecycle.
//!
//! [`PopupLifecycleCoordinator::run`] takes one checkout attempt from
//! "form submitted" to exactly one [`TerminalOutcome`]:
//!
//! 1. the payment intent request is put on the wire,
//! 2. the popup is opened in the same synchronous turn (popup blockers only
//!    allow `window.open` inside the user gesture),
//! 3. once the child is ready *and* the intent is known, the popup is sent to
//!    the hosted checkout page,
//! 4. the first terminal signal wins: completion, cancellation, child error,
//!    a confirmed window close, or a same-origin completion message.
//!
//! Every signal source funnels into one channel consumed by a single
//! session loop. Settling consumes the session, so an outcome can only be
//! produced once; anything arriving afterwards hits a closed channel and is
//! dropped.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::future::{self, FusedFuture, FutureExt, LocalBoxFuture};
use futures::{select_biased, StreamExt};
use serde_json::Value as JsonValue;
use url::Url;

use crate::error::CheckoutError;
use crate::intent::{FormContext, IntentBackend, PaymentIntent};
use crate::overlay::OverlayPresenter;
use crate::redirect::{completion_redirect, parse_safe_redirect};
use crate::watcher::{PopupWindow, WindowCloseWatcher};

/// Everything the popup side (or the page) can tell a running session.
#[derive(Clone, Debug, PartialEq)]
pub enum PopupSignal {
    /// The child page can accept a navigation command.
    Ready,
    /// Payment finished; carries the URL the parent should go to. An empty
    /// URL means the intent's thank-you page.
    Complete(String),
    /// The shopper cancelled inside the popup.
    Cancel,
    /// The child reported an error.
    ChildError(String),
    /// The embedding SDK lost the child. Either the window was closed or it
    /// navigated cross-origin; the coordinator finds out which.
    Closed,
    /// Opening the popup was refused after the fact.
    Blocked(String),
    /// A `message` event received by the parent window.
    WindowMessage { origin: String, data: JsonValue },
}

/// Sending half handed to popup hosts.
#[derive(Clone, Debug)]
pub struct SignalSink(UnboundedSender<PopupSignal>);

impl SignalSink {
    /// Deliver a signal. Signals sent after the session settled are dropped.
    pub fn emit(&self, signal: PopupSignal) {
        if let Err(err) = self.0.unbounded_send(signal) {
            log::debug!("dropping late popup signal {:?}", err.into_inner());
        }
    }

    fn same_session(&self, other: &SignalSink) -> bool {
        self.0.same_receiver(&other.0)
    }
}

fn signal_channel() -> (SignalSink, UnboundedReceiver<PopupSignal>) {
    let (tx, rx) = mpsc::unbounded();
    (SignalSink(tx), rx)
}

/// An opened checkout popup.
pub trait PopupHandle {
    /// Send the child to the hosted checkout page.
    fn navigate(&self, url: &Url) -> Result<(), CheckoutError>;
    /// Close the popup. Must tolerate an already closed window.
    fn close(&self);
    /// The real window handle, if the host managed to capture it.
    fn window(&self) -> Option<Rc<dyn PopupWindow>>;
}

/// Opens checkout popups.
pub trait PopupHost {
    /// Open the popup synchronously and report its life through `signals`.
    ///
    /// A refused popup is reported as [`CheckoutError::PopupBlocked`].
    fn open(&self, signals: SignalSink) -> Result<Box<dyn PopupHandle>, CheckoutError>;
}

/// The page hosting the checkout form.
pub trait ParentPage {
    /// `location.origin` of the page.
    fn origin(&self) -> String;
    fn navigate(&self, url: &Url);
}

/// Error display owned by the caller.
pub trait CheckoutNotices {
    fn show_error(&self, message: &str);
}

/// The single result of a checkout attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// Payment finished. `redirect` is the page the parent was sent to, or
    /// `None` when the offered URL was unsafe and navigation was skipped.
    Completed { redirect: Option<Url> },
    Cancelled,
    Error { reason: String },
    /// The popup could not be opened; the caller should submit the form the
    /// classic way.
    FallbackRedirect,
}

/// Future returned by [`PopupLifecycleCoordinator::run`].
pub type CheckoutFuture = LocalBoxFuture<'static, TerminalOutcome>;

/// Collaborators injected into the coordinator.
#[derive(Clone)]
pub struct Collaborators {
    pub host: Rc<dyn PopupHost>,
    pub backend: Rc<dyn IntentBackend>,
    pub overlay: Rc<dyn OverlayPresenter>,
    pub page: Rc<dyn ParentPage>,
    pub notices: Rc<dyn CheckoutNotices>,
    pub watcher: WindowCloseWatcher,
}

/// Texts and fallback targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Where the parent goes after a child error when the intent carried no
    /// order-pay URL.
    pub checkout_url: String,
    pub overlay_message: String,
    /// Shown through [`CheckoutNotices`] when no intent could be created.
    pub error_message: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            checkout_url: "/checkout/".to_string(),
            overlay_message: "One moment please, we are redirecting you.".to_string(),
            error_message: "An error occurred during checkout.".to_string(),
        }
    }
}

struct Shared {
    parts: Collaborators,
    settings: CoordinatorSettings,
    fallback_engaged: Cell<bool>,
    active: RefCell<Option<SignalSink>>,
}

/// Drives checkout popups. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PopupLifecycleCoordinator {
    shared: Rc<Shared>,
}

impl PopupLifecycleCoordinator {
    pub fn new(parts: Collaborators, settings: CoordinatorSettings) -> Self {
        Self {
            shared: Rc::new(Shared {
                parts,
                settings,
                fallback_engaged: Cell::new(false),
                active: RefCell::new(None),
            }),
        }
    }

    /// `false` once a blocked popup switched the page to classic submits.
    pub fn is_intercepting(&self) -> bool {
        !self.shared.fallback_engaged.get()
    }

    pub fn has_active_session(&self) -> bool {
        self.shared.active.borrow().is_some()
    }

    /// Take down the overlay a [`TerminalOutcome::FallbackRedirect`] left
    /// up, once the fallback submission failed or will not happen. Does
    /// nothing while a session is running.
    pub fn release_overlay(&self) {
        if self.has_active_session() {
            log::debug!("overlay belongs to the running checkout, keeping it");
            return;
        }
        self.shared.parts.overlay.hide();
    }

    /// Start a checkout attempt.
    ///
    /// Must be called synchronously from the submit/click handler. Returns
    /// `Ok(None)` when interception is disabled (after a fallback), in which
    /// case the caller lets the native submission through. `Err` is only
    /// returned for a form that cannot be encoded, before anything else
    /// happens.
    pub fn run(&self, form: FormContext) -> Result<Option<CheckoutFuture>, CheckoutError> {
        if !self.is_intercepting() {
            log::debug!("fallback redirect engaged, not intercepting");
            return Ok(None);
        }

        let parts = &self.shared.parts;
        let page_origin = parts.page.origin();
        let request = form.into_request(&page_origin)?;

        parts.overlay.show(&self.shared.settings.overlay_message);
        let intent = parts.backend.create_intent(request);

        let (sink, signals) = signal_channel();
        let popup = match parts.host.open(sink.clone()) {
            Ok(popup) => popup,
            Err(CheckoutError::PopupBlocked(reason)) => {
                log::warn!("Popup blocked, falling back to redirect: {reason}");
                self.shared.fallback_engaged.set(true);
                return Ok(Some(future::ready(TerminalOutcome::FallbackRedirect).boxed_local()));
            }
            Err(err) => {
                log::error!("Error opening checkout popup: {err}");
                parts.overlay.hide();
                let outcome = TerminalOutcome::Error {
                    reason: err.to_string(),
                };
                return Ok(Some(future::ready(outcome).boxed_local()));
            }
        };

        *self.shared.active.borrow_mut() = Some(sink.clone());
        let session = CheckoutSession {
            shared: self.shared.clone(),
            sink,
            popup,
            page_origin,
            intent: None,
            ready: false,
            navigated: false,
            parent_target: None,
        };
        Ok(Some(session.drive(intent, signals).boxed_local()))
    }

    /// Entry point for the page's `message` listener.
    ///
    /// During a session the message competes with the popup's own signals.
    /// Without one, a valid same-origin completion still sends the parent
    /// to its redirect URL.
    pub fn handle_window_message(&self, origin: &str, data: JsonValue) {
        let active = self.shared.active.borrow().clone();
        if let Some(sink) = active {
            sink.emit(PopupSignal::WindowMessage {
                origin: origin.to_string(),
                data,
            });
            return;
        }

        let parts = &self.shared.parts;
        if let Some(target) = completion_redirect(origin, &parts.page.origin(), &data) {
            parts.overlay.show(&self.shared.settings.overlay_message);
            parts.page.navigate(&target);
        }
    }
}

enum Step {
    Intent(Result<PaymentIntent, CheckoutError>),
    Signal(PopupSignal),
    WindowClosed,
    Detached,
}

enum Transition {
    Continue,
    WatchClose(Option<Rc<dyn PopupWindow>>),
    Settle(TerminalOutcome),
}

struct CheckoutSession {
    shared: Rc<Shared>,
    sink: SignalSink,
    popup: Box<dyn PopupHandle>,
    page_origin: String,
    intent: Option<PaymentIntent>,
    ready: bool,
    navigated: bool,
    parent_target: Option<Url>,
}

impl CheckoutSession {
    async fn drive(
        mut self,
        intent: LocalBoxFuture<'static, Result<PaymentIntent, CheckoutError>>,
        mut signals: UnboundedReceiver<PopupSignal>,
    ) -> TerminalOutcome {
        let mut intent = intent.fuse();
        let mut close_watch: future::Fuse<LocalBoxFuture<'static, ()>> = future::Fuse::terminated();

        loop {
            let step = select_biased! {
                signal = signals.select_next_some() => Step::Signal(signal),
                result = intent => Step::Intent(result),
                () = close_watch => Step::WindowClosed,
                complete => Step::Detached,
            };

            match self.advance(step) {
                Transition::Continue => {}
                Transition::WatchClose(window) => {
                    if close_watch.is_terminated() {
                        let watcher = self.shared.parts.watcher.clone();
                        close_watch = async move { watcher.wait_for_close(window).await }
                            .boxed_local()
                            .fuse();
                    }
                }
                Transition::Settle(outcome) => return self.settle(outcome),
            }
        }
    }

    fn advance(&mut self, step: Step) -> Transition {
        match step {
            Step::Intent(Ok(intent)) => {
                log::debug!("payment intent created, hosted checkout at {}", intent.redirect_url);
                self.intent = Some(intent);
                self.navigate_when_ready()
            }
            Step::Intent(Err(err)) => {
                log::error!("Payment intent failed: {err}");
                self.fail(err)
            }
            Step::Signal(signal) => self.on_signal(signal),
            Step::WindowClosed => {
                log::info!("checkout popup closed by the shopper");
                Transition::Settle(TerminalOutcome::Cancelled)
            }
            Step::Detached => Transition::Settle(TerminalOutcome::Error {
                reason: "checkout popup detached".to_string(),
            }),
        }
    }

    fn on_signal(&mut self, signal: PopupSignal) -> Transition {
        match signal {
            PopupSignal::Ready => {
                self.ready = true;
                self.navigate_when_ready()
            }
            PopupSignal::Complete(redirect) => self.complete(redirect),
            PopupSignal::Cancel => Transition::Settle(TerminalOutcome::Cancelled),
            PopupSignal::ChildError(reason) => {
                log::error!("Payment error from popup: {reason}");
                let fallback = self
                    .intent
                    .as_ref()
                    .and_then(|intent| intent.order_pay_url.clone())
                    .unwrap_or_else(|| self.shared.settings.checkout_url.clone());
                self.parent_target = parse_safe_redirect(&fallback, &self.page_origin);
                Transition::Settle(TerminalOutcome::Error { reason })
            }
            PopupSignal::Closed => {
                log::debug!("popup reported close, checking the real window");
                Transition::WatchClose(self.popup.window())
            }
            PopupSignal::Blocked(reason) => {
                log::warn!("Popup blocked, falling back to redirect: {reason}");
                self.shared.fallback_engaged.set(true);
                Transition::Settle(TerminalOutcome::FallbackRedirect)
            }
            PopupSignal::WindowMessage { origin, data } => {
                match completion_redirect(&origin, &self.page_origin, &data) {
                    Some(target) => {
                        self.parent_target = Some(target.clone());
                        Transition::Settle(TerminalOutcome::Completed {
                            redirect: Some(target),
                        })
                    }
                    None => Transition::Continue,
                }
            }
        }
    }

    /// A completion without a URL lands on the intent's thank-you page.
    fn complete(&mut self, redirect: String) -> Transition {
        let candidate = if redirect.trim().is_empty() {
            self.intent.as_ref().and_then(|intent| intent.thank_you_url.clone())
        } else {
            Some(redirect)
        };
        let Some(candidate) = candidate else {
            log::warn!("payment completed without a redirect target");
            return Transition::Settle(TerminalOutcome::Completed { redirect: None });
        };
        match parse_safe_redirect(&candidate, &self.page_origin) {
            Some(target) => {
                self.parent_target = Some(target.clone());
                Transition::Settle(TerminalOutcome::Completed {
                    redirect: Some(target),
                })
            }
            None => {
                log::warn!("ignoring unsafe completion redirect {candidate:?}");
                Transition::Settle(TerminalOutcome::Completed { redirect: None })
            }
        }
    }

    /// Join point: navigate only once both the intent and the ready signal
    /// are in.
    fn navigate_when_ready(&mut self) -> Transition {
        if self.navigated || !self.ready {
            return Transition::Continue;
        }
        let Some(intent) = &self.intent else {
            return Transition::Continue;
        };
        self.navigated = true;
        match self.popup.navigate(&intent.redirect_url) {
            Ok(()) => Transition::Continue,
            Err(err) => {
                log::error!("could not navigate popup: {err}");
                self.fail(err)
            }
        }
    }

    fn fail(&self, err: CheckoutError) -> Transition {
        self.shared.parts.notices.show_error(&self.shared.settings.error_message);
        Transition::Settle(TerminalOutcome::Error {
            reason: err.to_string(),
        })
    }

    fn settle(self, outcome: TerminalOutcome) -> TerminalOutcome {
        let parts = &self.shared.parts;
        {
            let mut active = self.shared.active.borrow_mut();
            if active.as_ref().is_some_and(|sink| sink.same_session(&self.sink)) {
                *active = None;
            }
        }

        if matches!(outcome, TerminalOutcome::Cancelled | TerminalOutcome::Error { .. }) {
            self.popup.close();
        }
        if outcome != TerminalOutcome::FallbackRedirect {
            parts.overlay.hide();
        }
        if let Some(target) = &self.parent_target {
            parts.page.navigate(target);
        }

        log::info!("checkout finished: {outcome:?}");
        outcome
    }
}
