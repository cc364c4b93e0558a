//! End-to-end lifecycle of a checkout attempt, driven with in-memory
//! collaborators on a single-threaded executor.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::LocalSpawnExt;
use serde_json::json;
use url::Url;

use taptree_checkout::intent::IntentRequest;
use taptree_checkout::{
    CheckoutError, CheckoutNotices, Collaborators, CoordinatorSettings, FormContext, IntentBackend,
    OverlayPresenter, ParentPage, PaymentIntent, PopupHandle, PopupHost, PopupLifecycleCoordinator, PopupSignal,
    PopupWindow, SignalSink, TerminalOutcome, Timer, WindowCloseWatcher,
};

const ORIGIN: &str = "https://shop.example";
const HOSTED_CHECKOUT: &str = "https://checkout.taptree.org/pay/tx_123";
const ORDER_PAY: &str = "https://shop.example/checkout/order-pay/42/?pay_for_order=true&key=wc_order_x";
const THANK_YOU: &str = "https://shop.example/checkout/order-received/42/";

type Log = Rc<RefCell<Vec<String>>>;

fn record(log: &Log, entry: impl Into<String>) {
    log.borrow_mut().push(entry.into());
}

struct FakeWindow {
    closed: Cell<bool>,
}

impl PopupWindow for FakeWindow {
    fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

struct MockPopup {
    log: Log,
    window: Option<Rc<FakeWindow>>,
}

impl PopupHandle for MockPopup {
    fn navigate(&self, url: &Url) -> Result<(), CheckoutError> {
        record(&self.log, format!("popup navigate {url}"));
        Ok(())
    }

    fn close(&self) {
        record(&self.log, "popup close");
    }

    fn window(&self) -> Option<Rc<dyn PopupWindow>> {
        self.window.clone().map(|w| w as Rc<dyn PopupWindow>)
    }
}

struct MockHost {
    log: Log,
    opens: Cell<usize>,
    fail_with: RefCell<Option<CheckoutError>>,
    window: RefCell<Option<Rc<FakeWindow>>>,
    sinks: RefCell<Vec<SignalSink>>,
}

impl PopupHost for MockHost {
    fn open(&self, signals: SignalSink) -> Result<Box<dyn PopupHandle>, CheckoutError> {
        self.opens.set(self.opens.get() + 1);
        record(&self.log, "popup open");
        if let Some(err) = self.fail_with.borrow().clone() {
            return Err(err);
        }
        self.sinks.borrow_mut().push(signals);
        Ok(Box::new(MockPopup {
            log: self.log.clone(),
            window: self.window.borrow().clone(),
        }))
    }
}

type IntentReply = oneshot::Sender<Result<PaymentIntent, CheckoutError>>;

struct MockBackend {
    log: Log,
    requests: RefCell<Vec<IntentRequest>>,
    replies: RefCell<Vec<IntentReply>>,
}

impl IntentBackend for MockBackend {
    fn create_intent(&self, request: IntentRequest) -> LocalBoxFuture<'static, Result<PaymentIntent, CheckoutError>> {
        record(&self.log, "intent request");
        self.requests.borrow_mut().push(request);
        let (tx, rx) = oneshot::channel();
        self.replies.borrow_mut().push(tx);
        rx.map(|reply| reply.unwrap_or_else(|_| Err(CheckoutError::IntentCreation("request dropped".into()))))
            .boxed_local()
    }
}

struct MockOverlay {
    log: Log,
    shown: Cell<bool>,
}

impl OverlayPresenter for MockOverlay {
    fn show(&self, message: &str) {
        record(&self.log, format!("overlay show {message}"));
        self.shown.set(true);
    }

    fn hide(&self) {
        record(&self.log, "overlay hide");
        self.shown.set(false);
    }
}

struct MockPage {
    visited: RefCell<Vec<Url>>,
}

impl ParentPage for MockPage {
    fn origin(&self) -> String {
        ORIGIN.to_string()
    }

    fn navigate(&self, url: &Url) {
        self.visited.borrow_mut().push(url.clone());
    }
}

#[derive(Default)]
struct MockNotices {
    shown: RefCell<Vec<String>>,
}

impl CheckoutNotices for MockNotices {
    fn show_error(&self, message: &str) {
        self.shown.borrow_mut().push(message.to_string());
    }
}

#[derive(Default)]
struct ManualTimer {
    pending: RefCell<Vec<oneshot::Sender<()>>>,
}

impl ManualTimer {
    fn tick(&self) {
        for tx in self.pending.borrow_mut().drain(..) {
            let _ = tx.send(());
        }
    }
}

impl Timer for ManualTimer {
    fn sleep(&self, _duration: Duration) -> LocalBoxFuture<'static, ()> {
        let (tx, rx) = oneshot::channel();
        self.pending.borrow_mut().push(tx);
        rx.map(|_| ()).boxed_local()
    }
}

type Outcome = Rc<RefCell<Option<TerminalOutcome>>>;

struct Harness {
    pool: LocalPool,
    log: Log,
    host: Rc<MockHost>,
    backend: Rc<MockBackend>,
    overlay: Rc<MockOverlay>,
    page: Rc<MockPage>,
    notices: Rc<MockNotices>,
    timer: Rc<ManualTimer>,
    settings: CoordinatorSettings,
    coordinator: PopupLifecycleCoordinator,
}

impl Harness {
    fn new() -> Self {
        let log: Log = Rc::default();
        let host = Rc::new(MockHost {
            log: log.clone(),
            opens: Cell::new(0),
            fail_with: RefCell::new(None),
            window: RefCell::new(Some(Rc::new(FakeWindow {
                closed: Cell::new(false),
            }))),
            sinks: RefCell::new(Vec::new()),
        });
        let backend = Rc::new(MockBackend {
            log: log.clone(),
            requests: RefCell::new(Vec::new()),
            replies: RefCell::new(Vec::new()),
        });
        let overlay = Rc::new(MockOverlay {
            log: log.clone(),
            shown: Cell::new(false),
        });
        let page = Rc::new(MockPage {
            visited: RefCell::new(Vec::new()),
        });
        let notices = Rc::new(MockNotices::default());
        let timer = Rc::new(ManualTimer::default());
        let settings = CoordinatorSettings {
            checkout_url: "/checkout/".to_string(),
            overlay_message: "One moment please".to_string(),
            error_message: "An error occurred during checkout.".to_string(),
        };

        let coordinator = PopupLifecycleCoordinator::new(
            Collaborators {
                host: host.clone(),
                backend: backend.clone(),
                overlay: overlay.clone(),
                page: page.clone(),
                notices: notices.clone(),
                watcher: WindowCloseWatcher::new(timer.clone()),
            },
            settings.clone(),
        );

        Self {
            pool: LocalPool::new(),
            log,
            host,
            backend,
            overlay,
            page,
            notices,
            timer,
            settings,
            coordinator,
        }
    }

    fn form() -> FormContext {
        FormContext::new(
            "/?wc-ajax=checkout",
            vec![
                ("billing_email".to_string(), "jane@example.com".to_string()),
                ("payment_method".to_string(), "taptree_wc_gateway_card".to_string()),
            ],
        )
    }

    /// Run a checkout and collect its outcome once the pool gets to it.
    fn start(&mut self) -> Outcome {
        let checkout = self
            .coordinator
            .run(Self::form())
            .expect("form encodes")
            .expect("interception active");
        let outcome: Outcome = Rc::default();
        let slot = outcome.clone();
        self.pool
            .spawner()
            .spawn_local(async move {
                let result = checkout.await;
                assert!(slot.borrow_mut().replace(result).is_none(), "outcome produced twice");
            })
            .unwrap();
        outcome
    }

    fn settle(&mut self) {
        self.pool.run_until_stalled();
    }

    fn reply(&mut self, result: Result<PaymentIntent, CheckoutError>) {
        let tx = self.backend.replies.borrow_mut().remove(0);
        tx.send(result).unwrap();
        self.settle();
    }

    fn signal(&mut self, signal: PopupSignal) {
        self.sink().emit(signal);
        self.settle();
    }

    fn sink(&self) -> SignalSink {
        self.host.sinks.borrow().last().cloned().expect("popup opened")
    }

    fn popup_window(&self) -> Rc<FakeWindow> {
        self.host.window.borrow().clone().expect("window handle")
    }

    fn logged(&self, entry: &str) -> usize {
        self.log.borrow().iter().filter(|e| e.as_str() == entry).count()
    }

    fn visited(&self) -> Vec<String> {
        self.page.visited.borrow().iter().map(Url::to_string).collect()
    }
}

fn intent() -> PaymentIntent {
    PaymentIntent {
        redirect_url: Url::parse(HOSTED_CHECKOUT).unwrap(),
        order_pay_url: Some(ORDER_PAY.to_string()),
        thank_you_url: Some(THANK_YOU.to_string()),
    }
}

fn outcome_of(outcome: &Outcome) -> Option<TerminalOutcome> {
    outcome.borrow().clone()
}

#[test]
fn successful_checkout_navigates_parent_to_thank_you_page() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();
    assert!(h.overlay.shown.get());
    assert!(h.coordinator.has_active_session());

    h.signal(PopupSignal::Ready);
    assert_eq!(h.logged(&format!("popup navigate {HOSTED_CHECKOUT}")), 0);

    h.reply(Ok(intent()));
    assert_eq!(h.logged(&format!("popup navigate {HOSTED_CHECKOUT}")), 1);
    assert_eq!(outcome_of(&outcome), None);

    h.signal(PopupSignal::Complete(THANK_YOU.to_string()));
    assert_eq!(
        outcome_of(&outcome),
        Some(TerminalOutcome::Completed {
            redirect: Some(Url::parse(THANK_YOU).unwrap())
        })
    );
    assert_eq!(h.visited(), vec![THANK_YOU.to_string()]);
    assert!(!h.overlay.shown.get());
    assert_eq!(h.logged("popup close"), 0);
    assert!(!h.coordinator.has_active_session());
}

#[test]
fn intent_request_and_popup_open_happen_inside_the_call() {
    let h = Harness::new();
    let _checkout = h.coordinator.run(Harness::form()).unwrap().unwrap();

    // Nothing has been polled yet.
    let log = h.log.borrow().clone();
    assert_eq!(
        log,
        vec![
            "overlay show One moment please".to_string(),
            "intent request".to_string(),
            "popup open".to_string(),
        ]
    );

    let request = &h.backend.requests.borrow()[0];
    assert_eq!(request.url.as_str(), "https://shop.example/?wc-ajax=checkout");
    assert_eq!(
        request.body,
        "billing_email=jane%40example.com&payment_method=taptree_wc_gateway_card"
    );
}

#[test]
fn intent_before_ready_navigates_once_ready_arrives() {
    let mut h = Harness::new();
    let _outcome = h.start();
    h.settle();

    h.reply(Ok(intent()));
    assert_eq!(h.logged(&format!("popup navigate {HOSTED_CHECKOUT}")), 0);

    h.signal(PopupSignal::Ready);
    h.signal(PopupSignal::Ready);
    assert_eq!(h.logged(&format!("popup navigate {HOSTED_CHECKOUT}")), 1);
}

#[test]
fn intent_failure_resolves_error_without_waiting_for_ready() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();

    h.reply(Err(CheckoutError::IntentCreation("Invalid response from server".into())));
    assert!(matches!(outcome_of(&outcome), Some(TerminalOutcome::Error { .. })));
    assert_eq!(*h.notices.shown.borrow(), vec![h.settings.error_message.clone()]);
    assert_eq!(h.logged("popup close"), 1);
    assert!(!h.overlay.shown.get());
    assert!(h.visited().is_empty());
    assert!(h.coordinator.is_intercepting());
}

#[test]
fn cancel_closes_popup_and_releases_overlay() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();
    h.signal(PopupSignal::Ready);
    h.reply(Ok(intent()));

    h.signal(PopupSignal::Cancel);
    assert_eq!(outcome_of(&outcome), Some(TerminalOutcome::Cancelled));
    assert_eq!(h.logged("popup close"), 1);
    assert!(!h.overlay.shown.get());
    assert!(h.visited().is_empty());
    assert!(h.notices.shown.borrow().is_empty());
}

#[test]
fn child_error_sends_parent_to_order_pay_page() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();
    h.signal(PopupSignal::Ready);
    h.reply(Ok(intent()));

    h.signal(PopupSignal::ChildError("payment declined".into()));
    assert_eq!(
        outcome_of(&outcome),
        Some(TerminalOutcome::Error {
            reason: "payment declined".into()
        })
    );
    assert_eq!(h.visited(), vec![ORDER_PAY.to_string()]);
    assert_eq!(h.logged("popup close"), 1);
    assert!(!h.overlay.shown.get());
}

#[test]
fn child_error_before_intent_falls_back_to_checkout_url() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();

    h.signal(PopupSignal::ChildError("lounge crashed".into()));
    assert!(matches!(outcome_of(&outcome), Some(TerminalOutcome::Error { .. })));
    assert_eq!(h.visited(), vec!["https://shop.example/checkout/".to_string()]);
}

#[test]
fn ambiguous_close_waits_for_the_window_to_really_close() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();
    h.signal(PopupSignal::Ready);
    h.reply(Ok(intent()));

    // Cross-origin navigation looks like a close to the embedding SDK.
    h.signal(PopupSignal::Closed);
    assert_eq!(outcome_of(&outcome), None);

    h.timer.tick();
    h.settle();
    assert_eq!(outcome_of(&outcome), None);

    h.popup_window().closed.set(true);
    h.timer.tick();
    h.settle();
    assert_eq!(outcome_of(&outcome), Some(TerminalOutcome::Cancelled));
    assert!(!h.overlay.shown.get());
}

#[test]
fn completion_after_ambiguous_close_still_wins() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();
    h.signal(PopupSignal::Ready);
    h.reply(Ok(intent()));

    h.signal(PopupSignal::Closed);
    h.timer.tick();
    h.settle();
    h.signal(PopupSignal::Closed);

    h.signal(PopupSignal::Complete(THANK_YOU.to_string()));
    assert!(matches!(outcome_of(&outcome), Some(TerminalOutcome::Completed { .. })));
    assert_eq!(h.visited(), vec![THANK_YOU.to_string()]);
}

#[test]
fn close_without_window_handle_cancels() {
    let mut h = Harness::new();
    *h.host.window.borrow_mut() = None;
    let outcome = h.start();
    h.settle();

    h.signal(PopupSignal::Closed);
    assert_eq!(outcome_of(&outcome), Some(TerminalOutcome::Cancelled));
    assert!(h.timer.pending.borrow().is_empty());
}

#[test]
fn close_after_completion_changes_nothing() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();
    h.signal(PopupSignal::Ready);
    h.reply(Ok(intent()));
    h.signal(PopupSignal::Complete(THANK_YOU.to_string()));

    h.popup_window().closed.set(true);
    h.signal(PopupSignal::Closed);
    h.signal(PopupSignal::Cancel);
    h.signal(PopupSignal::ChildError("late".into()));

    assert!(matches!(outcome_of(&outcome), Some(TerminalOutcome::Completed { .. })));
    assert_eq!(h.visited(), vec![THANK_YOU.to_string()]);
    assert_eq!(h.logged("popup close"), 0);
    assert!(h.notices.shown.borrow().is_empty());
}

#[test]
fn first_terminal_signal_wins() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();

    let sink = h.sink();
    sink.emit(PopupSignal::Complete(THANK_YOU.to_string()));
    sink.emit(PopupSignal::Cancel);
    sink.emit(PopupSignal::ChildError("too late".into()));
    h.settle();

    assert!(matches!(outcome_of(&outcome), Some(TerminalOutcome::Completed { .. })));
    assert_eq!(h.visited(), vec![THANK_YOU.to_string()]);
    assert_eq!(h.logged("popup close"), 0);
}

#[test]
fn unsafe_completion_url_is_not_followed() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();

    h.signal(PopupSignal::Complete("javascript:alert(document.cookie)".into()));
    assert_eq!(outcome_of(&outcome), Some(TerminalOutcome::Completed { redirect: None }));
    assert!(h.visited().is_empty());
    assert!(!h.overlay.shown.get());
}

#[test]
fn relative_completion_url_resolves_against_origin() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();

    h.signal(PopupSignal::Complete("/checkout/order-received/42/".into()));
    assert_eq!(
        outcome_of(&outcome),
        Some(TerminalOutcome::Completed {
            redirect: Some(Url::parse(THANK_YOU).unwrap())
        })
    );
}

#[test]
fn blocked_popup_engages_fallback_once() {
    let mut h = Harness::new();
    *h.host.fail_with.borrow_mut() = Some(CheckoutError::PopupBlocked("Popup blocked by browser".into()));

    let outcome = h.start();
    h.settle();
    assert_eq!(outcome_of(&outcome), Some(TerminalOutcome::FallbackRedirect));
    // The same-tab submission follows, so the overlay stays up.
    assert!(h.overlay.shown.get());
    assert!(!h.coordinator.is_intercepting());

    assert!(h.coordinator.run(Harness::form()).unwrap().is_none());
    assert_eq!(h.host.opens.get(), 1);
    assert_eq!(h.backend.requests.borrow().len(), 1);
}

#[test]
fn late_blocked_signal_engages_fallback() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();

    h.signal(PopupSignal::Blocked("Popup blocked".into()));
    assert_eq!(outcome_of(&outcome), Some(TerminalOutcome::FallbackRedirect));
    assert!(h.overlay.shown.get());
    assert_eq!(h.logged("popup close"), 0);
    assert!(!h.coordinator.is_intercepting());
    assert!(h.coordinator.run(Harness::form()).unwrap().is_none());
}

#[test]
fn other_open_failures_resolve_error_and_keep_intercepting() {
    let mut h = Harness::new();
    *h.host.fail_with.borrow_mut() = Some(CheckoutError::Embed("zoid exploded".into()));

    let outcome = h.start();
    h.settle();
    assert!(matches!(outcome_of(&outcome), Some(TerminalOutcome::Error { .. })));
    assert!(!h.overlay.shown.get());
    assert!(h.coordinator.is_intercepting());
}

#[test]
fn malformed_form_fails_before_anything_happens() {
    let h = Harness::new();
    let form = FormContext::new("javascript:void(0)", Vec::new());

    assert!(matches!(
        h.coordinator.run(form),
        Err(CheckoutError::MalformedForm(_))
    ));
    assert!(h.log.borrow().is_empty());
    assert!(!h.coordinator.has_active_session());
}

#[test]
fn same_origin_completion_message_resolves_session() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();

    let message = json!({ "type": "taptree_payment_complete", "redirectUrl": THANK_YOU });
    h.coordinator.handle_window_message("https://evil.example", message.clone());
    h.settle();
    assert_eq!(outcome_of(&outcome), None);

    h.coordinator
        .handle_window_message(ORIGIN, json!({ "type": "something_else", "redirectUrl": THANK_YOU }));
    h.settle();
    assert_eq!(outcome_of(&outcome), None);

    h.coordinator.handle_window_message(ORIGIN, message);
    h.settle();
    assert_eq!(
        outcome_of(&outcome),
        Some(TerminalOutcome::Completed {
            redirect: Some(Url::parse(THANK_YOU).unwrap())
        })
    );
    assert_eq!(h.visited(), vec![THANK_YOU.to_string()]);
}

#[test]
fn completion_message_without_session_navigates() {
    let h = Harness::new();
    h.coordinator.handle_window_message(
        ORIGIN,
        json!({ "type": "taptree_payment_complete", "redirectUrl": THANK_YOU }),
    );
    assert_eq!(h.visited(), vec![THANK_YOU.to_string()]);
    assert!(h.overlay.shown.get());

    h.coordinator.handle_window_message(
        ORIGIN,
        json!({ "type": "taptree_payment_complete", "redirectUrl": "data:text/html,hi" }),
    );
    assert_eq!(h.visited().len(), 1);
}

#[test]
fn signals_from_a_finished_session_do_not_reach_the_next_one() {
    let mut h = Harness::new();
    let first = h.start();
    h.settle();
    let stale = h.sink();
    h.signal(PopupSignal::Cancel);
    assert_eq!(outcome_of(&first), Some(TerminalOutcome::Cancelled));

    let second = h.start();
    h.settle();
    stale.emit(PopupSignal::Complete(THANK_YOU.to_string()));
    h.settle();
    assert_eq!(outcome_of(&second), None);

    h.signal(PopupSignal::Cancel);
    assert_eq!(outcome_of(&second), Some(TerminalOutcome::Cancelled));
    assert!(h.visited().is_empty());
}

#[test]
fn overlay_kept_for_fallback_can_be_released() {
    let mut h = Harness::new();
    *h.host.fail_with.borrow_mut() = Some(CheckoutError::PopupBlocked("Popup blocked by browser".into()));
    let outcome = h.start();
    h.settle();
    assert_eq!(outcome_of(&outcome), Some(TerminalOutcome::FallbackRedirect));
    assert!(h.overlay.shown.get());

    h.coordinator.release_overlay();
    assert!(!h.overlay.shown.get());
    h.coordinator.release_overlay();
    assert_eq!(h.logged("overlay hide"), 2);
}

#[test]
fn overlay_release_waits_for_running_checkout() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();

    h.coordinator.release_overlay();
    assert!(h.overlay.shown.get());

    h.signal(PopupSignal::Cancel);
    assert_eq!(outcome_of(&outcome), Some(TerminalOutcome::Cancelled));
    assert!(!h.overlay.shown.get());
}

#[test]
fn completion_without_url_lands_on_thank_you_page() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();
    h.signal(PopupSignal::Ready);
    h.reply(Ok(intent()));

    h.signal(PopupSignal::Complete(String::new()));
    assert_eq!(
        outcome_of(&outcome),
        Some(TerminalOutcome::Completed {
            redirect: Some(Url::parse(THANK_YOU).unwrap())
        })
    );
    assert_eq!(h.visited(), vec![THANK_YOU.to_string()]);
}

#[test]
fn completion_without_url_or_intent_stays_put() {
    let mut h = Harness::new();
    let outcome = h.start();
    h.settle();

    h.signal(PopupSignal::Complete(String::new()));
    assert_eq!(outcome_of(&outcome), Some(TerminalOutcome::Completed { redirect: None }));
    assert!(h.visited().is_empty());
    assert!(!h.overlay.shown.get());
}
