//! Wiring of the coordinator to the real browser.

use std::rc::Rc;

use url::Url;

use crate::config::CheckoutConfig;
use crate::coordinator::{CheckoutNotices, Collaborators, ParentPage, PopupLifecycleCoordinator};
use crate::embed::ZoidHost;
use crate::error::js_error_message;
use crate::intent::FetchBackend;
use crate::overlay::DomOverlay;
use crate::watcher::{GlooTimer, WindowCloseWatcher};

/// The current top-level page.
#[derive(Clone, Copy, Debug, Default)]
pub struct BrowserPage;

impl ParentPage for BrowserPage {
    fn origin(&self) -> String {
        web_sys::window()
            .and_then(|win| win.location().origin().ok())
            .unwrap_or_default()
    }

    fn navigate(&self, url: &Url) {
        let Some(window) = web_sys::window() else {
            return;
        };
        if let Err(err) = window.location().set_href(url.as_str()) {
            log::error!("could not navigate to {url}: {}", js_error_message(&err));
        }
    }
}

/// Coordinator backed by zoid, `fetch`, the DOM overlay and real timers.
pub fn browser_coordinator(config: &CheckoutConfig, notices: Rc<dyn CheckoutNotices>) -> PopupLifecycleCoordinator {
    let page = BrowserPage;
    let parts = Collaborators {
        host: Rc::new(ZoidHost::new(config.lounge_url())),
        backend: Rc::new(FetchBackend::new(page.origin())),
        overlay: Rc::new(DomOverlay::new()),
        page: Rc::new(page),
        notices,
        watcher: WindowCloseWatcher::new(Rc::new(GlooTimer)),
    };
    PopupLifecycleCoordinator::new(parts, config.coordinator_settings())
}
