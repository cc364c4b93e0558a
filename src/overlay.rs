//! Blocking overlay shown while the checkout popup is in charge.

use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlElement};

use crate::error::{js_error, CheckoutError};

pub const BLOCKER_ID: &str = "taptree-blocker";
pub const BLOCKER_TEXTBOX_ID: &str = "taptree-blocker-textbox";
pub const BLOCKER_TEXT_ID: &str = "taptree-blocker-text";
pub const SPINNER_ID: &str = "taptree-spinner-container";

const BLOCKER_STYLE: &str = "z-index: 1001; position: fixed; height: 100%; width: 100%; top: 0; left: 0; background-color: #000; opacity: 0.75;";
const TEXTBOX_STYLE: &str = "position: fixed; top: 50%; left: 50%; transform: translate(-50%, -50%);";
const TEXT_STYLE: &str = "max-width: 350px; text-align: center; color: #fff";
const SPINNER_STYLE: &str = "margin-top: 20px; text-align: center;";
const SPINNER_WHEEL_STYLE: &str = "display: inline-block; width: 40px; height: 40px; border: 4px solid #fff; border-radius: 50%; border-top-color: transparent; animation: taptree-spin 1s linear infinite;";
const SPINNER_KEYFRAMES: &str = "@keyframes taptree-spin { to { transform: rotate(360deg); } }";

/// Page-wide blocking overlay.
///
/// Both calls are idempotent: `show` on a visible overlay only swaps the
/// message, `hide` on a hidden one does nothing.
pub trait OverlayPresenter {
    fn show(&self, message: &str);
    fn hide(&self);
}

/// Overlay rendered straight into `document.body`.
///
/// Presence is keyed on the `#taptree-blocker` element, so several
/// instances never produce two overlays.
#[derive(Clone, Debug, Default)]
pub struct DomOverlay;

impl DomOverlay {
    pub fn new() -> Self {
        DomOverlay
    }

    pub fn is_shown(&self) -> bool {
        document()
            .and_then(|doc| doc.get_element_by_id(BLOCKER_ID))
            .is_some()
    }

    fn try_show(&self, message: &str) -> Result<(), CheckoutError> {
        let doc = document().ok_or_else(|| CheckoutError::Js("no document".into()))?;

        let textbox = match doc.get_element_by_id(BLOCKER_TEXTBOX_ID) {
            Some(textbox) => textbox,
            None => {
                let body = doc.body().ok_or_else(|| CheckoutError::Js("no body".into()))?;
                let blocker = styled(&doc, "div", BLOCKER_ID, BLOCKER_STYLE)?;
                let textbox = styled(&doc, "div", BLOCKER_TEXTBOX_ID, TEXTBOX_STYLE)?;
                let text = styled(&doc, "p", BLOCKER_TEXT_ID, TEXT_STYLE)?;
                textbox.append_child(&text).map_err(js_error)?;
                blocker.append_child(&textbox).map_err(js_error)?;
                body.append_child(&blocker).map_err(js_error)?;
                textbox
            }
        };

        if let Some(text) = doc.get_element_by_id(BLOCKER_TEXT_ID) {
            match text.dyn_ref::<HtmlElement>() {
                Some(html) => html.set_inner_text(message),
                None => text.set_text_content(Some(message)),
            }
        }

        if doc.get_element_by_id(SPINNER_ID).is_none() {
            let spinner = styled(&doc, "div", SPINNER_ID, SPINNER_STYLE)?;
            let wheel = doc.create_element("div").map_err(js_error)?;
            wheel.set_attribute("style", SPINNER_WHEEL_STYLE).map_err(js_error)?;
            let keyframes = doc.create_element("style").map_err(js_error)?;
            keyframes.set_text_content(Some(SPINNER_KEYFRAMES));
            spinner.append_child(&wheel).map_err(js_error)?;
            spinner.append_child(&keyframes).map_err(js_error)?;
            textbox.append_child(&spinner).map_err(js_error)?;
        }
        Ok(())
    }
}

impl OverlayPresenter for DomOverlay {
    fn show(&self, message: &str) {
        if let Err(err) = self.try_show(message) {
            log::error!("could not show overlay: {err}");
        }
    }

    fn hide(&self) {
        if let Some(blocker) = document().and_then(|doc| doc.get_element_by_id(BLOCKER_ID)) {
            blocker.remove();
        }
    }
}

fn document() -> Option<Document> {
    web_sys::window().and_then(|win| win.document())
}

fn styled(doc: &Document, tag: &str, id: &str, style: &str) -> Result<Element, CheckoutError> {
    let el = doc.create_element(tag).map_err(js_error)?;
    el.set_id(id);
    el.set_attribute("style", style).map_err(js_error)?;
    Ok(el)
}
