//! Component H (JS half) — small script fragments injected into a tab:
//! a per-page context object for synchronous slot storage, and document
//! serialization used by the Variable/Event completion triggers to
//! latch HTML before any further page mutation can occur.

use rand::Rng;
use rand::distr::Alphanumeric;

/// Slot a completion trigger latches the serialized document into,
/// read back by the tab renderer in preference to a live re-serialize.
pub const HTML_SLOT: &str = "getHtmlResult";

/// Slot a completion trigger stores its settle promise in, awaited by
/// `wait()` after the magic dialog rendezvous to preserve ordering with
/// any pending microtask the page's own script scheduled.
pub const COMPLETION_PROMISE_SLOT: &str = "completionPromise";

/// A random 32-character key, used both as the context object's
/// property name on `window` and as a magic-dialog rendezvous token.
pub fn random_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Installs `window[key] = {}` as a non-enumerable slot so user scripts
/// probing `Object.keys(window)` don't see it.
pub fn context_init_script(key: &str) -> String {
    format!(
        "Object.defineProperty(window, {key:?}, {{ value: {{}}, configurable: true, enumerable: false, writable: false }});"
    )
}

/// Reads `window[key][slot]`, or `undefined` if the context object was
/// never installed (should not happen once `context_init_script` has
/// run, but evaluated defensively before navigation completes).
pub fn read_slot_expr(key: &str, slot: &str) -> String {
    format!("(window[{key:?}] || {{}})[{slot:?}]")
}

/// Assigns `window[key][slot] = <value_expr>`.
pub fn write_slot_script(key: &str, slot: &str, value_expr: &str) -> String {
    format!("window[{key:?}][{slot:?}] = {value_expr};")
}

/// Serializes the current document as doctype + outerHTML, matching
/// what a full-page "View Source" would show after JS has run.
pub fn serialize_document_expr() -> String {
    "(document.doctype ? new XMLSerializer().serializeToString(document.doctype) : '') + \
     document.documentElement.outerHTML"
        .to_string()
}

/// Synchronously captures the document into `slot` on `window[key]` —
/// used right before firing a magic dialog, so no microtask between
/// signal and capture can mutate the DOM first.
pub fn capture_html_script(key: &str, slot: &str) -> String {
    write_slot_script(key, slot, &serialize_document_expr())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_token_is_32_chars_and_varies() {
        let a = random_token();
        let b = random_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn scripts_embed_the_key_as_a_json_string_literal() {
        let script = context_init_script("abc\"def");
        assert!(script.contains("abc\\\"def"));
    }
}
