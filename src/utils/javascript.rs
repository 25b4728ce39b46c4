//! Page-side scripts used by the Chrome adapter.
//!
//! Every script is a self-invoking function returning `JSON.stringify(...)`,
//! so the caller always receives a string and decodes it with `serde_json`
//! regardless of how the engine marshals objects.

use crate::core::Target;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

const PRELUDE: &str = r#"
    const __query = (css, text) => {
        const all = Array.from(document.querySelectorAll(css));
        if (text === null) return all;
        const needle = text.toLowerCase();
        const hits = all.filter(el => (el.textContent || '').toLowerCase().includes(needle));
        return hits.filter(el => !hits.some(other => other !== el && el.contains(other)));
    };
    const __locator = (el) => {
        const parts = [];
        while (el && el.nodeType === 1 && el !== document.documentElement) {
            const parent = el.parentElement;
            const index = parent ? Array.prototype.indexOf.call(parent.children, el) + 1 : 1;
            parts.unshift(el.tagName.toLowerCase() + ':nth-child(' + index + ')');
            el = parent;
        }
        parts.unshift('html');
        return parts.join(' > ');
    };
    const __visible = (el) => {
        const rect = el.getBoundingClientRect();
        const style = window.getComputedStyle(el);
        return rect.width > 0 && rect.height > 0
            && style.visibility !== 'hidden' && style.display !== 'none';
    };
"#;

/// CSS selector plus an optional `:has-text("...")` filter, which plain
/// `querySelectorAll` does not understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementQuery {
    pub css: String,
    pub text: Option<String>,
}

fn has_text_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^(?s)(.*?):has-text\((?:"((?:[^"\\]|\\.)*)"|'((?:[^'\\]|\\.)*)')\)$"#)
            .expect("has-text pattern is valid")
    })
}

impl ElementQuery {
    pub fn parse(selector: &str) -> Self {
        let selector = selector.trim();
        let Some(captures) = has_text_pattern().captures(selector) else {
            return Self {
                css: selector.to_string(),
                text: None,
            };
        };

        let css = captures.get(1).map_or("", |m| m.as_str()).trim();
        let text = captures
            .get(2)
            .or_else(|| captures.get(3))
            .map_or("", |m| m.as_str())
            .replace("\\\"", "\"")
            .replace("\\'", "'");

        Self {
            css: if css.is_empty() { "*".to_string() } else { css.to_string() },
            text: Some(text),
        }
    }

    pub fn from_target(target: &Target) -> Self {
        match target {
            Target::Selector(selector) => Self::parse(selector),
            Target::Element(element) => Self {
                css: element.locator.clone(),
                text: None,
            },
        }
    }

    /// Arguments for `__query` as JS literals.
    fn args(&self) -> String {
        format!("{}, {}", js_string(&self.css), js_optional(self.text.as_deref()))
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn js_optional(value: Option<&str>) -> String {
    value.map_or_else(|| "null".to_string(), js_string)
}

fn wrap(body: &str) -> String {
    format!("(() => {{ {PRELUDE} {body} }})()")
}

pub struct Scripts;

impl Scripts {
    /// `[{tag, locator, attributes}]` for every match in document order.
    pub fn query_all(query: &ElementQuery) -> String {
        wrap(&format!(
            r#"
            const found = __query({}).map(el => {{
                const attributes = {{}};
                for (const attr of el.attributes) attributes[attr.name] = attr.value;
                return {{ tag: el.tagName.toLowerCase(), locator: __locator(el), attributes }};
            }});
            return JSON.stringify(found);
            "#,
            query.args()
        ))
    }

    /// Structural locator of the first match, or `null`.
    pub fn locate(query: &ElementQuery) -> String {
        wrap(&format!(
            "const el = __query({})[0]; return JSON.stringify(el ? __locator(el) : null);",
            query.args()
        ))
    }

    /// `{attached, visible}` of the first match.
    pub fn element_state(query: &ElementQuery) -> String {
        wrap(&format!(
            r#"
            const el = __query({})[0];
            return JSON.stringify({{ attached: !!el, visible: !!el && __visible(el) }});
            "#,
            query.args()
        ))
    }

    pub fn attribute(query: &ElementQuery, name: &str) -> String {
        wrap(&format!(
            r#"
            const el = __query({})[0];
            if (!el) return JSON.stringify({{ found: false, value: null }});
            return JSON.stringify({{ found: true, value: el.getAttribute({}) }});
            "#,
            query.args(),
            js_string(name)
        ))
    }

    pub fn inner_html(query: &ElementQuery) -> String {
        wrap(&format!(
            "const el = __query({})[0]; return JSON.stringify(el ? el.innerHTML : null);",
            query.args()
        ))
    }

    /// Empty an input or contenteditable before typing into it.
    pub fn clear_value(query: &ElementQuery) -> String {
        wrap(&format!(
            r#"
            const el = __query({})[0];
            if (!el) return JSON.stringify(false);
            if ('value' in el) el.value = ''; else el.textContent = '';
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            return JSON.stringify(true);
            "#,
            query.args()
        ))
    }

    pub fn page_size() -> String {
        wrap(
            r#"
            const root = document.documentElement;
            const body = document.body || root;
            return JSON.stringify({
                width: Math.max(root.scrollWidth, body.scrollWidth, root.clientWidth),
                height: Math.max(root.scrollHeight, body.scrollHeight, root.clientHeight)
            });
            "#,
        )
    }

    pub fn read_storage() -> String {
        wrap(
            r#"
            const storage = {};
            for (let i = 0; i < localStorage.length; i++) {
                const key = localStorage.key(i);
                if (key !== null) storage[key] = localStorage.getItem(key);
            }
            return JSON.stringify({ origin: window.location.origin, storage });
            "#,
        )
    }

    pub fn write_storage(entries: &HashMap<String, String>) -> String {
        let payload = serde_json::to_string(entries).unwrap_or_else(|_| "{}".to_string());
        wrap(&format!(
            r#"
            const entries = {payload};
            for (const [key, value] of Object.entries(entries)) localStorage.setItem(key, value);
            return JSON.stringify(Object.keys(entries).length);
            "#
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ElementRef;

    #[test]
    fn plain_selector_has_no_text_filter() {
        let query = ElementQuery::parse("button[role=\"switch\"]");
        assert_eq!(query.css, "button[role=\"switch\"]");
        assert_eq!(query.text, None);
    }

    #[test]
    fn has_text_suffix_is_split_off() {
        let query = ElementQuery::parse(r#".continue-btn:has-text("Continue")"#);
        assert_eq!(query.css, ".continue-btn");
        assert_eq!(query.text.as_deref(), Some("Continue"));

        let query = ElementQuery::parse(r#":has-text('Say "hi"')"#);
        assert_eq!(query.css, "*");
        assert_eq!(query.text.as_deref(), Some("Say \"hi\""));
    }

    #[test]
    fn escaped_quotes_in_label_survive() {
        let query = ElementQuery::parse(r#"div:has-text("a \"quoted\" model")"#);
        assert_eq!(query.text.as_deref(), Some("a \"quoted\" model"));
    }

    #[test]
    fn resolved_elements_query_by_locator() {
        let element = ElementRef::new("button", "html > body:nth-child(2) > button:nth-child(1)");
        let query = ElementQuery::from_target(&Target::Element(element));
        assert_eq!(query.css, "html > body:nth-child(2) > button:nth-child(1)");
        assert!(query.text.is_none());
    }

    #[test]
    fn selector_literals_are_escaped() {
        let script = Scripts::locate(&ElementQuery::parse(r#"textarea[placeholder="Message"]"#));
        assert!(script.contains(r#"__query("textarea[placeholder=\"Message\"]", null)"#));
    }

    #[test]
    fn storage_payload_is_embedded_as_json() {
        let mut entries = HashMap::new();
        entries.insert("token".to_string(), "it's \"x\"".to_string());
        let script = Scripts::write_storage(&entries);
        assert!(script.contains(r#"{"token":"it's \"x\""}"#));
    }
}
