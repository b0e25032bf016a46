//! Message template rendering.
//!
//! Templates use `{{key}}` placeholders filled from a recipient's variables
//! map. The key `name` falls back to the recipient's contact name when the
//! map has no explicit entry. Unknown placeholders are left intact so a
//! misconfigured template is visible in the delivered text instead of
//! silently collapsing to an empty string.

use std::collections::BTreeMap;

/// Render `template` against `variables`.
///
/// `contact_name` supplies the `{{name}}` placeholder when `variables` has
/// no `name` entry of its own.
pub fn render_template(
    template: &str,
    variables: &BTreeMap<String, String>,
    contact_name: Option<&str>,
) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        match after_open.find("}}") {
            Some(end) => {
                let key = after_open[..end].trim();
                match lookup(key, variables, contact_name) {
                    Some(value) => output.push_str(value),
                    None => {
                        // Unknown key: keep the placeholder verbatim.
                        output.push_str(&rest[start..start + 2 + end + 2]);
                    }
                }
                rest = &after_open[end + 2..];
            }
            None => {
                // Unterminated opener, emit the remainder as-is.
                output.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    output.push_str(rest);
    output
}

fn lookup<'a>(
    key: &str,
    variables: &'a BTreeMap<String, String>,
    contact_name: Option<&'a str>,
) -> Option<&'a str> {
    if let Some(value) = variables.get(key) {
        return Some(value.as_str());
    }
    if key == "name" {
        return contact_name;
    }
    None
}
