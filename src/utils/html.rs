//! HTML text helpers used by the view model.
//!
//! - `escape()` / `escape_attr()` - entity escaping when serializing nodes
//! - `unescape()` - entity decoding of attribute values read by `tl`
//! - `is_void_element()` - tags serialized without a closing tag

use std::borrow::Cow;

/// Entity for a character that must be escaped, if any.
#[inline]
fn entity_for(c: char, in_attr: bool) -> Option<&'static str> {
    match c {
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '&' => Some("&amp;"),
        '"' if in_attr => Some("&quot;"),
        '\'' if in_attr => Some("&#39;"),
        _ => None,
    }
}

fn escape_impl(s: &str, in_attr: bool) -> Cow<'_, str> {
    if !s.chars().any(|c| entity_for(c, in_attr).is_some()) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match entity_for(c, in_attr) {
            Some(entity) => out.push_str(entity),
            None => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Escape text content.
#[inline]
pub fn escape(s: &str) -> Cow<'_, str> {
    escape_impl(s, false)
}

/// Escape a double-quoted attribute value (quotes included).
#[inline]
pub fn escape_attr(s: &str) -> Cow<'_, str> {
    escape_impl(s, true)
}

/// Decode named and numeric character references.
///
/// Unknown or malformed references are kept verbatim.
pub fn unescape(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];

        // Entities are short; anything longer is literal text
        let end = tail
            .char_indices()
            .take(12)
            .find(|(_, c)| *c == ';')
            .map(|(i, _)| i);

        let Some(end) = end else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };

        let name = &tail[1..end];
        match decode_entity(name) {
            Some(c) => out.push(c),
            None => out.push_str(&tail[..=end]),
        }
        rest = &tail[end + 1..];
    }

    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{00A0}'),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Elements that never have children or a closing tag.
#[inline]
pub fn is_void_element(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "source"
            | "track"
            | "wbr"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_text_keeps_quotes() {
        assert_eq!(escape(r#"a < b "c""#), r#"a &lt; b "c""#);
        assert!(matches!(escape("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_escape_attr_json() {
        let json = r#"{"name":"Bob's"}"#;
        assert_eq!(
            escape_attr(json),
            "{&quot;name&quot;:&quot;Bob&#39;s&quot;}"
        );
    }

    #[test]
    fn test_unescape_roundtrip() {
        let json = r#"{"a":"<x> & 'y'"}"#;
        assert_eq!(unescape(&escape_attr(json)), json);
    }

    #[test]
    fn test_unescape_numeric_and_unknown() {
        assert_eq!(unescape("&#65;&#x42;"), "AB");
        assert_eq!(unescape("&bogus; & done"), "&bogus; & done");
    }
}
