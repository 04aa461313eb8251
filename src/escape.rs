//! HTML escaping helpers.
//!
//! Both functions scan the input once and only allocate when a replacement is
//! needed; output is identical to chaining `str::replace` over the same table.

use std::borrow::Cow;

fn replace_table(input: &str, table: fn(char) -> Option<&'static str>) -> Cow<'_, str> {
    let first = match input.char_indices().find(|(_, c)| table(*c).is_some()) {
        Some((i, _)) => i,
        None => return Cow::Borrowed(input),
    };
    let mut out = String::with_capacity(input.len() + 16);
    out.push_str(&input[..first]);
    for c in input[first..].chars() {
        match table(c) {
            Some(rep) => out.push_str(rep),
            None => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn html_table(c: char) -> Option<&'static str> {
    match c {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        _ => None,
    }
}

fn attr_table(c: char) -> Option<&'static str> {
    match c {
        '"' => Some("&#34;"),
        '\'' => Some("&#39;"),
        other => html_table(other),
    }
}

/// Replaces `&`, `<` and `>` with their entities.
pub fn escape(input: &str) -> Cow<'_, str> {
    replace_table(input, html_table)
}

/// Like [`escape`], additionally replacing both quote characters.
pub fn quote_attribute(input: &str) -> Cow<'_, str> {
    replace_table(input, attr_table)
}
