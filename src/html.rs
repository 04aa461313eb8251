//! Attribute serialization.
//!
//! Pairs are sorted by name (stable, so values sharing a name keep their
//! order), and every run of one name becomes a single quoted attribute with its
//! values separated by spaces: `[("class", "a"), ("id", "x"), ("class", "b")]`
//! serializes to ` class='a b' id='x'`. Pairs with an empty name are skipped.

use crate::escape::quote_attribute;
use crate::value::Value;

/// One piece of a serialized attribute list.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrPart<T> {
    Text(String),
    Value(T),
}

/// Lays out attribute pairs, handing literal framing and values to `emit`.
pub fn layout_attrs<T>(mut pairs: Vec<(String, T)>, mut emit: impl FnMut(AttrPart<T>)) {
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let mut current: Option<String> = None;
    for (name, value) in pairs {
        if name.is_empty() {
            continue;
        }
        if current.as_deref() == Some(name.as_str()) {
            emit(AttrPart::Text(" ".to_string()));
        } else {
            let open = match current {
                Some(_) => format!("' {}='", name),
                None => format!(" {}='", name),
            };
            emit(AttrPart::Text(open));
            current = Some(name);
        }
        emit(AttrPart::Value(value));
    }
    if current.is_some() {
        emit(AttrPart::Text("'".to_string()));
    }
}

/// Runtime attribute serializer over evaluated pairs.
pub fn write_attrs(pairs: &[(Value, Value)]) -> String {
    let named = pairs
        .iter()
        .filter(|(name, _)| name.is_true())
        .map(|(name, value)| (name.to_text(), value))
        .collect();
    let mut out = String::new();
    layout_attrs(named, |part| match part {
        AttrPart::Text(t) => out.push_str(&t),
        AttrPart::Value(v) => out.push_str(&quote_attribute(&v.to_text())),
    });
    out
}
