//! Case-insensitive substring search over a single store.

use serde_json::Value;

use crate::registry::Store;

/// Text a value is matched against: strings as-is, everything else as compact JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Entries whose key or rendered value contains `term`, ignoring case.
///
/// An absent or empty term selects every entry. No index; linear in store size.
///
/// Non-string values are matched against their compact JSON text, so `null`
/// matches null values (not `none`), and objects read `{"x":1}` with JSON
/// quoting and no spaces after separators.
pub fn search(store: &Store, term: Option<&str>) -> Store {
    let needle = match term {
        Some(t) if !t.is_empty() => t.to_lowercase(),
        _ => return store.clone(),
    };
    store
        .iter()
        .filter(|(key, value)| {
            key.to_lowercase().contains(&needle) || render(value).to_lowercase().contains(&needle)
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
