//! Multi-line formatting for diagnostics
use std::collections::BTreeMap;
use std::fmt::Display;

/// One `key: value` pair per line, sorted by key
pub fn multiline_map<K: Display + Ord, V: Display>(map: &BTreeMap<K, V>) -> String {
    map.iter()
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect::<Vec<_>>()
        .join(",\n")
}

/// One element per line, wrapped in brackets
pub fn multiline_list<T: Display>(items: &[T]) -> String {
    let body = items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    format!("[\n{}\n]", body)
}
