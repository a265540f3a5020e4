use crate::document::{Map, Value};
use crate::layers::DataLayer;
use tracing::trace;

/// Deep-merge `overlay` on top of `base`, returning a new value.
///
/// Two mappings merge key by key, recursing where both sides hold a
/// mapping. In every other case the overlay wins outright: sequences are
/// replaced rather than concatenated, and a type mismatch is not an error.
pub fn merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, over) in overlay_map {
                let value = match base_map.get(key) {
                    Some(existing) => merge(existing, over),
                    None => over.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Fold documents left to right; later documents take precedence.
///
/// An empty input yields an empty mapping.
pub fn merge_all<'a, I>(documents: I) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    documents
        .into_iter()
        .fold(Value::Object(Map::new()), |acc, doc| merge(&acc, doc))
}

/// Reduce the ordered data layers into the merged context.
pub fn merge_layers(layers: &[DataLayer]) -> Value {
    merge_all(layers.iter().map(|layer| {
        trace!(index = layer.index, origin = %layer.origin, "merging layer");
        &layer.document
    }))
}
