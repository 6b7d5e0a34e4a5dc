use serde_json::Value;

use crate::model::Meta;

/// Merge `overlay` into `target`, right-biased.
///
/// Objects merge key by key, arrays merge index by index, anything else in
/// `overlay` replaces what `target` holds. Keys only present in `target`
/// survive.
pub fn deep_merge(target: &mut Meta, overlay: &Meta) {
    for (key, value) in overlay {
        match target.get_mut(key) {
            Some(existing) => merge_value(existing, value),
            None => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn merge_value(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(target), Value::Object(overlay)) => deep_merge(target, overlay),
        (Value::Array(target), Value::Array(overlay)) => {
            for (idx, value) in overlay.iter().enumerate() {
                match target.get_mut(idx) {
                    Some(existing) => merge_value(existing, value),
                    None => target.push(value.clone()),
                }
            }
        }
        (target, overlay) => *target = overlay.clone(),
    }
}
