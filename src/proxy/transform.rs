//! Request body transformation
//!
//! The only rewrite is the `model` field: a client-facing model name is
//! replaced by its upstream name when the substitution table knows it.

use serde_json::Value;
use std::collections::BTreeMap;

/// A `model` substitution that was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRewrite {
    pub from: String,
    pub to: String,
}

/// Rewrite `body["model"]` in place through `mapping`.
///
/// Exact-key lookup only. Bodies that are not objects, lack a string `model`,
/// or name an unmapped model are left untouched.
pub fn rewrite_model(body: &mut Value, mapping: &BTreeMap<String, String>) -> Option<ModelRewrite> {
    let model = body.get_mut("model")?;
    let to = mapping.get(model.as_str()?)?.clone();

    let from = std::mem::replace(model, Value::String(to.clone()));
    Some(ModelRewrite {
        from: from.as_str().unwrap_or_default().to_string(),
        to,
    })
}
