//! Variable scope chains.
//!
//! A [`VarScope`] is an immutable stack of variable layers. Adding variables
//! never mutates an existing scope: [`VarScope::with_layer`] returns a new
//! scope whose head points at the old one, so a scope handed to one task can
//! never observe variables registered by a sibling.

use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Ordered variable mapping as written in inventory and plan files.
pub type Vars = IndexMap<String, Value>;

struct Layer {
    label: String,
    vars: Vars,
    parent: Option<Arc<Layer>>,
}

/// Immutable, cheaply cloneable chain of variable layers.
///
/// Lookups walk from the most recently added layer to the oldest one, so a
/// later layer shadows an earlier one.
#[derive(Clone, Default)]
pub struct VarScope {
    head: Option<Arc<Layer>>,
}

impl VarScope {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new scope with `vars` layered on top of this one.
    #[must_use]
    pub fn with_layer(&self, label: impl Into<String>, vars: Vars) -> Self {
        Self {
            head: Some(Arc::new(Layer {
                label: label.into(),
                vars,
                parent: self.head.clone(),
            })),
        }
    }

    /// Returns a new scope with a single variable layered on top.
    #[must_use]
    pub fn with_var(&self, label: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        let mut vars = Vars::new();
        vars.insert(key.into(), value);
        self.with_layer(label, vars)
    }

    /// Looks up a variable, most recent layer first.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut layer = self.head.as_deref();
        while let Some(current) = layer {
            if let Some(value) = current.vars.get(key) {
                return Some(value);
            }
            layer = current.parent.as_deref();
        }
        None
    }

    /// Returns `true` if any layer defines `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns the label of the layer that defines `key`, if any.
    pub fn source_of(&self, key: &str) -> Option<&str> {
        let mut layer = self.head.as_deref();
        while let Some(current) = layer {
            if current.vars.contains_key(key) {
                return Some(&current.label);
            }
            layer = current.parent.as_deref();
        }
        None
    }

    /// Number of layers in the chain.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut layer = self.head.as_deref();
        while let Some(current) = layer {
            depth += 1;
            layer = current.parent.as_deref();
        }
        depth
    }

    /// Collapses the chain into a single mapping with shadowing applied.
    ///
    /// Keys appear in the order they were first introduced, oldest layer first.
    pub fn flatten(&self) -> Vars {
        let mut layers = Vec::new();
        let mut layer = self.head.as_deref();
        while let Some(current) = layer {
            layers.push(current);
            layer = current.parent.as_deref();
        }

        let mut out = Vars::new();
        for current in layers.into_iter().rev() {
            for (key, value) in &current.vars {
                out.insert(key.clone(), value.clone());
            }
        }
        out
    }
}

impl fmt::Debug for VarScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VarScope")
            .field("depth", &self.depth())
            .field("vars", &self.flatten())
            .finish()
    }
}

/// Renders a variable value the way it is substituted into a command line.
///
/// Strings are inserted verbatim, sequences are joined with single spaces so
/// that a list such as `iodepth: [1, 8, 64]` expands to `1 8 64`, and `null`
/// renders as the empty string.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(render_value).collect::<Vec<_>>().join(" "),
        Value::Object(_) => value.to_string(),
    }
}
