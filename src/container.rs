//! The structurally-typed, template-validated record container.
//!
//! This is the fabric records, merge-rule trees, and materialized database
//! state are all represented with. Grounded in
//! `examples/original_source/json_interface.py`'s `JSONDict`/`JSONList`,
//! translated from Python's runtime type-checking into a typed `Template`
//! tree plus a plain `Value` data tree.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A schema node. `Template::Any` (the "null template") matches
/// everything, including absent/null data — every operation that validates
/// against a template treats [`Value::Null`] as automatically valid,
/// mirroring `json_interface.py`'s `if template is None or data is None:
/// return`.
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Any,
    Bool,
    Number,
    String,
    /// A one-of: the value must validate against at least one of the
    /// listed templates. Also used to express "one of these literal
    /// values" by listing `Template::Literal` entries.
    Choice(Vec<Template>),
    /// An exact value (used inside `Choice` to enumerate literals, or
    /// standalone for a field pinned to a single constant).
    Literal(Value),
    /// A homogeneous list; every element matches the inner template.
    List(Box<Template>),
    /// A mapping with a fixed, known set of keys.
    Map(BTreeMap<String, Template>),
    /// A mapping with arbitrary keys, all values matching the inner
    /// template — the empty-string-keyed template node.
    AnyKeyMap(Box<Template>),
}

impl Template {
    /// Looks up the template that applies to a given key of a `Map`/
    /// `AnyKeyMap` template. Returns `Ok(None)` for `Any` (no declared
    /// shape to check against) and errors for a `Map` template that
    /// doesn't declare `key` at all.
    pub fn field_template(&self, key: &str, path: &str) -> Result<Option<&Template>> {
        match self {
            Template::Any => Ok(None),
            Template::Map(fields) => fields.get(key).map(Some).ok_or_else(|| Error::TypeError {
                path: path.to_string(),
                message: format!("no such field '{key}'"),
            }),
            Template::AnyKeyMap(inner) => Ok(Some(inner)),
            other => Err(Error::TypeError {
                path: path.to_string(),
                message: format!("{other:?} is not a mapping template"),
            }),
        }
    }

    /// Validates `value` against this template, recursively.
    pub fn validate(&self, value: &Value, path: &str) -> Result<()> {
        // Null data matches every template; this is how "optional field" is
        // expressed throughout the schema.
        if matches!(value, Value::Null) {
            return Ok(());
        }
        if matches!(self, Template::Any) {
            return Ok(());
        }

        match self {
            Template::Any => unreachable!(),
            Template::Bool => {
                if !matches!(value, Value::Bool(_)) {
                    return Err(type_error(path, "boolean", value));
                }
            }
            Template::Number => {
                if !matches!(value, Value::Number(_)) {
                    return Err(type_error(path, "number", value));
                }
            }
            Template::String => {
                if !matches!(value, Value::String(_)) {
                    return Err(type_error(path, "string", value));
                }
            }
            Template::Literal(expected) => {
                if value != expected {
                    return Err(Error::TypeError {
                        path: path.to_string(),
                        message: format!("{value:?} must equal {expected:?}"),
                    });
                }
            }
            Template::Choice(options) => {
                if !options.iter().any(|t| t.validate(value, path).is_ok()) {
                    return Err(Error::TypeError {
                        path: path.to_string(),
                        message: format!("{value:?} did not match any of {} choices", options.len()),
                    });
                }
            }
            Template::List(item_template) => {
                let Value::List(items) = value else {
                    return Err(type_error(path, "list", value));
                };
                for (i, item) in items.iter().enumerate() {
                    item_template.validate(item, &format!("{path}[{i}]"))?;
                }
            }
            Template::Map(fields) => {
                let Value::Map(map) = value else {
                    return Err(type_error(path, "map", value));
                };
                for (key, v) in map {
                    let Some(field_template) = fields.get(key) else {
                        return Err(Error::TypeError {
                            path: path.to_string(),
                            message: format!("no such field '{key}'"),
                        });
                    };
                    field_template.validate(v, &format!("{path}.{key}"))?;
                }
            }
            Template::AnyKeyMap(inner) => {
                let Value::Map(map) = value else {
                    return Err(type_error(path, "map", value));
                };
                for (key, v) in map {
                    inner.validate(v, &format!("{path}.{key}"))?;
                }
            }
        }
        Ok(())
    }
}

fn type_error(path: &str, expected: &str, found: &Value) -> Error {
    Error::TypeError {
        path: path.to_string(),
        message: format!("expected {expected}, found {found:?}"),
    }
}

/// A plain, owned data tree: the value half of the template/value pair.
/// Used both as the payload `Container`s wrap and as the currency of
/// `delta`/`patch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn map() -> Value {
        Value::Map(BTreeMap::new())
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Computes the structural delta from `old` to `new`: keys present in the
/// output describe every key whose value differs. Unchanged keys are
/// absent, deleted keys map to `Value::Null`, added/changed keys carry the
/// new value, nested maps recur, and lists always replace wholesale —
/// grounded in `json_interface.py`'s `calculate_delta`, which explicitly
/// does not recurse into lists.
pub fn delta(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Map(old_m), Value::Map(new_m)) => {
            let mut out = BTreeMap::new();
            let keys = old_m.keys().chain(new_m.keys()).sorted().dedup();
            for key in keys {
                match (old_m.get(key), new_m.get(key)) {
                    (Some(Value::Map(_)), Some(Value::Map(_))) if old_m.get(key) != new_m.get(key) => {
                        out.insert(key.clone(), delta(&old_m[key], &new_m[key]));
                    }
                    (Some(_), Some(_)) => {
                        if old_m.get(key) != new_m.get(key) {
                            out.insert(key.clone(), new_m[key].clone());
                        }
                    }
                    (Some(_), None) => {
                        out.insert(key.clone(), Value::Null);
                    }
                    (None, Some(nv)) => {
                        out.insert(key.clone(), nv.clone());
                    }
                    (None, None) => unreachable!(),
                }
            }
            Value::Map(out)
        }
        _ => new.clone(),
    }
}

/// Applies a delta to `old`, producing `new` such that
/// `delta(old, patch(old, d)) == d` and `patch(old, delta(old, new)) == new`.
pub fn patch(old: &Value, d: &Value) -> Value {
    match (old, d) {
        (Value::Map(old_m), Value::Map(d_m)) => {
            let mut out = old_m.clone();
            for (key, dv) in d_m {
                match dv {
                    Value::Null => {
                        out.remove(key);
                    }
                    Value::Map(_) => {
                        let merged = match out.get(key) {
                            Some(ov @ Value::Map(_)) => patch(ov, dv),
                            _ => dv.clone(),
                        };
                        out.insert(key.clone(), merged);
                    }
                    _ => {
                        out.insert(key.clone(), dv.clone());
                    }
                }
            }
            Value::Map(out)
        }
        _ => d.clone(),
    }
}

type Callback = Rc<RefCell<dyn FnMut()>>;

/// A live, template-validated view over a [`Value`] tree.
///
/// Assignment validates against the template; reads of map/list-valued
/// fields return child `Container`s that alias the same underlying
/// storage, so mutations made through a child are visible through the
/// parent. An optional callback fires on every mutation
/// reachable through this container or any of its children; an optional
/// `static` flag makes every mutating method fail with
/// [`Error::TypeError`].
#[derive(Clone)]
pub struct Container {
    label: String,
    template: Template,
    data: Rc<RefCell<Value>>,
    callback: Option<Callback>,
    is_static: bool,
}

impl Container {
    /// Builds a container around `data`, validating eagerly.
    pub fn new(label: impl Into<String>, template: Template, data: Value) -> Result<Container> {
        let label = label.into();
        template.validate(&data, &label)?;
        Ok(Container {
            label,
            template,
            data: Rc::new(RefCell::new(data)),
            callback: None,
            is_static: false,
        })
    }

    /// An empty, mutable container with the given template.
    pub fn empty(label: impl Into<String>, template: Template) -> Container {
        let seed = if matches!(template, Template::List(_)) {
            Value::List(Vec::new())
        } else {
            Value::map()
        };
        Container {
            label: label.into(),
            template,
            data: Rc::new(RefCell::new(seed)),
            callback: None,
            is_static: false,
        }
    }

    pub fn with_callback(mut self, callback: impl FnMut() + 'static) -> Self {
        self.callback = Some(Rc::new(RefCell::new(callback)));
        self
    }

    pub fn make_static(&mut self) {
        self.is_static = true;
    }

    pub fn make_mutable(&mut self) {
        self.is_static = false;
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    fn check_mutable(&self) -> Result<()> {
        if self.is_static {
            return Err(Error::TypeError {
                path: self.label.clone(),
                message: "container is static".to_string(),
            });
        }
        Ok(())
    }

    fn fire_callback(&self) {
        if let Some(cb) = &self.callback {
            (cb.borrow_mut())();
        }
    }

    /// Returns a deep-cloned snapshot of a field's value, or `None` if the
    /// field is absent or explicitly null.
    pub fn get(&self, key: &str) -> Option<Value> {
        let map = self.data.borrow();
        let Value::Map(map) = &*map else { return None };
        match map.get(key) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v.clone()),
        }
    }

    /// Returns a child container aliasing the same storage as this
    /// container's `key` field, if that field is present and map/list
    /// shaped. Mutations through the returned container are visible
    /// through `self`.
    pub fn child(&self, key: &str) -> Result<Option<Container>> {
        let field_template = self
            .template
            .field_template(key, &self.label)?
            .cloned()
            .unwrap_or(Template::Any);

        let map = self.data.borrow();
        let Value::Map(map) = &*map else {
            return Err(type_error(&self.label, "map", &map));
        };
        let Some(value) = map.get(key) else {
            return Ok(None);
        };
        if value.is_null() {
            return Ok(None);
        }
        if !matches!(value, Value::Map(_) | Value::List(_)) {
            return Err(Error::TypeError {
                path: format!("{}.{key}", self.label),
                message: "field is not a container".to_string(),
            });
        }
        drop(map);

        // Promotes the child to its own `Rc<RefCell<_>>`; `sync_parent`
        // writes it back into the parent's map on every mutation.
        let child_value = {
            let map = self.data.borrow();
            let Value::Map(map) = &*map else { unreachable!() };
            map.get(key).cloned().unwrap_or_default()
        };

        let parent = self.data.clone();
        let parent_key = key.to_string();
        let child_data = Rc::new(RefCell::new(child_value));
        let sync_parent = {
            let child_data = child_data.clone();
            move || {
                if let Value::Map(map) = &mut *parent.borrow_mut() {
                    map.insert(parent_key.clone(), child_data.borrow().clone());
                }
            }
        };
        let outer_callback = self.callback.clone();
        let combined: Callback = Rc::new(RefCell::new(move || {
            sync_parent();
            if let Some(cb) = &outer_callback {
                (cb.borrow_mut())();
            }
        }));

        Ok(Some(Container {
            label: format!("{}.{key}", self.label),
            template: field_template,
            data: child_data,
            callback: Some(combined),
            is_static: self.is_static,
        }))
    }

    /// Validates and writes `value` into `key`, firing the callback.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check_mutable()?;
        let field_template = self.template.field_template(key, &self.label)?;
        let path = format!("{}.{key}", self.label);
        if let Some(t) = field_template {
            t.validate(&value, &path)?;
        }
        {
            let mut data = self.data.borrow_mut();
            match &mut *data {
                Value::Map(map) => {
                    map.insert(key.to_string(), value);
                }
                other => {
                    return Err(type_error(&self.label, "map", other));
                }
            }
        }
        self.fire_callback();
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.check_mutable()?;
        {
            let mut data = self.data.borrow_mut();
            if let Value::Map(map) = &mut *data {
                map.remove(key);
            }
        }
        self.fire_callback();
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        let data = self.data.borrow();
        matches!(&*data, Value::Map(map) if map.get(key).is_some_and(|v| !v.is_null()))
    }

    /// Keys with non-null values, in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let data = self.data.borrow();
        match &*data {
            Value::Map(map) => map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A deep snapshot of this container's data.
    pub fn to_value(&self) -> Value {
        self.data.borrow().clone()
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// An independent deep copy, preserving template/callback/static.
    pub fn clone_deep(&self) -> Container {
        Container {
            label: self.label.clone(),
            template: self.template.clone(),
            data: Rc::new(RefCell::new(self.data.borrow().clone())),
            callback: self.callback.clone(),
            is_static: self.is_static,
        }
    }

    /// An empty, mutable container with the same label/template — the
    /// "blank record of this shape" constructor used by the merge engine.
    pub fn new_like(&self) -> Container {
        Container::empty(self.label.clone(), self.template.clone())
    }

    pub fn delta_from(&self, old: &Container) -> Container {
        let d = delta(&old.to_value(), &self.to_value());
        Container {
            label: self.label.clone(),
            template: self.template.clone(),
            data: Rc::new(RefCell::new(d)),
            callback: None,
            is_static: false,
        }
    }

    pub fn patched_with(&self, d: &Container) -> Container {
        let p = patch(&self.to_value(), &d.to_value());
        Container {
            label: self.label.clone(),
            template: self.template.clone(),
            data: Rc::new(RefCell::new(p)),
            callback: None,
            is_static: false,
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Container({}: {:?})", self.label, self.data.borrow())
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.template == other.template && *self.data.borrow() == *other.data.borrow()
    }
}
