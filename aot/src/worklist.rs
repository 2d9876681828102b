// worklist.rs - Pending/done bookkeeping for methods and static fields
//
// Every member discovered during a run lands here exactly once. Items are
// ordered by their identity (declaring type, name, parameter types), never by
// discovery order, so the next pending item is always the smallest key that is
// not done yet. The set grows while it is being drained; callers must ask for
// the next pending item again after each one instead of iterating a snapshot.

use crate::metadata::{Assembly, FieldDef, MethodDef, MethodRef};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Identity and sort key of a method
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodKey {
    pub declaring_type: String,
    pub name: String,
    pub parameters: Vec<String>,
}

/// Identity and sort key of a static field
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldKey {
    pub declaring_type: String,
    pub name: String,
}

/// A method scheduled for compilation
#[derive(Debug, Clone)]
pub struct MethodItem {
    pub key: MethodKey,
    pub method: Rc<MethodDef>,
    /// Assembly declaring the method; module-local references resolve against it
    pub origin: Rc<Assembly>,
}

/// A static field scheduled for emission
#[derive(Debug, Clone)]
pub struct FieldItem {
    pub key: FieldKey,
    pub field: Rc<FieldDef>,
    pub symbol: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    Done,
}

#[derive(Debug)]
struct Entry<T> {
    item: T,
    status: Status,
}

#[derive(Debug, Default)]
pub struct Worklist {
    methods: BTreeMap<MethodKey, Entry<MethodItem>>,
    fields: BTreeMap<FieldKey, Entry<FieldItem>>,
}

impl MethodKey {
    pub fn new(declaring_type: &str, method: &MethodDef) -> Self {
        MethodKey {
            declaring_type: declaring_type.to_string(),
            name: method.name.clone(),
            parameters: method.parameter_types(),
        }
    }

    pub fn from_ref(method: &MethodRef) -> Self {
        MethodKey {
            declaring_type: method.declaring_type.full_name.clone(),
            name: method.name.clone(),
            parameters: method
                .parameters
                .iter()
                .map(|p| p.full_name.clone())
                .collect(),
        }
    }
}

impl FieldKey {
    pub fn new(declaring_type: &str, field: &FieldDef) -> Self {
        FieldKey {
            declaring_type: declaring_type.to_string(),
            name: field.name.clone(),
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({})",
            self.declaring_type,
            self.name,
            self.parameters.join(",")
        )
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring_type, self.name)
    }
}

impl Worklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a method; returns false if it was already known
    pub fn enqueue_method(&mut self, item: MethodItem) -> bool {
        if self.methods.contains_key(&item.key) {
            return false;
        }
        tracing::trace!(method = %item.key, "queued method");
        self.methods.insert(
            item.key.clone(),
            Entry {
                item,
                status: Status::Pending,
            },
        );
        true
    }

    /// Schedule a static field; returns false if it was already known
    pub fn enqueue_field(&mut self, item: FieldItem) -> bool {
        if self.fields.contains_key(&item.key) {
            return false;
        }
        tracing::trace!(field = %item.key, "queued static field");
        self.fields.insert(
            item.key.clone(),
            Entry {
                item,
                status: Status::Pending,
            },
        );
        true
    }

    /// Smallest method that has not been compiled yet
    pub fn next_pending_method(&self) -> Option<MethodItem> {
        self.methods
            .values()
            .find(|e| e.status == Status::Pending)
            .map(|e| e.item.clone())
    }

    /// Smallest static field that has not been emitted yet
    pub fn next_pending_field(&self) -> Option<FieldItem> {
        self.fields
            .values()
            .find(|e| e.status == Status::Pending)
            .map(|e| e.item.clone())
    }

    pub fn mark_method_done(&mut self, key: &MethodKey) {
        if let Some(entry) = self.methods.get_mut(key) {
            debug_assert_eq!(entry.status, Status::Pending, "{} compiled twice", key);
            entry.status = Status::Done;
        }
    }

    pub fn mark_field_done(&mut self, key: &FieldKey) {
        if let Some(entry) = self.fields.get_mut(key) {
            debug_assert_eq!(entry.status, Status::Pending, "{} emitted twice", key);
            entry.status = Status::Done;
        }
    }

    /// `Some(done)` for a known method, `None` if never queued
    pub fn method_status(&self, key: &MethodKey) -> Option<bool> {
        self.methods.get(key).map(|e| e.status == Status::Done)
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// True once every known method and field is done
    pub fn is_drained(&self) -> bool {
        self.methods.values().all(|e| e.status == Status::Done)
            && self.fields.values().all(|e| e.status == Status::Done)
    }
}
