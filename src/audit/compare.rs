//! Comparing replicas of entity sets.

use std::collections::BTreeSet;
use log::{Level, debug, log_enabled};
use serde_json::{Map, Number, Value};
use super::entity::EntitySet;


//------------ compare_entries -----------------------------------------------

/// Returns the keys of all entities that differ between two sets.
///
/// An entity differs if it is present in only one of the sets or if any of
/// its fields differ. The result is the same if the sets are swapped.
pub fn compare_entries(mine: &EntitySet, theirs: &EntitySet) -> BTreeSet<String> {
    let mut res = BTreeSet::new();
    for (key, my_entity) in mine {
        match theirs.get(key) {
            Some(their_entity) => {
                if !values_equal(my_entity, their_entity) {
                    res.insert(key.clone());
                }
            }
            None => {
                res.insert(key.clone());
            }
        }
    }
    for key in theirs.keys() {
        if !mine.contains_key(key) {
            res.insert(key.clone());
        }
    }
    res
}

/// Compares the replicas of one class held by two resources.
///
/// Logs both replicas of every entity before comparing if debug logging is
/// enabled.
pub fn compare_replicas(
    class: &str,
    my_resource: &str,
    mine: &EntitySet,
    their_resource: &str,
    theirs: &EntitySet,
) -> BTreeSet<String> {
    if log_enabled!(Level::Debug) {
        for (key, my_entity) in mine {
            debug!(
                "Comparing {} {}: {}={} {}={}",
                class, key,
                my_resource, my_entity,
                their_resource,
                theirs.get(key).unwrap_or(&Value::Null)
            );
        }
        for (key, their_entity) in theirs {
            if !mine.contains_key(key) {
                debug!(
                    "Comparing {} {}: {}=null {}={}",
                    class, key, my_resource, their_resource, their_entity
                );
            }
        }
    }
    compare_entries(mine, theirs)
}


//------------ Structural Equality -------------------------------------------

/// Compares two entity representations field by field.
///
/// Objects are equal if every field is equal, where a missing field equals
/// null. Arrays are compared in order. Numbers are compared by value.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Object(left), Value::Object(right)) => {
            objects_equal(left, right)
        }
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len()
            && left.iter().zip(right).all(|(l, r)| values_equal(l, r))
        }
        (Value::Number(left), Value::Number(right)) => {
            numbers_equal(left, right)
        }
        (left, right) => left == right
    }
}

fn objects_equal(left: &Map<String, Value>, right: &Map<String, Value>) -> bool {
    left.iter().all(|(key, value)| {
        values_equal(value, right.get(key).unwrap_or(&Value::Null))
    })
    && right.iter().all(|(key, value)| {
        left.contains_key(key) || value.is_null()
    })
}

fn numbers_equal(left: &Number, right: &Number) -> bool {
    if left.is_f64() || right.is_f64() {
        return left.as_f64() == right.as_f64()
    }
    match (left.as_i64(), right.as_i64()) {
        (Some(left), Some(right)) => left == right,
        (None, None) => left.as_u64() == right.as_u64(),
        _ => false,
    }
}


//============ Tests =========================================================
