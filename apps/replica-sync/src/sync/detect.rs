use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::trace;

use crate::model::{Door, Drawing, Entity, ID_FIELD, Snapshot, Stairs, Token, equal_field, equal_typed};
use crate::protocol::{ConfigPatch, Operation};

/// Diffs `current` against the last reconciled `baseline`.
///
/// Without a baseline the whole snapshot is sent as a single `FullReplace`.
/// Otherwise operations come out in a fixed order: per collection (tokens,
/// drawings, doors, stairs) adds, removes, then updates; followed by the map,
/// the scalar config and finally explored regions.
pub fn detect(baseline: Option<&Snapshot>, current: &Snapshot) -> Vec<Operation> {
    let Some(baseline) = baseline else {
        return vec![Operation::full_replace(current.clone())];
    };

    let mut ops = Vec::new();
    diff_collection::<Token>(baseline, current, &mut ops);
    diff_collection::<Drawing>(baseline, current, &mut ops);
    diff_collection::<Door>(baseline, current, &mut ops);
    diff_collection::<Stairs>(baseline, current, &mut ops);

    if !equal_typed(&baseline.map, &current.map) {
        ops.push(Operation::MapUpdate(current.map.clone()));
    }

    let config = diff_config(baseline, current);
    if !config.is_empty() {
        ops.push(Operation::ConfigUpdate(config));
    }

    if !equal_typed(&baseline.explored_regions, &current.explored_regions) {
        ops.push(Operation::ExploredUpdate(current.explored_regions.clone()));
    }

    ops
}

fn diff_collection<E: Entity>(baseline: &Snapshot, current: &Snapshot, ops: &mut Vec<Operation>) {
    let before = E::collection(baseline);
    let after = E::collection(current);
    let before_index: HashMap<&str, &E> = before.iter().map(|e| (e.id(), e)).collect();
    let after_index: HashMap<&str, &E> = after.iter().map(|e| (e.id(), e)).collect();

    for entity in after {
        if !before_index.contains_key(entity.id()) {
            ops.push(Operation::EntityAdd(entity.clone().wrap()));
        }
    }

    for entity in before {
        if !after_index.contains_key(entity.id()) {
            ops.push(Operation::remove(E::KIND, entity.id()));
        }
    }

    for entity in after {
        let Some(previous) = before_index.get(entity.id()) else {
            continue;
        };
        if equal_typed(*previous, entity) {
            continue;
        }
        let changes = diff_entity(*previous, entity);
        if changes.is_empty() {
            continue;
        }
        trace!(
            target = "replica_sync.detect",
            kind = %E::KIND,
            id = entity.id(),
            fields = changes.len(),
            "entity changed"
        );
        ops.push(Operation::update(E::KIND, entity.id(), changes));
    }
}

fn diff_entity<E: Entity>(previous: &E, current: &E) -> Map<String, Value> {
    match (serde_json::to_value(previous), serde_json::to_value(current)) {
        (Ok(before), Ok(after)) => diff_fields(&before, &after),
        // Without a shape to compare, resend every field of the current value.
        (_, Ok(Value::Object(mut fields))) => {
            fields.remove(ID_FIELD);
            fields
        }
        _ => Map::new(),
    }
}

/// Field-level diff of two records, skipping the identity field. A field
/// that disappeared is reported as `null`.
pub fn diff_fields(before: &Value, after: &Value) -> Map<String, Value> {
    let (Value::Object(before), Value::Object(after)) = (before, after) else {
        return Map::new();
    };
    let mut changes = Map::new();
    for (key, next) in after {
        if key == ID_FIELD {
            continue;
        }
        if !equal_field(before.get(key), Some(next)) {
            changes.insert(key.clone(), next.clone());
        }
    }
    for (key, previous) in before {
        if key == ID_FIELD || after.contains_key(key) {
            continue;
        }
        if !previous.is_null() {
            changes.insert(key.clone(), Value::Null);
        }
    }
    changes
}

fn diff_config(baseline: &Snapshot, current: &Snapshot) -> ConfigPatch {
    ConfigPatch {
        grid_size: (baseline.grid_size != current.grid_size).then_some(current.grid_size),
        grid_type: (baseline.grid_type != current.grid_type).then_some(current.grid_type),
        is_daylight_mode: (baseline.is_daylight_mode != current.is_daylight_mode)
            .then_some(current.is_daylight_mode),
    }
}
