use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::model::{AnyEntity, Door, Drawing, Entity, EntityKind, ID_FIELD, Snapshot, Stairs, Token};
use crate::protocol::{ConfigPatch, EntityPatch, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Add for an id that already exists.
    Duplicate,
    /// Update/remove/toggle for an id that no longer exists.
    Stale,
    /// Operation does not touch the snapshot (measurement overlay).
    NotReplicated,
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("{kind} {id} rejected patch: {source}")]
    PatchRejected {
        kind: EntityKind,
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Applies one operation to `snapshot`. Either the whole operation lands or
/// the snapshot is left untouched.
pub fn apply(snapshot: &mut Snapshot, op: &Operation) -> Result<ApplyOutcome, ApplyError> {
    match op {
        Operation::FullReplace(replacement) => {
            if !replacement.is_consistent() {
                warn!(target = "replica_sync.reconcile", "full state repeats an entity id");
            }
            *snapshot = replacement.as_ref().clone();
            Ok(ApplyOutcome::Applied)
        }
        Operation::EntityAdd(entity) => Ok(match entity {
            AnyEntity::Token(token) => insert(snapshot, token),
            AnyEntity::Drawing(drawing) => insert(snapshot, drawing),
            AnyEntity::Door(door) => insert(snapshot, door),
            AnyEntity::Stairs(stairs) => insert(snapshot, stairs),
        }),
        Operation::EntityUpdate { kind, patch } => match kind {
            EntityKind::Token => merge::<Token>(snapshot, patch),
            EntityKind::Drawing => merge::<Drawing>(snapshot, patch),
            EntityKind::Door => merge::<Door>(snapshot, patch),
            EntityKind::Stairs => merge::<Stairs>(snapshot, patch),
        },
        Operation::EntityRemove { kind, id } => Ok(match kind {
            EntityKind::Token => remove::<Token>(snapshot, id),
            EntityKind::Drawing => remove::<Drawing>(snapshot, id),
            EntityKind::Door => remove::<Door>(snapshot, id),
            EntityKind::Stairs => remove::<Stairs>(snapshot, id),
        }),
        Operation::MapUpdate(map) => {
            snapshot.map = map.clone();
            Ok(ApplyOutcome::Applied)
        }
        Operation::ConfigUpdate(patch) => {
            apply_config(snapshot, patch);
            Ok(ApplyOutcome::Applied)
        }
        Operation::ExploredUpdate(regions) => {
            snapshot.explored_regions = regions.clone();
            Ok(ApplyOutcome::Applied)
        }
        Operation::DoorToggle(toggle) => {
            match snapshot.doors.iter_mut().find(|door| door.id == toggle.id) {
                Some(door) => {
                    door.is_open = toggle.is_open;
                    Ok(ApplyOutcome::Applied)
                }
                None => Ok(ApplyOutcome::Stale),
            }
        }
        Operation::MeasurementUpdate(_) => Ok(ApplyOutcome::NotReplicated),
    }
}

fn insert<E: Entity>(snapshot: &mut Snapshot, entity: &E) -> ApplyOutcome {
    let collection = E::collection_mut(snapshot);
    if collection.iter().any(|existing| existing.id() == entity.id()) {
        return ApplyOutcome::Duplicate;
    }
    collection.push(entity.clone());
    ApplyOutcome::Applied
}

fn remove<E: Entity>(snapshot: &mut Snapshot, id: &str) -> ApplyOutcome {
    let collection = E::collection_mut(snapshot);
    match collection.iter().position(|entity| entity.id() == id) {
        Some(index) => {
            collection.remove(index);
            ApplyOutcome::Applied
        }
        None => ApplyOutcome::Stale,
    }
}

fn merge<E: Entity>(snapshot: &mut Snapshot, patch: &EntityPatch) -> Result<ApplyOutcome, ApplyError> {
    let collection = E::collection_mut(snapshot);
    let Some(slot) = collection.iter_mut().find(|entity| entity.id() == patch.id) else {
        return Ok(ApplyOutcome::Stale);
    };
    let merged = merge_fields(slot, &patch.changes).map_err(|source| ApplyError::PatchRejected {
        kind: E::KIND,
        id: patch.id.clone(),
        source,
    })?;
    *slot = merged;
    Ok(ApplyOutcome::Applied)
}

/// Overlays `changes` on the entity's fields. `null` clears a field back to
/// its default; the id is never overwritten.
pub fn merge_fields<E: Entity>(entity: &E, changes: &Map<String, Value>) -> Result<E, serde_json::Error> {
    let mut value = serde_json::to_value(entity)?;
    if let Value::Object(fields) = &mut value {
        for (key, change) in changes {
            if key == ID_FIELD {
                continue;
            }
            if change.is_null() {
                fields.remove(key);
            } else {
                fields.insert(key.clone(), change.clone());
            }
        }
    }
    serde_json::from_value(value)
}

fn apply_config(snapshot: &mut Snapshot, patch: &ConfigPatch) {
    if let Some(grid_size) = patch.grid_size {
        snapshot.grid_size = grid_size;
    }
    if let Some(grid_type) = patch.grid_type {
        snapshot.grid_type = grid_type;
    }
    if let Some(is_daylight_mode) = patch.is_daylight_mode {
        snapshot.is_daylight_mode = is_daylight_mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DoorOrientation, GridType, MapConfig};
    use crate::protocol::DoorToggle;
    use serde_json::json;

    #[test]
    fn full_replace_with_repeated_id_is_still_taken() {
        let mut local = scene();
        let replacement = Snapshot {
            tokens: vec![Token::new("t5", 0.0, 0.0, "a.png"), Token::new("t5", 1.0, 1.0, "b.png")],
            ..Default::default()
        };
        assert!(!replacement.is_consistent());
        let outcome = apply(&mut local, &Operation::full_replace(replacement.clone())).unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(local, replacement);
    }

    fn scene() -> Snapshot {
        Snapshot {
            tokens: vec![Token::new("t1", 0.0, 0.0, "t1.png"), Token::new("t2", 1.0, 1.0, "t2.png")],
            doors: vec![Door {
                id: "d1".into(),
                x: 0.0,
                y: 0.0,
                orientation: DoorOrientation::Vertical,
                is_open: false,
                is_locked: true,
                size: 2.0,
            }],
            ..Default::default()
        }
    }

    fn position(x: f64, y: f64) -> Map<String, Value> {
        let mut changes = Map::new();
        changes.insert("x".into(), json!(x));
        changes.insert("y".into(), json!(y));
        changes
    }

    #[test]
    fn update_merges_only_listed_fields() {
        let mut snapshot = scene();
        let mut before = snapshot.tokens[0].clone();
        let op = Operation::update(EntityKind::Token, "t1", position(50.0, 75.0));
        assert_eq!(apply(&mut snapshot, &op).unwrap(), ApplyOutcome::Applied);
        before.x = 50.0;
        before.y = 75.0;
        assert_eq!(snapshot.tokens[0], before);
    }

    #[test]
    fn update_and_remove_are_idempotent() {
        let update = Operation::update(EntityKind::Token, "t1", position(9.0, 9.0));
        let remove = Operation::remove(EntityKind::Token, "t2");
        let mut once = scene();
        apply(&mut once, &update).unwrap();
        apply(&mut once, &remove).unwrap();
        let mut twice = once.clone();
        apply(&mut twice, &update).unwrap();
        assert_eq!(apply(&mut twice, &remove).unwrap(), ApplyOutcome::Stale);
        assert_eq!(once, twice);
    }

    #[test]
    fn duplicate_add_is_ignored() {
        let mut snapshot = scene();
        let op = Operation::EntityAdd(AnyEntity::Token(Token::new("t1", 99.0, 99.0, "other.png")));
        assert_eq!(apply(&mut snapshot, &op).unwrap(), ApplyOutcome::Duplicate);
        assert_eq!(snapshot.tokens[0].x, 0.0);
        assert_eq!(snapshot.tokens.len(), 2);
    }

    #[test]
    fn stale_targets_are_noops() {
        let mut snapshot = scene();
        let original = snapshot.clone();
        let update = Operation::update(EntityKind::Token, "missing", position(1.0, 1.0));
        assert_eq!(apply(&mut snapshot, &update).unwrap(), ApplyOutcome::Stale);
        let remove = Operation::remove(EntityKind::Stairs, "missing");
        assert_eq!(apply(&mut snapshot, &remove).unwrap(), ApplyOutcome::Stale);
        assert_eq!(snapshot, original);
    }

    #[test]
    fn id_in_changes_is_ignored() {
        let mut snapshot = scene();
        let mut changes = position(4.0, 4.0);
        changes.insert("id".into(), json!("hijacked"));
        apply(&mut snapshot, &Operation::update(EntityKind::Token, "t1", changes)).unwrap();
        assert_eq!(snapshot.tokens[0].id, "t1");
        assert_eq!(snapshot.tokens[0].x, 4.0);
    }

    #[test]
    fn ill_typed_patch_is_rejected_atomically() {
        let mut snapshot = scene();
        let original = snapshot.clone();
        let mut changes = position(4.0, 4.0);
        changes.insert("scale".into(), json!("huge"));
        let result = apply(&mut snapshot, &Operation::update(EntityKind::Token, "t1", changes));
        assert!(matches!(result, Err(ApplyError::PatchRejected { .. })));
        assert_eq!(snapshot, original);
    }

    #[test]
    fn null_clears_optional_field() {
        let mut snapshot = scene();
        snapshot.tokens[0].name = Some("Scout".into());
        let mut changes = Map::new();
        changes.insert("name".into(), Value::Null);
        apply(&mut snapshot, &Operation::update(EntityKind::Token, "t1", changes)).unwrap();
        assert_eq!(snapshot.tokens[0].name, None);
    }

    #[test]
    fn scalars_and_map_are_assigned() {
        let mut snapshot = scene();
        apply(
            &mut snapshot,
            &Operation::ConfigUpdate(ConfigPatch {
                grid_type: Some(GridType::Hidden),
                ..Default::default()
            }),
        )
        .unwrap();
        assert_eq!(snapshot.grid_type, GridType::Hidden);
        assert_eq!(snapshot.grid_size, 50);

        let map = MapConfig {
            src: "keep.png".into(),
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            scale: 2.0,
        };
        apply(&mut snapshot, &Operation::MapUpdate(Some(map.clone()))).unwrap();
        assert_eq!(snapshot.map, Some(map));
        apply(&mut snapshot, &Operation::MapUpdate(None)).unwrap();
        assert_eq!(snapshot.map, None);
    }

    #[test]
    fn door_toggle_sets_absolute_state() {
        let mut snapshot = scene();
        let op = Operation::DoorToggle(DoorToggle {
            id: "d1".into(),
            is_open: true,
        });
        apply(&mut snapshot, &op).unwrap();
        apply(&mut snapshot, &op).unwrap();
        assert!(snapshot.doors[0].is_open);
    }

    #[test]
    fn full_replace_discards_local_state() {
        let mut snapshot = scene();
        let replacement = Snapshot {
            grid_size: 30,
            ..Default::default()
        };
        apply(&mut snapshot, &Operation::full_replace(replacement.clone())).unwrap();
        assert_eq!(snapshot, replacement);
    }
}
