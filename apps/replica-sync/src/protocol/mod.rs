//! Operations exchanged between the two replicas of a session.
//!
//! Every operation carries its target id and absolute field values, never
//! increments, so operations for different targets commute and a repeated
//! operation converges to the same state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{AnyEntity, EntityKind, ExploredRegion, GridType, MapConfig, Measurement, Snapshot};

pub mod wire;

pub use wire::{ProtocolError, decode, encode};

/// Changed fields of one entity. `changes` never contains the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPatch {
    pub id: String,
    pub changes: Map<String, Value>,
}

impl EntityPatch {
    pub fn new(id: impl Into<String>, changes: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            changes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
}

/// Scalars that changed in one detection pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_type: Option<GridType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_daylight_mode: Option<bool>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.grid_size.is_none() && self.grid_type.is_none() && self.is_daylight_mode.is_none()
    }
}

/// Eager door state change. Carries the resulting state so redelivery is harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoorToggle {
    pub id: String,
    pub is_open: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    FullReplace(Box<Snapshot>),
    EntityAdd(AnyEntity),
    EntityUpdate {
        kind: EntityKind,
        patch: EntityPatch,
    },
    EntityRemove {
        kind: EntityKind,
        id: String,
    },
    MapUpdate(Option<MapConfig>),
    ConfigUpdate(ConfigPatch),
    ExploredUpdate(Vec<ExploredRegion>),
    MeasurementUpdate(Option<Measurement>),
    DoorToggle(DoorToggle),
}

impl Operation {
    pub fn full_replace(snapshot: Snapshot) -> Self {
        Operation::FullReplace(Box::new(snapshot))
    }

    pub fn update(kind: EntityKind, id: impl Into<String>, changes: Map<String, Value>) -> Self {
        Operation::EntityUpdate {
            kind,
            patch: EntityPatch::new(id, changes),
        }
    }

    pub fn remove(kind: EntityKind, id: impl Into<String>) -> Self {
        Operation::EntityRemove {
            kind,
            id: id.into(),
        }
    }
}

/// Everything that can travel over a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    RequestInitialState,
    Op(Operation),
}

impl From<Operation> for Message {
    fn from(op: Operation) -> Self {
        Message::Op(op)
    }
}
