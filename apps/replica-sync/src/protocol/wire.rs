use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sync_proto::{Envelope, kinds};
use thiserror::Error;

use crate::model::{AnyEntity, EntityKind};

use super::{ConfigPatch, DoorToggle, EntityPatch, EntityRef, Message, Operation};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown operation kind {0:?}")]
    UnknownKind(String),
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Copy)]
enum Verb {
    Add,
    Update,
    Remove,
}

static ENTITY_KINDS: [(EntityKind, [&str; 3]); 4] = [
    (
        EntityKind::Token,
        [kinds::ADD_TOKEN, kinds::UPDATE_TOKEN, kinds::REMOVE_TOKEN],
    ),
    (
        EntityKind::Drawing,
        [kinds::ADD_DRAWING, kinds::UPDATE_DRAWING, kinds::REMOVE_DRAWING],
    ),
    (
        EntityKind::Door,
        [kinds::ADD_DOOR, kinds::UPDATE_DOOR, kinds::REMOVE_DOOR],
    ),
    (
        EntityKind::Stairs,
        [kinds::ADD_STAIRS, kinds::UPDATE_STAIRS, kinds::REMOVE_STAIRS],
    ),
];

fn entity_wire_kind(kind: EntityKind, verb: Verb) -> &'static str {
    let names = ENTITY_KINDS
        .iter()
        .find(|(candidate, _)| *candidate == kind)
        .map(|(_, names)| names)
        .unwrap_or(&ENTITY_KINDS[0].1);
    names[verb as usize]
}

fn parse_entity_kind(wire: &str) -> Option<(EntityKind, Verb)> {
    ENTITY_KINDS.iter().find_map(|(kind, names)| {
        let verb = match names.iter().position(|name| *name == wire)? {
            0 => Verb::Add,
            1 => Verb::Update,
            _ => Verb::Remove,
        };
        Some((*kind, verb))
    })
}

impl Operation {
    /// Wire `type` of this operation.
    pub fn wire_kind(&self) -> &'static str {
        match self {
            Operation::FullReplace(_) => kinds::FULL_REPLACE,
            Operation::EntityAdd(entity) => entity_wire_kind(entity.kind(), Verb::Add),
            Operation::EntityUpdate { kind, .. } => entity_wire_kind(*kind, Verb::Update),
            Operation::EntityRemove { kind, .. } => entity_wire_kind(*kind, Verb::Remove),
            Operation::MapUpdate(_) => kinds::UPDATE_MAP,
            Operation::ConfigUpdate(_) => kinds::UPDATE_CONFIG,
            Operation::ExploredUpdate(_) => kinds::UPDATE_EXPLORED_REGIONS,
            Operation::MeasurementUpdate(_) => kinds::UPDATE_MEASUREMENT,
            Operation::DoorToggle(_) => kinds::TOGGLE_DOOR,
        }
    }
}

impl Message {
    pub fn wire_kind(&self) -> &'static str {
        match self {
            Message::RequestInitialState => kinds::REQUEST_INITIAL_STATE,
            Message::Op(op) => op.wire_kind(),
        }
    }
}

pub fn to_envelope(message: &Message) -> Result<Envelope, ProtocolError> {
    let kind = message.wire_kind();
    let op = match message {
        Message::RequestInitialState => return Ok(Envelope::bare(kind)),
        Message::Op(op) => op,
    };
    let payload = match op {
        Operation::FullReplace(snapshot) => payload_of(kind, snapshot.as_ref())?,
        Operation::EntityAdd(entity) => match entity {
            AnyEntity::Token(token) => payload_of(kind, token)?,
            AnyEntity::Drawing(drawing) => payload_of(kind, drawing)?,
            AnyEntity::Door(door) => payload_of(kind, door)?,
            AnyEntity::Stairs(stairs) => payload_of(kind, stairs)?,
        },
        Operation::EntityUpdate { patch, .. } => payload_of(kind, patch)?,
        Operation::EntityRemove { id, .. } => payload_of(kind, &EntityRef { id: id.clone() })?,
        Operation::MapUpdate(map) => payload_of(kind, map)?,
        Operation::ConfigUpdate(patch) => payload_of(kind, patch)?,
        Operation::ExploredUpdate(regions) => payload_of(kind, regions)?,
        Operation::MeasurementUpdate(measurement) => payload_of(kind, measurement)?,
        Operation::DoorToggle(toggle) => payload_of(kind, toggle)?,
    };
    Ok(Envelope::new(kind, payload))
}

pub fn from_envelope(envelope: Envelope) -> Result<Message, ProtocolError> {
    let Envelope { kind, payload } = envelope;
    let payload = payload.unwrap_or_default();
    let op = match kind.as_str() {
        kinds::REQUEST_INITIAL_STATE => return Ok(Message::RequestInitialState),
        kinds::FULL_REPLACE => Operation::full_replace(parse(&kind, payload)?),
        kinds::UPDATE_MAP => Operation::MapUpdate(parse(&kind, payload)?),
        kinds::UPDATE_CONFIG => Operation::ConfigUpdate(parse::<ConfigPatch>(&kind, payload)?),
        kinds::UPDATE_EXPLORED_REGIONS => Operation::ExploredUpdate(parse(&kind, payload)?),
        kinds::UPDATE_MEASUREMENT => Operation::MeasurementUpdate(parse(&kind, payload)?),
        kinds::TOGGLE_DOOR => Operation::DoorToggle(parse::<DoorToggle>(&kind, payload)?),
        other => match parse_entity_kind(other) {
            Some((entity_kind, Verb::Add)) => Operation::EntityAdd(match entity_kind {
                EntityKind::Token => AnyEntity::Token(parse(&kind, payload)?),
                EntityKind::Drawing => AnyEntity::Drawing(parse(&kind, payload)?),
                EntityKind::Door => AnyEntity::Door(parse(&kind, payload)?),
                EntityKind::Stairs => AnyEntity::Stairs(parse(&kind, payload)?),
            }),
            Some((entity_kind, Verb::Update)) => Operation::EntityUpdate {
                kind: entity_kind,
                patch: parse::<EntityPatch>(&kind, payload)?,
            },
            Some((entity_kind, Verb::Remove)) => Operation::EntityRemove {
                kind: entity_kind,
                id: parse::<EntityRef>(&kind, payload)?.id,
            },
            None => return Err(ProtocolError::UnknownKind(other.to_string())),
        },
    };
    Ok(Message::Op(op))
}

pub fn encode(message: &Message) -> Result<Bytes, ProtocolError> {
    let envelope = to_envelope(message)?;
    serde_json::to_vec(&envelope)
        .map(Bytes::from)
        .map_err(ProtocolError::Malformed)
}

pub fn decode(frame: &[u8]) -> Result<Message, ProtocolError> {
    let envelope: Envelope = serde_json::from_slice(frame).map_err(ProtocolError::Malformed)?;
    from_envelope(envelope)
}

fn payload_of<T: Serialize + ?Sized>(kind: &str, value: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value).map_err(|source| ProtocolError::Payload {
        kind: kind.to_string(),
        source,
    })
}

fn parse<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|source| ProtocolError::Payload {
        kind: kind.to_string(),
        source,
    })
}
