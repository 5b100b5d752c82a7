//! Which operations each role may originate and accept.
//!
//! The mirror is display-only: the one thing it may send back is a token's
//! position. Everything else flows primary to mirror.

use crate::model::EntityKind;
use crate::protocol::{Message, Operation};

use super::Role;

/// Fields a mirror may change on a token.
pub const POSITION_FIELDS: [&str; 2] = ["x", "y"];

/// Narrows a detection pass to what `role` is allowed to send.
pub fn restrict_outbound(role: Role, ops: Vec<Operation>) -> Vec<Operation> {
    match role {
        Role::Primary => ops,
        Role::Mirror => ops.into_iter().filter_map(position_only).collect(),
    }
}

/// True when `role` may put `op` on the wire outside a detection pass.
pub fn may_originate(role: Role, op: &Operation) -> bool {
    match role {
        Role::Primary => true,
        Role::Mirror => is_position_update(op),
    }
}

/// Filters an inbound message. `None` means drop it.
pub fn admit_inbound(role: Role, message: Message) -> Option<Message> {
    match (role, message) {
        (Role::Primary, Message::RequestInitialState) => Some(Message::RequestInitialState),
        (Role::Primary, Message::Op(op)) => position_only(op).map(Message::Op),
        (Role::Mirror, Message::RequestInitialState) => None,
        (Role::Mirror, Message::Op(op)) => Some(Message::Op(op)),
    }
}

fn is_position_update(op: &Operation) -> bool {
    match op {
        Operation::EntityUpdate {
            kind: EntityKind::Token,
            patch,
        } => {
            !patch.changes.is_empty()
                && patch
                    .changes
                    .keys()
                    .all(|key| POSITION_FIELDS.contains(&key.as_str()))
        }
        _ => false,
    }
}

fn position_only(op: Operation) -> Option<Operation> {
    match op {
        Operation::EntityUpdate {
            kind: EntityKind::Token,
            mut patch,
        } => {
            patch
                .changes
                .retain(|key, _| POSITION_FIELDS.contains(&key.as_str()));
            (!patch.changes.is_empty()).then_some(Operation::EntityUpdate {
                kind: EntityKind::Token,
                patch,
            })
        }
        _ => None,
    }
}
