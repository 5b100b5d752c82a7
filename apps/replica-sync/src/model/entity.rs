use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::snapshot::{Door, Drawing, Snapshot, Stairs, Token};

/// Name of the identity field every entity carries on the wire.
pub const ID_FIELD: &str = "id";

/// Entity collections in the order a detection pass visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Token,
    Drawing,
    Door,
    Stairs,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Token,
        EntityKind::Drawing,
        EntityKind::Door,
        EntityKind::Stairs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Token => "token",
            EntityKind::Drawing => "drawing",
            EntityKind::Door => "door",
            EntityKind::Stairs => "stairs",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A member of one of the snapshot's id-keyed collections.
pub trait Entity: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;
    fn collection(snapshot: &Snapshot) -> &Vec<Self>;
    fn collection_mut(snapshot: &mut Snapshot) -> &mut Vec<Self>;
    fn wrap(self) -> AnyEntity;
}

macro_rules! impl_entity {
    ($ty:ident, $kind:ident, $field:ident) => {
        impl Entity for $ty {
            const KIND: EntityKind = EntityKind::$kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn collection(snapshot: &Snapshot) -> &Vec<Self> {
                &snapshot.$field
            }

            fn collection_mut(snapshot: &mut Snapshot) -> &mut Vec<Self> {
                &mut snapshot.$field
            }

            fn wrap(self) -> AnyEntity {
                AnyEntity::$kind(self)
            }
        }
    };
}

impl_entity!(Token, Token, tokens);
impl_entity!(Drawing, Drawing, drawings);
impl_entity!(Door, Door, doors);
impl_entity!(Stairs, Stairs, stairs);

#[derive(Debug, Clone, PartialEq)]
pub enum AnyEntity {
    Token(Token),
    Drawing(Drawing),
    Door(Door),
    Stairs(Stairs),
}

impl AnyEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            AnyEntity::Token(_) => EntityKind::Token,
            AnyEntity::Drawing(_) => EntityKind::Drawing,
            AnyEntity::Door(_) => EntityKind::Door,
            AnyEntity::Stairs(_) => EntityKind::Stairs,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            AnyEntity::Token(entity) => entity.id(),
            AnyEntity::Drawing(entity) => entity.id(),
            AnyEntity::Door(entity) => entity.id(),
            AnyEntity::Stairs(entity) => entity.id(),
        }
    }
}
