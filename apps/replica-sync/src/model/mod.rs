pub mod entity;
pub mod equality;
pub mod snapshot;

pub use entity::{AnyEntity, Entity, EntityKind, ID_FIELD};
pub use equality::{equal, equal_field, equal_typed};
pub use snapshot::{
    Door, DoorOrientation, Drawing, DrawingTool, ExploredRegion, Facing, GridType,
    MAX_EXPLORED_REGIONS, MapConfig, Measurement, MeasurementShape, Point, Snapshot, StairType,
    Stairs, Token, TokenType, Transform,
};
