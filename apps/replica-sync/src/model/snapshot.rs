use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Default bound on `Snapshot::explored_regions`.
pub const MAX_EXPLORED_REGIONS: usize = 100;

const DEFAULT_GRID_SIZE: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Pc,
    Npc,
    Monster,
    Object,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub src: String,
    #[serde(default = "unit_scale")]
    pub scale: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<TokenType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_radius: Option<f64>,
    /// Library entry this token was stamped from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prototype_id: Option<String>,
}

impl Token {
    pub fn new(id: impl Into<String>, x: f64, y: f64, src: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            src: src.into(),
            scale: 1.0,
            name: None,
            token_type: None,
            vision_radius: None,
            prototype_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawingTool {
    Freehand,
    Line,
    Rectangle,
    Circle,
    Wall,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    pub x: f64,
    pub y: f64,
    #[serde(default = "unit_scale")]
    pub scale_x: f64,
    #[serde(default = "unit_scale")]
    pub scale_y: f64,
    #[serde(default)]
    pub rotation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drawing {
    pub id: String,
    pub tool: DrawingTool,
    #[serde(default)]
    pub points: Vec<Point>,
    pub color: String,
    pub size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoorOrientation {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Door {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub orientation: DoorOrientation,
    #[serde(default)]
    pub is_open: bool,
    #[serde(default)]
    pub is_locked: bool,
    pub size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    North,
    East,
    South,
    West,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StairType {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stairs {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub direction: Facing,
    pub stair_type: StairType,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapConfig {
    pub src: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default = "unit_scale")]
    pub scale: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridType {
    #[default]
    Square,
    Hex,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExploredRegion {
    pub points: Vec<Point>,
    #[serde(with = "time::serde::rfc3339")]
    pub explored_at: OffsetDateTime,
}

impl ExploredRegion {
    pub fn now(points: Vec<Point>) -> Self {
        Self {
            points,
            explored_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Ephemeral ruler/cone overlay. Never part of a [`Snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementShape {
    Ruler,
    Cone,
    Circle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub shape: MeasurementShape,
    pub origin: Point,
    pub target: Point,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// The replicated slice of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub tokens: Vec<Token>,
    #[serde(default)]
    pub drawings: Vec<Drawing>,
    #[serde(default)]
    pub doors: Vec<Door>,
    #[serde(default)]
    pub stairs: Vec<Stairs>,
    #[serde(default)]
    pub map: Option<MapConfig>,
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,
    #[serde(default)]
    pub grid_type: GridType,
    #[serde(default)]
    pub is_daylight_mode: bool,
    #[serde(default)]
    pub explored_regions: Vec<ExploredRegion>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            drawings: Vec::new(),
            doors: Vec::new(),
            stairs: Vec::new(),
            map: None,
            grid_size: DEFAULT_GRID_SIZE,
            grid_type: GridType::default(),
            is_daylight_mode: false,
            explored_regions: Vec::new(),
        }
    }
}

impl Snapshot {
    /// True when no collection holds two entities with the same id.
    pub fn is_consistent(&self) -> bool {
        fn unique<'a>(ids: impl Iterator<Item = &'a str>) -> bool {
            let mut seen = HashSet::new();
            ids.into_iter().all(|id| seen.insert(id))
        }
        unique(self.tokens.iter().map(|t| t.id.as_str()))
            && unique(self.drawings.iter().map(|d| d.id.as_str()))
            && unique(self.doors.iter().map(|d| d.id.as_str()))
            && unique(self.stairs.iter().map(|s| s.id.as_str()))
    }

    /// Appends a region, evicting the oldest ones beyond `limit`.
    pub fn push_explored_region(&mut self, region: ExploredRegion, limit: usize) {
        self.explored_regions.push(region);
        let excess = self.explored_regions.len().saturating_sub(limit);
        if excess > 0 {
            self.explored_regions.drain(..excess);
        }
    }

    pub fn token(&self, id: &str) -> Option<&Token> {
        self.tokens.iter().find(|token| token.id == id)
    }

    pub fn door(&self, id: &str) -> Option<&Door> {
        self.doors.iter().find(|door| door.id == id)
    }
}

fn unit_scale() -> f64 {
    1.0
}

fn default_grid_size() -> u32 {
    DEFAULT_GRID_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_collections_decode_as_empty() {
        let snapshot: Snapshot = serde_json::from_str(r#"{"gridSize": 70}"#).unwrap();
        assert!(snapshot.tokens.is_empty());
        assert!(snapshot.doors.is_empty());
        assert!(snapshot.map.is_none());
        assert_eq!(snapshot.grid_size, 70);
        assert_eq!(snapshot.grid_type, GridType::Square);
    }

    #[test]
    fn wire_fields_are_camel_case() {
        let mut token = Token::new("t1", 1.0, 2.0, "orc.png");
        token.vision_radius = Some(30.0);
        let value = serde_json::to_value(&token).unwrap();
        assert_eq!(value["visionRadius"], 30.0);
        assert!(value.get("name").is_none());
        let snapshot = Snapshot {
            is_daylight_mode: true,
            ..Default::default()
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["isDaylightMode"], true);
        assert!(value["map"].is_null());
    }

    #[test]
    fn explored_regions_evict_oldest() {
        let mut snapshot = Snapshot::default();
        for i in 0..5 {
            snapshot.push_explored_region(
                ExploredRegion::now(vec![Point::new(i as f64, 0.0)]),
                3,
            );
        }
        let xs: Vec<f64> = snapshot
            .explored_regions
            .iter()
            .map(|region| region.points[0].x)
            .collect();
        assert_eq!(xs, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn duplicate_ids_are_inconsistent() {
        let mut snapshot = Snapshot::default();
        snapshot.tokens.push(Token::new("a", 0.0, 0.0, "a.png"));
        assert!(snapshot.is_consistent());
        snapshot.tokens.push(Token::new("a", 1.0, 1.0, "a.png"));
        assert!(!snapshot.is_consistent());
    }
}
