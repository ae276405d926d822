//! Identity and spatial types shared by every Earshot layer.

use std::fmt;
use std::ops::Sub;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ClientId
// ---------------------------------------------------------------------------

/// The stable unique id of a player, and therefore of their client session.
///
/// Newtype over a [`Uuid`] so a client id can't be confused with a relay
/// id or any other uuid floating around. `#[serde(transparent)]` keeps the
/// wire form a plain uuid string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Generates a fresh random id. Mostly useful in tests; real ids come
    /// from the host game.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying uuid.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for ClientId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Vector3
// ---------------------------------------------------------------------------

/// A point or offset in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// Where a player stands and which way they face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Name of the world the player is in.
    pub world: String,
    pub position: Vector3,
    pub pitch: f32,
    pub yaw: f32,
}

impl Location {
    pub fn new(world: impl Into<String>, position: Vector3, pitch: f32, yaw: f32) -> Self {
        Self {
            world: world.into(),
            position,
            pitch,
            yaw,
        }
    }

    /// Offset of this location as seen from `origin`.
    ///
    /// Locations in different worlds have no meaningful offset, so the
    /// absolute position is returned instead.
    pub fn relative_to(&self, origin: &Location) -> Vector3 {
        if self.world == origin.world {
            self.position - origin.position
        } else {
            self.position
        }
    }
}
