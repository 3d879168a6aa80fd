//! Circular region geometry.
//!
//! # Responsibility
//! - Describe the monitored area of one reminder (center, radius, trigger edge).
//! - Provide the distance and containment math used by local region monitors.
//!
//! # Invariants
//! - `radius_m` is finite and strictly positive.
//! - Coordinates stay within WGS84 latitude/longitude bounds.
//! - A trigger edge always arms at least one of entry/exit.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Mean Earth radius (IUGG) used by the haversine distance.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Geographic point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Validates latitude/longitude bounds.
    ///
    /// # Errors
    /// - `InvalidLatitude` when not finite or outside `[-90, 90]`.
    /// - `InvalidLongitude` when not finite or outside `[-180, 180]`.
    pub fn validate(&self) -> Result<(), RegionValidationError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(RegionValidationError::InvalidLatitude(self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(RegionValidationError::InvalidLongitude(self.longitude));
        }
        Ok(())
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }
}

/// Raw entry/exit flags as the platform monitor understands them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EdgeFlags {
    pub notify_on_entry: bool,
    pub notify_on_exit: bool,
}

impl EdgeFlags {
    pub const NONE: Self = Self::new(false, false);
    pub const ENTRY: Self = Self::new(true, false);
    pub const EXIT: Self = Self::new(false, true);
    pub const BOTH: Self = Self::new(true, true);

    pub const fn new(notify_on_entry: bool, notify_on_exit: bool) -> Self {
        Self {
            notify_on_entry,
            notify_on_exit,
        }
    }
}

/// Which boundary crossing fires a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEdge {
    /// Fires when the device enters the region.
    OnEntry,
    /// Fires when the device leaves the region.
    OnExit,
    /// Fires on either crossing.
    Both,
}

impl TriggerEdge {
    /// Maps this edge to platform flags. `Both` sets both flags, never neither.
    pub fn flags(self) -> EdgeFlags {
        match self {
            Self::OnEntry => EdgeFlags::ENTRY,
            Self::OnExit => EdgeFlags::EXIT,
            Self::Both => EdgeFlags::BOTH,
        }
    }

    /// Builds an edge from platform flags.
    ///
    /// # Errors
    /// - `NoTriggerEdge` when neither entry nor exit is requested.
    pub fn from_flags(flags: EdgeFlags) -> Result<Self, RegionValidationError> {
        match (flags.notify_on_entry, flags.notify_on_exit) {
            (true, false) => Ok(Self::OnEntry),
            (false, true) => Ok(Self::OnExit),
            (true, true) => Ok(Self::Both),
            (false, false) => Err(RegionValidationError::NoTriggerEdge),
        }
    }

    /// Stable string id used by CLI and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnEntry => "entry",
            Self::OnExit => "exit",
            Self::Both => "both",
        }
    }
}

impl FromStr for TriggerEdge {
    type Err = RegionValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "entry" | "arriving" | "on_entry" => Ok(Self::OnEntry),
            "exit" | "leaving" | "on_exit" => Ok(Self::OnExit),
            "both" => Ok(Self::Both),
            _ => Err(RegionValidationError::UnknownTriggerEdge(value.to_string())),
        }
    }
}

/// Boundary crossing observed between two location samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionTransition {
    Entered,
    Exited,
    Unchanged,
}

/// Monitored circular area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub center: Coordinate,
    /// Radius in meters. May be clamped by the gateway on registration.
    pub radius_m: f64,
    pub trigger_edge: TriggerEdge,
}

impl Region {
    /// Creates a validated region.
    pub fn new(
        center: Coordinate,
        radius_m: f64,
        trigger_edge: TriggerEdge,
    ) -> Result<Self, RegionValidationError> {
        let region = Self {
            center,
            radius_m,
            trigger_edge,
        };
        region.validate()?;
        Ok(region)
    }

    /// Validates center bounds and radius positivity.
    pub fn validate(&self) -> Result<(), RegionValidationError> {
        self.center.validate()?;
        if !self.radius_m.is_finite() || self.radius_m <= 0.0 {
            return Err(RegionValidationError::InvalidRadius(self.radius_m));
        }
        Ok(())
    }

    /// Returns whether `point` lies inside the circle (boundary inclusive).
    pub fn contains(&self, point: &Coordinate) -> bool {
        self.center.distance_m(point) <= self.radius_m
    }

    /// Classifies the crossing between a previous presence and `point`.
    ///
    /// An unknown previous presence is treated as outside.
    pub fn transition(&self, was_inside: Option<bool>, point: &Coordinate) -> RegionTransition {
        let was_inside = was_inside.unwrap_or(false);
        match (was_inside, self.contains(point)) {
            (false, true) => RegionTransition::Entered,
            (true, false) => RegionTransition::Exited,
            _ => RegionTransition::Unchanged,
        }
    }

    /// Returns whether the given crossing fires this region's trigger edge.
    pub fn fires_on(&self, transition: RegionTransition) -> bool {
        let flags = self.trigger_edge.flags();
        match transition {
            RegionTransition::Entered => flags.notify_on_entry,
            RegionTransition::Exited => flags.notify_on_exit,
            RegionTransition::Unchanged => false,
        }
    }
}

/// Region validation errors.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionValidationError {
    InvalidLatitude(f64),
    InvalidLongitude(f64),
    InvalidRadius(f64),
    /// Neither entry nor exit was requested.
    NoTriggerEdge,
    /// Text that names no trigger edge.
    UnknownTriggerEdge(String),
}

impl Display for RegionValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLatitude(value) => {
                write!(f, "latitude must be within [-90, 90], got {value}")
            }
            Self::InvalidLongitude(value) => {
                write!(f, "longitude must be within [-180, 180], got {value}")
            }
            Self::InvalidRadius(value) => {
                write!(f, "radius must be a positive number of meters, got {value}")
            }
            Self::NoTriggerEdge => write!(f, "at least one of entry/exit must be selected"),
            Self::UnknownTriggerEdge(value) => {
                write!(f, "unknown trigger edge `{value}`; expected entry, exit or both")
            }
        }
    }
}

impl Error for RegionValidationError {}
