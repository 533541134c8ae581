//! Direction vector to compass bearing
//!
//! 0° = east (+x), 90° = north (+y), 180° = west, 270° = south.
//! No axis flipping happens here; callers working in screen coordinates
//! negate `dy` themselves if they want "up" to be north.

/// Convert a direction vector into a bearing in `[0, 360)`
///
/// `(0, 0)` yields 0°. Non-finite input yields 0° instead of NaN.
pub fn heading_degrees(dx: f64, dy: f64) -> f64 {
    let degrees = dy.atan2(dx).to_degrees();
    if !degrees.is_finite() {
        return 0.0;
    }
    // atan2 is within [-180, 180], so the shifted value is non-negative and
    // `%` stays exact (rem_euclid can round up to 360.0 for tiny negatives)
    let normalized = (degrees + 360.0) % 360.0;
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

/// Eight-wind compass point, for textual display
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompassPoint {
    East,
    NorthEast,
    North,
    NorthWest,
    West,
    SouthWest,
    South,
    SouthEast,
}

impl CompassPoint {
    /// Counter-clockwise from east, matching [`heading_degrees`]
    const ORDER: [CompassPoint; 8] = [
        CompassPoint::East,
        CompassPoint::NorthEast,
        CompassPoint::North,
        CompassPoint::NorthWest,
        CompassPoint::West,
        CompassPoint::SouthWest,
        CompassPoint::South,
        CompassPoint::SouthEast,
    ];

    /// Nearest compass point for a bearing in degrees (any range)
    pub fn from_heading(degrees: f64) -> Self {
        if !degrees.is_finite() {
            return CompassPoint::East;
        }
        let sector = ((degrees.rem_euclid(360.0) + 22.5) / 45.0) as usize % 8;
        Self::ORDER[sector]
    }

    pub fn abbrev(self) -> &'static str {
        match self {
            CompassPoint::East => "E",
            CompassPoint::NorthEast => "NE",
            CompassPoint::North => "N",
            CompassPoint::NorthWest => "NW",
            CompassPoint::West => "W",
            CompassPoint::SouthWest => "SW",
            CompassPoint::South => "S",
            CompassPoint::SouthEast => "SE",
        }
    }
}

impl std::fmt::Display for CompassPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.abbrev())
    }
}
