use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The sensor types an exercise bike publishes. Each kind carries its
/// plausible value range and the unit the device is expected to report in;
/// both feed the quality scorer, and the unit table doubles as the lookup
/// for outgoing control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    HeartRate,
    Cadence,
    Speed,
    Power,
    Resistance,
    Incline,
    Fan,
}

impl SensorKind {
    pub const ALL: [SensorKind; 7] = [
        SensorKind::HeartRate,
        SensorKind::Cadence,
        SensorKind::Speed,
        SensorKind::Power,
        SensorKind::Resistance,
        SensorKind::Incline,
        SensorKind::Fan,
    ];

    /// The topic segment and wire name for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeartRate => "heartrate",
            Self::Cadence => "cadence",
            Self::Speed => "speed",
            Self::Power => "power",
            Self::Resistance => "resistance",
            Self::Incline => "incline",
            Self::Fan => "fan",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == segment)
    }

    /// Inclusive plausible range for readings of this kind
    pub fn range(&self) -> (f64, f64) {
        match self {
            Self::HeartRate => (30.0, 220.0),
            Self::Cadence => (0.0, 200.0),
            Self::Speed => (0.0, 100.0),
            Self::Power => (0.0, 2000.0),
            Self::Resistance => (0.0, 100.0),
            Self::Incline => (-50.0, 50.0),
            Self::Fan => (0.0, 100.0),
        }
    }

    /// The unit devices are expected to report readings in
    pub fn expected_unit(&self) -> &'static str {
        match self {
            Self::HeartRate => "bpm",
            Self::Cadence => "rpm",
            Self::Speed => "kmh",
            Self::Power => "watts",
            Self::Resistance | Self::Incline | Self::Fan => "percent",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_segment(s).ok_or_else(|| format!("unknown sensor type: {s}"))
    }
}
