use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LapError {
    #[error("{field} must be a positive number of seconds, got {value}")]
    NonPositiveTime { field: &'static str, value: f64 },
}

/// One crossing of the timing loop by one racer.
///
/// Lap 0 is the start-line crossing; it is recorded but never scored.
#[derive(Debug, Clone, PartialEq)]
pub struct Lap {
    racer_id: u32,
    lap_number: u32,
    seconds_from_race_start: f64,
    internal_lap_time: f64,
    lap_time: f64,
}

fn positive(field: &'static str, value: f64) -> Result<f64, LapError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(LapError::NonPositiveTime { field, value })
    }
}

impl Lap {
    /// Lap numbers are unsigned, so the only values left to reject are times
    /// that are not strictly positive (NaN and infinities included).
    pub fn new(racer_id: u32, lap_number: u32, seconds_from_race_start: f64, internal_lap_time: f64, lap_time: f64) -> Result<Lap, LapError> {
        Ok(Lap {
            racer_id,
            lap_number,
            seconds_from_race_start: positive("seconds_from_race_start", seconds_from_race_start)?,
            internal_lap_time: positive("internal_lap_time", internal_lap_time)?,
            lap_time: positive("lap_time", lap_time)?,
        })
    }

    /// A lap that did not come from the hardware: every clock reads the same.
    pub fn fake(racer_id: u32, lap_number: u32, lap_time: f64, seconds_from_race_start: f64) -> Result<Lap, LapError> {
        Lap::new(racer_id, lap_number, seconds_from_race_start, lap_time, lap_time)
    }

    pub fn racer_id(&self) -> u32 {
        self.racer_id
    }

    pub fn lap_number(&self) -> u32 {
        self.lap_number
    }

    pub fn seconds_from_race_start(&self) -> f64 {
        self.seconds_from_race_start
    }

    pub fn internal_lap_time(&self) -> f64 {
        self.internal_lap_time
    }

    pub fn lap_time(&self) -> f64 {
        self.lap_time
    }

    pub fn is_scored(&self) -> bool {
        self.lap_number > 0
    }
}

impl fmt::Display for Lap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Racer {} Lap {} Time: {:.2}s", self.racer_id, self.lap_number, self.lap_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_times() {
        assert_eq!(
            Lap::new(1, 1, 0.0, 1.0, 1.0),
            Err(LapError::NonPositiveTime { field: "seconds_from_race_start", value: 0.0 }));
        assert_eq!(
            Lap::new(1, 1, 1.0, -2.0, 1.0),
            Err(LapError::NonPositiveTime { field: "internal_lap_time", value: -2.0 }));
        assert!(Lap::new(1, 1, 1.0, 1.0, f64::NAN).is_err());
        assert!(Lap::new(1, 1, f64::INFINITY, 1.0, 1.0).is_err());
    }

    #[test]
    fn fake_lap_uses_one_clock() {
        let lap = Lap::fake(4, 0, 1.5, 1.5).unwrap();
        assert_eq!(lap.racer_id(), 4);
        assert_eq!(lap.lap_number(), 0);
        assert_eq!(lap.lap_time(), 1.5);
        assert_eq!(lap.internal_lap_time(), 1.5);
        assert_eq!(lap.seconds_from_race_start(), 1.5);
        assert!(!lap.is_scored());
    }

    #[test]
    fn display() {
        assert_eq!(Lap::fake(1, 2, 10.456, 20.0).unwrap().to_string(), "Racer 1 Lap 2 Time: 10.46s");
    }
}
