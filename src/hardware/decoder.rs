use std::time::{ Duration, Instant };

use crate::hardware::{ HardwareEvent, FRAME_PREFIX };

pub const HEARTBEAT_MARKER: &str = "xC249";
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

const FIELD_SEPARATOR: char = '\t';
const LAP_FIELDS: usize = 6;
const NEW_MSG_FIELDS: usize = 5;

/// Outcome of decoding one line.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub event: Option<HardwareEvent>,
    /// Debug echo of the line as read, emitted ahead of `event`.
    pub echo: HardwareEvent,
    pub last_heartbeat: Instant,
}

/// Classifies one line read from the device.
///
/// Pure: the only state involved is the heartbeat clock, which is passed in
/// and handed back (advanced to `now` when the line is a heartbeat).
pub fn decode(line: &str, now: Instant, last_heartbeat: Instant) -> Decoded {
    let mut chars = line.chars();
    let kind = match (chars.next(), chars.next()) {
        (Some(FRAME_PREFIX), Some(kind)) => Some(kind),
        _ => None,
    };

    let (event, last_heartbeat) = match kind {
        Some('#') if line.contains(HEARTBEAT_MARKER) => (HardwareEvent::Heartbeat, now),
        Some('@') => (decode_lap(line), last_heartbeat),
        Some('$') => (decode_new_msg(line), last_heartbeat),
        _ => (HardwareEvent::Raw { line: line.to_string() }, last_heartbeat),
    };

    Decoded {
        event: Some(event),
        echo: HardwareEvent::Debug { message: format!["Read line: {}", line] },
        last_heartbeat,
    }
}

fn decode_lap(line: &str) -> HardwareEvent {
    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
    if fields.len() < LAP_FIELDS {
        return HardwareEvent::status(format!["Malformed lap line: {}", line]);
    }

    let parsed = (|| -> Result<HardwareEvent, String> {
        let racer_id = fields[3].trim().parse::<u32>()
            .map_err(|err| format!["racer id {:?}: {}", fields[3], err])?;
        let sensor_id = fields[1].trim().parse::<u32>()
            .map_err(|err| format!["sensor id {:?}: {}", fields[1], err])?;
        let race_time = fields[4].trim().parse::<f64>()
            .map_err(|err| format!["race time {:?}: {}", fields[4], err])?;
        Ok(HardwareEvent::Lap { sensor_id, racer_id, race_time })
    })();

    parsed.unwrap_or_else(|err| HardwareEvent::status(format!["Error parsing lap line: {} - {}", err, line]))
}

fn decode_new_msg(line: &str) -> HardwareEvent {
    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
    if fields.len() < NEW_MSG_FIELDS {
        return HardwareEvent::status(format!["Malformed new_msg line: {}", line]);
    }

    let parsed = (|| -> Result<HardwareEvent, String> {
        let sensor_id = fields[1].trim().parse::<u32>()
            .map_err(|err| format!["sensor id {:?}: {}", fields[1], err])?;
        // The device prints these with a decimal comma.
        let raw_time = fields[2].trim().replace(',', ".").parse::<f64>()
            .map_err(|err| format!["raw time {:?}: {}", fields[2], err])?;
        Ok(HardwareEvent::NewMsg {
            sensor_id,
            raw_time,
            flag1: fields[3].to_string(),
            flag2: fields[4].to_string(),
        })
    })();

    parsed.unwrap_or_else(|err| HardwareEvent::status(format!["Error parsing new_msg line: {} - {}", err, line]))
}

/// Tracks heartbeat staleness so that a lost link is reported once per
/// outage instead of on every tick.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    last_heartbeat: Instant,
    timeout: Duration,
    lost: bool,
}

impl HeartbeatMonitor {
    pub fn new(now: Instant, timeout: Duration) -> HeartbeatMonitor {
        HeartbeatMonitor { last_heartbeat: now, timeout, lost: false }
    }

    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    /// Records the clock returned by `decode`. A newer heartbeat re-arms the
    /// lost detection.
    pub fn observe(&mut self, last_heartbeat: Instant) {
        if last_heartbeat > self.last_heartbeat {
            self.lost = false;
        }
        self.last_heartbeat = last_heartbeat;
    }

    /// Returns true exactly when the link transitions into staleness.
    pub fn check(&mut self, now: Instant) -> bool {
        let stale = now.saturating_duration_since(self.last_heartbeat) > self.timeout;
        if stale && !self.lost {
            self.lost = true;
            return true;
        }
        false
    }

    /// True between a reported loss and the next heartbeat.
    pub fn is_lost(&self) -> bool {
        self.lost
    }
}
