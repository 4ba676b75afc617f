pub mod decoder;
pub mod connection;
pub mod reader;

use std::fmt;

/// Every frame the lap counter sends starts with this control byte (SOH).
pub const FRAME_PREFIX: char = '\x01';

/// Written to the device on `StartRace`, in this order, one write each.
pub const START_RACE_COMMANDS: [&[u8]; 4] = [
    b"\x01\x3f\x2c\x32\x33\x32\x2c\x30\x2c\x31\x34\x2c\x30\x2c\x31\x2c\x0d\x0a",
    b"\x01\x3f\x2c\x32\x33\x32\x2c\x30\x2c\x32\x34\x2c\x30\x2c\x0d\x0a",
    b"\x01\x3f\x2c\x32\x33\x32\x2c\x30\x2c\x39\x2c\x30\x2c\x0d\x0a",
    b"\x01\x3f\x2c\x32\x33\x32\x2c\x30\x2c\x31\x34\x2c\x31\x2c\x30\x0d\x0a",
];

#[derive(Debug, Clone, PartialEq)]
pub enum HardwareEvent {
    Heartbeat,
    Lap {
        sensor_id: u32,
        racer_id: u32,
        race_time: f64,
    },
    NewMsg {
        sensor_id: u32,
        raw_time: f64,
        flag1: String,
        flag2: String,
    },
    Raw { line: String },
    Status { message: String },
    Debug { message: String },
    HardwareError { message: String, detail: String },
}

impl HardwareEvent {
    pub fn status<S: Into<String>>(message: S) -> HardwareEvent {
        HardwareEvent::Status { message: message.into() }
    }
}

impl fmt::Display for HardwareEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareEvent::Heartbeat => write!(f, "[HEARTBEAT]"),
            HardwareEvent::Lap { sensor_id, racer_id, race_time } =>
                write!(f, "[LAP] Racer {} - Sensor {} - Time: {:.3}s", racer_id, sensor_id, race_time),
            HardwareEvent::NewMsg { sensor_id, raw_time, flag1, flag2 } =>
                write!(f, "[NEW_MSG] Sensor {} - Time: {:.3}s - Flags: {}/{}", sensor_id, raw_time, flag1, flag2),
            HardwareEvent::Raw { line } => write!(f, "[RAW] {}", line.escape_debug()),
            HardwareEvent::Status { message } => write!(f, "[STATUS] {}", message),
            HardwareEvent::Debug { message } => write!(f, "[DEBUG] {}", message.escape_debug()),
            HardwareEvent::HardwareError { message, detail } => write!(f, "[HARDWARE_ERROR] {} ({})", message, detail),
        }
    }
}

/// Commands travelling from the presentation layer to the reader thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartRace,
    StopRace,
    SimulateLap {
        racer_id: u32,
        sensor_id: u32,
        race_time: f64,
    },
}
