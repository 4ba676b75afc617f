use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::mpsc::{ Receiver, Sender, TryRecvError };
use std::sync::Arc;
use std::time::{ Duration, Instant };

use crate::hardware::{ Command, HardwareEvent, START_RACE_COMMANDS };
use crate::hardware::connection::{ ConnectionError, LineTransport };
use crate::hardware::decoder;
use crate::hardware::decoder::HeartbeatMonitor;

const WAKE_UP: &[u8] = b"\r\n";
const WAKE_UP_DELAY: Duration = Duration::from_millis(100);
const SIMULATED_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub port_name: String,
    pub heartbeat_timeout: Duration,
    pub loop_interval: Duration,
}

impl Default for ReaderSettings {
    fn default() -> ReaderSettings {
        ReaderSettings {
            port_name: "/dev/ttyUSB0".to_string(),
            heartbeat_timeout: decoder::DEFAULT_HEARTBEAT_TIMEOUT,
            loop_interval: Duration::from_millis(50),
        }
    }
}

/// The consumer went away; nothing left to report to.
#[derive(Debug)]
struct Disconnected;

/// Shared by the reader thread and whoever owns it. Clearing the flag makes
/// the loop exit after its current iteration.
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> RunFlag {
        RunFlag(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Outbox {
    sender: Sender<HardwareEvent>,
}

impl Outbox {
    fn emit(&self, event: HardwareEvent) -> Result<(), Disconnected> {
        match &event {
            HardwareEvent::Status { message } => info!("{}", message),
            HardwareEvent::HardwareError { message, detail } => error!("{}: {}", message, detail),
            _ => (),
        }
        self.sender.send(event).map_err(|_| Disconnected)
    }
}

/// Talks to the physical lap counter. Meant to run on its own thread since
/// every read blocks for up to the transport timeout.
pub struct HardwareTask {
    settings: ReaderSettings,
    outbox: Outbox,
    commands: Receiver<Command>,
    running: RunFlag,
}

impl HardwareTask {
    pub fn new(settings: ReaderSettings, sender: Sender<HardwareEvent>, commands: Receiver<Command>, running: RunFlag) -> HardwareTask {
        HardwareTask { settings, outbox: Outbox { sender }, commands, running }
    }

    /// Opens the device with `open` and runs until stopped. An open failure
    /// is reported as `HardwareError` and ends the task; reconnecting is up
    /// to the caller.
    pub fn execute<T, F>(self, open: F)
        where T: LineTransport,
              F: FnOnce() -> Result<T, ConnectionError>
    {
        info!("Hardware task starting on {}", self.settings.port_name);

        let mut transport = match open() {
            Ok(transport) => transport,
            Err(err) => {
                let _ = self.outbox.emit(HardwareEvent::HardwareError {
                    message: format!["Lap tracking hardware not found at {}", self.settings.port_name],
                    detail: err.to_string(),
                });
                return;
            }
        };

        if let Err(Disconnected) = self.run(&mut transport) {
            info!("Event consumer disconnected, stopping hardware task");
        }
        // `transport` is dropped here, closing the port on every exit path.
    }

    fn run<T: LineTransport>(&self, transport: &mut T) -> Result<(), Disconnected> {
        match transport.write_command(WAKE_UP) {
            Ok(()) => {
                debug!("Sent wake-up CR/LF to hardware");
                std::thread::sleep(WAKE_UP_DELAY);
                self.outbox.emit(HardwareEvent::status(
                    format!["Hardware connected and initialized at {}", self.settings.port_name]))?;
            },
            Err(err) => self.outbox.emit(HardwareEvent::status(format!["Error waking hardware: {}", err]))?,
        }

        let mut heartbeat = HeartbeatMonitor::new(Instant::now(), self.settings.heartbeat_timeout);
        while self.running.is_running() {
            self.drain_commands(transport)?;

            let line = match transport.read_line() {
                Ok(line) => line,
                Err(err) => {
                    self.outbox.emit(HardwareEvent::status(format!["Error reading serial: {}", err]))?;
                    None
                }
            };

            let now = Instant::now();
            if let Some(line) = line {
                let decoded = decoder::decode(&line, now, heartbeat.last_heartbeat());
                self.outbox.emit(decoded.echo)?;
                let was_lost = heartbeat.is_lost();
                heartbeat.observe(decoded.last_heartbeat);
                if was_lost && !heartbeat.is_lost() {
                    info!("Heartbeat restored");
                }
                if let Some(event) = decoded.event {
                    self.outbox.emit(event)?;
                }
            }

            if heartbeat.check(now) {
                warn!("Heartbeat lost");
                self.outbox.emit(HardwareEvent::status("Heartbeat lost"))?;
            }

            std::thread::sleep(self.settings.loop_interval);
        }

        Ok(())
    }

    fn drain_commands<T: LineTransport>(&self, transport: &mut T) -> Result<(), Disconnected> {
        loop {
            let command = match self.commands.try_recv() {
                Ok(command) => command,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(()),
            };
            debug!("Received command: {:?}", command);

            match command {
                Command::StartRace => {
                    let sent = START_RACE_COMMANDS.iter()
                        .try_for_each(|bytes| transport.write_command(bytes));
                    match sent {
                        Ok(()) => self.outbox.emit(HardwareEvent::status("Start race commands sent"))?,
                        Err(err) => self.outbox.emit(HardwareEvent::status(format!["Error sending commands: {}", err]))?,
                    }
                },
                Command::StopRace => self.outbox.emit(HardwareEvent::status("Stop race command received"))?,
                Command::SimulateLap { .. } => debug!("Ignoring simulate_lap outside simulation mode"),
            }
        }
    }
}

/// Stands in for the device: periodic heartbeats plus laps on request.
pub struct SimulationTask {
    outbox: Outbox,
    commands: Receiver<Command>,
    running: RunFlag,
    heartbeat_interval: Duration,
    loop_interval: Duration,
    race_active: bool,
}

impl SimulationTask {
    pub fn new(sender: Sender<HardwareEvent>, commands: Receiver<Command>, running: RunFlag) -> SimulationTask {
        SimulationTask {
            outbox: Outbox { sender },
            commands,
            running,
            heartbeat_interval: SIMULATED_HEARTBEAT_INTERVAL,
            loop_interval: Duration::from_millis(100),
            race_active: false,
        }
    }

    pub fn execute(mut self) {
        info!("Starting simulation mode");
        if let Err(Disconnected) = self.run() {
            info!("Event consumer disconnected, stopping simulation");
        }
    }

    fn run(&mut self) -> Result<(), Disconnected> {
        self.outbox.emit(HardwareEvent::status("Running in simulation mode"))?;

        let mut last_heartbeat = Instant::now();
        while self.running.is_running() {
            while let Ok(command) = self.commands.try_recv() {
                self.handle(command)?;
            }

            if last_heartbeat.elapsed() >= self.heartbeat_interval {
                self.outbox.emit(HardwareEvent::Heartbeat)?;
                last_heartbeat = Instant::now();
                debug!("Simulation heartbeat sent");
            }

            std::thread::sleep(self.loop_interval);
        }
        Ok(())
    }

    fn handle(&mut self, command: Command) -> Result<(), Disconnected> {
        match command {
            Command::StartRace => {
                self.race_active = true;
                self.outbox.emit(HardwareEvent::status("Simulation race started"))
            },
            Command::StopRace => {
                self.race_active = false;
                self.outbox.emit(HardwareEvent::status("Simulation race stopped"))
            },
            Command::SimulateLap { racer_id, sensor_id, race_time } => {
                info!("Simulated lap: racer {} sensor {} at {:.3}s (race active: {})", racer_id, sensor_id, race_time, self.race_active);
                self.outbox.emit(HardwareEvent::Lap { sensor_id, racer_id, race_time })
            },
        }
    }
}
