use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::mpsc;
use std::time::{ Duration, Instant };

use async_std::channel::{ Receiver, Sender };
use async_std::future;
use async_std::task;
use async_std::task::JoinHandle;
use async_trait::async_trait;
use rand::thread_rng;

use crate::hardware::{ Command, HardwareEvent };
use crate::race::{ Race, RaceState, Standing };
use crate::race::contestants::Contestants;
use crate::race::fake;
use crate::race::lap::Lap;

pub const TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceMode {
    Fake,
    Real,
    Training,
}

impl RaceMode {
    pub fn next(self) -> RaceMode {
        match self {
            RaceMode::Fake => RaceMode::Real,
            RaceMode::Real => RaceMode::Training,
            RaceMode::Training => RaceMode::Fake,
        }
    }
}

impl fmt::Display for RaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RaceMode::Fake => "Fake Race Mode",
            RaceMode::Real => "Real Race Mode",
            RaceMode::Training => "Training Mode",
        })
    }
}

impl FromStr for RaceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fake" => Ok(RaceMode::Fake),
            "real" | "race" => Ok(RaceMode::Real),
            "training" => Ok(RaceMode::Training),
            other => Err(format!["Unknown race mode: {}", other]),
        }
    }
}

/// Local monotonic clock, in seconds since the session was created.
#[derive(Debug, Clone, Copy)]
pub struct RaceClock {
    origin: Instant,
}

impl RaceClock {
    pub fn new() -> RaceClock {
        RaceClock { origin: Instant::now() }
    }

    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

#[derive(Debug, Clone)]
pub struct FakeRace {
    pub racers: Vec<u32>,
    pub laps: u32,
    pub lap_times: Range<f64>,
}

impl Default for FakeRace {
    fn default() -> FakeRace {
        FakeRace {
            racers: fake::FAKE_RACERS.to_vec(),
            laps: fake::FAKE_LAPS,
            lap_times: fake::FAKE_LAP_TIMES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub total_laps: u32,
    pub mode: RaceMode,
    pub contestants: Contestants,
    pub fake_race: FakeRace,
}

/// Actions requested by whoever drives the session (keyboard, UI, tests).
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    StartRace,
    EndRace,
    PauseRace,
    ResetRace,
    ToggleMode,
    SimulateLap { racer_id: u32 },
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum SessionInput {
    Hardware(HardwareEvent),
    /// A lap replayed from a generated race, tagged with the playback it
    /// came from so that laps of a cancelled playback can be recognised.
    PlaybackLap { generation: u64, lap: Lap },
    Control(Control),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RaceSnapshot {
    pub mode: RaceMode,
    pub state: RaceState,
    pub elapsed_time: f64,
    pub lap_count: usize,
    pub leaderboard: Vec<Standing>,
    pub laps_remaining: (u32, u32),
    pub best_lap: Option<Lap>,
    pub lap_counter_detected: bool,
}

#[async_trait]
pub trait StateTracker: Send {
    async fn process(&mut self, snapshot: &RaceSnapshot);
}

/// Owns the live race. All mutation happens on the task running `run`, so
/// the race itself needs no locking.
pub struct RaceSession {
    race: Race,
    previous_race: Option<Race>,
    mode: RaceMode,
    contestants: Contestants,
    fake_race: FakeRace,
    clock: RaceClock,
    commands: mpsc::Sender<Command>,
    inputs: Sender<SessionInput>,
    playback: Option<JoinHandle<()>>,
    // Laps of the current fake race, kept so a paused playback can resume.
    fake_laps: Vec<Lap>,
    generation: u64,
    lap_counter_detected: bool,
    trackers: Vec<Box<dyn StateTracker>>,
}

impl RaceSession {
    pub fn new(settings: SessionSettings, commands: mpsc::Sender<Command>, inputs: Sender<SessionInput>) -> RaceSession {
        info!("Race session initialized: {}", settings.mode);
        RaceSession {
            race: Race::new(settings.total_laps),
            previous_race: None,
            mode: settings.mode,
            contestants: settings.contestants,
            fake_race: settings.fake_race,
            clock: RaceClock::new(),
            commands,
            inputs,
            playback: None,
            fake_laps: vec![],
            generation: 0,
            lap_counter_detected: false,
            trackers: vec![],
        }
    }

    pub fn add_tracker(&mut self, tracker: Box<dyn StateTracker>) {
        self.trackers.push(tracker);
    }

    pub fn race(&self) -> &Race {
        &self.race
    }

    pub fn mode(&self) -> RaceMode {
        self.mode
    }

    pub fn snapshot(&self) -> RaceSnapshot {
        RaceSnapshot {
            mode: self.mode,
            state: self.race.state(),
            elapsed_time: self.race.elapsed_time(),
            lap_count: self.race.laps().len(),
            leaderboard: self.race.leaderboard(),
            laps_remaining: self.race.laps_remaining(),
            best_lap: self.race.best_lap().cloned(),
            lap_counter_detected: self.lap_counter_detected,
        }
    }

    /// Processes inputs until `Control::Shutdown` or until every sender is
    /// gone, ticking the elapsed race time in between.
    pub async fn run(mut self, inputs: Receiver<SessionInput>) {
        info!("Race session running");
        loop {
            match future::timeout(TICK, inputs.recv()).await {
                Ok(Ok(input)) => {
                    if !self.handle(input).await {
                        break;
                    }
                },
                Ok(Err(_)) => break,
                Err(_) => (),
            }

            self.race.update_elapsed(self.clock.now());
            self.publish().await;
        }

        self.cancel_playback().await;
        info!("Race session stopped: {}", self.race);
    }

    async fn publish(&mut self) {
        if self.trackers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for tracker in &mut self.trackers {
            tracker.process(&snapshot).await;
        }
    }

    /// Applies one input. Returns false when the session should stop.
    pub async fn handle(&mut self, input: SessionInput) -> bool {
        match input {
            SessionInput::Hardware(event) => self.on_hardware(event),
            SessionInput::PlaybackLap { generation, lap } => self.on_playback_lap(generation, lap),
            SessionInput::Control(Control::Shutdown) => return false,
            SessionInput::Control(control) => self.on_control(control).await,
        }
        true
    }

    fn on_hardware(&mut self, event: HardwareEvent) {
        debug!("Received hardware event: {}", event);
        match event {
            HardwareEvent::Heartbeat => {
                if !self.lap_counter_detected {
                    info!("Lap counter detected (heartbeat)");
                }
                self.lap_counter_detected = true;
            },
            HardwareEvent::Lap { racer_id, race_time, sensor_id } => {
                info!("Lap message received: racer {} sensor {} at {:.3}s", racer_id, sensor_id, race_time);
                if !self.race.state().accepts_laps() {
                    error!("Cannot add lap - race is {}", self.race.state());
                    return;
                }
                let applied = self.race.derive_lap(racer_id, race_time, self.clock.now())
                    .and_then(|lap| {
                        info!("New lap {}", lap);
                        self.race.add_lap(lap)
                    });
                if let Err(err) = applied {
                    error!("Rejected lap from racer {}: {}", racer_id, err);
                }
            },
            HardwareEvent::NewMsg { sensor_id, raw_time, flag1, flag2 } => {
                info!("New message received: sensor {} raw time {:.2} flags {}/{}", sensor_id, raw_time, flag1, flag2);
            },
            HardwareEvent::Status { message } => {
                info!("Status message: {}", message);
                if message == "Heartbeat lost" {
                    self.lap_counter_detected = false;
                }
            },
            HardwareEvent::HardwareError { message, detail } => {
                error!("Hardware error: {} ({})", message, detail);
                self.lap_counter_detected = false;
            },
            HardwareEvent::Raw { .. } | HardwareEvent::Debug { .. } => (),
        }
    }

    fn on_playback_lap(&mut self, generation: u64, lap: Lap) {
        if self.playback.is_none() || generation != self.generation {
            debug!("Dropping lap from cancelled playback: {}", lap);
            return;
        }
        info!("Fake lap {}", lap);
        if let Err(err) = self.race.add_lap(lap) {
            warn!("Fake lap not applied: {}", err);
        }
    }

    async fn on_control(&mut self, control: Control) {
        match control {
            Control::StartRace => self.start_race().await,
            Control::EndRace => self.end_race().await,
            Control::PauseRace => self.pause_race().await,
            Control::ResetRace => {
                self.cancel_playback().await;
                self.fake_laps.clear();
                self.race.reset();
            },
            Control::ToggleMode => {
                if self.race.state() == RaceState::Running {
                    warn!("Cannot change race mode while race is running");
                    return;
                }
                self.mode = self.mode.next();
                info!("Toggled race mode to: {}", self.mode);
            },
            Control::SimulateLap { racer_id } => {
                let now = self.clock.now();
                let race_time = self.race.start_time().map(|start| now - start).unwrap_or(now);
                self.send_command(Command::SimulateLap { racer_id, sensor_id: 1, race_time });
            },
            Control::Shutdown => (),
        }
    }

    async fn start_race(&mut self) {
        if self.race.state() == RaceState::Paused {
            self.resume_race();
            return;
        }

        self.cancel_playback().await;
        self.fake_laps.clear();

        match self.race.state() {
            RaceState::Finished | RaceState::Ended => {
                // Keep the finished race around; its racers seed the next one.
                match Race::following(&self.race) {
                    Ok(next) => self.previous_race = Some(std::mem::replace(&mut self.race, next)),
                    Err(err) => {
                        error!("Cannot start next race: {}", err);
                        return;
                    }
                }
            },
            _ => self.race.reset(),
        }

        let start_time = self.clock.now();
        self.race.start(start_time);
        info!("Starting race in {}", self.mode);

        match self.mode {
            RaceMode::Fake => self.start_playback(start_time),
            RaceMode::Real | RaceMode::Training => self.send_command(Command::StartRace),
        }
    }

    /// Continues a paused race with its laps intact. The hardware was never
    /// told to stop, so no command goes out; a fake race picks up its
    /// playback where it was suspended.
    fn resume_race(&mut self) {
        self.race.start(self.clock.now());
        info!("Resuming race: {}", self.race);

        if self.fake_laps.is_empty() {
            return;
        }
        let remaining: Vec<Lap> = self.fake_laps.iter()
            .filter(|lap| !self.race.laps().iter()
                .any(|scored| scored.racer_id() == lap.racer_id() && scored.lap_number() == lap.lap_number()))
            .cloned()
            .collect();
        if let Some(start_time) = self.race.start_time() {
            self.spawn_playback(remaining, start_time);
        }
    }

    async fn pause_race(&mut self) {
        if self.race.state() != RaceState::Running {
            return;
        }
        // Laps of a suspended playback would be refused while paused, so the
        // playback stops here and is replayed from the remainder on resume.
        self.cancel_playback().await;
        self.race.update_elapsed(self.clock.now());
        self.race.pause();
        info!("Race paused: {}", self.race);
    }

    async fn end_race(&mut self) {
        if !matches!(self.race.state(), RaceState::Running | RaceState::Paused | RaceState::WinnerDeclared) {
            return;
        }
        self.cancel_playback().await;
        self.race.end();
        info!("Race ended: {}", self.race);
        if self.mode != RaceMode::Fake {
            self.send_command(Command::StopRace);
        }
    }

    fn start_playback(&mut self, start_time: f64) {
        let laps = match fake::generate_fake_race(&mut thread_rng(), &self.fake_race.racers, self.fake_race.laps, self.fake_race.lap_times.clone()) {
            Ok(laps) => laps,
            Err(err) => {
                error!("Failed to generate fake race: {}", err);
                return;
            }
        };

        if laps.is_empty() {
            error!("Fake race has no laps");
            return;
        }
        info!("Starting fake race with {} laps", laps.len());
        self.fake_laps = laps.clone();
        self.spawn_playback(laps, start_time);
    }

    fn spawn_playback(&mut self, laps: Vec<Lap>, start_time: f64) {
        if laps.is_empty() {
            return;
        }
        self.generation += 1;
        let generation = self.generation;
        let clock = self.clock;
        let inputs = self.inputs.clone();
        self.playback = Some(task::spawn(play_fake_race(laps, clock, start_time, generation, inputs)));
    }

    /// Stops the running playback. Laps it already queued carry a stale
    /// generation afterwards and are ignored.
    async fn cancel_playback(&mut self) {
        if let Some(playback) = self.playback.take() {
            playback.cancel().await;
            debug!("Playback {} cancelled", self.generation);
        }
        self.generation += 1;
    }

    fn send_command(&self, command: Command) {
        if let Err(err) = self.commands.send(command) {
            warn!("Hardware reader is not listening, dropped {:?}", err.0);
        }
    }
}

/// Replays `laps` in real time relative to `start_time`.
async fn play_fake_race(laps: Vec<Lap>, clock: RaceClock, start_time: f64, generation: u64, inputs: Sender<SessionInput>) {
    for (at, lap) in fake::order_laps_by_occurrence(&laps) {
        let wait = at - (clock.now() - start_time);
        if wait > 0.0 {
            task::sleep(Duration::from_secs_f64(wait)).await;
        }
        if inputs.send(SessionInput::PlaybackLap { generation, lap }).await.is_err() {
            return;
        }
    }
    debug!("Fake race playback {} complete", generation);
}
