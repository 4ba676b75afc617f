mod bridge;
mod config;
mod hardware;
mod race;
mod session;

#[macro_use] extern crate log;
extern crate env_logger;
extern crate yaml_rust;

use std::convert::TryFrom;
use std::io::BufRead;
use std::sync::mpsc;
use std::thread;

use async_std::channel;
use async_std::channel::Sender;
use async_std::future;
use async_std::prelude::*;
use async_std::task;
use async_trait::async_trait;

use bridge::EventBridge;
use config::Config;
use hardware::connection::SerialConnection;
use hardware::reader::{ HardwareTask, ReaderSettings, RunFlag, SimulationTask };
use race::RaceState;
use race::contestants::Contestants;
use session::{ Control, FakeRace, RaceMode, RaceSession, RaceSnapshot, SessionInput, SessionSettings, StateTracker };

struct Options {
    config_path: Option<String>,
    mode: Option<RaceMode>,
    simulation: bool,
}

fn parse_args() -> Result<Options, String> {
    let mut options = Options { config_path: None, mode: None, simulation: false };
    let mut modes = 0;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--sim" | "-s" => options.simulation = true,
            "--race" | "--fake" | "--training" => {
                modes += 1;
                options.mode = Some(arg.trim_start_matches("--").parse()?);
            },
            flag if flag.starts_with('-') => return Err(format!["Unknown flag {}", flag]),
            path => options.config_path = Some(path.to_string()),
        }
    }
    if modes > 1 {
        return Err("Only one of --race, --fake, or --training can be specified".to_string());
    }
    Ok(options)
}

fn load_config(options: &Options) -> Result<Config, String> {
    let mut config = match &options.config_path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .map_err(|err| format!["Could not read config file {}: {}", path, err])?;
            Config::try_from(&contents).map_err(|err| format!["{}: {}", path, err])?
        },
        None => Config::default(),
    };
    if let Some(mode) = options.mode {
        config.mode = mode;
    }
    config.simulation |= options.simulation;
    Ok(config)
}

/// Logs the standings whenever the race moves on.
struct ConsoleStandings {
    contestants: Contestants,
    last: Option<(RaceState, usize, bool)>,
}

#[async_trait]
impl StateTracker for ConsoleStandings {
    async fn process(&mut self, snapshot: &RaceSnapshot) {
        let key = (snapshot.state, snapshot.lap_count, snapshot.lap_counter_detected);
        if self.last == Some(key) {
            return;
        }
        self.last = Some(key);

        let (leader_remaining, last_remaining) = snapshot.laps_remaining;
        info!["{} | race {} | {:.1}s | leader {} laps to go, last place {} | lap counter {}",
            snapshot.mode, snapshot.state, snapshot.elapsed_time, leader_remaining, last_remaining,
            if snapshot.lap_counter_detected { "detected" } else { "not detected" }];
        if let Some(best_lap) = &snapshot.best_lap {
            info!["  Fastest lap: {} by {}", best_lap, self.contestants.name_of(best_lap.racer_id())];
        }
        for standing in &snapshot.leaderboard {
            info!["  P{} {:<20} laps {:>3}  best {:>7.2}s  last {:>7.2}s  total {:>8.2}s",
                standing.position, self.contestants.name_of(standing.racer_id), standing.lap_count,
                standing.best_lap_time, standing.last_lap_time, standing.total_time];
        }
    }
}

fn spawn_keyboard(inputs: Sender<SessionInput>) {
    thread::spawn(move || {
        info!("Keys: [s]tart or resume race | [x] end race | [p]ause | [r]eset | [t]oggle mode | [1-9] simulate lap | [q]uit");
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            let control = match line.trim() {
                "s" => Control::StartRace,
                "x" => Control::EndRace,
                "p" => Control::PauseRace,
                "r" => Control::ResetRace,
                "t" => Control::ToggleMode,
                "q" => break,
                other => match other.parse::<u32>() {
                    Ok(racer_id) if (1..=9).contains(&racer_id) => Control::SimulateLap { racer_id },
                    _ => continue,
                },
            };
            if inputs.try_send(SessionInput::Control(control)).is_err() {
                return;
            }
        }
        let _ = inputs.try_send(SessionInput::Control(Control::Shutdown));
    });
}

fn main() {
    let options = match parse_args() {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(2);
        }
    };
    let config = match load_config(&options) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(config.log_level)
        .init();
    info!("Franklin lap counter starting: {:?}", config);
    if config.contestants.is_empty() {
        info!("No contestants configured, racers are shown by transmitter id");
    } else {
        info!("{} contestants configured", config.contestants.len());
    }

    let (command_sender, command_receiver) = mpsc::channel();
    let (event_sender, event_receiver) = mpsc::channel();
    let running = RunFlag::new();

    let reader_thread = {
        let running = running.clone();
        let settings = ReaderSettings {
            port_name: config.serial_port.clone(),
            heartbeat_timeout: config.heartbeat_timeout,
            ..ReaderSettings::default()
        };
        let (baud_rate, read_timeout, simulation) = (config.baud_rate, config.read_timeout, config.simulation);
        thread::spawn(move || {
            if simulation {
                SimulationTask::new(event_sender, command_receiver, running).execute();
            } else {
                let port_name = settings.port_name.clone();
                HardwareTask::new(settings, event_sender, command_receiver, running)
                    .execute(|| SerialConnection::open(&port_name, baud_rate, read_timeout));
            }
        })
    };

    let mut bridge = match EventBridge::new(event_receiver, bridge::DEFAULT_POLL_TIMEOUT) {
        Ok(bridge) => bridge,
        Err(err) => {
            error!("Failed to start event bridge: {}", err);
            running.stop();
            let _ = reader_thread.join();
            std::process::exit(1);
        }
    };

    let (input_sender, input_receiver) = channel::unbounded();
    let forward_sender = input_sender.clone();
    let forward_hardware = async {
        while let Some(event) = bridge.get().await {
            if forward_sender.send(SessionInput::Hardware(event)).await.is_err() {
                break;
            }
        }
        // The reader is gone (for instance the device was missing); the
        // session keeps running so the operator can still quit or use fake mode.
        future::pending::<()>().await
    };

    let settings = SessionSettings {
        total_laps: config.total_laps,
        mode: config.mode,
        contestants: config.contestants.clone(),
        fake_race: FakeRace::default(),
    };
    let mut session = RaceSession::new(settings, command_sender, input_sender.clone());
    session.add_tracker(Box::new(ConsoleStandings { contestants: config.contestants.clone(), last: None }));

    spawn_keyboard(input_sender);
    task::block_on(session.run(input_receiver).race(forward_hardware));

    running.stop();
    if reader_thread.join().is_err() {
        error!("Hardware reader thread panicked");
    }
    bridge.stop();
    if bridge.buffered() > 0 {
        debug!("Discarding {} hardware events received during shutdown", bridge.buffered());
    }
    info!("Shut down");
}
