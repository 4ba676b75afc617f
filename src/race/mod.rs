pub mod lap;
pub mod fake;
pub mod contestants;

use std::collections::{ BTreeSet, HashMap };
use std::fmt;

use thiserror::Error;

use lap::{ Lap, LapError };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceState {
    NotStarted,
    Running,
    Paused,
    WinnerDeclared,
    Finished,
    /// Stopped by hand before everyone completed the distance.
    Ended,
}

impl RaceState {
    pub fn accepts_laps(self) -> bool {
        matches!(self, RaceState::Running | RaceState::WinnerDeclared)
    }
}

impl fmt::Display for RaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RaceState::NotStarted => "not started",
            RaceState::Running => "running",
            RaceState::Paused => "paused",
            RaceState::WinnerDeclared => "winner declared",
            RaceState::Finished => "finished",
            RaceState::Ended => "ended",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RaceError {
    #[error("Cannot add lap while race is {0}")]
    NotAcceptingLaps(RaceState),

    #[error("Race has not started")]
    NotStarted,

    #[error("Race clock for racer {racer_id} went from {previous}s to {received}s")]
    NonIncreasingRaceClock { racer_id: u32, previous: f64, received: f64 },

    #[error("Cannot start a new race from a race that is {0}")]
    PreviousRaceInProgress(RaceState),

    #[error("Invalid lap: {0}")]
    InvalidLap(#[from] LapError),
}

/// One row of the leaderboard.
#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    pub position: usize,
    pub racer_id: u32,
    pub lap_count: u32,
    /// `f64::INFINITY` until the racer has a scored lap.
    pub best_lap_time: f64,
    pub last_lap_time: f64,
    /// Furthest reading of the hardware race clock for this racer.
    pub total_time: f64,
}

#[derive(Debug, Clone)]
pub struct Race {
    state: RaceState,
    start_time: Option<f64>,
    elapsed_time: f64,
    total_laps: u32,
    active_contestants: BTreeSet<u32>,
    laps: Vec<Lap>,
}

impl Race {
    pub fn new(total_laps: u32) -> Race {
        Race {
            state: RaceState::NotStarted,
            start_time: None,
            elapsed_time: 0.0,
            total_laps,
            active_contestants: BTreeSet::new(),
            laps: vec![],
        }
    }

    /// Next race of an event. Racers who scored in `previous` are expected
    /// to finish this one too.
    pub fn following(previous: &Race) -> Result<Race, RaceError> {
        match previous.state {
            RaceState::NotStarted | RaceState::Finished | RaceState::Ended => {
                let mut race = Race::new(previous.total_laps);
                race.active_contestants = previous.active_contestants.clone();
                Ok(race)
            },
            state => Err(RaceError::PreviousRaceInProgress(state)),
        }
    }

    pub fn state(&self) -> RaceState {
        self.state
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn elapsed_time(&self) -> f64 {
        self.elapsed_time
    }

    pub fn total_laps(&self) -> u32 {
        self.total_laps
    }

    pub fn active_contestants(&self) -> &BTreeSet<u32> {
        &self.active_contestants
    }

    pub fn laps(&self) -> &[Lap] {
        &self.laps
    }

    /// Starts a fresh race at `now`, or resumes a paused one. On resume the
    /// start time moves forward by the paused span so elapsed time and
    /// internal lap times only count running time.
    pub fn start(&mut self, now: f64) {
        match self.state {
            RaceState::NotStarted => {
                self.start_time = Some(now);
                self.elapsed_time = 0.0;
            },
            RaceState::Paused => self.start_time = Some(now - self.elapsed_time),
            _ => return,
        }
        self.state = RaceState::Running;
    }

    pub fn pause(&mut self) {
        if self.state == RaceState::Running {
            self.state = RaceState::Paused;
        }
    }

    /// Manual termination. Only a race that is under way can be ended.
    pub fn end(&mut self) {
        if matches!(self.state, RaceState::Running | RaceState::Paused | RaceState::WinnerDeclared) {
            self.state = RaceState::Ended;
        }
    }

    pub fn reset(&mut self) {
        self.laps.clear();
        self.active_contestants.clear();
        self.state = RaceState::NotStarted;
        self.start_time = None;
        self.elapsed_time = 0.0;
    }

    pub fn update_elapsed(&mut self, now: f64) {
        if let (RaceState::Running, Some(start_time)) = (self.state, self.start_time) {
            self.elapsed_time = (now - start_time).max(0.0);
        }
    }

    /// Builds the next lap for `racer_id` from a hardware race clock reading
    /// and the local clock at which it was received.
    pub fn derive_lap(&self, racer_id: u32, race_time: f64, internal_time: f64) -> Result<Lap, RaceError> {
        let start_time = self.start_time.ok_or(RaceError::NotStarted)?;

        let mut lap_number = 0;
        let mut previous = None;
        for lap in self.laps.iter().filter(|lap| lap.racer_id() == racer_id) {
            lap_number += 1;
            previous = Some(lap.seconds_from_race_start());
        }

        let lap_time = match previous {
            Some(previous) => race_time - previous,
            None => race_time,
        };

        Ok(Lap::new(racer_id, lap_number, race_time, internal_time - start_time, lap_time)?)
    }

    pub fn add_lap(&mut self, lap: Lap) -> Result<(), RaceError> {
        if !self.state.accepts_laps() {
            return Err(RaceError::NotAcceptingLaps(self.state));
        }

        let previous = self.laps.iter().rev()
            .find(|existing| existing.racer_id() == lap.racer_id())
            .map(|existing| existing.seconds_from_race_start());
        if let Some(previous) = previous {
            if lap.seconds_from_race_start() <= previous {
                return Err(RaceError::NonIncreasingRaceClock {
                    racer_id: lap.racer_id(),
                    previous,
                    received: lap.seconds_from_race_start(),
                });
            }
        }

        if lap.is_scored() {
            self.active_contestants.insert(lap.racer_id());
        }
        self.laps.push(lap);

        let leaderboard = self.leaderboard();
        if self.state == RaceState::Running {
            if let Some(leader) = leaderboard.first() {
                if leader.lap_count >= self.total_laps {
                    info!("Racer {} wins after {} laps", leader.racer_id, leader.lap_count);
                    self.state = RaceState::WinnerDeclared;
                }
            }
        }

        let lap_counts: HashMap<u32, u32> = leaderboard.iter()
            .map(|standing| (standing.racer_id, standing.lap_count))
            .collect();
        let everyone_done = !self.active_contestants.is_empty()
            && self.active_contestants.iter()
                .all(|racer_id| lap_counts.get(racer_id).copied().unwrap_or(0) >= self.total_laps);
        if everyone_done {
            info!("All {} active racers completed {} laps", self.active_contestants.len(), self.total_laps);
            self.state = RaceState::Finished;
        }

        Ok(())
    }

    pub fn leaderboard(&self) -> Vec<Standing> {
        let mut index: HashMap<u32, usize> = HashMap::new();
        let mut standings: Vec<Standing> = vec![];

        for lap in &self.laps {
            let slot = *index.entry(lap.racer_id()).or_insert_with(|| {
                standings.push(Standing {
                    position: 0,
                    racer_id: lap.racer_id(),
                    lap_count: 0,
                    best_lap_time: f64::INFINITY,
                    last_lap_time: lap.lap_time(),
                    total_time: lap.seconds_from_race_start(),
                });
                standings.len() - 1
            });

            let standing = &mut standings[slot];
            standing.last_lap_time = lap.lap_time();
            standing.total_time = standing.total_time.max(lap.seconds_from_race_start());
            if lap.is_scored() {
                standing.lap_count += 1;
                standing.best_lap_time = standing.best_lap_time.min(lap.lap_time());
            }
        }

        standings.sort_by(|a, b| b.lap_count.cmp(&a.lap_count)
            .then(a.best_lap_time.total_cmp(&b.best_lap_time)));
        for (i, standing) in standings.iter_mut().enumerate() {
            standing.position = i + 1;
        }
        standings
    }

    /// Laps still to go for the leader and for the last placed racer.
    pub fn laps_remaining(&self) -> (u32, u32) {
        let leaderboard = self.leaderboard();
        match (leaderboard.first(), leaderboard.last()) {
            (Some(leader), Some(last)) => (
                self.total_laps.saturating_sub(leader.lap_count),
                self.total_laps.saturating_sub(last.lap_count),
            ),
            _ => (self.total_laps, self.total_laps),
        }
    }

    /// Fastest scored lap of the race.
    pub fn best_lap(&self) -> Option<&Lap> {
        self.laps.iter()
            .filter(|lap| lap.is_scored())
            .min_by(|a, b| a.lap_time().total_cmp(&b.lap_time()))
    }
}

impl fmt::Display for Race {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Race(state={}, laps={}, start_time={:?}, elapsed_time={:.2})",
            self.state, self.laps.len(), self.start_time, self.elapsed_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn running(total_laps: u32) -> Race {
        let mut race = Race::new(total_laps);
        race.start(100.0);
        race
    }

    fn lap(racer_id: u32, lap_number: u32, seconds_from_race_start: f64, lap_time: f64) -> Lap {
        Lap::new(racer_id, lap_number, seconds_from_race_start, lap_time, lap_time).unwrap()
    }

    fn crossing(race: &mut Race, racer_id: u32, race_time: f64) -> Lap {
        let lap = race.derive_lap(racer_id, race_time, 100.0 + race_time).unwrap();
        race.add_lap(lap.clone()).unwrap();
        lap
    }

    fn row(standing: &Standing) -> (usize, u32, u32, f64, f64, f64) {
        (standing.position, standing.racer_id, standing.lap_count,
            standing.best_lap_time, standing.last_lap_time, standing.total_time)
    }

    #[test]
    fn empty_leaderboard() {
        let race = running(10);
        assert!(race.leaderboard().is_empty());
        assert_eq!(race.laps_remaining(), (10, 10));
        assert!(race.best_lap().is_none());
    }

    #[test]
    fn single_scored_lap() {
        let mut race = running(10);
        race.add_lap(lap(1, 0, 0.5, 0.5)).unwrap();
        race.add_lap(lap(1, 1, 10.0, 10.0)).unwrap();

        let rows: Vec<_> = race.leaderboard().iter().map(row).collect();
        assert_eq!(rows, vec![(1, 1, 1, 10.0, 10.0, 10.0)]);
    }

    #[test]
    fn multiple_laps_single_racer() {
        let mut race = running(10);
        race.add_lap(lap(1, 0, 0.5, 0.5)).unwrap();
        race.add_lap(lap(1, 1, 9.0, 9.0)).unwrap();
        race.add_lap(lap(1, 2, 19.0, 10.0)).unwrap();
        race.add_lap(lap(1, 3, 30.0, 11.0)).unwrap();

        let rows: Vec<_> = race.leaderboard().iter().map(row).collect();
        assert_eq!(rows, vec![(1, 1, 3, 9.0, 11.0, 30.0)]);
        assert_eq!(race.laps_remaining(), (7, 7));
        assert_eq!(race.best_lap().map(|lap| lap.lap_number()), Some(1));
    }

    #[test]
    fn more_laps_ranks_first() {
        let mut race = running(10);
        race.add_lap(lap(2, 0, 0.5, 0.5)).unwrap();
        race.add_lap(lap(1, 0, 0.6, 0.6)).unwrap();
        for i in 1..=3 {
            race.add_lap(lap(1, i, 10.0 * i as f64, 10.0)).unwrap();
        }
        for i in 1..=2 {
            race.add_lap(lap(2, i, 9.0 * i as f64, 9.0)).unwrap();
        }

        let leaderboard = race.leaderboard();
        assert_eq!(leaderboard[0].racer_id, 1);
        assert_eq!(leaderboard[1].racer_id, 2);
        assert_eq!(race.laps_remaining(), (7, 8));
    }

    #[test]
    fn equal_laps_ranked_by_best_lap() {
        let mut race = running(10);
        race.add_lap(lap(1, 0, 0.5, 0.5)).unwrap();
        race.add_lap(lap(2, 0, 0.5, 0.5)).unwrap();
        race.add_lap(lap(1, 1, 10.0, 10.0)).unwrap();
        race.add_lap(lap(1, 2, 19.0, 9.0)).unwrap();
        race.add_lap(lap(2, 1, 10.0, 10.0)).unwrap();
        race.add_lap(lap(2, 2, 18.0, 8.0)).unwrap();

        let leaderboard = race.leaderboard();
        assert_eq!(leaderboard[0].racer_id, 2);
        assert_eq!(leaderboard[1].racer_id, 1);
    }

    #[test]
    fn start_lap_is_not_scored() {
        let mut race = running(10);
        race.add_lap(lap(1, 0, 0.5, 0.5)).unwrap();
        race.add_lap(lap(1, 1, 10.0, 9.5)).unwrap();
        race.add_lap(lap(2, 0, 0.7, 0.7)).unwrap();
        race.add_lap(lap(2, 1, 9.0, 8.3)).unwrap();
        race.add_lap(lap(3, 0, 0.2, 0.2)).unwrap();

        let leaderboard = race.leaderboard();
        assert_eq!(leaderboard.len(), 3);
        assert_eq!((leaderboard[0].racer_id, leaderboard[0].lap_count), (2, 1));
        assert_eq!((leaderboard[1].racer_id, leaderboard[1].lap_count), (1, 1));
        assert_eq!(row(&leaderboard[2]), (3, 3, 0, f64::INFINITY, 0.2, 0.2));
        assert_eq!(race.active_contestants().iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn positions_follow_sorted_order() {
        let mut race = running(10);
        race.add_lap(lap(1, 1, 10.0, 10.0)).unwrap();
        race.add_lap(lap(1, 2, 21.0, 11.0)).unwrap();
        race.add_lap(lap(1, 3, 33.0, 12.0)).unwrap();
        race.add_lap(lap(2, 1, 10.0, 10.0)).unwrap();
        race.add_lap(lap(2, 2, 19.5, 9.5)).unwrap();
        race.add_lap(lap(2, 3, 30.5, 11.0)).unwrap();
        race.add_lap(lap(3, 1, 9.0, 9.0)).unwrap();
        race.add_lap(lap(3, 2, 18.2, 9.2)).unwrap();

        let order: Vec<(usize, u32)> = race.leaderboard().iter()
            .map(|standing| (standing.position, standing.racer_id))
            .collect();
        assert_eq!(order, vec![(1, 2), (2, 1), (3, 3)]);
    }

    #[test]
    fn derive_lap_numbers_and_times() {
        let mut race = running(10);
        let first = crossing(&mut race, 5, 1.25);
        assert_eq!(first.lap_number(), 0);
        assert_eq!(first.lap_time(), 1.25);
        assert_eq!(first.internal_lap_time(), 1.25);

        let second = crossing(&mut race, 5, 11.25);
        assert_eq!(second.lap_number(), 1);
        assert_eq!(second.lap_time(), 10.0);

        let other = crossing(&mut race, 6, 2.0);
        assert_eq!(other.lap_number(), 0);

        let third = race.derive_lap(5, 20.75, 120.75).unwrap();
        assert_eq!(third.lap_number(), 2);
        assert_eq!(third.lap_time(), 9.5);
        assert_eq!(third.seconds_from_race_start(), 20.75);
    }

    #[test]
    fn derive_lap_requires_start() {
        let race = Race::new(3);
        assert_eq!(race.derive_lap(1, 1.0, 1.0), Err(RaceError::NotStarted));
    }

    #[test]
    fn derive_lap_rejects_repeated_race_clock() {
        let mut race = running(3);
        crossing(&mut race, 1, 5.0);
        assert!(matches!(race.derive_lap(1, 5.0, 106.0), Err(RaceError::InvalidLap(_))));
    }

    #[test]
    fn add_lap_outside_running_changes_nothing() {
        let mut race = Race::new(3);
        assert_eq!(race.add_lap(lap(1, 1, 1.0, 1.0)), Err(RaceError::NotAcceptingLaps(RaceState::NotStarted)));

        race.start(0.0);
        race.add_lap(lap(1, 1, 1.0, 1.0)).unwrap();
        race.pause();
        assert_eq!(race.add_lap(lap(2, 1, 2.0, 2.0)), Err(RaceError::NotAcceptingLaps(RaceState::Paused)));

        race.end();
        assert_eq!(race.add_lap(lap(2, 1, 2.0, 2.0)), Err(RaceError::NotAcceptingLaps(RaceState::Ended)));

        assert_eq!(race.state(), RaceState::Ended);
        assert_eq!(race.laps().len(), 1);
        assert_eq!(race.active_contestants().len(), 1);
    }

    #[test]
    fn add_lap_rejects_clock_going_backwards() {
        let mut race = running(3);
        race.add_lap(lap(1, 1, 10.0, 10.0)).unwrap();
        assert_eq!(
            race.add_lap(lap(1, 2, 9.0, 1.0)),
            Err(RaceError::NonIncreasingRaceClock { racer_id: 1, previous: 10.0, received: 9.0 }));
        assert_eq!(race.laps().len(), 1);
    }

    #[test]
    fn winner_then_finish() {
        let mut race = running(3);
        for (racer_id, race_time) in [(1, 1.0), (2, 1.5), (1, 11.0), (2, 12.0), (1, 20.0), (2, 22.5)] {
            crossing(&mut race, racer_id, race_time);
        }
        assert_eq!(race.state(), RaceState::Running);
        assert_eq!(race.laps_remaining(), (1, 1));

        let winning = crossing(&mut race, 1, 31.0);
        assert_eq!(winning.lap_number(), 3);
        assert_eq!(winning.lap_time(), 11.0);
        assert_eq!(race.state(), RaceState::WinnerDeclared);

        let leader = &race.leaderboard()[0];
        assert_eq!((leader.position, leader.racer_id, leader.lap_count), (1, 1, 3));
        assert_eq!(leader.best_lap_time, 9.0);
        assert_eq!(race.laps_remaining(), (0, 1));

        crossing(&mut race, 2, 34.0);
        assert_eq!(race.state(), RaceState::Finished);
        assert_eq!(race.laps_remaining(), (0, 0));
        assert!(race.add_lap(lap(2, 4, 40.0, 6.0)).is_err());
    }

    #[test]
    fn lone_racer_finishes_directly() {
        let mut race = running(1);
        crossing(&mut race, 9, 0.8);
        assert_eq!(race.state(), RaceState::Running);
        crossing(&mut race, 9, 8.8);
        assert_eq!(race.state(), RaceState::Finished);
    }

    #[test]
    fn start_pause_resume() {
        let mut race = Race::new(5);
        race.pause();
        assert_eq!(race.state(), RaceState::NotStarted);

        race.start(10.0);
        race.update_elapsed(12.5);
        assert_eq!(race.elapsed_time(), 2.5);

        race.start(99.0);
        assert_eq!(race.start_time(), Some(10.0));

        race.pause();
        race.update_elapsed(20.0);
        assert_eq!(race.state(), RaceState::Paused);
        assert_eq!(race.elapsed_time(), 2.5);

        race.start(30.0);
        assert_eq!(race.state(), RaceState::Running);
        assert_eq!(race.start_time(), Some(27.5));
        assert_eq!(race.elapsed_time(), 2.5);
        race.update_elapsed(31.0);
        assert_eq!(race.elapsed_time(), 3.5);
    }

    #[test]
    fn resume_keeps_laps_and_contestants() {
        let mut race = running(5);
        crossing(&mut race, 1, 1.0);
        crossing(&mut race, 1, 6.0);
        race.update_elapsed(106.0);
        race.pause();

        race.start(200.0);
        assert_eq!(race.state(), RaceState::Running);
        assert_eq!(race.laps().len(), 2);
        assert!(race.active_contestants().contains(&1));

        let next = race.derive_lap(1, 11.0, 205.0).unwrap();
        assert_eq!(next.lap_number(), 2);
        assert_eq!(next.internal_lap_time(), 11.0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut race = running(5);
        crossing(&mut race, 1, 1.0);
        crossing(&mut race, 1, 6.0);
        race.update_elapsed(130.0);

        race.reset();
        assert_eq!(race.state(), RaceState::NotStarted);
        assert!(race.laps().is_empty());
        assert!(race.active_contestants().is_empty());
        assert_eq!(race.start_time(), None);
        assert_eq!(race.elapsed_time(), 0.0);
    }

    #[test]
    fn end_only_applies_to_races_under_way() {
        let mut race = Race::new(5);
        race.end();
        assert_eq!(race.state(), RaceState::NotStarted);
        race.start(0.0);
        race.end();
        assert_eq!(race.state(), RaceState::Ended);
        race.start(1.0);
        assert_eq!(race.state(), RaceState::Ended);
    }

    #[test]
    fn following_race_carries_active_contestants() {
        let mut race = running(2);
        for (racer_id, race_time) in [(1, 1.0), (2, 1.2), (1, 6.0), (2, 7.0), (1, 11.0)] {
            crossing(&mut race, racer_id, race_time);
        }
        assert!(matches!(Race::following(&race), Err(RaceError::PreviousRaceInProgress(RaceState::WinnerDeclared))));

        crossing(&mut race, 2, 12.5);
        assert_eq!(race.state(), RaceState::Finished);

        let mut next = Race::following(&race).unwrap();
        assert_eq!(next.state(), RaceState::NotStarted);
        assert_eq!(next.total_laps(), 2);
        assert_eq!(next.active_contestants().iter().copied().collect::<Vec<_>>(), vec![1, 2]);

        // Racer 2 is still expected, so racer 1 alone only wins.
        next.start(100.0);
        for race_time in [1.0, 6.0, 11.0] {
            crossing(&mut next, 1, race_time);
        }
        assert_eq!(next.state(), RaceState::WinnerDeclared);
    }

    proptest! {
        #[test]
        fn leaderboard_is_sorted(racers in proptest::collection::vec(proptest::collection::vec(1u32..1000, 0..6), 1..8)) {
            let mut race = running(1000);
            for (racer_id, lap_times) in racers.iter().enumerate() {
                let racer_id = racer_id as u32;
                let mut clock = 1.0;
                race.add_lap(lap(racer_id, 0, clock, 1.0)).unwrap();
                for (n, millis) in lap_times.iter().enumerate() {
                    let lap_time = *millis as f64 / 100.0;
                    clock += lap_time;
                    race.add_lap(lap(racer_id, n as u32 + 1, clock, lap_time)).unwrap();
                }
            }

            let leaderboard = race.leaderboard();
            prop_assert_eq!(leaderboard.len(), racers.len());
            for (i, standing) in leaderboard.iter().enumerate() {
                prop_assert_eq!(standing.position, i + 1);
                let times = &racers[standing.racer_id as usize];
                prop_assert_eq!(standing.lap_count as usize, times.len());
                let best = times.iter().map(|millis| *millis as f64 / 100.0).fold(f64::INFINITY, f64::min);
                prop_assert_eq!(standing.best_lap_time, best);
            }
            for pair in leaderboard.windows(2) {
                let ordered = pair[0].lap_count > pair[1].lap_count
                    || (pair[0].lap_count == pair[1].lap_count && pair[0].best_lap_time <= pair[1].best_lap_time);
                prop_assert!(ordered);
            }
        }
    }
}
