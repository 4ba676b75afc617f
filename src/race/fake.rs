use std::collections::BTreeMap;
use std::ops::Range;

use rand::Rng;

use crate::race::lap::{ Lap, LapError };

pub const FAKE_RACERS: [u32; 5] = [1, 2, 3, 4, 5];
pub const FAKE_LAPS: u32 = 10;
pub const FAKE_LAP_TIMES: Range<f64> = 5.0..6.0;

/// Laps `1..=laps` for every racer with lap times drawn from `lap_times`.
pub fn generate_fake_race<R: Rng>(rng: &mut R, racers: &[u32], laps: u32, lap_times: Range<f64>) -> Result<Vec<Lap>, LapError> {
    let mut clocks: BTreeMap<u32, f64> = racers.iter().map(|racer_id| (*racer_id, 0.0)).collect();
    let mut generated = Vec::with_capacity(racers.len() * laps as usize);

    for lap_number in 1..=laps {
        for racer_id in racers {
            let lap_time = rng.gen_range(lap_times.clone());
            let clock = clocks.entry(*racer_id).or_insert(0.0);
            *clock += lap_time;
            generated.push(Lap::fake(*racer_id, lap_number, lap_time, *clock)?);
        }
    }

    Ok(generated)
}

/// Puts laps in the order they would have been completed on track, paired
/// with the racer's cumulative time at the end of each lap.
pub fn order_laps_by_occurrence(laps: &[Lap]) -> Vec<(f64, Lap)> {
    let mut by_racer: BTreeMap<u32, Vec<&Lap>> = BTreeMap::new();
    for lap in laps {
        by_racer.entry(lap.racer_id()).or_default().push(lap);
    }

    let mut ordered = Vec::with_capacity(laps.len());
    for racer_laps in by_racer.values_mut() {
        racer_laps.sort_by_key(|lap| lap.lap_number());

        let mut total_time = 0.0;
        for lap in racer_laps.iter() {
            total_time += lap.lap_time();
            ordered.push((total_time, (*lap).clone()));
        }
    }

    ordered.sort_by(|a, b| a.0.total_cmp(&b.0));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn generates_every_lap_for_every_racer() {
        let mut rng = StdRng::seed_from_u64(7);
        let laps = generate_fake_race(&mut rng, &FAKE_RACERS, FAKE_LAPS, FAKE_LAP_TIMES).unwrap();

        assert_eq!(laps.len(), 50);
        for lap in &laps {
            assert!(lap.lap_time() >= 5.0 && lap.lap_time() < 6.0);
            assert!(lap.lap_number() >= 1 && lap.lap_number() <= FAKE_LAPS);
        }

        let racer_three: Vec<&Lap> = laps.iter().filter(|lap| lap.racer_id() == 3).collect();
        let total: f64 = racer_three.iter().map(|lap| lap.lap_time()).sum();
        let last = racer_three.last().unwrap();
        assert!((last.seconds_from_race_start() - total).abs() < 1e-9);
    }

    #[test]
    fn orders_by_cumulative_time() {
        let laps = vec![
            Lap::fake(1, 2, 5.0, 10.0).unwrap(),
            Lap::fake(1, 1, 5.0, 5.0).unwrap(),
            Lap::fake(2, 1, 4.0, 4.0).unwrap(),
            Lap::fake(2, 2, 7.0, 11.0).unwrap(),
        ];

        let ordered: Vec<(f64, u32, u32)> = order_laps_by_occurrence(&laps).into_iter()
            .map(|(time, lap)| (time, lap.racer_id(), lap.lap_number()))
            .collect();
        assert_eq!(ordered, vec![
            (4.0, 2, 1),
            (5.0, 1, 1),
            (10.0, 1, 2),
            (11.0, 2, 2),
        ]);
    }
}
