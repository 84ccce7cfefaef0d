// Draft order: slot shuffling and the serpentine pick schedule.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::model::{DraftSlot, FantasyTeamId};

/// Overall pick number for `slot` (1-indexed) in `round` (0-indexed) of a
/// draft with `teams` slots. Odd rounds run in reverse.
pub fn serpentine_pick_number(slot: u32, round: u32, teams: u32) -> u32 {
    let offset = if round % 2 == 0 { slot } else { teams - slot + 1 };
    round * teams + offset
}

/// Assign slots 1..=N to `teams` by a uniform random permutation.
pub fn shuffle_slots<R: Rng + ?Sized>(teams: &[FantasyTeamId], rng: &mut R) -> Vec<DraftSlot> {
    let mut shuffled = teams.to_vec();
    shuffled.shuffle(rng);
    shuffled
        .into_iter()
        .zip(1..)
        .map(|(fantasy_team_id, slot)| DraftSlot {
            fantasy_team_id,
            slot,
        })
        .collect()
}

/// Every (pick_number, team) for a draft, sorted by pick number.
pub fn pick_schedule(slots: &[DraftSlot], rounds: u32) -> Vec<(u32, FantasyTeamId)> {
    let teams = slots.len() as u32;
    let mut schedule: Vec<(u32, FantasyTeamId)> = (0..rounds)
        .flat_map(|round| {
            slots.iter().map(move |s| {
                (
                    serpentine_pick_number(s.slot, round, teams),
                    s.fantasy_team_id,
                )
            })
        })
        .collect();
    schedule.sort_by_key(|(pick, _)| *pick);
    schedule
}
