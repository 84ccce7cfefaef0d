// Snake draft: slot ordering, pick schedule, and the pick state machine.

pub mod engine;
pub mod order;

pub use engine::{DraftEngine, PickOutcome};
pub use order::{pick_schedule, serpentine_pick_number, shuffle_slots};
