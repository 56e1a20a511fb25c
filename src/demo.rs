use rand::Rng;
use tracing::info;

use crate::environment::Emulator;
use crate::error::Result;

/// Play uniformly random actions on a raw game for `steps` frames, resetting
/// whenever a game ends. Returns the total reward of every finished game.
pub fn run_random_agent<E: Emulator, R: Rng>(
    emulator: &mut E,
    steps: u64,
    render: bool,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let num_actions = emulator.num_actions();
    let mut totals = Vec::new();
    let mut total_reward = 0.0;

    emulator.reset(None)?;
    for _ in 0..steps {
        if render {
            emulator.render()?;
        }
        let step = emulator.step(rng.random_range(0..num_actions))?;
        total_reward += step.reward;
        if step.game_over() {
            info!("Total reward: {}", total_reward);
            totals.push(total_reward);
            total_reward = 0.0;
            emulator.reset(None)?;
        }
    }
    emulator.close()?;
    Ok(totals)
}
