//! Self-play episode driver and worker-batch ingestion.
//!
//! Each collection context owns exactly one [`Position`]; nothing here is
//! shared or concurrently mutated. Workers receive a policy snapshot, play
//! complete episodes, and hand back transitions plus per-episode metadata.
//! The single ingestion point into the central buffer preserves `done`
//! boundaries per episode, which is the precondition that keeps the
//! buffer's GAE pass valid when merging parallel collection.

use koma_engine::{BOARD_SIZE, Color, GameStatus, Position, PositionConfig};
use koma_encoder::{ACTION_SPACE, CHANNELS, LegalActions, encode_observation};
use ndarray::Array1;
use rand::Rng;

use crate::{
    BufferError, SelfPlayError,
    buffer::{RolloutBuffer, Transition},
    ppo::PpoAgent,
};

/// Flattened observation length fed to the network.
pub const OBSERVATION_LEN: usize = CHANNELS * BOARD_SIZE * BOARD_SIZE;

/// Per-episode knobs.
#[derive(Debug, Clone, Copy)]
pub struct SelfPlayConfig {
    pub position: PositionConfig,
    /// Reward for the final transitions of a drawn game.
    pub draw_reward: f32,
}

impl Default for SelfPlayConfig {
    fn default() -> Self {
        Self {
            position: PositionConfig::default(),
            draw_reward: 0.0,
        }
    }
}

/// Outcome summary a worker reports alongside its transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeMeta {
    pub outcome: GameStatus,
    pub length: usize,
}

/// A completed episode: an ordered transition trajectory whose final entry
/// carries `done = true`, plus its metadata.
#[derive(Debug, Clone)]
pub struct Episode {
    pub transitions: Vec<Transition>,
    pub meta: EpisodeMeta,
}

/// Plays one full game with the current policy, from the standard opening
/// position.
///
/// Rewards are terminal-sparse and mover-relative: the winner's last
/// transition receives `+1`, the loser's last `-1`, and draws award
/// `draw_reward` to both. All earlier transitions carry zero reward.
pub fn play_episode<R>(
    agent: &PpoAgent,
    config: &SelfPlayConfig,
    rng: &mut R,
) -> Result<Episode, SelfPlayError>
where
    R: Rng + ?Sized,
{
    let mut pos = Position::with_config(config.position);
    let mut transitions: Vec<Transition> = Vec::new();
    let mut movers: Vec<Color> = Vec::new();

    while !pos.status().is_terminal() {
        let observation = encode_observation(&pos)?;
        let actions = LegalActions::build(&mut pos)?;
        debug_assert_eq!(actions.mask().len(), ACTION_SPACE);

        let mover = pos.side_to_move();
        let flat: Array1<f32> = Array1::from_iter(observation.iter().copied());
        let sample = agent.act(&flat, actions.mask(), rng);
        let mv = actions
            .decode(sample.action)
            .ok_or(SelfPlayError::ActionDecode {
                index: sample.action,
            })?;
        pos.make_move(mv)?;

        transitions.push(Transition {
            observation,
            action: sample.action,
            legal_mask: actions.mask().to_vec(),
            reward: 0.0,
            value: sample.value,
            log_prob: sample.log_prob,
            done: false,
        });
        movers.push(mover);
    }

    let outcome = pos.status();
    assign_terminal_rewards(&mut transitions, &movers, outcome, config.draw_reward);
    if let Some(last) = transitions.last_mut() {
        last.done = true;
    }

    let meta = EpisodeMeta {
        outcome,
        length: transitions.len(),
    };
    Ok(Episode { transitions, meta })
}

/// Writes the outcome into the last transition of each player.
fn assign_terminal_rewards(
    transitions: &mut [Transition],
    movers: &[Color],
    outcome: GameStatus,
    draw_reward: f32,
) {
    let reward_for = |mover: Color| match outcome.winner() {
        Some(winner) if mover == winner => 1.0,
        Some(_) => -1.0,
        None => draw_reward,
    };
    let mut rewarded = [false; 2];
    for i in (0..transitions.len()).rev() {
        let mover = movers[i];
        if rewarded[mover.index()] {
            continue;
        }
        transitions[i].reward = reward_for(mover);
        rewarded[mover.index()] = true;
        if rewarded.iter().all(|&r| r) {
            break;
        }
    }
}

/// Merges one completed episode into the central buffer.
///
/// The whole episode is admitted or none of it: a partial splice would cut
/// a trajectory without a `done` boundary and silently corrupt GAE for
/// everything before the cut. When the episode does not fit, the explicit
/// [`BufferError::Full`] is the backpressure signal; the caller decides
/// whether to block, drop with a metric, or grow.
pub fn ingest_episode(buffer: &mut RolloutBuffer, episode: &Episode) -> Result<(), BufferError> {
    if episode.transitions.is_empty() {
        return Ok(());
    }
    if episode.transitions.len() > buffer.remaining() {
        return Err(BufferError::Full {
            capacity: buffer.capacity(),
        });
    }
    let last = episode.transitions.len() - 1;
    for (i, transition) in episode.transitions.iter().enumerate() {
        let mut t = transition.clone();
        // The episode boundary must survive the merge whatever the worker
        // set; GAE depends on it.
        if i == last {
            t.done = true;
        }
        buffer.push(t)?;
    }
    Ok(())
}
