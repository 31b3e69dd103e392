//! PPO training core for the Shogi self-play pipeline.
//!
//! This crate owns the experience side of training: the rollout buffer with
//! its GAE computation, the clipped-surrogate policy update, the policy/value
//! network with explicit gradients, learning-rate schedules, checkpoint
//! persistence, and the single-owner self-play driver.
//!
//! # How a training epoch flows
//!
//! 1. **Collect** — [`selfplay::play_episode`] drives one [`koma_engine::Position`]
//!    per worker context, sampling actions from the current policy through the
//!    encoder's legality mask.
//! 2. **Ingest** — [`selfplay::ingest_episode`] moves completed episodes into
//!    the central [`buffer::RolloutBuffer`], preserving `done` boundaries per
//!    episode so GAE never bootstraps across sources.
//! 3. **Estimate** — [`buffer::RolloutBuffer::compute_advantages`] runs the
//!    backward GAE recurrence over the buffer as one contiguous trajectory.
//! 4. **Update** — [`ppo::PpoAgent::update`] consumes the snapshot batch for
//!    K epochs of shuffled minibatches, then the buffer is cleared.
//!
//! Collection and consumption phases for a buffer are temporally disjoint;
//! the buffer enforces this with explicit phase errors rather than silent
//! interleaving.

pub use self::{
    buffer::{RolloutBatch, RolloutBuffer, Transition},
    checkpoint::Checkpoint,
    metrics::{CollectionLog, SummaryStats},
    network::{MlpConfig, MlpNet, PolicyValueNet},
    ppo::{ActionSample, PpoAgent, PpoConfig, UpdateStats},
    schedule::{Schedule, ScheduleRegistry, ScheduleSpec},
    selfplay::{
        Episode, EpisodeMeta, OBSERVATION_LEN, SelfPlayConfig, ingest_episode, play_episode,
    },
    trainer::{EpochReport, TrainError, Trainer},
};

pub mod buffer;
pub mod checkpoint;
pub mod metrics;
pub mod network;
pub mod ppo;
pub mod schedule;
pub mod selfplay;
pub mod trainer;

/// Recoverable buffer conditions. The caller chooses the policy (block,
/// drop with a metric, resize); the buffer itself never drops data
/// silently.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum BufferError {
    #[display("buffer is full (capacity {capacity})")]
    Full {
        #[error(not(source))]
        capacity: usize,
    },
    #[display("advantages have not been computed for this buffer")]
    NotReady,
    #[display("buffer is empty")]
    Empty,
    #[display("buffer is sealed for reading; clear it before collecting")]
    Sealed,
}

/// Invalid hyperparameter combinations, reported at construction time.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum ConfigError {
    #[display("invalid value for {name}: {reason}")]
    InvalidHyperparameter {
        name: &'static str,
        #[error(not(source))]
        reason: String,
    },
    #[display("no registered schedule accepts this specification")]
    UnknownSchedule,
}

/// Checkpoint persistence failures. A failed resume must abort loudly; it
/// is never converted into a fresh start.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum CheckpointError {
    #[display("checkpoint file not found: {path}")]
    Missing {
        #[error(not(source))]
        path: String,
    },
    #[display("checkpoint file could not be parsed: {_0}")]
    Corrupt(serde_json::Error),
    #[display("checkpoint shape mismatch for {field}: expected {expected:?}, found {found:?}")]
    Mismatch {
        field: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[display("checkpoint io error: {_0}")]
    Io(std::io::Error),
}

/// Failures while driving a self-play episode. Engine-level corruption
/// propagates unchanged so it can never be mistaken for a normal outcome.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum SelfPlayError {
    #[display("engine state corruption: {_0}")]
    State(koma_engine::StateError),
    #[display("engine rejected a move the policy selected: {_0}")]
    Move(koma_engine::MoveError),
    #[display("sampled action does not map to a legal move (index {index})")]
    ActionDecode {
        #[error(not(source))]
        index: usize,
    },
}

impl From<koma_engine::StateError> for SelfPlayError {
    fn from(err: koma_engine::StateError) -> Self {
        SelfPlayError::State(err)
    }
}

impl From<koma_engine::MoveError> for SelfPlayError {
    fn from(err: koma_engine::MoveError) -> Self {
        SelfPlayError::Move(err)
    }
}
