//! Rollout experience buffer with GAE computation.

use ndarray::{Array1, Array2, Array3};

use crate::BufferError;

/// One environment step as stored for training.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Mover-perspective observation, shape `(channels, 9, 9)`.
    pub observation: Array3<f32>,
    /// Index into the fixed action space.
    pub action: usize,
    /// Legality mask over the fixed action space at decision time.
    pub legal_mask: Vec<bool>,
    /// Reward received after the action (terminal-sparse).
    pub reward: f32,
    /// Value estimate at decision time.
    pub value: f32,
    /// Log-probability of the action under the acting policy.
    pub log_prob: f32,
    /// Whether this transition ended its episode.
    pub done: bool,
}

/// Training-ready snapshot of a full buffer. All arrays share one length;
/// observations are flattened row-major per sample. Read-only once
/// produced and consumed exactly once by the update engine.
#[derive(Debug, Clone)]
pub struct RolloutBatch {
    pub observations: Array2<f32>,
    pub actions: Vec<usize>,
    pub legal_masks: Array2<bool>,
    pub old_log_probs: Array1<f32>,
    pub old_values: Array1<f32>,
    pub advantages: Array1<f32>,
    pub returns: Array1<f32>,
}

impl RolloutBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Collecting,
    Ready,
}

/// Pre-sized store for one rollout epoch.
///
/// Lifecycle is an explicit state machine: collect (`push`) → estimate
/// (`compute_advantages`) → read (`batch`) → `clear`. Writes after the
/// estimate phase and reads before it are rejected, which is what keeps
/// reader and writer phases temporally disjoint for a given buffer.
///
/// # Trajectory precondition
///
/// Contents must form one logically ordered trajectory, or a concatenation
/// of trajectories in which `done` marks **every** episode boundary —
/// including boundaries between worker sources when merging parallel
/// collection. GAE is computed backward over the whole buffer and relies on
/// `done` to cut bootstrapping; merging heterogeneous sources without
/// boundary flags silently corrupts every advantage before the splice
/// point.
#[derive(Debug)]
pub struct RolloutBuffer {
    capacity: usize,
    transitions: Vec<Transition>,
    advantages: Vec<f32>,
    returns: Vec<f32>,
    phase: Phase,
}

impl RolloutBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            capacity,
            transitions: Vec::with_capacity(capacity),
            advantages: Vec::with_capacity(capacity),
            returns: Vec::with_capacity(capacity),
            phase: Phase::Collecting,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Slots still available this epoch.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.transitions.len()
    }

    /// Appends one transition.
    ///
    /// A full buffer is an explicit error — never a silent drop, because a
    /// lost terminal transition corrupts the reward signal at an episode
    /// boundary with no later way to notice. Pushing into a sealed buffer
    /// (advantages already computed) is likewise rejected.
    pub fn push(&mut self, transition: Transition) -> Result<(), BufferError> {
        if self.phase == Phase::Ready {
            return Err(BufferError::Sealed);
        }
        if self.transitions.len() >= self.capacity {
            return Err(BufferError::Full {
                capacity: self.capacity,
            });
        }
        self.transitions.push(transition);
        Ok(())
    }

    /// Runs the backward GAE recurrence over the buffer as one contiguous
    /// trajectory and seals the buffer for reading.
    ///
    /// `next_value` bootstraps the final transition when (and only when) it
    /// is not `done`; every `done` flag zeroes both the bootstrap term and
    /// the advantage chain across its boundary.
    pub fn compute_advantages(
        &mut self,
        next_value: f32,
        gamma: f32,
        lambda: f32,
    ) -> Result<(), BufferError> {
        if self.transitions.is_empty() {
            return Err(BufferError::Empty);
        }
        debug_assert!((0.0..=1.0).contains(&gamma));
        debug_assert!((0.0..=1.0).contains(&lambda));

        let n = self.transitions.len();
        self.advantages.clear();
        self.advantages.resize(n, 0.0);
        self.returns.clear();
        self.returns.resize(n, 0.0);

        let mut gae = 0.0;
        for t in (0..n).rev() {
            let transition = &self.transitions[t];
            let continuing = if transition.done { 0.0 } else { 1.0 };
            let next_v = if t + 1 == n {
                next_value
            } else {
                self.transitions[t + 1].value
            };
            let delta = transition.reward + gamma * next_v * continuing - transition.value;
            gae = delta + gamma * lambda * continuing * gae;
            self.advantages[t] = gae;
            self.returns[t] = gae + transition.value;
        }

        self.phase = Phase::Ready;
        Ok(())
    }

    /// Assembles the training batch.
    ///
    /// An empty buffer is a distinguishable error, not a zero-length
    /// success; calling before [`compute_advantages`](Self::compute_advantages)
    /// is `NotReady`.
    pub fn batch(&self) -> Result<RolloutBatch, BufferError> {
        if self.transitions.is_empty() {
            return Err(BufferError::Empty);
        }
        if self.phase != Phase::Ready {
            return Err(BufferError::NotReady);
        }

        let n = self.transitions.len();
        let obs_len = self.transitions[0].observation.len();
        let mask_len = self.transitions[0].legal_mask.len();

        let mut observations = Array2::zeros((n, obs_len));
        let mut legal_masks = Array2::from_elem((n, mask_len), false);
        let mut actions = Vec::with_capacity(n);
        let mut old_log_probs = Array1::zeros(n);
        let mut old_values = Array1::zeros(n);
        for (i, t) in self.transitions.iter().enumerate() {
            for (j, &v) in t.observation.iter().enumerate() {
                observations[[i, j]] = v;
            }
            for (j, &m) in t.legal_mask.iter().enumerate() {
                legal_masks[[i, j]] = m;
            }
            actions.push(t.action);
            old_log_probs[i] = t.log_prob;
            old_values[i] = t.value;
        }

        Ok(RolloutBatch {
            observations,
            actions,
            legal_masks,
            old_log_probs,
            old_values,
            advantages: Array1::from_vec(self.advantages.clone()),
            returns: Array1::from_vec(self.returns.clone()),
        })
    }

    /// Resets the buffer for the next collection phase. Stored memory is
    /// retained; old contents simply become unreachable.
    pub fn clear(&mut self) {
        self.transitions.clear();
        self.advantages.clear();
        self.returns.clear();
        self.phase = Phase::Collecting;
    }
}
