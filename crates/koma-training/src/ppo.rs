//! Clipped-surrogate PPO update engine.
//!
//! Log-probabilities are always computed directly from logits through a
//! masked log-sum-exp — never `softmax().ln()` — so long runs do not drift
//! on the numerically inferior path. Illegal actions are masked to negative
//! infinity before normalization; a sample whose mask has no legal action
//! falls back to a uniform distribution for that sample alone, leaving the
//! rest of its batch untouched.

use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rand::seq::SliceRandom;

use crate::{
    ConfigError,
    buffer::RolloutBatch,
    network::{Adam, MlpNet, PolicyValueNet},
    schedule::{Schedule, ScheduleRegistry, ScheduleSpec},
};

/// PPO hyperparameters. Validated as a whole at agent construction.
#[derive(Debug, Clone, PartialEq)]
pub struct PpoConfig {
    /// Surrogate clip range ε.
    pub clip_epsilon: f32,
    /// Weight of the value loss term.
    pub value_coef: f32,
    /// Weight of the entropy bonus.
    pub entropy_coef: f32,
    /// Discount factor used by the buffer's GAE pass.
    pub gamma: f32,
    /// GAE smoothing factor.
    pub lambda: f32,
    /// Optimization epochs per rollout batch.
    pub epochs: usize,
    /// Minibatch size within each epoch.
    pub minibatch_size: usize,
    /// Global gradient-norm clip.
    pub max_grad_norm: f32,
    /// Normalize advantages per minibatch.
    pub normalize_advantage: bool,
    /// Clip the value loss to `old_value ± clip_epsilon`.
    pub clip_value_loss: bool,
    /// Learning-rate schedule selection.
    pub schedule: ScheduleSpec,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            clip_epsilon: 0.2,
            value_coef: 0.5,
            entropy_coef: 0.01,
            gamma: 0.99,
            lambda: 0.95,
            epochs: 4,
            minibatch_size: 64,
            max_grad_norm: 0.5,
            normalize_advantage: true,
            clip_value_loss: false,
            schedule: ScheduleSpec::Constant { lr: 3e-4 },
        }
    }
}

impl PpoConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, bool, &str); 8] = [
            (
                "clip_epsilon",
                self.clip_epsilon > 0.0 && self.clip_epsilon < 1.0,
                "must be in (0, 1)",
            ),
            ("value_coef", self.value_coef >= 0.0, "must be non-negative"),
            (
                "entropy_coef",
                self.entropy_coef >= 0.0,
                "must be non-negative",
            ),
            (
                "gamma",
                (0.0..=1.0).contains(&self.gamma),
                "must be in [0, 1]",
            ),
            (
                "lambda",
                (0.0..=1.0).contains(&self.lambda),
                "must be in [0, 1]",
            ),
            ("epochs", self.epochs > 0, "must be positive"),
            (
                "minibatch_size",
                self.minibatch_size > 0,
                "must be positive",
            ),
            (
                "max_grad_norm",
                self.max_grad_norm > 0.0,
                "must be positive",
            ),
        ];
        for (name, ok, reason) in checks {
            if !ok {
                return Err(ConfigError::InvalidHyperparameter {
                    name,
                    reason: reason.to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// One sampled decision.
#[derive(Debug, Clone, Copy)]
pub struct ActionSample {
    pub action: usize,
    pub log_prob: f32,
    pub value: f32,
    pub entropy: f32,
}

/// Aggregated diagnostics of one [`PpoAgent::update`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateStats {
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub approx_kl: f32,
    pub clip_fraction: f32,
    pub learning_rate: f32,
    /// Optimizer steps taken by this call.
    pub optimizer_steps: u64,
}

/// The policy-update engine: owns the trainable network, its optimizer, and
/// the learning-rate schedule.
pub struct PpoAgent {
    net: MlpNet,
    optimizer: Adam,
    schedule: Box<dyn Schedule>,
    config: PpoConfig,
    updates: u64,
}

impl std::fmt::Debug for PpoAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PpoAgent")
            .field("updates", &self.updates)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PpoAgent {
    /// Validates the configuration (schedule kind and parameters together)
    /// before anything is constructed.
    pub fn new(
        net: MlpNet,
        config: PpoConfig,
        registry: &ScheduleRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let schedule = registry.build(&config.schedule)?;
        let optimizer = Adam::new(net.config(), config.max_grad_norm);
        Ok(Self {
            net,
            optimizer,
            schedule,
            config,
            updates: 0,
        })
    }

    #[must_use]
    pub fn net(&self) -> &MlpNet {
        &self.net
    }

    #[must_use]
    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    /// Optimizer updates applied so far (the schedule's clock).
    #[must_use]
    pub fn updates(&self) -> u64 {
        self.updates
    }

    #[must_use]
    pub fn current_lr(&self) -> f32 {
        self.schedule.lr(self.updates)
    }

    pub(crate) fn net_mut(&mut self) -> &mut MlpNet {
        &mut self.net
    }

    pub(crate) fn optimizer(&self) -> &Adam {
        &self.optimizer
    }

    pub(crate) fn optimizer_mut(&mut self) -> &mut Adam {
        &mut self.optimizer
    }

    pub(crate) fn set_updates(&mut self, updates: u64) {
        self.updates = updates;
    }

    /// Samples an action for one observation under the legality mask.
    ///
    /// Illegal logits are masked to `-inf` before the log-softmax. If the
    /// mask has no legal action the sample falls back to a uniform
    /// distribution — a per-sample decision that cannot disturb any other
    /// observation.
    pub fn act<R>(&self, observation: &Array1<f32>, mask: &[bool], rng: &mut R) -> ActionSample
    where
        R: Rng + ?Sized,
    {
        assert_eq!(observation.len(), self.net.input_dim());
        assert_eq!(mask.len(), self.net.action_dim());
        let obs = observation
            .clone()
            .into_shape_with_order((1, self.net.input_dim()))
            .expect("row reshape");
        let (logits, values) = self.net.forward(&obs);
        let (log_probs, fallback) = masked_log_probs(logits.row(0), mask);
        let entropy = entropy_of(&log_probs, mask, fallback);

        let action = if fallback {
            rng.random_range(0..self.net.action_dim())
        } else {
            sample_from_log_probs(&log_probs, mask, rng)
        };
        ActionSample {
            action,
            log_prob: log_probs[action],
            value: values[0],
            entropy,
        }
    }

    /// Recomputes log-probabilities, values, and entropies for previously
    /// taken actions under the current parameters.
    ///
    /// The return order is fixed as `(log_probs, values, entropy)`
    /// everywhere in this system.
    #[must_use]
    pub fn evaluate_actions(
        &self,
        observations: &Array2<f32>,
        actions: &[usize],
        masks: &Array2<bool>,
    ) -> (Array1<f32>, Array1<f32>, Array1<f32>) {
        let n = actions.len();
        assert_eq!(observations.nrows(), n);
        assert_eq!(masks.nrows(), n);
        let (logits, values) = self.net.forward(observations);
        let mut log_probs = Array1::zeros(n);
        let mut entropies = Array1::zeros(n);
        for i in 0..n {
            let mask_row: Vec<bool> = masks.row(i).to_vec();
            let (row_log_probs, fallback) = masked_log_probs(logits.row(i), &mask_row);
            log_probs[i] = row_log_probs[actions[i]];
            entropies[i] = entropy_of(&row_log_probs, &mask_row, fallback);
        }
        (log_probs, values, entropies)
    }

    /// K epochs of shuffled-minibatch clipped-surrogate updates over one
    /// rollout batch. The learning-rate schedule advances once per
    /// optimizer step.
    pub fn update(&mut self, batch: &RolloutBatch) -> UpdateStats {
        let n = batch.len();
        assert!(n > 0, "rollout batch is never empty by construction");
        let mut rng = rand::rng();
        let mut indices: Vec<usize> = (0..n).collect();

        let mut stats = UpdateStats::default();
        let mut minibatches = 0_u64;

        for _ in 0..self.config.epochs {
            indices.shuffle(&mut rng);
            for chunk in indices.chunks(self.config.minibatch_size) {
                let mb = self.update_minibatch(batch, chunk);
                stats.policy_loss += mb.policy_loss;
                stats.value_loss += mb.value_loss;
                stats.entropy += mb.entropy;
                stats.approx_kl += mb.approx_kl;
                stats.clip_fraction += mb.clip_fraction;
                stats.learning_rate = mb.learning_rate;
                minibatches += 1;
            }
        }

        #[expect(clippy::cast_precision_loss)]
        let scale = 1.0 / minibatches as f32;
        stats.policy_loss *= scale;
        stats.value_loss *= scale;
        stats.entropy *= scale;
        stats.approx_kl *= scale;
        stats.clip_fraction *= scale;
        stats.optimizer_steps = minibatches;
        stats
    }

    #[expect(clippy::cast_precision_loss)]
    fn update_minibatch(&mut self, batch: &RolloutBatch, chunk: &[usize]) -> UpdateStats {
        let b = chunk.len();
        let b_f = b as f32;
        let input_dim = self.net.input_dim();
        let action_dim = self.net.action_dim();
        let eps = self.config.clip_epsilon;

        let mut observations = Array2::zeros((b, input_dim));
        for (row, &i) in chunk.iter().enumerate() {
            observations
                .row_mut(row)
                .assign(&batch.observations.row(i));
        }

        let mut advantages: Vec<f32> = chunk.iter().map(|&i| batch.advantages[i]).collect();
        if self.config.normalize_advantage && b > 1 {
            let mean = advantages.iter().sum::<f32>() / b_f;
            let var = advantages.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / b_f;
            let std = var.sqrt().max(1e-8);
            for a in &mut advantages {
                *a = (*a - mean) / std;
            }
        }

        let (logits, values, cache) = self.net.forward_cached(&observations);
        let mut d_logits = Array2::zeros((b, action_dim));
        let mut d_values = Array1::zeros(b);

        let mut policy_loss = 0.0;
        let mut value_loss = 0.0;
        let mut entropy_sum = 0.0;
        let mut kl_sum = 0.0;
        let mut clipped_count = 0_u32;

        for (row, &i) in chunk.iter().enumerate() {
            let mask_row: Vec<bool> = batch.legal_masks.row(i).to_vec();
            let (log_probs, fallback) = masked_log_probs(logits.row(row), &mask_row);
            let entropy = entropy_of(&log_probs, &mask_row, fallback);
            entropy_sum += entropy;

            let action = batch.actions[i];
            let old_log_prob = batch.old_log_probs[i];
            let new_log_prob = log_probs[action];
            kl_sum += old_log_prob - new_log_prob;

            // Value loss (optionally clipped around the old estimate).
            let value = values[row];
            let ret = batch.returns[i];
            let old_value = batch.old_values[i];
            let (sample_value_loss, d_value) = if self.config.clip_value_loss {
                let clipped = old_value + (value - old_value).clamp(-eps, eps);
                let unclipped_sq = (value - ret).powi(2);
                let clipped_sq = (clipped - ret).powi(2);
                if unclipped_sq >= clipped_sq {
                    (unclipped_sq, 2.0 * (value - ret))
                } else {
                    let pass_through = ((value - old_value).abs() < eps) as u8;
                    (clipped_sq, 2.0 * (clipped - ret) * f32::from(pass_through))
                }
            } else {
                ((value - ret).powi(2), 2.0 * (value - ret))
            };
            value_loss += sample_value_loss;
            d_values[row] = self.config.value_coef * d_value / b_f;

            if fallback {
                // No legal action: the policy terms for this sample are
                // undefined; it contributes value loss only.
                continue;
            }

            // Clipped surrogate.
            let advantage = advantages[row];
            let ratio = (new_log_prob - old_log_prob).exp();
            let unclipped = ratio * advantage;
            let clipped = ratio.clamp(1.0 - eps, 1.0 + eps) * advantage;
            policy_loss += -unclipped.min(clipped);
            if (ratio - 1.0).abs() > eps {
                clipped_count += 1;
            }
            // Gradient flows only through the unclipped branch of the min.
            let policy_coef = if unclipped <= clipped {
                -advantage * ratio / b_f
            } else {
                0.0
            };

            let ent_coef = self.config.entropy_coef / b_f;
            for (j, &legal) in mask_row.iter().enumerate() {
                if !legal {
                    continue;
                }
                let log_p = log_probs[j];
                let p = log_p.exp();
                let one_hot = f32::from(j == action);
                // d(policy_loss)/dz + d(-entropy_coef * H)/dz.
                d_logits[[row, j]] =
                    policy_coef * (one_hot - p) + ent_coef * p * (log_p + entropy);
            }
        }

        let grads = self.net.backward(&cache, &d_logits, &d_values);
        let lr = self.schedule.lr(self.updates);
        self.optimizer
            .step(self.net.params_mut(), grads, lr);
        self.updates += 1;

        UpdateStats {
            policy_loss: policy_loss / b_f,
            value_loss: value_loss / b_f,
            entropy: entropy_sum / b_f,
            approx_kl: kl_sum / b_f,
            clip_fraction: clipped_count as f32 / b_f,
            learning_rate: lr,
            optimizer_steps: 1,
        }
    }
}

/// Masked log-softmax straight from logits via log-sum-exp.
///
/// Returns the per-action log-probabilities (`-inf` on masked-out slots)
/// and whether the uniform per-sample fallback was taken because the mask
/// had no legal action.
fn masked_log_probs(logits: ArrayView1<'_, f32>, mask: &[bool]) -> (Array1<f32>, bool) {
    debug_assert_eq!(logits.len(), mask.len());
    let mut max = f32::NEG_INFINITY;
    for (l, &m) in logits.iter().zip(mask) {
        if m && *l > max {
            max = *l;
        }
    }
    if max == f32::NEG_INFINITY {
        // All actions masked out: uniform over the whole space.
        #[expect(clippy::cast_precision_loss)]
        let uniform = -(mask.len() as f32).ln();
        return (Array1::from_elem(mask.len(), uniform), true);
    }
    let sum_exp: f32 = logits
        .iter()
        .zip(mask)
        .filter(|(_, m)| **m)
        .map(|(l, _)| (l - max).exp())
        .sum();
    let lse = max + sum_exp.ln();
    let log_probs = Array1::from_iter(
        logits
            .iter()
            .zip(mask)
            .map(|(l, &m)| if m { l - lse } else { f32::NEG_INFINITY }),
    );
    (log_probs, false)
}

/// Entropy of a masked distribution from its log-probabilities.
fn entropy_of(log_probs: &Array1<f32>, mask: &[bool], fallback: bool) -> f32 {
    if fallback {
        #[expect(clippy::cast_precision_loss)]
        return (mask.len() as f32).ln();
    }
    -log_probs
        .iter()
        .zip(mask)
        .filter(|(_, m)| **m)
        .map(|(lp, _)| lp.exp() * lp)
        .sum::<f32>()
}

/// Inverse-CDF sampling over the legal actions.
fn sample_from_log_probs<R>(log_probs: &Array1<f32>, mask: &[bool], rng: &mut R) -> usize
where
    R: Rng + ?Sized,
{
    let target: f32 = rng.random();
    let mut cumulative = 0.0;
    let mut last_legal = 0;
    for (i, (lp, &m)) in log_probs.iter().zip(mask).enumerate() {
        if !m {
            continue;
        }
        last_legal = i;
        cumulative += lp.exp();
        if target < cumulative {
            return i;
        }
    }
    // Rounding left a sliver of probability mass; take the last legal slot.
    last_legal
}
