//! Policy/value network and optimizer.
//!
//! The update engine only needs a function from observations to policy
//! logits and a per-sample scalar value; [`PolicyValueNet`] is that
//! contract, and any architecture satisfying it can drive inference.
//! [`MlpNet`] is the concrete trainable implementation: a single-hidden-layer
//! ReLU network with explicit forward and backward passes, so the PPO update
//! needs no autograd framework.

use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{CheckpointError, ConfigError};

/// Inference contract at the network-adapter boundary.
///
/// `forward` takes a batch of flattened observations `(batch, input_dim)`
/// and returns policy logits `(batch, action_dim)` plus values already
/// squeezed to one scalar per sample — consumers never see a trailing unit
/// dimension, whatever the architecture produced internally.
pub trait PolicyValueNet {
    fn input_dim(&self) -> usize;
    fn action_dim(&self) -> usize;
    fn forward(&self, observations: &Array2<f32>) -> (Array2<f32>, Array1<f32>);
}

/// Network dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MlpConfig {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub action_dim: usize,
}

impl MlpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("input_dim", self.input_dim),
            ("hidden_dim", self.hidden_dim),
            ("action_dim", self.action_dim),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidHyperparameter {
                    name,
                    reason: "must be positive".to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// One tensor per trainable parameter. Shared between the network itself,
/// gradients, and the optimizer's moment estimates so they always agree on
/// shape. `b_value` is a length-1 array to keep the field set uniform.
#[derive(Debug, Clone, PartialEq)]
pub struct NetParams {
    pub w1: Array2<f32>,
    pub b1: Array1<f32>,
    pub w_policy: Array2<f32>,
    pub b_policy: Array1<f32>,
    pub w_value: Array1<f32>,
    pub b_value: Array1<f32>,
}

impl NetParams {
    fn zeros(config: MlpConfig) -> Self {
        Self {
            w1: Array2::zeros((config.hidden_dim, config.input_dim)),
            b1: Array1::zeros(config.hidden_dim),
            w_policy: Array2::zeros((config.action_dim, config.hidden_dim)),
            b_policy: Array1::zeros(config.action_dim),
            w_value: Array1::zeros(config.hidden_dim),
            b_value: Array1::zeros(1),
        }
    }

    /// Field-order-stable views over every parameter tensor.
    pub(crate) fn slices(&self) -> [(&'static str, &[f32]); 6] {
        [
            ("w1", self.w1.as_slice().expect("contiguous")),
            ("b1", self.b1.as_slice().expect("contiguous")),
            ("w_policy", self.w_policy.as_slice().expect("contiguous")),
            ("b_policy", self.b_policy.as_slice().expect("contiguous")),
            ("w_value", self.w_value.as_slice().expect("contiguous")),
            ("b_value", self.b_value.as_slice().expect("contiguous")),
        ]
    }

    pub(crate) fn slices_mut(&mut self) -> [(&'static str, &mut [f32]); 6] {
        [
            ("w1", self.w1.as_slice_mut().expect("contiguous")),
            ("b1", self.b1.as_slice_mut().expect("contiguous")),
            ("w_policy", self.w_policy.as_slice_mut().expect("contiguous")),
            ("b_policy", self.b_policy.as_slice_mut().expect("contiguous")),
            ("w_value", self.w_value.as_slice_mut().expect("contiguous")),
            ("b_value", self.b_value.as_slice_mut().expect("contiguous")),
        ]
    }

    pub(crate) fn shapes(&self) -> [(&'static str, Vec<usize>); 6] {
        [
            ("w1", self.w1.shape().to_vec()),
            ("b1", self.b1.shape().to_vec()),
            ("w_policy", self.w_policy.shape().to_vec()),
            ("b_policy", self.b_policy.shape().to_vec()),
            ("w_value", self.w_value.shape().to_vec()),
            ("b_value", self.b_value.shape().to_vec()),
        ]
    }

    /// Copies `other` into `self`, verifying shapes field by field.
    pub(crate) fn assign_checked(&mut self, other: &NetParams) -> Result<(), CheckpointError> {
        for ((field, expected), (_, found)) in self.shapes().iter().zip(other.shapes()) {
            if *expected != found {
                return Err(CheckpointError::Mismatch {
                    field,
                    expected: expected.clone(),
                    found,
                });
            }
        }
        self.w1.assign(&other.w1);
        self.b1.assign(&other.b1);
        self.w_policy.assign(&other.w_policy);
        self.b_policy.assign(&other.b_policy);
        self.w_value.assign(&other.w_value);
        self.b_value.assign(&other.b_value);
        Ok(())
    }

    fn global_norm(&self) -> f32 {
        self.slices()
            .iter()
            .flat_map(|(_, s)| s.iter())
            .map(|v| v * v)
            .sum::<f32>()
            .sqrt()
    }

    fn scale(&mut self, factor: f32) {
        for (_, slice) in &mut self.slices_mut() {
            for v in slice.iter_mut() {
                *v *= factor;
            }
        }
    }
}

/// Activations cached by [`MlpNet::forward_cached`] for the backward pass.
#[derive(Debug)]
pub struct ForwardCache {
    observations: Array2<f32>,
    hidden: Array2<f32>,
}

/// Flatten → ReLU hidden layer → linear policy and value heads.
#[derive(Debug, Clone)]
pub struct MlpNet {
    config: MlpConfig,
    params: NetParams,
}

impl MlpNet {
    /// Gaussian initialization: He-scaled for the hidden layer, small
    /// near-zero heads so the initial policy is close to uniform over the
    /// mask.
    pub fn new<R>(config: MlpConfig, rng: &mut R) -> Result<Self, ConfigError>
    where
        R: Rng + ?Sized,
    {
        config.validate()?;
        let mut params = NetParams::zeros(config);
        #[expect(clippy::cast_precision_loss)]
        let hidden_std = (2.0 / config.input_dim as f32).sqrt();
        let hidden_init = Normal::new(0.0, hidden_std).expect("finite std");
        let head_init = Normal::new(0.0, 0.01).expect("finite std");
        for v in &mut params.w1 {
            *v = hidden_init.sample(rng);
        }
        for v in &mut params.w_policy {
            *v = head_init.sample(rng);
        }
        for v in &mut params.w_value {
            *v = head_init.sample(rng);
        }
        Ok(Self { config, params })
    }

    #[must_use]
    pub fn config(&self) -> MlpConfig {
        self.config
    }

    #[must_use]
    pub fn params(&self) -> &NetParams {
        &self.params
    }

    pub(crate) fn params_mut(&mut self) -> &mut NetParams {
        &mut self.params
    }

    /// Forward pass that also returns the activation cache needed by
    /// [`backward`](Self::backward).
    #[must_use]
    pub fn forward_cached(&self, observations: &Array2<f32>) -> (Array2<f32>, Array1<f32>, ForwardCache) {
        let pre = observations.dot(&self.params.w1.t()) + &self.params.b1;
        let hidden = pre.mapv(|v| v.max(0.0));
        let logits = hidden.dot(&self.params.w_policy.t()) + &self.params.b_policy;
        let values = hidden.dot(&self.params.w_value) + self.params.b_value[0];
        let cache = ForwardCache {
            observations: observations.clone(),
            hidden,
        };
        (logits, values, cache)
    }

    /// Backpropagates loss gradients w.r.t. logits and values into
    /// parameter gradients.
    #[must_use]
    pub fn backward(
        &self,
        cache: &ForwardCache,
        d_logits: &Array2<f32>,
        d_values: &Array1<f32>,
    ) -> NetParams {
        let mut grads = NetParams::zeros(self.config);

        grads.w_policy = d_logits.t().dot(&cache.hidden);
        grads.b_policy = d_logits.sum_axis(Axis(0));
        grads.w_value = cache.hidden.t().dot(d_values);
        grads.b_value[0] = d_values.sum();

        // d hidden = policy-head term + value-head term.
        let mut d_hidden = d_logits.dot(&self.params.w_policy);
        for (mut row, &dv) in d_hidden.rows_mut().into_iter().zip(d_values.iter()) {
            row.scaled_add(dv, &self.params.w_value);
        }
        // ReLU gate.
        let d_pre = &d_hidden * &cache.hidden.mapv(|h| if h > 0.0 { 1.0 } else { 0.0 });

        grads.w1 = d_pre.t().dot(&cache.observations);
        grads.b1 = d_pre.sum_axis(Axis(0));
        grads
    }
}

impl PolicyValueNet for MlpNet {
    fn input_dim(&self) -> usize {
        self.config.input_dim
    }

    fn action_dim(&self) -> usize {
        self.config.action_dim
    }

    fn forward(&self, observations: &Array2<f32>) -> (Array2<f32>, Array1<f32>) {
        let (logits, values, _) = self.forward_cached(observations);
        (logits, values)
    }
}

/// Adam with global-norm gradient clipping applied before each step.
#[derive(Debug, Clone)]
pub struct Adam {
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    max_grad_norm: f32,
    m: NetParams,
    v: NetParams,
    t: u64,
}

impl Adam {
    #[must_use]
    pub fn new(config: MlpConfig, max_grad_norm: f32) -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            max_grad_norm,
            m: NetParams::zeros(config),
            v: NetParams::zeros(config),
            t: 0,
        }
    }

    /// Steps taken so far.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.t
    }

    pub(crate) fn state(&self) -> (&NetParams, &NetParams, u64) {
        (&self.m, &self.v, self.t)
    }

    pub(crate) fn restore_state(
        &mut self,
        m: &NetParams,
        v: &NetParams,
        t: u64,
    ) -> Result<(), CheckpointError> {
        self.m.assign_checked(m)?;
        self.v.assign_checked(v)?;
        self.t = t;
        Ok(())
    }

    /// Clips `grads` by global norm, then applies one Adam update with the
    /// given learning rate.
    pub fn step(&mut self, params: &mut NetParams, mut grads: NetParams, lr: f32) {
        let norm = grads.global_norm();
        if norm > self.max_grad_norm && norm > 0.0 {
            grads.scale(self.max_grad_norm / norm);
        }

        self.t += 1;
        #[expect(clippy::cast_possible_truncation)]
        let t = self.t.min(i32::MAX as u64) as i32;
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);

        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        for (((_, p), (_, g)), ((_, m), (_, v))) in params
            .slices_mut()
            .into_iter()
            .zip(grads.slices())
            .zip(self.m.slices_mut().into_iter().zip(self.v.slices_mut()))
        {
            for i in 0..p.len() {
                m[i] = beta1 * m[i] + (1.0 - beta1) * g[i];
                v[i] = beta2 * v[i] + (1.0 - beta2) * g[i] * g[i];
                let m_hat = m[i] / bias1;
                let v_hat = v[i] / bias2;
                p[i] -= lr * m_hat / (v_hat.sqrt() + epsilon);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    fn small_net() -> MlpNet {
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        MlpNet::new(
            MlpConfig {
                input_dim: 4,
                hidden_dim: 8,
                action_dim: 3,
            },
            &mut rng,
        )
        .unwrap()
    }

    #[test]
    fn forward_shapes_and_squeezed_values() {
        let net = small_net();
        let obs = Array2::zeros((5, 4));
        let (logits, values) = net.forward(&obs);
        assert_eq!(logits.shape(), &[5, 3]);
        assert_eq!(values.shape(), &[5]);
    }

    #[test]
    fn zero_dimension_rejected_at_construction() {
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        let err = MlpNet::new(
            MlpConfig {
                input_dim: 0,
                hidden_dim: 8,
                action_dim: 3,
            },
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHyperparameter { .. }));
    }

    #[test]
    fn backward_matches_finite_differences() {
        let net = small_net();
        let mut rng = Pcg64Mcg::seed_from_u64(2);
        let obs = Array2::from_shape_fn((3, 4), |_| rng.random_range(-1.0..1.0_f32));

        // Scalar loss: sum of logits row 0 weights + squared values.
        let loss_of = |net: &MlpNet| {
            let (logits, values) = net.forward(&obs);
            logits.sum() + values.mapv(|v| v * v).sum()
        };

        let (_, values, cache) = net.forward_cached(&obs);
        let d_logits = Array2::ones((3, 3));
        let d_values = values.mapv(|v| 2.0 * v);
        let grads = net.backward(&cache, &d_logits, &d_values);

        // Probe a handful of w1 entries against central differences.
        let eps = 1e-3;
        for &(i, j) in &[(0, 0), (3, 2), (7, 3)] {
            let mut plus = net.clone();
            plus.params_mut().w1[[i, j]] += eps;
            let mut minus = net.clone();
            minus.params_mut().w1[[i, j]] -= eps;
            let numeric = (loss_of(&plus) - loss_of(&minus)) / (2.0 * eps);
            let analytic = grads.w1[[i, j]];
            assert!(
                (numeric - analytic).abs() < 1e-2,
                "w1[{i},{j}]: numeric {numeric}, analytic {analytic}"
            );
        }
    }

    #[test]
    fn adam_descends_a_quadratic() {
        // Minimize ||params||² on the value head; gradient = 2 * w.
        let mut net = small_net();
        let mut adam = Adam::new(net.config(), 10.0);
        let initial: f32 = net.params().w_value.mapv(|v| v * v).sum();
        for _ in 0..200 {
            let mut grads = NetParams::zeros(net.config());
            grads.w_value = net.params().w_value.mapv(|v| 2.0 * v);
            let params = net.params_mut();
            adam.step(params, grads, 1e-2);
        }
        let after: f32 = net.params().w_value.mapv(|v| v * v).sum();
        assert!(after < initial);
        assert_eq!(adam.steps(), 200);
    }

    #[test]
    fn gradient_clipping_bounds_global_norm() {
        let mut net = small_net();
        let mut adam = Adam::new(net.config(), 1.0);
        let before = net.params().clone();
        let mut grads = NetParams::zeros(net.config());
        grads.w1.fill(1000.0);
        adam.step(net.params_mut(), grads, 1e-3);
        // A clipped step with lr 1e-3 cannot move any single weight far.
        let moved: f32 = (&net.params().w1 - &before.w1)
            .mapv(f32::abs)
            .into_iter()
            .fold(0.0, f32::max);
        assert!(moved < 0.1);
    }
}
