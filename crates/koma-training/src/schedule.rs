//! Learning-rate schedules behind an explicit registry.
//!
//! Schedule selection and schedule-specific parameters are validated
//! together when the agent is constructed, so a bad combination surfaces as
//! a [`ConfigError`] up front instead of a runtime failure deep inside an
//! update. The registry is a plain value passed by reference — no hidden
//! module-global state — which keeps initialization order deterministic and
//! lets tests register their own schedules.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// A learning-rate schedule, queried once per optimizer update.
pub trait Schedule: fmt::Debug + Send + Sync {
    fn lr(&self, update: u64) -> f32;
}

/// Declarative schedule selection, serializable into configs and
/// checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub enum ScheduleSpec {
    Constant {
        lr: f32,
    },
    /// Linear decay from `initial` to `final_lr` over `total_updates`, flat
    /// afterwards.
    Linear {
        initial: f32,
        final_lr: f32,
        total_updates: u64,
    },
    /// Cosine decay from `initial` to `min_lr` over `period`, flat at
    /// `min_lr` afterwards.
    Cosine {
        initial: f32,
        min_lr: f32,
        period: u64,
    },
}

fn require(condition: bool, name: &'static str, reason: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::InvalidHyperparameter {
            name,
            reason: reason.to_owned(),
        })
    }
}

#[derive(Debug)]
struct Constant {
    lr: f32,
}

impl Schedule for Constant {
    fn lr(&self, _update: u64) -> f32 {
        self.lr
    }
}

#[derive(Debug)]
struct Linear {
    initial: f32,
    final_lr: f32,
    total_updates: u64,
}

impl Schedule for Linear {
    #[expect(clippy::cast_precision_loss)]
    fn lr(&self, update: u64) -> f32 {
        let progress = (update.min(self.total_updates) as f32) / (self.total_updates as f32);
        self.initial + (self.final_lr - self.initial) * progress
    }
}

#[derive(Debug)]
struct Cosine {
    initial: f32,
    min_lr: f32,
    period: u64,
}

impl Schedule for Cosine {
    #[expect(clippy::cast_precision_loss)]
    fn lr(&self, update: u64) -> f32 {
        let progress = (update.min(self.period) as f32) / (self.period as f32);
        let cosine = 0.5 * (1.0 + (std::f32::consts::PI * progress).cos());
        self.min_lr + (self.initial - self.min_lr) * cosine
    }
}

/// A builder inspects a spec and either claims it (returning a validated
/// schedule or a configuration error) or declines with `None`.
pub type ScheduleBuilder = fn(&ScheduleSpec) -> Option<Result<Box<dyn Schedule>, ConfigError>>;

/// Explicit schedule factory.
pub struct ScheduleRegistry {
    builders: Vec<ScheduleBuilder>,
}

impl fmt::Debug for ScheduleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleRegistry")
            .field("builders", &self.builders.len())
            .finish()
    }
}

impl ScheduleRegistry {
    /// Registry with the constant, linear, and cosine schedules installed.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            builders: Vec::new(),
        };
        registry.register(build_constant);
        registry.register(build_linear);
        registry.register(build_cosine);
        registry
    }

    pub fn register(&mut self, builder: ScheduleBuilder) {
        self.builders.push(builder);
    }

    /// Builds and validates the schedule for `spec`.
    pub fn build(&self, spec: &ScheduleSpec) -> Result<Box<dyn Schedule>, ConfigError> {
        for builder in &self.builders {
            if let Some(result) = builder(spec) {
                return result;
            }
        }
        Err(ConfigError::UnknownSchedule)
    }
}

fn build_constant(spec: &ScheduleSpec) -> Option<Result<Box<dyn Schedule>, ConfigError>> {
    let ScheduleSpec::Constant { lr } = *spec else {
        return None;
    };
    Some(
        require(lr.is_finite() && lr > 0.0, "lr", "must be positive and finite")
            .map(|()| Box::new(Constant { lr }) as Box<dyn Schedule>),
    )
}

fn build_linear(spec: &ScheduleSpec) -> Option<Result<Box<dyn Schedule>, ConfigError>> {
    let ScheduleSpec::Linear {
        initial,
        final_lr,
        total_updates,
    } = *spec
    else {
        return None;
    };
    let validated = require(
        initial.is_finite() && initial > 0.0,
        "initial",
        "must be positive and finite",
    )
    .and_then(|()| {
        require(
            final_lr.is_finite() && final_lr >= 0.0,
            "final_lr",
            "must be non-negative and finite",
        )
    })
    .and_then(|()| require(total_updates > 0, "total_updates", "must be positive"));
    Some(validated.map(|()| {
        Box::new(Linear {
            initial,
            final_lr,
            total_updates,
        }) as Box<dyn Schedule>
    }))
}

fn build_cosine(spec: &ScheduleSpec) -> Option<Result<Box<dyn Schedule>, ConfigError>> {
    let ScheduleSpec::Cosine {
        initial,
        min_lr,
        period,
    } = *spec
    else {
        return None;
    };
    let validated = require(
        initial.is_finite() && initial > 0.0,
        "initial",
        "must be positive and finite",
    )
    .and_then(|()| {
        require(
            min_lr.is_finite() && min_lr >= 0.0 && min_lr <= initial,
            "min_lr",
            "must be in [0, initial]",
        )
    })
    .and_then(|()| require(period > 0, "period", "must be positive"));
    Some(validated.map(|()| {
        Box::new(Cosine {
            initial,
            min_lr,
            period,
        }) as Box<dyn Schedule>
    }))
}
