//! Checkpoint capture, persistence, and resume.
//!
//! A checkpoint is the serializable triple the external bookkeeping layer
//! needs: network parameters, optimizer state, and the update counter.
//! Persistence is JSON through `serde_json` — a data-only format, so
//! loading an untrusted file can never execute code. Every load failure is
//! typed and propagates: a requested resume that cannot be honored aborts
//! loudly instead of silently training a fresh model.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{CheckpointError, network::NetParams, ppo::PpoAgent};

/// Shape-tagged tensor payload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
struct TensorData {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl TensorData {
    fn from_slice(shape: &[usize], data: &[f32]) -> Self {
        Self {
            shape: shape.to_vec(),
            data: data.to_vec(),
        }
    }
}

/// Named parameter set, field order fixed by [`NetParams`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
struct ParamSet {
    tensors: Vec<TensorData>,
}

impl ParamSet {
    fn capture(params: &NetParams) -> Self {
        let shapes = params.shapes();
        let tensors = params
            .slices()
            .iter()
            .zip(shapes.iter())
            .map(|((_, slice), (_, shape))| TensorData::from_slice(shape, slice))
            .collect();
        Self { tensors }
    }

    /// Rebuilds a [`NetParams`] image, validating tensor count and shapes
    /// against `template`.
    fn restore(&self, template: &NetParams) -> Result<NetParams, CheckpointError> {
        let shapes = template.shapes();
        if self.tensors.len() != shapes.len() {
            return Err(CheckpointError::Mismatch {
                field: "tensor count",
                expected: vec![shapes.len()],
                found: vec![self.tensors.len()],
            });
        }
        let mut out = template.clone();
        for (((field, expected), tensor), (_, slot)) in shapes
            .iter()
            .zip(&self.tensors)
            .zip(out.slices_mut())
        {
            let len: usize = expected.iter().product();
            if tensor.shape != *expected || tensor.data.len() != len {
                return Err(CheckpointError::Mismatch {
                    field,
                    expected: expected.clone(),
                    found: tensor.shape.clone(),
                });
            }
            slot.copy_from_slice(&tensor.data);
        }
        Ok(out)
    }
}

/// Serializable training snapshot: parameters, optimizer state, and the
/// schedule clock.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Checkpoint {
    format_version: u32,
    updates: u64,
    params: ParamSet,
    adam_m: ParamSet,
    adam_v: ParamSet,
    adam_steps: u64,
}

const FORMAT_VERSION: u32 = 1;

impl Checkpoint {
    /// Snapshots an agent's trainable state.
    #[must_use]
    pub fn capture(agent: &PpoAgent) -> Self {
        let (m, v, adam_steps) = agent.optimizer().state();
        Self {
            format_version: FORMAT_VERSION,
            updates: agent.updates(),
            params: ParamSet::capture(agent.net().params()),
            adam_m: ParamSet::capture(m),
            adam_v: ParamSet::capture(v),
            adam_steps,
        }
    }

    /// Update counter stored in this checkpoint.
    #[must_use]
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Restores this snapshot into `agent`, validating every tensor shape
    /// first so a partially-applied resume is impossible.
    pub fn restore(&self, agent: &mut PpoAgent) -> Result<(), CheckpointError> {
        if self.format_version != FORMAT_VERSION {
            return Err(CheckpointError::Mismatch {
                field: "format_version",
                expected: vec![FORMAT_VERSION as usize],
                found: vec![self.format_version as usize],
            });
        }
        let params = self.params.restore(agent.net().params())?;
        let (m_template, v_template, _) = agent.optimizer().state();
        let m = self.adam_m.restore(m_template)?;
        let v = self.adam_v.restore(v_template)?;

        agent.net_mut().params_mut().assign_checked(&params)?;
        agent.optimizer_mut().restore_state(&m, &v, self.adam_steps)?;
        agent.set_updates(self.updates);
        Ok(())
    }

    /// Writes the checkpoint as JSON.
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let json = serde_json::to_string(self).map_err(CheckpointError::Corrupt)?;
        fs::write(path, json).map_err(CheckpointError::Io)
    }

    /// Reads a checkpoint, distinguishing a missing file from a corrupt
    /// one.
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let json = fs::read_to_string(path).map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                CheckpointError::Missing {
                    path: path.display().to_string(),
                }
            } else {
                CheckpointError::Io(err)
            }
        })?;
        serde_json::from_str(&json).map_err(CheckpointError::Corrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        network::{MlpConfig, MlpNet},
        ppo::PpoConfig,
        schedule::ScheduleRegistry,
    };
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    fn agent_with_dims(input_dim: usize) -> PpoAgent {
        let mut rng = Pcg64Mcg::seed_from_u64(5);
        let net = MlpNet::new(
            MlpConfig {
                input_dim,
                hidden_dim: 8,
                action_dim: 4,
            },
            &mut rng,
        )
        .unwrap();
        PpoAgent::new(net, PpoConfig::default(), &ScheduleRegistry::with_builtins()).unwrap()
    }

    #[test]
    fn capture_restore_round_trip() {
        let source = agent_with_dims(6);
        let checkpoint = Checkpoint::capture(&source);

        let mut target = agent_with_dims(6);
        assert_ne!(target.net().params(), source.net().params());
        checkpoint.restore(&mut target).unwrap();
        assert_eq!(target.net().params(), source.net().params());
        assert_eq!(target.updates(), source.updates());
    }

    #[test]
    fn json_round_trip() {
        let agent = agent_with_dims(6);
        let checkpoint = Checkpoint::capture(&agent);
        let json = serde_json::to_string(&checkpoint).unwrap();
        let reloaded: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded, checkpoint);
    }

    #[test]
    fn shape_mismatch_is_typed_and_leaves_agent_untouched() {
        let source = agent_with_dims(6);
        let checkpoint = Checkpoint::capture(&source);

        let mut target = agent_with_dims(10);
        let before = target.net().params().clone();
        let err = checkpoint.restore(&mut target).unwrap_err();
        assert!(matches!(err, CheckpointError::Mismatch { .. }));
        assert_eq!(*target.net().params(), before);
    }

    #[test]
    fn missing_file_is_distinguished_from_corrupt() {
        let missing = Checkpoint::load(Path::new("/nonexistent/koma-checkpoint.json"));
        assert!(matches!(missing, Err(CheckpointError::Missing { .. })));

        let dir = std::env::temp_dir().join("koma-checkpoint-corrupt-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let corrupt = Checkpoint::load(&path);
        assert!(matches!(corrupt, Err(CheckpointError::Corrupt(_))));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn save_load_round_trip_on_disk() {
        let agent = agent_with_dims(6);
        let checkpoint = Checkpoint::capture(&agent);
        let dir = std::env::temp_dir().join("koma-checkpoint-save-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ckpt.json");
        checkpoint.save(&path).unwrap();
        let reloaded = Checkpoint::load(&path).unwrap();
        assert_eq!(reloaded, checkpoint);
        let _ = std::fs::remove_file(&path);
    }
}
