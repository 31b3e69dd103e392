//! Single-threaded epoch driver.
//!
//! Ties the collection and update phases together for one buffer: play
//! episodes until the buffer cannot admit another whole one, run GAE,
//! update the policy, clear, repeat. Parallel collection replaces the play
//! loop here with worker ingestion, but the phase discipline — collect,
//! seal, read, clear, in that order, never interleaved — is the same and
//! is enforced by the buffer itself.

use rand::Rng;

use crate::{
    BufferError, SelfPlayError,
    buffer::RolloutBuffer,
    metrics::CollectionLog,
    ppo::{PpoAgent, UpdateStats},
    selfplay::{SelfPlayConfig, ingest_episode, play_episode},
};

/// Epoch-level failures: either the collection side or the buffer refused
/// to make progress.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum TrainError {
    #[display("self-play failed: {_0}")]
    SelfPlay(SelfPlayError),
    #[display("buffer cannot make progress: {_0}")]
    Buffer(BufferError),
}

impl From<SelfPlayError> for TrainError {
    fn from(err: SelfPlayError) -> Self {
        TrainError::SelfPlay(err)
    }
}

/// Result of one collect-and-update epoch.
#[derive(Debug, Clone)]
pub struct EpochReport {
    pub collection: CollectionLog,
    pub update: UpdateStats,
    /// Transitions consumed by the update.
    pub transitions: usize,
}

/// Owns the buffer and drives full epochs against an agent.
#[derive(Debug)]
pub struct Trainer {
    buffer: RolloutBuffer,
    selfplay: SelfPlayConfig,
}

impl Trainer {
    #[must_use]
    pub fn new(buffer_capacity: usize, selfplay: SelfPlayConfig) -> Self {
        Self {
            buffer: RolloutBuffer::new(buffer_capacity),
            selfplay,
        }
    }

    /// Runs one epoch: collect whole episodes until one no longer fits,
    /// compute advantages, update, clear.
    ///
    /// An episode the buffer cannot admit is finished anyway (its metadata
    /// is recorded as rejected, so the loss is observable) and collection
    /// stops — the explicit drop-with-metric backpressure choice. The final
    /// buffered transition always carries `done`, so `next_value` for the
    /// GAE pass is zero.
    pub fn run_epoch<R>(
        &mut self,
        agent: &mut PpoAgent,
        rng: &mut R,
    ) -> Result<EpochReport, TrainError>
    where
        R: Rng + ?Sized,
    {
        let mut collection = CollectionLog::new();

        loop {
            let episode = play_episode(agent, &self.selfplay, rng)?;
            match ingest_episode(&mut self.buffer, &episode) {
                Ok(()) => collection.record(&episode.meta),
                Err(err @ BufferError::Full { .. }) => {
                    collection.record_rejected();
                    if self.buffer.is_empty() {
                        // Not even one episode fits: collection can never
                        // progress with this capacity.
                        return Err(TrainError::Buffer(err));
                    }
                    break;
                }
                Err(other) => return Err(TrainError::Buffer(other)),
            }
            if self.buffer.remaining() == 0 {
                break;
            }
        }

        let config = agent.config();
        let (gamma, lambda) = (config.gamma, config.lambda);
        self.buffer
            .compute_advantages(0.0, gamma, lambda)
            .map_err(TrainError::Buffer)?;
        let batch = self.buffer.batch().map_err(TrainError::Buffer)?;
        let update = agent.update(&batch);
        let transitions = batch.len();
        self.buffer.clear();

        Ok(EpochReport {
            collection,
            update,
            transitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        network::{MlpConfig, MlpNet},
        ppo::PpoConfig,
        schedule::ScheduleRegistry,
        selfplay::OBSERVATION_LEN,
    };
    use koma_encoder::ACTION_SPACE;
    use koma_engine::PositionConfig;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    #[test]
    fn epoch_collects_updates_and_clears() {
        let mut rng = Pcg64Mcg::seed_from_u64(31);
        let net = MlpNet::new(
            MlpConfig {
                input_dim: OBSERVATION_LEN,
                hidden_dim: 8,
                action_dim: ACTION_SPACE,
            },
            &mut rng,
        )
        .unwrap();
        let config = PpoConfig {
            epochs: 1,
            minibatch_size: 16,
            ..PpoConfig::default()
        };
        let mut agent =
            PpoAgent::new(net, config, &ScheduleRegistry::with_builtins()).unwrap();

        let selfplay = SelfPlayConfig {
            position: PositionConfig::new(12),
            draw_reward: 0.0,
        };
        let mut trainer = Trainer::new(48, selfplay);
        let report = trainer.run_epoch(&mut agent, &mut rng).unwrap();

        assert!(report.collection.episodes() >= 1);
        assert!(report.transitions >= 12);
        assert!(report.update.optimizer_steps > 0);
        assert!(agent.updates() > 0);

        // The buffer is back in its collection phase for the next epoch.
        let second = trainer.run_epoch(&mut agent, &mut rng).unwrap();
        assert!(second.transitions >= 12);
    }
}
