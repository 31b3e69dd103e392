//! Lightweight training observability.
//!
//! Backpressure and collection decisions (§ buffer full, dropped episodes)
//! must be observable somewhere; this module is that somewhere for the
//! core. It aggregates per-episode facts into summary statistics without
//! pulling in a display layer.

use koma_engine::GameStatus;

use crate::selfplay::EpisodeMeta;

/// Five-number summary over a set of `f32` samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryStats {
    pub count: usize,
    pub mean: f32,
    pub std_dev: f32,
    pub min: f32,
    pub max: f32,
}

impl SummaryStats {
    /// `None` for an empty sample set.
    #[expect(clippy::cast_precision_loss)]
    #[must_use]
    pub fn new<I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = f32>,
    {
        let values: Vec<f32> = values.into_iter().collect();
        if values.is_empty() {
            return None;
        }
        let count = values.len();
        let n = count as f32;
        let mean = values.iter().sum::<f32>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        Some(Self {
            count,
            mean,
            std_dev: variance.sqrt(),
            min,
            max,
        })
    }
}

/// Running log of collection outcomes for one epoch.
#[derive(Debug, Clone, Default)]
pub struct CollectionLog {
    lengths: Vec<f32>,
    checkmates: usize,
    stalemates: usize,
    draws: usize,
    /// Episodes refused by the buffer (the explicit backpressure path).
    rejected_episodes: usize,
}

impl CollectionLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, meta: &EpisodeMeta) {
        #[expect(clippy::cast_precision_loss)]
        self.lengths.push(meta.length as f32);
        match meta.outcome {
            GameStatus::Checkmate { .. } => self.checkmates += 1,
            GameStatus::Stalemate { .. } => self.stalemates += 1,
            GameStatus::RepetitionDraw | GameStatus::MaxMovesDraw => self.draws += 1,
            GameStatus::Resignation { .. } | GameStatus::InProgress => {}
        }
    }

    /// Records an episode the buffer refused, so dropped experience is
    /// never invisible.
    pub fn record_rejected(&mut self) {
        self.rejected_episodes += 1;
    }

    #[must_use]
    pub fn episodes(&self) -> usize {
        self.lengths.len()
    }

    #[must_use]
    pub fn checkmates(&self) -> usize {
        self.checkmates
    }

    #[must_use]
    pub fn stalemates(&self) -> usize {
        self.stalemates
    }

    #[must_use]
    pub fn draws(&self) -> usize {
        self.draws
    }

    #[must_use]
    pub fn rejected_episodes(&self) -> usize {
        self.rejected_episodes
    }

    /// Episode-length distribution, if any episodes were recorded.
    #[must_use]
    pub fn length_stats(&self) -> Option<SummaryStats> {
        SummaryStats::new(self.lengths.iter().copied())
    }
}
