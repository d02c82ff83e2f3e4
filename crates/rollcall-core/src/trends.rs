//! Emotion trend tallies over logged samples.

use crate::emotion::Emotion;
use serde::Serialize;
use std::collections::BTreeMap;

/// Samples at or below this confidence are not counted in a tally.
pub const DEFAULT_HISTORY_FLOOR: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Variability {
    High,
    Medium,
    Low,
}

/// Serializable snapshot of a tally.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSummary {
    pub total: u32,
    pub counts: BTreeMap<Emotion, u32>,
    pub dominant: Option<Emotion>,
    pub dominant_share: f32,
    pub mood: Mood,
    pub variability: Variability,
}

/// Running count of confident emotion observations.
#[derive(Debug, Clone)]
pub struct EmotionTally {
    counts: BTreeMap<Emotion, u32>,
    floor: f32,
}

impl Default for EmotionTally {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_FLOOR)
    }
}

impl EmotionTally {
    pub fn new(floor: f32) -> Self {
        Self {
            counts: BTreeMap::new(),
            floor,
        }
    }

    /// Count the observation if its confidence is above the floor.
    /// Returns whether it was counted.
    pub fn observe(&mut self, label: Emotion, confidence: f32) -> bool {
        if confidence > self.floor {
            *self.counts.entry(label).or_insert(0) += 1;
            true
        } else {
            false
        }
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    pub fn count(&self, label: Emotion) -> u32 {
        self.counts.get(&label).copied().unwrap_or(0)
    }

    /// Most frequent label and its share of the total. Ties go to the
    /// earlier label.
    pub fn dominant(&self) -> Option<(Emotion, f32)> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let mut best: Option<(Emotion, u32)> = None;
        for (&label, &count) in &self.counts {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((label, count));
            }
        }
        best.map(|(label, count)| (label, count as f32 / total as f32))
    }

    pub fn mood(&self) -> Mood {
        let positive = self.count(Emotion::Happy) + self.count(Emotion::Surprised);
        let negative = self.count(Emotion::Sad)
            + self.count(Emotion::Angry)
            + self.count(Emotion::Scared)
            + self.count(Emotion::Disgusted);

        match positive.cmp(&negative) {
            std::cmp::Ordering::Greater => Mood::Positive,
            std::cmp::Ordering::Less => Mood::Negative,
            std::cmp::Ordering::Equal => Mood::Neutral,
        }
    }

    pub fn variability(&self) -> Variability {
        let distinct = self.counts.values().filter(|&&c| c > 0).count();
        match distinct {
            n if n >= 5 => Variability::High,
            n if n >= 3 => Variability::Medium,
            _ => Variability::Low,
        }
    }

    pub fn summary(&self) -> TrendSummary {
        let dominant = self.dominant();
        TrendSummary {
            total: self.total(),
            counts: self.counts.clone(),
            dominant: dominant.map(|(label, _)| label),
            dominant_share: dominant.map_or(0.0, |(_, share)| share),
            mood: self.mood(),
            variability: self.variability(),
        }
    }
}
