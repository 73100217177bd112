//! Windowed per-flow features
//!
//! Each tracked flow owns a `FeatureWindow` with one row per packet. The
//! `WindowedFeatureAccumulator` knows the window geometry of the active
//! model: how many packets (K), which features per packet, and how the
//! rows are flattened into the oracle's input vector.

use crate::bytestats::{average_popcount, printable_ratio, shannon_entropy};
use crate::config::{ModelConfig, WindowConfig};
use censor_common::{Direction, Packet};
use serde::{Deserialize, Serialize};

/// Per-packet feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketFeature {
    /// Payload length in bytes
    PayloadLen,
    /// +1 from the initiator, -1 towards it
    Direction,
    /// Shannon entropy of the payload
    PayloadEntropy,
    /// Average set bits per payload byte
    PayloadPopcount,
    /// Fraction of printable payload bytes
    PrintableRatio,
}

impl PacketFeature {
    /// Feature value for one packet
    #[inline]
    pub fn extract(&self, packet: &Packet, direction: Direction) -> f32 {
        match self {
            Self::PayloadLen => packet.payload_len() as f32,
            Self::Direction => direction.as_f32(),
            Self::PayloadEntropy => shannon_entropy(&packet.payload) as f32,
            Self::PayloadPopcount => average_popcount(&packet.payload) as f32,
            Self::PrintableRatio => printable_ratio(&packet.payload) as f32,
        }
    }
}

/// Flattening order of a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureLayout {
    /// All values of the first feature, then the second, ...
    #[default]
    Concatenated,
    /// One tuple per packet, in arrival order
    Interleaved,
}

/// Feature rows collected for one flow
#[derive(Debug, Clone, Default)]
pub struct FeatureWindow {
    /// Row-major values, `width` per row
    values: Vec<f32>,
    /// Rows pushed so far
    filled: usize,
}

impl FeatureWindow {
    /// Create new window with room for `rows * width` values
    pub fn with_capacity(rows: usize, width: usize) -> Self {
        Self {
            values: Vec::with_capacity(rows * width),
            filled: 0,
        }
    }

    /// Rows pushed
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.filled
    }

    /// No rows yet
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Raw row-major values
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Start a fresh window, keeping the allocation
    pub fn clear(&mut self) {
        self.values.clear();
        self.filled = 0;
    }

    /// Drop the buffer entirely
    pub fn release(&mut self) {
        self.values = Vec::new();
        self.filled = 0;
    }
}

/// Window geometry and flattening for one model
#[derive(Debug, Clone)]
pub struct WindowedFeatureAccumulator {
    size: usize,
    features: Vec<PacketFeature>,
    layout: FeatureLayout,
    padding: f32,
}

impl WindowedFeatureAccumulator {
    /// Create new accumulator
    pub fn new(size: usize, features: Vec<PacketFeature>, layout: FeatureLayout, padding: f32) -> Self {
        Self {
            size,
            features,
            layout,
            padding,
        }
    }

    /// Build from the `[window]` section and a model section
    pub fn from_config(window: &WindowConfig, model: &ModelConfig) -> Self {
        Self::new(window.size, model.features.clone(), model.layout, window.padding)
    }

    /// Packets per window (K)
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Features per packet
    #[inline(always)]
    pub fn width(&self) -> usize {
        self.features.len()
    }

    /// Length of every flattened vector
    #[inline(always)]
    pub fn input_len(&self) -> usize {
        self.size * self.width()
    }

    /// Feature list
    pub fn features(&self) -> &[PacketFeature] {
        &self.features
    }

    /// Empty window sized for this geometry
    pub fn new_window(&self) -> FeatureWindow {
        FeatureWindow::with_capacity(self.size, self.width())
    }

    /// Append one row of precomputed feature values
    ///
    /// Returns true on the push that fills the window, never before and
    /// never after. Pushes into a full window are ignored. Missing values
    /// in a short row are padded; extra values are cut.
    pub fn push(&self, window: &mut FeatureWindow, row: &[f32]) -> bool {
        if window.filled >= self.size {
            return false;
        }

        let width = self.width();
        window.values.extend(
            row.iter()
                .copied()
                .chain(std::iter::repeat(self.padding))
                .take(width),
        );
        window.filled += 1;
        window.filled == self.size
    }

    /// Extract this model's features from a packet and append them
    pub fn push_packet(&self, window: &mut FeatureWindow, packet: &Packet, direction: Direction) -> bool {
        if window.filled >= self.size {
            return false;
        }

        window
            .values
            .extend(self.features.iter().map(|f| f.extract(packet, direction)));
        window.filled += 1;
        window.filled == self.size
    }

    /// Flatten to exactly `input_len()` values, padding missing rows
    pub fn flatten(&self, window: &FeatureWindow) -> Vec<f32> {
        let width = self.width();
        let value = |row: usize, col: usize| -> f32 {
            if row < window.filled {
                window.values[row * width + col]
            } else {
                self.padding
            }
        };

        let mut out = Vec::with_capacity(self.input_len());
        match self.layout {
            FeatureLayout::Concatenated => {
                for col in 0..width {
                    for row in 0..self.size {
                        out.push(value(row, col));
                    }
                }
            }
            FeatureLayout::Interleaved => {
                for row in 0..self.size {
                    for col in 0..width {
                        out.push(value(row, col));
                    }
                }
            }
        }
        out
    }
}
