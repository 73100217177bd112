//! Censor Engine - Flow classification and action engine
//!
//! Decides, per packet, whether a flow's traffic passes, is dropped, or has
//! its connection reset.
//!
//! # Architecture
//!
//! ```text
//! packet ──► port policy ──► FlowStateStore ──► latched? ──► action
//!                                  │
//!                  ┌───────────────┴───────────────┐
//!                  ▼                               ▼
//!          HeuristicDetector            WindowedFeatureAccumulator
//!          (per packet)                  (K packets per flow)
//!                  │                               │ window full
//!                  │                               ▼
//!                  │                    BoundedOracle ──► ScoringOracle
//!                  │                               │ probabilities
//!                  ▼                               ▼
//!                Drop / Reset               DecisionEngine (latch)
//! ```
//!
//! # Guarantees
//!
//! - One `FlowState` per `FlowKey`, created atomically
//! - Per-flow serialization, no contention between independent flows
//! - Oracle calls are bounded by a timeout and fail open
//! - Every packet yields exactly one `Action`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bytestats;
pub mod config;
pub mod decision;
pub mod engine;
pub mod heuristic;
pub mod oracle;
pub mod ports;
pub mod stats;
pub mod store;
pub mod window;

pub use bytestats::ByteStatistics;
pub use config::{ClassifierKind, ConfigError, EngineConfig};
pub use decision::{Comparator, DecisionEngine, ThresholdRule};
pub use engine::{CensorEngine, Sweeper};
pub use heuristic::{Finding, HeuristicDetector};
pub use oracle::{BoundedOracle, LinearOracle, ModelShape, OracleError, ScoringOracle};
pub use ports::PortPolicy;
pub use stats::{EngineStats, EngineStatsSnapshot};
pub use store::{FlowHandle, FlowState, FlowStateStore};
pub use window::{FeatureLayout, FeatureWindow, PacketFeature, WindowedFeatureAccumulator};

pub use censor_common::{Action, Direction, Endpoint, FlowKey, Packet, TcpFlags, TransportProtocol};

/// Default number of packets per classification window
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Value written into window slots no packet filled
pub const PADDING_SENTINEL: f32 = -1.0;
