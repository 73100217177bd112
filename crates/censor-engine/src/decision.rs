//! Threshold policy over oracle output
//!
//! A model's rules pick an output channel, compare it against a threshold
//! and name the action on a match. Rules are checked in order; the first
//! match wins and no match means Pass.

use crate::config::ConfigError;
use crate::oracle::ModelShape;
use crate::store::FlowState;
use censor_common::Action;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Threshold comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    /// value > threshold
    #[serde(rename = ">")]
    Gt,
    /// value >= threshold
    #[serde(rename = ">=")]
    Ge,
    /// value < threshold
    #[serde(rename = "<")]
    Lt,
    /// value <= threshold
    #[serde(rename = "<=")]
    Le,
}

impl Comparator {
    /// Apply the comparison; NaN never matches
    #[inline(always)]
    pub fn matches(&self, value: f32, threshold: f32) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Ge => value >= threshold,
            Self::Lt => value < threshold,
            Self::Le => value <= threshold,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        })
    }
}

/// One `channel comparator threshold => action` rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdRule {
    /// Output channel index
    pub channel: usize,
    /// Comparison
    pub comparator: Comparator,
    /// Threshold
    pub threshold: f32,
    /// Action on match
    pub action: Action,
}

impl ThresholdRule {
    /// Create new rule
    pub fn new(channel: usize, comparator: Comparator, threshold: f32, action: Action) -> Self {
        Self {
            channel,
            comparator,
            threshold,
            action,
        }
    }

    /// Whether the rule fires on `probs`; a missing channel never fires
    #[inline]
    pub fn matches(&self, probs: &[f32]) -> bool {
        probs
            .get(self.channel)
            .is_some_and(|&p| self.comparator.matches(p, self.threshold))
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} => {}",
            self.channel, self.comparator, self.threshold, self.action
        )
    }
}

/// Converts oracle output into a latched flow action
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    rules: Vec<ThresholdRule>,
}

impl DecisionEngine {
    /// Create new decision engine
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self { rules }
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    /// Check every rule against the model's output geometry
    pub fn validate(&self, model: &str, shape: &ModelShape) -> Result<(), ConfigError> {
        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.channel >= shape.output_channels {
                return Err(ConfigError::ChannelOutOfRange {
                    model: model.to_string(),
                    rule: idx,
                    channel: rule.channel,
                    channels: shape.output_channels,
                });
            }
            if !rule.threshold.is_finite() {
                return Err(ConfigError::NonFiniteThreshold {
                    model: model.to_string(),
                    rule: idx,
                });
            }
        }
        Ok(())
    }

    /// Action for a probability vector without touching any flow
    pub fn evaluate(&self, probs: &[f32]) -> Action {
        self.rules
            .iter()
            .find(|rule| rule.matches(probs))
            .map_or(Action::Pass, |rule| rule.action)
    }

    /// Decide and latch
    ///
    /// Returns the latched action, which is the earlier one if the flow was
    /// already decided.
    pub fn decide(&self, state: &mut FlowState, probs: &[f32]) -> Action {
        if let Some(action) = state.latched() {
            return action;
        }
        state.latch(self.evaluate(probs))
    }

    /// Handle a failed oracle call
    ///
    /// With `rescore` the window is cleared and the flow stays undecided so
    /// the next full window is scored; otherwise Pass is latched.
    pub fn fail_open(&self, state: &mut FlowState, rescore: bool) -> Action {
        if rescore {
            state.window.clear();
            Action::Pass
        } else {
            state.latch(Action::Pass)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::FeatureWindow;
    use censor_common::{Endpoint, FlowKey, TransportProtocol};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Instant;

    fn flow() -> FlowState {
        let a = Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 40_000);
        let b = Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 8388);
        FlowState::new(
            FlowKey::canonical(a, b, TransportProtocol::Tcp),
            a,
            FeatureWindow::default(),
            Instant::now(),
        )
    }

    #[test]
    fn test_first_match_wins() {
        let engine = DecisionEngine::new(vec![
            ThresholdRule::new(1, Comparator::Lt, 0.5, Action::Reset),
            ThresholdRule::new(0, Comparator::Gt, 0.5, Action::Drop),
        ]);

        assert_eq!(engine.evaluate(&[0.9, 0.1]), Action::Reset);
        assert_eq!(engine.evaluate(&[0.9, 0.9]), Action::Drop);
        assert_eq!(engine.evaluate(&[0.1, 0.9]), Action::Pass);
    }

    #[test]
    fn test_missing_channel_and_nan() {
        let engine = DecisionEngine::new(vec![ThresholdRule::new(2, Comparator::Ge, 0.0, Action::Drop)]);
        assert_eq!(engine.evaluate(&[1.0]), Action::Pass);

        let engine = DecisionEngine::new(vec![ThresholdRule::new(0, Comparator::Le, 1.0, Action::Drop)]);
        assert_eq!(engine.evaluate(&[f32::NAN]), Action::Pass);
    }

    #[test]
    fn test_decide_latches_once() {
        let engine = DecisionEngine::new(vec![ThresholdRule::new(0, Comparator::Gt, 0.5, Action::Drop)]);
        let mut state = flow();

        assert_eq!(engine.decide(&mut state, &[0.9]), Action::Drop);
        assert_eq!(engine.decide(&mut state, &[0.1]), Action::Drop);
        assert_eq!(state.latched(), Some(Action::Drop));
    }

    #[test]
    fn test_no_match_latches_pass() {
        let engine = DecisionEngine::new(vec![ThresholdRule::new(0, Comparator::Gt, 0.5, Action::Drop)]);
        let mut state = flow();

        assert_eq!(engine.decide(&mut state, &[0.2]), Action::Pass);
        assert_eq!(state.latched(), Some(Action::Pass));
    }

    #[test]
    fn test_fail_open() {
        let engine = DecisionEngine::default();

        let mut state = flow();
        assert_eq!(engine.fail_open(&mut state, true), Action::Pass);
        assert_eq!(state.latched(), None);

        assert_eq!(engine.fail_open(&mut state, false), Action::Pass);
        assert_eq!(state.latched(), Some(Action::Pass));
    }

    #[test]
    fn test_validate_channels() {
        let engine = DecisionEngine::new(vec![ThresholdRule::new(1, Comparator::Gt, 0.5, Action::Drop)]);
        let shape = ModelShape {
            input_len: 20,
            output_channels: 1,
        };

        assert!(matches!(
            engine.validate("m", &shape),
            Err(ConfigError::ChannelOutOfRange { channel: 1, channels: 1, .. })
        ));
        assert!(engine
            .validate("m", &ModelShape { input_len: 20, output_channels: 2 })
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_infinite_threshold() {
        let engine = DecisionEngine::new(vec![
            ThresholdRule::new(0, Comparator::Gt, 0.5, Action::Drop),
            ThresholdRule::new(0, Comparator::Lt, f32::INFINITY, Action::Reset),
        ]);
        let shape = ModelShape {
            input_len: 20,
            output_channels: 1,
        };

        assert!(matches!(
            engine.validate("m", &shape),
            Err(ConfigError::NonFiniteThreshold { rule: 1, .. })
        ));
    }

    #[test]
    fn test_rule_serde() {
        let rule: ThresholdRule =
            toml::from_str("channel = 1\ncomparator = \"<\"\nthreshold = 0.5\naction = \"reset\"\n").unwrap();
        assert_eq!(rule, ThresholdRule::new(1, Comparator::Lt, 0.5, Action::Reset));
        assert_eq!(rule.to_string(), "[1] < 0.5 => reset");
    }
}
