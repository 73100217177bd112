//! Single-packet obfuscation fingerprint
//!
//! Flags payloads that look like uniformly distributed ciphertext rather
//! than a cleartext protocol, leaving standard web ports alone. The
//! detector keeps no memory between calls; the engine decides whether a
//! hit drops the packet or resets the connection.

use crate::bytestats::{average_popcount, is_printable};
use crate::config::HeuristicConfig;
use censor_common::Action;

/// Printable run length above which a payload counts as cleartext
pub const PRINTABLE_RUN_LIMIT: usize = 20;

/// Index at which the cleartext-prefix check fires
const PREFIX_CHECK_INDEX: usize = 6;

/// Why the detector reached its verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Finding {
    /// Average popcount inside the tolerance band
    BalancedPopcount,
    /// Six printable bytes by index 6
    CleartextPrefix,
    /// A printable run longer than the limit
    PrintableRun,
    /// More than half the payload is printable
    MajorityPrintable,
    /// One side of the flow is an exempt port
    ExemptPort,
    /// None of the exemptions matched
    Obfuscated,
}

impl Finding {
    /// Action for this finding
    #[inline(always)]
    pub const fn action(&self) -> Action {
        match self {
            Self::Obfuscated => Action::Drop,
            _ => Action::Pass,
        }
    }

    /// Short label for logs
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BalancedPopcount => "balanced_popcount",
            Self::CleartextPrefix => "cleartext_prefix",
            Self::PrintableRun => "printable_run",
            Self::MajorityPrintable => "majority_printable",
            Self::ExemptPort => "exempt_port",
            Self::Obfuscated => "obfuscated",
        }
    }
}

/// Heuristic detector
#[derive(Debug, Clone)]
pub struct HeuristicDetector {
    band_low: f64,
    band_high: f64,
    exempt_ports: Vec<u16>,
}

impl Default for HeuristicDetector {
    fn default() -> Self {
        Self::from_config(&HeuristicConfig::default())
    }
}

impl HeuristicDetector {
    /// Create new detector
    ///
    /// `band` is exclusive on both ends.
    pub fn new(band: [f64; 2], exempt_ports: Vec<u16>) -> Self {
        Self {
            band_low: band[0],
            band_high: band[1],
            exempt_ports,
        }
    }

    /// Build from the `[heuristic]` config section
    pub fn from_config(config: &HeuristicConfig) -> Self {
        Self::new(config.popcount_band, config.exempt_ports.clone())
    }

    /// Classify one payload: Pass or Drop
    #[inline]
    pub fn classify(&self, payload: &[u8], src_port: u16, dst_port: u16) -> Action {
        self.inspect(payload, src_port, dst_port).action()
    }

    /// Classify one payload and report which rule decided
    pub fn inspect(&self, payload: &[u8], src_port: u16, dst_port: u16) -> Finding {
        let popcount = average_popcount(payload);
        if popcount > self.band_low && popcount < self.band_high {
            return Finding::BalancedPopcount;
        }

        let mut printable = 0usize;
        for (i, &byte) in payload.iter().enumerate() {
            // The run counter restarts on every byte, so it never exceeds 1.
            let printable_byte = is_printable(byte);
            let run = usize::from(printable_byte);

            if printable_byte {
                printable += 1;
            } else if run > PRINTABLE_RUN_LIMIT {
                return Finding::PrintableRun;
            }

            if i == PREFIX_CHECK_INDEX && printable == PREFIX_CHECK_INDEX {
                return Finding::CleartextPrefix;
            }
        }

        if printable > payload.len() / 2 {
            return Finding::MajorityPrintable;
        }

        if self.is_exempt(src_port) || self.is_exempt(dst_port) {
            return Finding::ExemptPort;
        }

        Finding::Obfuscated
    }

    /// Whether a port is exempt from blocking
    #[inline(always)]
    pub fn is_exempt(&self, port: u16) -> bool {
        self.exempt_ports.contains(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn alternating(len: usize) -> Vec<u8> {
        (0..len).map(|i| if i % 2 == 0 { 0x20 } else { 0x00 }).collect()
    }

    #[test]
    fn test_alternating_payload_dropped() {
        let detector = HeuristicDetector::default();
        let payload = alternating(20);

        assert_eq!(detector.inspect(&payload, 40_000, 8388), Finding::Obfuscated);
        assert_eq!(detector.classify(&payload, 40_000, 8388), Action::Drop);
    }

    #[test]
    fn test_web_ports_exempt() {
        let detector = HeuristicDetector::default();
        let payload = alternating(20);

        assert_eq!(detector.inspect(&payload, 40_000, 443), Finding::ExemptPort);
        assert_eq!(detector.classify(&payload, 80, 40_000), Action::Pass);
    }

    #[test]
    fn test_cleartext_prefix() {
        let detector = HeuristicDetector::default();
        let mut payload = b"SSH-2.".to_vec();
        payload.extend_from_slice(&[0x00; 30]);

        assert_eq!(detector.inspect(&payload, 40_000, 22), Finding::CleartextPrefix);
    }

    #[test]
    fn test_seven_printable_skips_prefix_check() {
        let detector = HeuristicDetector::default();
        let mut payload = b"ABCDEFG".to_vec();
        payload.extend_from_slice(&[0x00; 30]);

        assert_eq!(detector.inspect(&payload, 40_000, 22), Finding::Obfuscated);
    }

    #[test]
    fn test_balanced_popcount() {
        let detector = HeuristicDetector::default();
        // 0x0F and 0xF0 both carry four set bits
        let payload = [0x0F, 0xF0, 0x0F, 0xF0];

        assert_eq!(detector.inspect(&payload, 1, 2), Finding::BalancedPopcount);
    }

    #[test]
    fn test_band_bounds_exclusive() {
        let detector = HeuristicDetector::new([2.0, 4.0], vec![]);
        // exactly 4.0 is outside (2.0, 4.0)
        let payload = [0x0F; 8];

        assert_ne!(detector.inspect(&payload, 1, 2), Finding::BalancedPopcount);
    }

    #[test]
    fn test_empty_payload_on_plain_port() {
        let detector = HeuristicDetector::default();
        assert_eq!(detector.classify(&[], 40_000, 8388), Action::Drop);
        assert_eq!(detector.classify(&[], 40_000, 443), Action::Pass);
    }

    fn four_bit_byte() -> impl Strategy<Value = u8> {
        proptest::sample::select(
            (0u8..=255).filter(|b| b.count_ones() == 4).collect::<Vec<_>>(),
        )
    }

    fn printable_byte() -> impl Strategy<Value = u8> {
        0x20u8..=0x7E
    }

    fn control_byte() -> impl Strategy<Value = u8> {
        0x00u8..0x20
    }

    proptest! {
        #[test]
        fn prop_classify_is_pure(
            payload in proptest::collection::vec(any::<u8>(), 0..256),
            src in any::<u16>(),
            dst in any::<u16>(),
        ) {
            let detector = HeuristicDetector::default();
            let first = detector.inspect(&payload, src, dst);
            let second = detector.inspect(&payload, src, dst);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_balanced_payload_passes(
            payload in proptest::collection::vec(four_bit_byte(), 1..256),
            src in any::<u16>(),
            dst in any::<u16>(),
        ) {
            let detector = HeuristicDetector::default();
            prop_assert_eq!(detector.classify(&payload, src, dst), Action::Pass);
        }

        #[test]
        fn prop_in_band_passes(
            payload in proptest::collection::vec(any::<u8>(), 1..256),
        ) {
            let popcount = average_popcount(&payload);
            prop_assume!(popcount > 3.4 && popcount < 4.6);
            let detector = HeuristicDetector::default();
            prop_assert_eq!(detector.classify(&payload, 40_000, 8388), Action::Pass);
        }

        #[test]
        fn prop_printable_prefix_passes(
            prefix in proptest::collection::vec(printable_byte(), 6),
            seventh in control_byte(),
            rest in proptest::collection::vec(any::<u8>(), 0..128),
        ) {
            let mut payload = prefix;
            payload.push(seventh);
            payload.extend(rest);

            let detector = HeuristicDetector::default();
            prop_assert_eq!(detector.classify(&payload, 40_000, 8388), Action::Pass);
        }

        #[test]
        fn prop_majority_printable_passes(
            printable in proptest::collection::vec(printable_byte(), 1..128),
            extra in proptest::collection::vec(control_byte(), 0..128),
        ) {
            let mut payload = printable.clone();
            payload.extend(extra.iter().take(printable.len().saturating_sub(1)));

            let detector = HeuristicDetector::default();
            prop_assert_eq!(detector.classify(&payload, 40_000, 8388), Action::Pass);
        }

        #[test]
        fn prop_web_ports_pass(
            payload in proptest::collection::vec(any::<u8>(), 0..256),
            port in proptest::sample::select(vec![80u16, 443]),
            other in any::<u16>(),
            swap in any::<bool>(),
        ) {
            let detector = HeuristicDetector::default();
            let (src, dst) = if swap { (port, other) } else { (other, port) };
            prop_assert_eq!(detector.classify(&payload, src, dst), Action::Pass);
        }
    }
}
