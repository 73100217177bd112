//! Port allow/block lists
//!
//! Checked before any flow state is touched. The blocklist is consulted
//! first; a flow touching a blocklisted port on either side gets the
//! blocklist action. A non-empty allowlist gives every flow that touches
//! none of its ports the allowlist action.

use crate::config::PortConfig;
use censor_common::Action;
use std::collections::HashSet;

/// Port policy
#[derive(Debug, Clone, Default)]
pub struct PortPolicy {
    blocklist: HashSet<u16>,
    blocklist_action: Action,
    allowlist: HashSet<u16>,
    allowlist_action: Action,
}

impl PortPolicy {
    /// Build from the `[ports]` config section
    pub fn from_config(config: &PortConfig) -> Self {
        Self {
            blocklist: config.blocklist.iter().copied().collect(),
            blocklist_action: config.blocklist_action,
            allowlist: config.allowlist.iter().copied().collect(),
            allowlist_action: config.allowlist_action,
        }
    }

    /// Whether the policy can ever return an action
    pub fn is_empty(&self) -> bool {
        self.blocklist.is_empty() && self.allowlist.is_empty()
    }

    /// Recommended action for a port pair, `None` to continue inspection
    #[inline]
    pub fn check(&self, src_port: u16, dst_port: u16) -> Option<Action> {
        if (self.blocklist.contains(&src_port) || self.blocklist.contains(&dst_port))
            && self.blocklist_action != Action::Pass
        {
            return Some(self.blocklist_action);
        }

        if !self.allowlist.is_empty()
            && !self.allowlist.contains(&src_port)
            && !self.allowlist.contains(&dst_port)
            && self.allowlist_action != Action::Pass
        {
            return Some(self.allowlist_action);
        }

        None
    }
}
