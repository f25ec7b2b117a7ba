//! Order in which eligible inboxes are offered a claim.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::domain::InboxStats;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Never-used first, then oldest `last_used_at`, then fewest sends today.
    #[default]
    LeastRecentlyUsed,
    /// Uniform shuffle.
    Random,
}

impl RotationPolicy {
    pub fn order<R: Rng + ?Sized>(&self, inboxes: &mut [InboxStats], rng: &mut R) {
        match self {
            RotationPolicy::LeastRecentlyUsed => inboxes.sort_by(|a, b| {
                a.inbox
                    .last_used_at
                    .cmp(&b.inbox.last_used_at)
                    .then(a.sent_today.cmp(&b.sent_today))
                    .then(a.inbox.id.cmp(&b.inbox.id))
            }),
            RotationPolicy::Random => inboxes.shuffle(rng),
        }
    }
}
