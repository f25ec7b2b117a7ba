//! Send mix: how a run's slots are split between cold and friendly mail.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{DripError, SendClass};

/// Default cold:friendly ratio for mixed runs.
pub const DEFAULT_RATIO: (u32, u32) = (60, 40);

/// Which classes a run draws from, and in what proportion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SendMix {
    Cold,
    Friendly,
    Mixed { cold: u32, friendly: u32 },
}

impl SendMix {
    /// Parse a mode name (`cold`, `friendly`, `mixed`) and an optional `C:F`
    /// ratio. The ratio is only meaningful for `mixed`.
    pub fn from_mode(mode: &str, ratio: Option<&str>) -> Result<Self, DripError> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "cold" => Ok(SendMix::Cold),
            "friendly" | "friendlies" => Ok(SendMix::Friendly),
            "mixed" => {
                let (cold, friendly) = match ratio {
                    Some(raw) => parse_ratio(raw)?,
                    None => DEFAULT_RATIO,
                };
                Ok(SendMix::Mixed { cold, friendly })
            }
            other => Err(DripError::Config(format!(
                "unknown mode {other:?} (expected cold, friendly or mixed)"
            ))),
        }
    }

    pub fn classes(&self) -> Vec<SendClass> {
        match self {
            SendMix::Cold => vec![SendClass::Cold],
            SendMix::Friendly => vec![SendClass::Friendly],
            SendMix::Mixed { .. } => vec![SendClass::Cold, SendClass::Friendly],
        }
    }

    /// Classes to try, in order, when a slot of `class` comes up. Mixed runs
    /// fall back to the other class once the slot's own class is drained.
    pub fn fallback(&self, class: SendClass) -> Vec<SendClass> {
        match self {
            SendMix::Mixed { .. } => vec![class, class.other()],
            _ => vec![class],
        }
    }

    /// Slot sequence for one run. `limit` bounds the total number of slots,
    /// `drip` additionally bounds the cold slots. Friendly slots are not
    /// affected by drip.
    pub fn plan(&self, limit: u32, drip: Option<u32>) -> Vec<SendClass> {
        let cap_cold = |n: u32| drip.map_or(n, |d| n.min(d));
        match *self {
            SendMix::Cold => vec![SendClass::Cold; cap_cold(limit) as usize],
            SendMix::Friendly => vec![SendClass::Friendly; limit as usize],
            SendMix::Mixed { cold, friendly } => {
                let weight = u64::from(cold) + u64::from(friendly);
                let cold_share = if weight == 0 {
                    0
                } else {
                    ((f64::from(limit) * f64::from(cold) / weight as f64).round() as u32)
                        .min(limit)
                };
                let friendly_slots = limit - cold_share;
                interleave(cap_cold(cold_share), friendly_slots)
            }
        }
    }
}

impl fmt::Display for SendMix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendMix::Cold => f.write_str("cold"),
            SendMix::Friendly => f.write_str("friendly"),
            SendMix::Mixed { cold, friendly } => write!(f, "mixed {cold}:{friendly}"),
        }
    }
}

fn parse_ratio(raw: &str) -> Result<(u32, u32), DripError> {
    let invalid = || DripError::Config(format!("invalid ratio {raw:?} (expected C:F, e.g. 60:40)"));
    let (c, f) = raw.trim().split_once(':').ok_or_else(invalid)?;
    let cold: u32 = c.trim().parse().map_err(|_| invalid())?;
    let friendly: u32 = f.trim().parse().map_err(|_| invalid())?;
    match cold.checked_add(friendly) {
        Some(0) => Err(invalid()),
        Some(_) => Ok((cold, friendly)),
        None => Err(DripError::Config(format!(
            "ratio {raw:?} is too large; weights must sum to at most {}",
            u32::MAX
        ))),
    }
}

/// Spread friendly slots evenly through the cold ones: a friendly every
/// `block` positions while both remain.
fn interleave(cold_slots: u32, friendly_slots: u32) -> Vec<SendClass> {
    let total = cold_slots + friendly_slots;
    if friendly_slots == 0 {
        return vec![SendClass::Cold; cold_slots as usize];
    }
    if cold_slots == 0 {
        return vec![SendClass::Friendly; friendly_slots as usize];
    }

    let block = ((f64::from(total) / f64::from(friendly_slots)).round() as u32).max(1);
    let (mut cold_left, mut friendly_left) = (cold_slots, friendly_slots);
    let mut labels = Vec::with_capacity(total as usize);
    let mut i = 0u32;
    while cold_left + friendly_left > 0 {
        if i % block == 0 && friendly_left > 0 {
            labels.push(SendClass::Friendly);
            friendly_left -= 1;
        } else if cold_left > 0 {
            labels.push(SendClass::Cold);
            cold_left -= 1;
        } else {
            labels.push(SendClass::Friendly);
            friendly_left -= 1;
        }
        i += 1;
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn count(plan: &[SendClass], class: SendClass) -> usize {
        plan.iter().filter(|c| **c == class).count()
    }

    #[rstest]
    #[case::cold("cold", None, SendMix::Cold)]
    #[case::friendly("friendly", None, SendMix::Friendly)]
    #[case::friendlies_alias("Friendlies", None, SendMix::Friendly)]
    #[case::mixed_default("mixed", None, SendMix::Mixed { cold: 60, friendly: 40 })]
    #[case::mixed_ratio("mixed", Some("70:30"), SendMix::Mixed { cold: 70, friendly: 30 })]
    #[case::ratio_ignored_for_cold("cold", Some("1:1"), SendMix::Cold)]
    fn parses_modes(#[case] mode: &str, #[case] ratio: Option<&str>, #[case] expected: SendMix) {
        assert_eq!(SendMix::from_mode(mode, ratio).unwrap(), expected);
    }

    #[rstest]
    #[case::unknown_mode("warm", None)]
    #[case::zero_ratio("mixed", Some("0:0"))]
    #[case::garbage_ratio("mixed", Some("sixty-forty"))]
    #[case::missing_colon("mixed", Some("60"))]
    #[case::weights_overflow("mixed", Some("4294967295:1"))]
    fn rejects_bad_modes(#[case] mode: &str, #[case] ratio: Option<&str>) {
        assert!(matches!(
            SendMix::from_mode(mode, ratio),
            Err(DripError::Config(_))
        ));
    }

    #[test]
    fn mixed_plan_honours_ratio_and_interleaves() {
        let plan = SendMix::Mixed {
            cold: 60,
            friendly: 40,
        }
        .plan(10, None);

        assert_eq!(plan.len(), 10);
        assert_eq!(count(&plan, SendClass::Cold), 6);
        assert_eq!(count(&plan, SendClass::Friendly), 4);
        // No long friendly runs at the front.
        assert_ne!(&plan[..4], &[SendClass::Friendly; 4]);
    }

    #[test]
    fn drip_caps_cold_slots_only() {
        let mix = SendMix::Mixed {
            cold: 60,
            friendly: 40,
        };
        let plan = mix.plan(10, Some(2));
        assert_eq!(count(&plan, SendClass::Cold), 2);
        assert_eq!(count(&plan, SendClass::Friendly), 4);

        assert_eq!(SendMix::Cold.plan(10, Some(3)).len(), 3);
        assert_eq!(SendMix::Friendly.plan(10, Some(3)).len(), 10);
    }

    #[test]
    fn extreme_weights_still_plan() {
        let plan = SendMix::Mixed {
            cold: u32::MAX,
            friendly: 1,
        }
        .plan(10, None);
        assert_eq!(plan, vec![SendClass::Cold; 10]);

        let plan = SendMix::Mixed {
            cold: u32::MAX,
            friendly: u32::MAX,
        }
        .plan(4, None);
        assert_eq!(count(&plan, SendClass::Cold), 2);
        assert_eq!(count(&plan, SendClass::Friendly), 2);
    }

    #[test]
    fn zero_limit_plans_nothing() {
        assert!(SendMix::Mixed { cold: 1, friendly: 1 }.plan(0, None).is_empty());
        assert!(SendMix::Cold.plan(5, Some(0)).is_empty());
    }

    #[test]
    fn only_mixed_falls_back_to_the_other_class() {
        let mixed = SendMix::Mixed { cold: 1, friendly: 1 };
        assert_eq!(
            mixed.fallback(SendClass::Friendly),
            vec![SendClass::Friendly, SendClass::Cold]
        );
        assert_eq!(SendMix::Cold.fallback(SendClass::Cold), vec![SendClass::Cold]);
    }
}
