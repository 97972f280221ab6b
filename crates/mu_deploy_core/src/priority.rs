use crate::contract::RoutingRule;

/// Highest numeric priority among `rules`, or 0 when none parse.
///
/// Priorities are free-form strings on the wire (the listener's default rule
/// reports `"default"`), so a value that does not parse is skipped rather
/// than failing the whole listing.
pub fn max_rule_priority(rules: &[RoutingRule]) -> u32 {
    rules
        .iter()
        .filter_map(|rule| rule.priority.as_deref())
        .filter_map(|raw| raw.trim().parse::<u32>().ok())
        .max()
        .unwrap_or(0)
}

pub fn next_priority(max: u32) -> u32 {
    max.saturating_add(1)
}

/// How the `ListenerRulePriority` parameter was decided for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityDecision {
    /// Operator pinned a value.
    Pinned(u32),
    /// First deployment, next free slot on the listener.
    Allocated(u32),
    /// Existing service stack keeps whatever priority its rule already has.
    Unmanaged,
}

impl PriorityDecision {
    pub fn parameter_value(self) -> String {
        match self {
            Self::Pinned(value) | Self::Allocated(value) => value.to_string(),
            Self::Unmanaged => String::new(),
        }
    }
}

/// `0` means "not pinned".
pub fn priority_override(raw: u32) -> Option<u32> {
    (raw > 0).then_some(raw)
}
