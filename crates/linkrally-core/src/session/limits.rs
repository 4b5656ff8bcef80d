//! Run limit resolution.
//!
//! A run's own explicit value wins; otherwise the session rule applies;
//! otherwise the hard default (20 steps, unlimited links and tokens).

use super::model::{Rules, Run};

/// Hard default for the maximum number of hops a run may take.
pub const DEFAULT_MAX_STEPS: u32 = 20;

/// Resolved limits for one run. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub max_steps: u32,
    /// `None` means the full link list is considered every turn
    pub max_links: Option<u32>,
    /// `None` means no token cap is sent to the model endpoint
    pub max_tokens: Option<u32>,
}

impl RunLimits {
    /// Resolves the override chain for `run` within a session's `rules`.
    pub fn resolve(run: &Run, rules: &Rules) -> Self {
        Self {
            max_steps: run
                .limit_overrides
                .max_steps
                .or(rules.max_steps)
                .unwrap_or(DEFAULT_MAX_STEPS),
            max_links: run.limit_overrides.max_links.or(rules.max_links),
            max_tokens: run.limit_overrides.max_tokens.or(rules.max_tokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::Run;

    #[test]
    fn hard_defaults_apply_when_nothing_is_set() {
        let run = Run::new_human();
        let limits = RunLimits::resolve(&run, &Rules::default());
        assert_eq!(limits.max_steps, DEFAULT_MAX_STEPS);
        assert_eq!(limits.max_links, None);
        assert_eq!(limits.max_tokens, None);
    }

    #[test]
    fn session_rules_override_defaults() {
        let run = Run::new_human();
        let rules = Rules {
            max_steps: Some(8),
            max_links: Some(50),
            max_tokens: Some(512),
            auto_start_timer: false,
        };
        let limits = RunLimits::resolve(&run, &rules);
        assert_eq!(limits.max_steps, 8);
        assert_eq!(limits.max_links, Some(50));
        assert_eq!(limits.max_tokens, Some(512));
    }

    #[test]
    fn run_overrides_win_over_session_rules() {
        let mut run = Run::new_human();
        run.limit_overrides.max_steps = Some(3);
        run.limit_overrides.max_links = Some(10);
        let rules = Rules {
            max_steps: Some(8),
            max_links: Some(50),
            max_tokens: Some(512),
            auto_start_timer: false,
        };
        let limits = RunLimits::resolve(&run, &rules);
        assert_eq!(limits.max_steps, 3);
        assert_eq!(limits.max_links, Some(10));
        // untouched field still inherits
        assert_eq!(limits.max_tokens, Some(512));
    }
}
