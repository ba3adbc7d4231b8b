use std::collections::HashMap;

use shared::domain::InstrumentId;
use tracing::{info, warn};

use crate::flow::{Flow, Transition};

/// One flow sent back to its landing stage by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardRedirect {
    pub transition: Transition,
    /// Only the flow owning the address bar gets a URL rewrite; the others
    /// are reset in memory. The active flow is always rewritten so the
    /// address bar never disagrees with its stage.
    pub navigate: bool,
}

/// Keeps results stages from rendering without their backing data.
#[derive(Debug, Default)]
pub struct RefreshGuard {
    cycle: u64,
    last_redirect: HashMap<InstrumentId, u64>,
}

impl RefreshGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks every flow once for this render cycle.
    pub fn run<'a>(
        &mut self,
        flows: impl IntoIterator<Item = &'a mut dyn Flow>,
        active: Option<InstrumentId>,
    ) -> Vec<GuardRedirect> {
        self.cycle += 1;
        let mut redirects = Vec::new();

        for flow in flows {
            let id = flow.id();
            let Some(transition) = flow.recover_from_refresh() else {
                continue;
            };

            let repeated = self
                .last_redirect
                .insert(id, self.cycle)
                .is_some_and(|previous| previous + 1 == self.cycle);
            let navigate = active == Some(id);
            if repeated {
                warn!(
                    instrument = %id,
                    cycle = self.cycle,
                    navigate,
                    "guard: flow needed recovery on consecutive renders"
                );
            } else {
                info!(instrument = %id, from = %transition.from, navigate, "guard: redirecting to landing");
            }
            redirects.push(GuardRedirect {
                transition,
                navigate,
            });
        }

        redirects
    }
}

#[cfg(test)]
mod tests {
    use shared::domain::Stage;

    use super::*;
    use crate::instruments::{AtmFlow, AuraFlow, GbsiFlow, MetabolicFlow};

    #[test]
    fn every_instrument_recovers_from_an_empty_results_stage() {
        let mut gbsi = GbsiFlow::new();
        let mut aura = AuraFlow::new();
        let mut atm = AtmFlow::new();
        let mut metabolic = MetabolicFlow::new();
        assert!(gbsi.sync_to("results"));
        assert!(aura.sync_to("preview-results"));
        assert!(atm.sync_to("results"));
        assert!(metabolic.sync_to("results"));

        let mut guard = RefreshGuard::new();
        let flows: [&mut dyn Flow; 4] = [&mut gbsi, &mut aura, &mut atm, &mut metabolic];
        let redirects = guard.run(flows, Some(InstrumentId::Atm));

        assert_eq!(redirects.len(), 4);
        for redirect in &redirects {
            assert_eq!(redirect.transition.to, Stage::Landing);
            assert_eq!(redirect.navigate, redirect.transition.instrument == InstrumentId::Atm);
        }
        assert_eq!(gbsi.stage(), Stage::Landing);
        assert_eq!(aura.stage(), Stage::Landing);
    }

    #[test]
    fn healthy_flows_are_left_alone() {
        let mut gbsi = GbsiFlow::new();
        gbsi.start().expect("start");
        let mut guard = RefreshGuard::new();
        assert!(guard.run([&mut gbsi as &mut dyn Flow], Some(InstrumentId::Gbsi)).is_empty());
        assert_eq!(gbsi.stage(), Stage::Quiz);
    }

    #[test]
    fn consecutive_redirects_keep_navigating() {
        let mut metabolic = MetabolicFlow::new();
        let mut guard = RefreshGuard::new();

        metabolic.sync_to("results");
        let first = guard.run([&mut metabolic as &mut dyn Flow], Some(InstrumentId::Metabolic));
        assert!(first[0].navigate);

        metabolic.sync_to("results");
        let second = guard.run([&mut metabolic as &mut dyn Flow], Some(InstrumentId::Metabolic));
        assert_eq!(second.len(), 1);
        assert!(second[0].navigate);
        assert_eq!(metabolic.stage(), Stage::Landing);

        metabolic.sync_to("results");
        let background = guard.run([&mut metabolic as &mut dyn Flow], Some(InstrumentId::Gbsi));
        assert!(!background[0].navigate);
        assert_eq!(metabolic.stage(), Stage::Landing);
    }
}
