//! Switch consistency check after a solve.

use log::trace;

use super::{StepContext, DEFAULT_MAX_RELINEARIZATIONS};
use crate::circuit::Network;
use crate::error::PowerStampError;

/// Checks switch states against the solved potentials and bounds the number
/// of re-solves per step.
#[derive(Debug, Clone)]
pub struct Relinearizer {
    /// Maximum solves of one time step
    pub max_iterations: usize,
}

impl Default for Relinearizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RELINEARIZATIONS)
    }
}

impl Relinearizer {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
        }
    }

    /// Let every switch compare its state with the last solution.
    ///
    /// Returns the number of switches that toggled; each toggle is also
    /// recorded as an event in `ctx`.
    pub fn check(&self, network: &mut Network, ctx: &mut StepContext) -> usize {
        let mut toggled = 0;
        for device in network.devices_mut() {
            if device.update_switch_state(ctx) {
                toggled += 1;
            }
        }
        trace!(
            "t={:.6e}: {} switch(es) toggled, {} event(s) pending",
            ctx.time(),
            toggled,
            ctx.events().len()
        );
        toggled
    }

    /// Whether solve number `iteration` (1-based) was the last one allowed.
    pub fn exhausted(&self, iteration: usize) -> bool {
        iteration >= self.max_iterations
    }

    /// Error for a step that did not settle, naming the devices of the last
    /// pending events.
    pub fn limit_error(&self, network: &Network, ctx: &StepContext) -> PowerStampError {
        let mut names: Vec<String> = Vec::new();
        for event in ctx.events() {
            let name = network
                .device(event.device)
                .map(|d| d.name().to_string())
                .unwrap_or_else(|| event.device.to_string());
            if !names.contains(&name) {
                names.push(name);
            }
        }
        PowerStampError::relinearization_limit(self.max_iterations, ctx.time(), &names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::IntegrationScheme;
    use crate::components::{SourceInputs, SwitchParams};

    #[test]
    fn test_check_counts_toggles() {
        let mut net = Network::with_nodes(3);
        net.add_diode("D1", [1, 0], SwitchParams::new(1e-3, 1e8, 0.6))
            .unwrap();
        net.add_diode("D2", [2, 0], SwitchParams::new(1e-3, 1e8, 0.6))
            .unwrap();
        net.finalize(2);

        let mut ctx = StepContext::new(IntegrationScheme::BackwardEuler);
        ctx.begin_step(1e-6, 1e-6, false);
        // D1 forward biased, D2 reverse biased
        let p = [0.0, 5.0, -5.0];
        net.compute_currents(&p, &mut ctx, &SourceInputs::EMPTY);

        let relinearizer = Relinearizer::default();
        assert_eq!(relinearizer.check(&mut net, &mut ctx), 1);
        assert!(ctx.needs_resolve());
        assert!(ctx.in_switch_error());

        let err = relinearizer.limit_error(&net, &ctx).to_string();
        assert!(err.contains("D1"), "{err}");
        assert!(!err.contains("D2"), "{err}");
    }

    #[test]
    fn test_cap_is_at_least_one() {
        let r = Relinearizer::new(0);
        assert_eq!(r.max_iterations, 1);
        assert!(r.exhausted(1));
        assert!(!Relinearizer::new(3).exhausted(2));
    }
}
