//! Main simulator interface.

use log::{debug, info, warn};

use crate::characteristic::{Characteristic, CharacteristicFile};
use crate::circuit::{validate_network, DeviceId, GroupId, IntegrationScheme, Network};
use crate::components::{Device, SourceInputs, StateRing, Waveform};
use crate::error::{PowerStampError, Result};

use super::{
    DenseLu, LinearSolver, Relinearizer, RelinearizationEvent, RhsAssembler, StepContext,
    SystemMatrix, DEFAULT_DT, DEFAULT_HISTORY_DEPTH, DEFAULT_MAX_RELINEARIZATIONS,
};

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Integration scheme for all reactive devices.
    pub scheme: IntegrationScheme,
    /// Time step (seconds).
    pub dt: f64,
    /// Maximum solves of one time step before it is reported as failed.
    pub max_relinearizations: usize,
    /// Committed steps that can be rolled back.
    pub history_depth: usize,
    /// Run a bootstrap step that holds capacitors at their initial voltage.
    pub initialize_capacitors: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            scheme: IntegrationScheme::default(),
            dt: DEFAULT_DT,
            max_relinearizations: DEFAULT_MAX_RELINEARIZATIONS,
            history_depth: DEFAULT_HISTORY_DEPTH,
            initialize_capacitors: true,
        }
    }
}

impl SimulatorConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scheme(mut self, scheme: IntegrationScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Set the time step (in seconds).
    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    /// Set the relinearization cap.
    ///
    /// Each switch transition costs one extra solve, so the cap should be
    /// above the number of switches expected to toggle together.
    pub fn with_max_relinearizations(mut self, max: usize) -> Self {
        self.max_relinearizations = max;
        self
    }

    pub fn with_history_depth(mut self, depth: usize) -> Self {
        self.history_depth = depth;
        self
    }

    pub fn with_initialize_capacitors(mut self, enabled: bool) -> Self {
        self.initialize_capacitors = enabled;
        self
    }

    /// Check the values for consistency.
    pub fn validate(&self) -> Result<()> {
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(PowerStampError::invalid_param(format!(
                "time step must be positive, got {}",
                self.dt
            )));
        }
        if self.max_relinearizations == 0 {
            return Err(PowerStampError::invalid_param("relinearization cap must be at least 1"));
        }
        if self.history_depth == 0 {
            return Err(PowerStampError::invalid_param("history depth must be at least 1"));
        }
        Ok(())
    }
}

/// What happened while solving one time step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// Time of the committed step
    pub time: f64,
    /// Number of solves, 1 when no device asked for a re-solve
    pub iterations: usize,
    /// Switch transitions after a solve
    pub switch_events: usize,
    /// A nonlinear parameter was committed or rolled back
    pub parameter_changed: bool,
    /// Every relinearization request of the step, in order
    pub events: Vec<RelinearizationEvent>,
}

/// State saved with each commit for [`Simulator::step_back`].
#[derive(Debug, Clone)]
struct Committed {
    time: f64,
    potentials: Vec<f64>,
    bootstrap_pending: bool,
}

/// The time-step engine.
///
/// Owns the network and advances it one step at a time: stamp, solve,
/// compute currents, check switches, repeat until consistent, commit.
pub struct Simulator<S: LinearSolver = DenseLu> {
    /// The network being simulated
    network: Network,
    config: SimulatorConfig,
    solver: S,
    matrix: SystemMatrix,
    rhs: RhsAssembler,
    ctx: StepContext,
    relinearizer: Relinearizer,
    /// Working solution of the present step
    potentials: Vec<f64>,
    /// Solution of the last committed step
    committed: Vec<f64>,
    history: StateRing<Committed>,
    time: f64,
    /// Step width the factored matrix was built for; `None` when stale
    factored_dt: Option<f64>,
    bootstrap_pending: bool,
    report: StepReport,
}

/// Forks the simulator. The copy steps independently of the original,
/// for example to try a step speculatively.
impl<S: LinearSolver + Clone> Clone for Simulator<S> {
    fn clone(&self) -> Self {
        let network = self.network.clone();
        Self {
            rhs: self.rhs.snapshot(&network),
            config: self.config.clone(),
            solver: self.solver.clone(),
            matrix: self.matrix.clone(),
            ctx: self.ctx.clone(),
            relinearizer: self.relinearizer.clone(),
            potentials: self.potentials.clone(),
            committed: self.committed.clone(),
            history: self.history.clone(),
            time: self.time,
            factored_dt: self.factored_dt,
            bootstrap_pending: self.bootstrap_pending,
            report: self.report.clone(),
            network,
        }
    }
}

impl Simulator<DenseLu> {
    /// Create a simulator using the built-in dense LU solver.
    pub fn new(network: Network, config: SimulatorConfig) -> Result<Self> {
        Self::with_solver(network, config, DenseLu::new())
    }
}

impl<S: LinearSolver> Simulator<S> {
    /// Create a simulator with a custom linear solver.
    pub fn with_solver(mut network: Network, config: SimulatorConfig, solver: S) -> Result<Self> {
        config.validate()?;
        validate_network(&network)?;
        network.finalize(config.history_depth);

        let size = network.size();
        let bootstrap_pending = config.initialize_capacitors && network.has_initial_voltages();
        info!(
            "Simulator: {} scheme, dt={:.3e} s, system size {}{}",
            config.scheme,
            config.dt,
            size,
            if bootstrap_pending {
                ", capacitor initialization pending"
            } else {
                ""
            }
        );

        Ok(Self {
            rhs: RhsAssembler::new(&network),
            ctx: StepContext::new(config.scheme),
            relinearizer: Relinearizer::new(config.max_relinearizations),
            matrix: SystemMatrix::new(size),
            potentials: vec![0.0; size],
            committed: vec![0.0; size],
            history: StateRing::new(config.history_depth),
            time: 0.0,
            factored_dt: None,
            bootstrap_pending,
            report: StepReport::default(),
            network,
            config,
            solver,
        })
    }

    /// Advance by the configured time step.
    pub fn step(&mut self) -> Result<StepReport> {
        self.step_dt(self.config.dt)
    }

    /// Advance by `dt`.
    ///
    /// The step is solved repeatedly until no device asks for a re-solve,
    /// then committed. When the relinearization cap is reached, or the
    /// system cannot be solved, every device returns to its state before
    /// the step and the error is returned; time does not advance.
    pub fn step_dt(&mut self, dt: f64) -> Result<StepReport> {
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(PowerStampError::invalid_param(format!(
                "time step must be positive, got {dt}"
            )));
        }
        let time = self.time + dt;
        let initializing = self.bootstrap_pending;
        self.ctx.begin_step(time, dt, initializing);

        let currents = self.network.currents();
        self.network.begin_step();
        self.network.prepare_step(&mut self.ctx);
        self.rhs.mark_dirty();

        let (iterations, events) = match self.solve_step(dt, &currents) {
            Ok(solved) => solved,
            Err(err) => {
                self.network.abort_step();
                self.factored_dt = None;
                self.rhs.mark_dirty();
                return Err(err);
            }
        };

        let inputs = SourceInputs {
            potentials: &self.committed,
            currents: &currents,
        };
        self.network.commit(&self.potentials, time, &inputs);
        self.history.push(Committed {
            time: self.time,
            potentials: self.committed.clone(),
            bootstrap_pending: self.bootstrap_pending,
        });
        self.committed.copy_from_slice(&self.potentials);
        self.time = time;
        if initializing {
            debug!("Capacitor initialization finished at t={:.6e}", time);
            self.bootstrap_pending = false;
            self.factored_dt = None;
        }

        self.report = StepReport {
            time,
            iterations,
            switch_events: self.ctx.switch_events(),
            parameter_changed: self.ctx.parameter_changed(),
            events,
        };
        Ok(self.report.clone())
    }

    /// Solve the prepared step until the switch states are consistent.
    ///
    /// Returns the number of solves and the re-solve requests in order.
    fn solve_step(&mut self, dt: f64, currents: &[f64]) -> Result<(usize, Vec<RelinearizationEvent>)> {
        let inputs = SourceInputs {
            potentials: &self.committed,
            currents,
        };
        let mut events = Vec::new();
        let mut iteration = 0;
        loop {
            iteration += 1;

            if self.ctx.take_matrix_stale() || self.factored_dt != Some(dt) {
                self.factored_dt = None;
                self.matrix.clear();
                self.network.stamp_matrix(&mut self.matrix, &self.ctx);
                self.solver.factor(&self.matrix)?;
                self.factored_dt = Some(dt);
            }

            let b = self.rhs.assemble(&self.network, &self.ctx, &inputs);
            self.solver.solve(b, &mut self.potentials)?;
            self.network.compute_currents(&self.potentials, &mut self.ctx, &inputs);
            self.relinearizer.check(&mut self.network, &mut self.ctx);

            if !self.ctx.needs_resolve() {
                return Ok((iteration, events));
            }
            if self.relinearizer.exhausted(iteration) {
                let err = self.relinearizer.limit_error(&self.network, &self.ctx);
                warn!("{err}");
                return Err(err);
            }
            for event in self.ctx.take_events() {
                debug!(
                    "t={:.6e}: re-solve requested by {} ({:?})",
                    self.ctx.time(),
                    self.network
                        .device(event.device)
                        .map_or("?", |d| d.name()),
                    event.cause
                );
                events.push(event);
            }
            self.rhs.mark_dirty();
        }
    }

    /// Step until the simulation time reaches `end`. Returns the number of
    /// steps taken.
    pub fn run_until(&mut self, end: f64) -> Result<usize> {
        let mut steps = 0;
        // Half a step of slack so accumulated rounding does not add a step
        while self.time + 0.5 * self.config.dt < end {
            self.step()?;
            steps += 1;
        }
        Ok(steps)
    }

    /// Undo the last committed step.
    ///
    /// Devices, time functions, the potential vector and the time return to
    /// the values they had before that commit. Returns `false` (and changes
    /// nothing) when the saved history is exhausted.
    pub fn step_back(&mut self) -> bool {
        if !self.history.can_pop() || !self.network.step_back() {
            warn!(
                "Cannot step back from t={:.6e}: saved history of {} step(s) exhausted",
                self.time,
                self.config.history_depth
            );
            return false;
        }
        if let Some(saved) = self.history.pop() {
            self.time = saved.time;
            self.potentials.copy_from_slice(&saved.potentials);
            self.committed = saved.potentials;
            self.bootstrap_pending = saved.bootstrap_pending;
        }
        self.factored_dt = None;
        self.rhs.mark_dirty();
        true
    }

    /// Set a switch's gate signal for the next step.
    pub fn set_gate(&mut self, id: DeviceId, gate: bool) -> Result<()> {
        self.network.set_gate(id, gate)
    }

    /// Drive a source with a new waveform from the next step on.
    ///
    /// The source may move between the cached basis and the per-step set,
    /// so the right-hand side is re-partitioned.
    pub fn set_waveform(&mut self, id: DeviceId, waveform: Waveform) -> Result<()> {
        self.network.set_waveform(id, waveform)?;
        self.rhs.register(&self.network);
        Ok(())
    }

    /// Change the output clamp of a voltage source from the next step on.
    pub fn set_voltage_limits(&mut self, id: DeviceId, lower: f64, upper: f64) -> Result<()> {
        self.network.set_voltage_limits(id, lower, upper)?;
        self.rhs.invalidate_basis();
        Ok(())
    }

    /// Replace the curve of a nonlinear device. See
    /// [`Network::set_characteristic`].
    pub fn set_characteristic(&mut self, id: DeviceId, characteristic: Characteristic) -> Result<()> {
        self.network.set_characteristic(id, characteristic)
    }

    /// Reload `file` if it changed on disk and hand the new curve to device
    /// `id`.
    ///
    /// Returns `Ok(true)` when the device got a new curve. A file that fails
    /// to load is reported as an error and the device keeps its old curve.
    pub fn refresh_characteristic(&mut self, id: DeviceId, file: &mut CharacteristicFile) -> Result<bool> {
        if !file.refresh()? {
            return Ok(false);
        }
        self.network.set_characteristic(id, file.data().clone())?;
        info!(
            "t={:.6e}: reloaded characteristic '{}'",
            self.time,
            file.path().display()
        );
        Ok(true)
    }

    /// Simulation time of the last committed step.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Potential vector of the last committed step (node rows, then branch
    /// rows).
    pub fn potentials(&self) -> &[f64] {
        &self.committed
    }

    /// Committed potential of `node`.
    pub fn potential(&self, node: usize) -> Option<f64> {
        self.committed.get(node).copied()
    }

    /// Get a reference to the network.
    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.network.device(id)
    }

    pub fn current(&self, id: DeviceId) -> Option<f64> {
        self.device(id).map(Device::current)
    }

    pub fn voltage(&self, id: DeviceId) -> Option<f64> {
        self.device(id).map(Device::voltage)
    }

    /// Running maximum used for steady-state detection.
    pub fn max_abs(&self, id: DeviceId) -> Option<f64> {
        self.device(id).map(Device::max_abs_value)
    }

    /// Present currents of the members of a coupled group, in member order.
    pub fn group_currents(&self, id: GroupId) -> Option<Vec<f64>> {
        let group = self.network.groups().get(id.0)?;
        group
            .members()
            .iter()
            .map(|&member| self.current(member))
            .collect()
    }

    /// Report of the last committed step.
    pub fn last_report(&self) -> &StepReport {
        &self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::characteristic::Interpolation;
    use crate::components::{
        Conduction, DeviceKind, MutualCoupling, SwitchKind, SwitchParams, TimeFunction, Waveform,
    };
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::f64::consts::PI;

    fn rc_network() -> (Network, DeviceId) {
        let mut net = Network::new();
        let a = net.node("in");
        let b = net.node("out");
        net.add_voltage_source("V1", [a, 0], TimeFunction::constant(10.0))
            .unwrap();
        net.add_resistor("R1", [a, b], 1e3).unwrap();
        let c = net.add_capacitor("C1", [b, 0], 1e-6).unwrap();
        (net, c)
    }

    fn diode() -> SwitchParams {
        SwitchParams::new(1e-3, 1e8, 0.6)
    }

    #[test]
    fn test_rc_charge_backward_euler() {
        let (net, c) = rc_network();
        let mut sim = Simulator::new(net, SimulatorConfig::new()).unwrap();
        for _ in 0..1000 {
            let report = sim.step().unwrap();
            assert_eq!(report.iterations, 1);
        }
        let expected = 10.0 * (1.0 - (1.0f64 / 1.001).powi(1000));
        let v = sim.voltage(c).unwrap();
        assert_relative_eq!(v, expected, max_relative = 1e-9);
        assert_relative_eq!(sim.current(c).unwrap(), (10.0 - v) / 1e3, max_relative = 1e-9);
        assert_relative_eq!(sim.time(), 1e-3, max_relative = 1e-9);
    }

    #[test]
    fn test_rc_charge_all_schemes() {
        let exact = 10.0 * (1.0 - (-1.0f64).exp());
        for scheme in [
            IntegrationScheme::BackwardEuler,
            IntegrationScheme::Trapezoidal,
            IntegrationScheme::GearShichman,
        ] {
            let (net, c) = rc_network();
            let mut sim = Simulator::new(net, SimulatorConfig::new().with_scheme(scheme)).unwrap();
            assert_eq!(sim.run_until(1e-3).unwrap(), 1000);
            assert_abs_diff_eq!(sim.voltage(c).unwrap(), exact, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_diode_rectifier_turns_on_once() {
        let mut net = Network::new();
        let src = net.node("src");
        let out = net.node("out");
        net.add_voltage_source("V1", [src, 0], TimeFunction::new(Waveform::sine(10.0, 50.0)))
            .unwrap();
        let d = net.add_diode("D1", [src, out], diode()).unwrap();
        net.add_resistor("R1", [out, 0], 100.0).unwrap();
        let mut sim = Simulator::new(net, SimulatorConfig::new()).unwrap();

        let source = |t: f64| 10.0 * (2.0 * PI * 50.0 * t).sin();
        let mut turned_on = Vec::new();
        let mut was_on = false;
        for k in 0..5000 {
            sim.step().unwrap();
            let is_on = sim.device(d).unwrap().as_switch().unwrap().is_on();
            if is_on != was_on {
                turned_on.push((k, sim.time()));
                was_on = is_on;
            }
            if is_on {
                assert!(sim.current(d).unwrap() > 0.0);
            }
        }

        assert_eq!(turned_on.len(), 1);
        let (_, t_on) = turned_on[0];
        // First step whose source voltage exceeds the forward voltage
        assert!(source(t_on) > 0.6);
        assert!(source(t_on - 1e-6) <= 0.6 + 1e-5);
    }

    #[test]
    fn test_thyristor_holds_through_recovery_time() {
        let mut net = Network::new();
        let src = net.node("src");
        let out = net.node("out");
        // 10 us period: the current reverses about 5 us after firing
        net.add_voltage_source("V1", [src, 0], TimeFunction::new(Waveform::sine(10.0, 1e5)))
            .unwrap();
        let th = net
            .add_switch("T1", [src, out], SwitchKind::Thyristor, diode().with_recovery_time(10e-6))
            .unwrap();
        net.add_resistor("R1", [out, 0], 10.0).unwrap();
        let mut sim = Simulator::new(net, SimulatorConfig::new().with_dt(1e-7)).unwrap();
        sim.set_gate(th, true).unwrap();

        let mut reversed_while_on = false;
        for _ in 0..149 {
            sim.step().unwrap();
            let switch = sim.device(th).unwrap().as_switch().unwrap();
            assert!(switch.is_on(), "off at t={:e}", sim.time());
            assert_eq!(switch.conduction(), Conduction::Forward);
            reversed_while_on |= sim.current(th).unwrap() < 0.0;
        }
        assert!(reversed_while_on);

        sim.step().unwrap();
        sim.step().unwrap();
        let switch = sim.device(th).unwrap().as_switch().unwrap();
        assert!(!switch.is_on());
        assert!(switch.last_switch_event() >= 10e-6);
    }

    #[test]
    fn test_coupled_transformer() {
        let mut net = Network::new();
        let a = net.node("a");
        let b = net.node("b");
        let c = net.node("c");
        net.add_voltage_source("V1", [a, 0], TimeFunction::constant(10.0))
            .unwrap();
        net.add_resistor("R1", [a, b], 1.0).unwrap();
        let l1 = net.add_inductor("L1", [b, 0], 1e-3).unwrap();
        let l2 = net.add_inductor("L2", [c, 0], 4e-3).unwrap();
        net.add_resistor("R2", [c, 0], 10.0).unwrap();
        let group = net
            .add_coupled_group(&[l1, l2], &[MutualCoupling::coefficient(l1, l2, 0.9)])
            .unwrap();
        let mut sim = Simulator::new(net, SimulatorConfig::new()).unwrap();

        for _ in 0..49 {
            sim.step().unwrap();
        }
        let (i1, i2) = (sim.current(l1).unwrap(), sim.current(l2).unwrap());
        sim.step().unwrap();
        let currents = sim.group_currents(group).unwrap();
        let (j1, j2) = (currents[0], currents[1]);
        let m = 0.9 * (1e-3f64 * 4e-3).sqrt();
        let dt = 1e-6;

        // Backward Euler: v = L di/dt for the whole inductance matrix
        assert_relative_eq!(
            sim.voltage(l1).unwrap(),
            (1e-3 * (j1 - i1) + m * (j2 - i2)) / dt,
            max_relative = 1e-6
        );
        assert_relative_eq!(
            sim.voltage(l2).unwrap(),
            (m * (j1 - i1) + 4e-3 * (j2 - i2)) / dt,
            max_relative = 1e-6
        );
        assert!(j1 > 0.0);
        assert!(j2 < 0.0);
        assert_relative_eq!(sim.voltage(l2).unwrap(), -10.0 * j2, max_relative = 1e-9);
    }

    #[test]
    fn test_commit_then_step_back_is_exact() {
        let mut net = Network::new();
        let src = net.node("src");
        let out = net.node("out");
        net.add_voltage_source("V1", [src, 0], TimeFunction::new(Waveform::sine(10.0, 50.0)))
            .unwrap();
        net.add_diode("D1", [src, out], diode()).unwrap();
        net.add_resistor("R1", [out, 0], 100.0).unwrap();
        net.add_capacitor("C1", [out, 0], 10e-6).unwrap();
        net.add_inductor("L1", [src, 0], 1e-3).unwrap();
        let mut sim = Simulator::new(net, SimulatorConfig::new().with_scheme(IntegrationScheme::Trapezoidal))
            .unwrap();
        for _ in 0..300 {
            sim.step().unwrap();
        }

        type Fingerprint = (Vec<crate::components::BranchState>, Vec<(Option<Conduction>, f64, f64)>);
        let fingerprint = |network: &Network| -> Fingerprint {
            let states = network.devices().iter().map(|d| *d.state()).collect();
            let dynamics = network
                .devices()
                .iter()
                .map(|d| match d.kind() {
                    DeviceKind::Switch(s) => (Some(s.conduction()), s.last_switch_event(), 0.0),
                    DeviceKind::Capacitor(c) => (None, c.capacitance(), 0.0),
                    DeviceKind::VoltageSource(v) => (None, v.function().last_value(), 0.0),
                    _ => (None, 0.0, 0.0),
                })
                .collect();
            (states, dynamics)
        };

        // Commit a fresh solution and roll it back at the network level
        let before = fingerprint(&sim.network);
        let p = sim.potentials.clone();
        let inputs = SourceInputs::EMPTY;
        sim.network.commit(&p, sim.time + 1e-6, &inputs);
        assert_ne!(fingerprint(&sim.network), before);
        assert!(sim.network.step_back());
        assert_eq!(fingerprint(&sim.network), before);
    }

    #[test]
    fn test_step_back_repeats_step_exactly() {
        let (net, c) = rc_network();
        let mut sim = Simulator::new(net, SimulatorConfig::new()).unwrap();
        for _ in 0..10 {
            sim.step().unwrap();
        }
        let time = sim.time();
        let potentials = sim.potentials().to_vec();
        let previous = *sim.device(c).unwrap().state();

        sim.step().unwrap();
        let after = sim.potentials().to_vec();

        assert!(sim.step_back());
        assert_eq!(sim.time(), time);
        assert_eq!(sim.potentials(), &potentials[..]);
        let restored = sim.device(c).unwrap().state();
        assert_eq!(restored.potential, previous.potential);
        assert_eq!(restored.old_current, previous.old_current);

        sim.step().unwrap();
        assert_eq!(sim.potentials(), &after[..]);
    }

    #[test]
    fn test_step_back_bounded_by_depth() {
        let (net, _) = rc_network();
        let mut sim = Simulator::new(net, SimulatorConfig::new().with_history_depth(2)).unwrap();
        for _ in 0..5 {
            sim.step().unwrap();
        }
        assert!(sim.step_back());
        assert!(sim.step_back());
        assert!(!sim.step_back());
        assert_relative_eq!(sim.time(), 3e-6, max_relative = 1e-12);
    }

    #[test]
    fn test_capacitor_initial_voltage() {
        let mut net = Network::new();
        let a = net.node("a");
        let c = net.add_capacitor("C1", [a, 0], 1e-6).unwrap();
        net.add_resistor("R1", [a, 0], 1e3).unwrap();
        net.set_initial_voltage(c, 5.0).unwrap();
        let mut sim = Simulator::new(net, SimulatorConfig::new()).unwrap();

        sim.step().unwrap();
        assert_relative_eq!(sim.voltage(c).unwrap(), 5.0, max_relative = 1e-12);
        // Held by the bootstrap source: the capacitor feeds the resistor
        assert_relative_eq!(sim.current(c).unwrap(), -5e-3, max_relative = 1e-9);

        sim.step().unwrap();
        assert_relative_eq!(sim.voltage(c).unwrap(), 5.0 / 1.001, max_relative = 1e-12);
    }

    #[test]
    fn test_initial_voltage_without_bootstrap() {
        let mut net = Network::new();
        let a = net.node("a");
        let c = net.add_capacitor("C1", [a, 0], 1e-6).unwrap();
        net.add_resistor("R1", [a, 0], 1e3).unwrap();
        net.set_initial_voltage(c, 5.0).unwrap();
        let config = SimulatorConfig::new().with_initialize_capacitors(false);
        let mut sim = Simulator::new(net, config).unwrap();
        sim.step().unwrap();
        assert_relative_eq!(sim.voltage(c).unwrap(), 5.0 / 1.001, max_relative = 1e-12);
    }

    #[test]
    fn test_relinearization_cap_reported() {
        let mut net = Network::new();
        let a = net.node("a");
        let b = net.node("b");
        net.add_voltage_source("V1", [a, 0], TimeFunction::constant(10.0))
            .unwrap();
        net.add_diode("D1", [a, b], diode()).unwrap();
        net.add_resistor("R1", [b, 0], 10.0).unwrap();

        let config = SimulatorConfig::new().with_max_relinearizations(1);
        let mut sim = Simulator::new(net.clone(), config).unwrap();
        match sim.step() {
            Err(PowerStampError::RelinearizationLimit { iterations, devices, .. }) => {
                assert_eq!(iterations, 1);
                assert_eq!(devices, "D1");
            }
            other => panic!("expected relinearization limit, got {other:?}"),
        }
        assert_eq!(sim.time(), 0.0);
        // The failed step leaves no trace: a retry fails the same way
        let diode = sim.network().find("D1").unwrap();
        assert!(!sim.device(diode).unwrap().as_switch().unwrap().is_on());
        assert_eq!(sim.current(diode), Some(0.0));
        assert!(matches!(
            sim.step(),
            Err(PowerStampError::RelinearizationLimit { iterations: 1, .. })
        ));

        let mut sim = Simulator::new(net, SimulatorConfig::new()).unwrap();
        let report = sim.step().unwrap();
        assert_eq!(report.iterations, 2);
        assert_eq!(report.switch_events, 1);
        assert_relative_eq!(sim.potential(b).unwrap(), (10.0 - 0.6) / 10.001 * 10.0, max_relative = 1e-9);
    }

    #[test]
    fn test_diode_near_forward_voltage_settles() {
        let build = |volts: f64| {
            let mut net = Network::new();
            let a = net.node("a");
            let b = net.node("b");
            net.add_voltage_source("V1", [a, 0], TimeFunction::constant(volts))
                .unwrap();
            net.add_resistor("R1", [a, b], 1.0).unwrap();
            let d = net.add_diode("D1", [b, 0], diode()).unwrap();
            (Simulator::new(net, SimulatorConfig::new()).unwrap(), d)
        };

        // Below uF: blocking is consistent, one solve per step
        let (mut sim, d) = build(0.597);
        for _ in 0..3 {
            assert_eq!(sim.step().unwrap().iterations, 1);
            assert!(!sim.device(d).unwrap().as_switch().unwrap().is_on());
            assert_relative_eq!(sim.voltage(d).unwrap(), 0.597, max_relative = 1e-6);
        }

        // Above uF: turns on once and stays on with forward current
        let (mut sim, d) = build(0.61);
        assert_eq!(sim.step().unwrap().iterations, 2);
        for _ in 0..3 {
            assert_eq!(sim.step().unwrap().iterations, 1);
            assert!(sim.device(d).unwrap().as_switch().unwrap().is_on());
            assert!(sim.current(d).unwrap() > 0.0);
        }
        assert_relative_eq!(sim.current(d).unwrap(), 0.01 / 1.001, max_relative = 1e-9);
    }

    #[test]
    fn test_rejects_bad_config() {
        let (net, _) = rc_network();
        assert!(matches!(
            Simulator::new(net.clone(), SimulatorConfig::new().with_dt(0.0)),
            Err(PowerStampError::InvalidSimulationParam { .. })
        ));
        assert!(Simulator::new(net.clone(), SimulatorConfig::new().with_history_depth(0)).is_err());
        assert!(Simulator::new(Network::new(), SimulatorConfig::new()).is_err());
        let mut sim = Simulator::new(net, SimulatorConfig::new()).unwrap();
        assert!(sim.step_dt(-1e-6).is_err());
    }

    #[test]
    fn test_controlled_source_reads_committed_values() {
        let mut net = Network::new();
        let a = net.node("a");
        let b = net.node("b");
        net.add_voltage_source("V1", [a, 0], TimeFunction::constant(2.0))
            .unwrap();
        net.add_resistor("R1", [a, 0], 1.0).unwrap();
        net.add_voltage_source(
            "E1",
            [b, 0],
            TimeFunction::new(Waveform::PotentialControlled {
                nodes: [a, 0],
                gain: 3.0,
            }),
        )
        .unwrap();
        net.add_resistor("R2", [b, 0], 1.0).unwrap();
        let mut sim = Simulator::new(net, SimulatorConfig::new()).unwrap();

        // One step of delay behind the controlling potential
        sim.step().unwrap();
        assert_eq!(sim.potential(b), Some(0.0));
        sim.step().unwrap();
        assert_relative_eq!(sim.potential(b).unwrap(), 6.0, max_relative = 1e-12);
    }

    #[test]
    fn test_waveform_change_reaches_basis() {
        let mut net = Network::new();
        let a = net.node("a");
        let v1 = net
            .add_voltage_source("V1", [a, 0], TimeFunction::constant(10.0))
            .unwrap();
        let r1 = net.add_resistor("R1", [a, 0], 1.0).unwrap();
        let mut sim = Simulator::new(net, SimulatorConfig::new()).unwrap();
        sim.step().unwrap();
        assert_relative_eq!(sim.current(r1).unwrap(), 10.0, max_relative = 1e-12);

        sim.set_waveform(v1, Waveform::Constant(4.0)).unwrap();
        sim.step().unwrap();
        assert_relative_eq!(sim.current(r1).unwrap(), 4.0, max_relative = 1e-12);

        sim.set_voltage_limits(v1, 0.0, 3.0).unwrap();
        sim.step().unwrap();
        assert_relative_eq!(sim.potential(a).unwrap(), 3.0, max_relative = 1e-12);

        sim.set_voltage_limits(v1, -10.0, 10.0).unwrap();
        sim.set_waveform(v1, Waveform::sine(2.0, 50.0)).unwrap();
        for _ in 0..3 {
            sim.step().unwrap();
            let expected = 2.0 * (2.0 * PI * 50.0 * sim.time()).sin();
            assert_abs_diff_eq!(sim.potential(a).unwrap(), expected, epsilon = 1e-9);
        }

        assert!(sim.set_waveform(r1, Waveform::Constant(1.0)).is_err());
    }

    #[test]
    fn test_characteristic_reload_mid_run() {
        use std::time::{Duration, SystemTime};

        fn rewrite(path: &std::path::Path, content: &str, secs: u64) {
            std::fs::write(path, content).unwrap();
            std::fs::File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(SystemTime::now() + Duration::from_secs(secs))
                .unwrap();
        }

        let path = std::env::temp_dir().join(format!("powerstamp_{}_reload_mid_run.txt", std::process::id()));
        std::fs::write(&path, "0 10\n100 10\n").unwrap();
        let mut file = CharacteristicFile::open(&path, Interpolation::Linear).unwrap();

        let mut net = Network::new();
        let a = net.node("a");
        net.add_voltage_source("V1", [a, 0], TimeFunction::constant(10.0))
            .unwrap();
        let r = net.add_nonlinear_resistor("RN", [a, 0], file.data().clone()).unwrap();
        let mut sim = Simulator::new(net, SimulatorConfig::new()).unwrap();
        for _ in 0..3 {
            sim.step().unwrap();
        }
        assert_relative_eq!(sim.current(r).unwrap(), 1.0, max_relative = 1e-12);
        assert!(!sim.refresh_characteristic(r, &mut file).unwrap());

        rewrite(&path, "0 20\n100 20\n", 5);
        assert!(sim.refresh_characteristic(r, &mut file).unwrap());
        let report = sim.step().unwrap();
        assert!(report.parameter_changed);
        assert_relative_eq!(sim.current(r).unwrap(), 0.5, max_relative = 1e-12);

        // A broken rewrite leaves the device on the curve it had
        rewrite(&path, "0 5\nbroken\n", 10);
        assert!(sim.refresh_characteristic(r, &mut file).is_err());
        for _ in 0..3 {
            let report = sim.step().unwrap();
            assert!(!report.parameter_changed);
        }
        assert_relative_eq!(sim.current(r).unwrap(), 0.5, max_relative = 1e-12);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_fork_steps_independently() {
        let (net, c) = rc_network();
        let mut sim = Simulator::new(net, SimulatorConfig::new()).unwrap();
        for _ in 0..5 {
            sim.step().unwrap();
        }
        let time = sim.time();
        let voltage = sim.voltage(c).unwrap();

        let mut fork = sim.clone();
        for _ in 0..5 {
            fork.step().unwrap();
        }
        assert_eq!(sim.time(), time);
        assert_eq!(sim.voltage(c), Some(voltage));

        for _ in 0..5 {
            sim.step().unwrap();
        }
        assert_eq!(sim.time(), fork.time());
        assert_eq!(sim.potentials(), fork.potentials());

        // The fork's right-hand side is its own
        let v1 = fork.network().find("V1").unwrap();
        fork.set_waveform(v1, Waveform::Constant(0.0)).unwrap();
        fork.step().unwrap();
        sim.step().unwrap();
        assert!(fork.voltage(c).unwrap() < sim.voltage(c).unwrap());
    }
}
