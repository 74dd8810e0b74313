//! Incremental right-hand-side assembly.
//!
//! Devices whose B contribution is constant (sources with a constant time
//! function) are stamped once into a basis vector. Every assembly starts
//! from a copy of the basis and adds the remaining devices on top. The
//! basis is rebuilt only when a source's waveform or output clamp changes.

use log::debug;

use super::StepContext;
use crate::circuit::{DeviceId, Network};
use crate::components::SourceInputs;

/// Accumulator for the B vector.
#[derive(Debug, Clone)]
pub struct RhsAssembler {
    basis: Vec<f64>,
    b: Vec<f64>,
    basis_devices: Vec<DeviceId>,
    non_basis_devices: Vec<DeviceId>,
    update_all: bool,
    dirty: bool,
}

impl RhsAssembler {
    /// Create an assembler for `network`, partitioning its devices.
    pub fn new(network: &Network) -> Self {
        let size = network.size();
        let mut assembler = Self {
            basis: vec![0.0; size],
            b: vec![0.0; size],
            basis_devices: Vec::new(),
            non_basis_devices: Vec::new(),
            update_all: true,
            dirty: true,
        };
        assembler.register(network);
        assembler
    }

    /// Re-partition the devices of `network` into basis and non-basis sets.
    pub fn register(&mut self, network: &Network) {
        self.basis_devices.clear();
        self.non_basis_devices.clear();
        for device in network.devices().iter().filter(|d| d.stamps_rhs()) {
            if device.is_basis() {
                self.basis_devices.push(device.id());
            } else {
                self.non_basis_devices.push(device.id());
            }
        }
        let size = network.size();
        self.basis.resize(size, 0.0);
        self.b.resize(size, 0.0);
        self.update_all = true;
        self.dirty = true;
    }

    /// Independent copy bound to `network`, used when a simulator is forked.
    pub fn snapshot(&self, network: &Network) -> Self {
        let mut copy = self.clone();
        copy.register(network);
        copy
    }

    /// Force the basis vector to be recomputed on the next assembly, after
    /// a change that keeps the partition but alters a basis contribution.
    pub fn invalidate_basis(&mut self) {
        self.update_all = true;
        self.dirty = true;
    }

    /// The next call to [`assemble`](Self::assemble) must rebuild B.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn basis_devices(&self) -> &[DeviceId] {
        &self.basis_devices
    }

    pub fn non_basis_devices(&self) -> &[DeviceId] {
        &self.non_basis_devices
    }

    /// Last assembled vector.
    pub fn vector(&self) -> &[f64] {
        &self.b
    }

    /// Build B for the present step.
    pub fn assemble(&mut self, network: &Network, ctx: &StepContext, inputs: &SourceInputs<'_>) -> &[f64] {
        if self.update_all {
            self.basis.fill(0.0);
            for id in &self.basis_devices {
                if let Some(device) = network.device(*id) {
                    device.stamp_rhs(&mut self.basis, ctx, inputs);
                }
            }
            self.update_all = false;
            self.dirty = true;
            debug!("Recomputed basis vector from {} sources", self.basis_devices.len());
        }

        if self.dirty {
            self.b.copy_from_slice(&self.basis);
            for id in &self.non_basis_devices {
                if let Some(device) = network.device(*id) {
                    device.stamp_rhs(&mut self.b, ctx, inputs);
                }
            }
            self.dirty = false;
        }
        &self.b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::IntegrationScheme;
    use crate::components::{TimeFunction, Waveform};

    fn network() -> Network {
        let mut net = Network::with_nodes(3);
        net.add_voltage_source("V1", [1, 0], TimeFunction::constant(5.0))
            .unwrap();
        net.add_current_source("I1", [2, 0], TimeFunction::new(Waveform::sine(1.0, 1.0)))
            .unwrap();
        net.add_resistor("R1", [1, 2], 10.0).unwrap();
        net.add_capacitor("C1", [2, 0], 1e-6).unwrap();
        net.finalize(2);
        net
    }

    fn ctx_at(t: f64) -> StepContext {
        let mut ctx = StepContext::new(IntegrationScheme::BackwardEuler);
        ctx.begin_step(t, 1e-6, false);
        ctx
    }

    #[test]
    fn test_partition() {
        let net = network();
        let rhs = RhsAssembler::new(&net);
        assert_eq!(rhs.basis_devices(), &[DeviceId(0)]);
        // Resistor stamps nothing into B
        assert_eq!(rhs.non_basis_devices(), &[DeviceId(1), DeviceId(3)]);
    }

    #[test]
    fn test_assembly_adds_time_varying_part() {
        let net = network();
        let mut rhs = RhsAssembler::new(&net);
        let b = rhs.assemble(&net, &ctx_at(0.25), &SourceInputs::EMPTY).to_vec();
        assert_eq!(b[3], 5.0);
        // sin(pi/2) = 1 A flowing from node 2 into ground through the source
        assert!((b[2] + 1.0).abs() < 1e-12);

        rhs.mark_dirty();
        let b = rhs.assemble(&net, &ctx_at(0.5), &SourceInputs::EMPTY).to_vec();
        assert_eq!(b[3], 5.0);
        assert!(b[2].abs() < 1e-12);
    }

    #[test]
    fn test_clean_assembler_reuses_vector() {
        let net = network();
        let mut rhs = RhsAssembler::new(&net);
        let first = rhs.assemble(&net, &ctx_at(0.25), &SourceInputs::EMPTY).to_vec();
        // Not dirty: the new time is not stamped
        let second = rhs.assemble(&net, &ctx_at(0.5), &SourceInputs::EMPTY).to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let net = network();
        let mut rhs = RhsAssembler::new(&net);
        rhs.assemble(&net, &ctx_at(0.25), &SourceInputs::EMPTY);
        let mut copy = rhs.snapshot(&net);
        copy.mark_dirty();
        copy.assemble(&net, &ctx_at(0.5), &SourceInputs::EMPTY);
        assert!((rhs.vector()[2] + 1.0).abs() < 1e-12);
        assert!(copy.vector()[2].abs() < 1e-12);
    }
}
