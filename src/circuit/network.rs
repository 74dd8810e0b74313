//! Network structure: nodes, devices and coupled groups.

use std::collections::HashMap;

use log::info;

use super::types::{DeviceId, GroupId, GROUND};
use crate::characteristic::{Characteristic, Interpolation};
use crate::components::{
    Capacitor, CoupledInductorGroup, CurrentSource, Device, DeviceKind, Inductor, MutualCoupling,
    Resistor, SourceInputs, Switch, SwitchKind, SwitchParams, TimeFunction, VoltageLimits,
    VoltageSource, Waveform,
};
use crate::error::{PowerStampError, Result};
use crate::solver::{StepContext, SystemMatrix};

/// A network of two-terminal devices ready for stamping.
///
/// Node 0 is the reference node. Branch rows (source currents) follow the
/// node rows; they are numbered when the network is finalized, so nodes
/// may be added at any time before that.
#[derive(Debug, Clone)]
pub struct Network {
    node_map: HashMap<String, usize>,
    node_names: Vec<String>,
    num_branches: usize,
    devices: Vec<Device>,
    groups: Vec<CoupledInductorGroup>,
    device_names: HashMap<String, DeviceId>,
    finalized: bool,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    /// Create an empty network holding only the reference node.
    pub fn new() -> Self {
        let mut node_map = HashMap::new();
        node_map.insert("0".to_string(), GROUND);
        node_map.insert("GND".to_string(), GROUND);
        Self {
            node_map,
            node_names: vec!["0".to_string()],
            num_branches: 0,
            devices: Vec::new(),
            groups: Vec::new(),
            device_names: HashMap::new(),
            finalized: false,
        }
    }

    /// Create a network with `num_nodes` anonymous nodes (including ground).
    pub fn with_nodes(num_nodes: usize) -> Self {
        let mut network = Self::new();
        for _ in 1..num_nodes {
            network.add_node();
        }
        network
    }

    /// Get or create the node called `name`. "0" and "GND" are the reference.
    pub fn node(&mut self, name: &str) -> usize {
        if let Some(&index) = self.node_map.get(name) {
            return index;
        }
        let index = self.node_names.len();
        self.node_map.insert(name.to_string(), index);
        self.node_names.push(name.to_string());
        index
    }

    /// Add an anonymous node.
    pub fn add_node(&mut self) -> usize {
        let index = self.node_names.len();
        self.node_names.push(format!("n{index}"));
        index
    }

    pub fn node_name(&self, index: usize) -> Option<&str> {
        self.node_names.get(index).map(String::as_str)
    }

    /// Number of nodes including the reference node.
    pub fn num_nodes(&self) -> usize {
        self.node_names.len()
    }

    /// Number of branch rows.
    pub fn num_branches(&self) -> usize {
        self.num_branches
    }

    /// Dimension of the system: nodes plus branch rows.
    pub fn size(&self) -> usize {
        self.num_nodes() + self.num_branches
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub(crate) fn devices_mut(&mut self) -> &mut [Device] {
        &mut self.devices
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id.0)
    }

    /// Look a device up by name.
    pub fn find(&self, name: &str) -> Option<DeviceId> {
        self.device_names.get(name).copied()
    }

    pub fn groups(&self) -> &[CoupledInductorGroup] {
        &self.groups
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    // ============ Construction ============

    pub fn add_resistor(&mut self, name: &str, terminals: [usize; 2], resistance: f64) -> Result<DeviceId> {
        positive(name, "resistance", resistance)?;
        self.add_device(name, terminals, DeviceKind::Resistor(Resistor::new(resistance)))
    }

    /// Resistor following R(|v|), stamped through the reciprocal curve.
    pub fn add_nonlinear_resistor(
        &mut self,
        name: &str,
        terminals: [usize; 2],
        characteristic: Characteristic,
    ) -> Result<DeviceId> {
        self.add_device(name, terminals, DeviceKind::Resistor(Resistor::nonlinear(characteristic)))
    }

    pub fn add_capacitor(&mut self, name: &str, terminals: [usize; 2], capacitance: f64) -> Result<DeviceId> {
        positive(name, "capacitance", capacitance)?;
        self.add_device(name, terminals, DeviceKind::Capacitor(Capacitor::new(capacitance)))
    }

    /// Capacitor following C(|v|). The curve must use log-y interpolation.
    pub fn add_nonlinear_capacitor(
        &mut self,
        name: &str,
        terminals: [usize; 2],
        characteristic: Characteristic,
    ) -> Result<DeviceId> {
        capacitance_curve(name, &characteristic)?;
        self.add_device(name, terminals, DeviceKind::Capacitor(Capacitor::nonlinear(characteristic)))
    }

    /// Give a capacitor an initial voltage. It is enforced by a bootstrap
    /// step that treats the capacitor as a voltage source.
    pub fn set_initial_voltage(&mut self, id: DeviceId, voltage: f64) -> Result<()> {
        self.check_open()?;
        let next_branch = self.num_branches;
        let device = self.device_entry(id)?;
        let name = device.name().to_string();
        let DeviceKind::Capacitor(capacitor) = &mut device.kind else {
            return Err(PowerStampError::invalid_device(name, "only capacitors take an initial voltage"));
        };
        let row = capacitor.init_branch().unwrap_or(next_branch);
        capacitor.set_initial_voltage(voltage, row);
        // Only the difference of the two potentials enters the history
        device.state.voltage = voltage;
        device.state.potential = [voltage, 0.0];
        device.state.old_potential = [voltage, 0.0];
        if row == next_branch {
            self.num_branches += 1;
        }
        Ok(())
    }

    pub fn add_inductor(&mut self, name: &str, terminals: [usize; 2], inductance: f64) -> Result<DeviceId> {
        positive(name, "inductance", inductance)?;
        self.add_device(name, terminals, DeviceKind::Inductor(Inductor::new(inductance)))
    }

    pub fn add_nonlinear_inductor(
        &mut self,
        name: &str,
        terminals: [usize; 2],
        characteristic: Characteristic,
    ) -> Result<DeviceId> {
        inductance_curve(name, &characteristic)?;
        self.add_device(name, terminals, DeviceKind::Inductor(Inductor::nonlinear(characteristic)))
    }

    /// Set the current an inductor carries before the first step.
    pub fn set_initial_current(&mut self, id: DeviceId, current: f64) -> Result<()> {
        self.check_open()?;
        let device = self.device_entry(id)?;
        if !matches!(device.kind, DeviceKind::Inductor(_)) {
            let name = device.name().to_string();
            return Err(PowerStampError::invalid_device(name, "only inductors take an initial current"));
        }
        device.state.current = current;
        device.state.old_current = current;
        device.state.old_old_current = current;
        Ok(())
    }

    pub fn add_voltage_source(
        &mut self,
        name: &str,
        terminals: [usize; 2],
        function: TimeFunction,
    ) -> Result<DeviceId> {
        let branch = self.num_branches;
        let id = self.add_device(
            name,
            terminals,
            DeviceKind::VoltageSource(VoltageSource::new(branch, function)),
        )?;
        self.num_branches += 1;
        Ok(id)
    }

    /// Clamp a voltage source's output to `[lower, upper]`.
    pub fn set_voltage_limits(&mut self, id: DeviceId, lower: f64, upper: f64) -> Result<()> {
        let device = self.device_entry(id)?;
        let name = device.name().to_string();
        if !(lower <= upper) {
            return Err(PowerStampError::invalid_device(
                name,
                format!("voltage limits [{lower}, {upper}] are empty"),
            ));
        }
        match &mut device.kind {
            DeviceKind::VoltageSource(v) => {
                v.set_limits(VoltageLimits { lower, upper });
                Ok(())
            }
            _ => Err(PowerStampError::invalid_device(name, "not a voltage source")),
        }
    }

    pub fn add_current_source(
        &mut self,
        name: &str,
        terminals: [usize; 2],
        function: TimeFunction,
    ) -> Result<DeviceId> {
        self.add_device(name, terminals, DeviceKind::CurrentSource(CurrentSource::new(function)))
    }

    /// Add a switch. Terminal 0 is the anode (drain, collector).
    pub fn add_switch(
        &mut self,
        name: &str,
        terminals: [usize; 2],
        kind: SwitchKind,
        params: SwitchParams,
    ) -> Result<DeviceId> {
        positive(name, "on resistance", params.r_on)?;
        positive(name, "off resistance", params.r_off)?;
        if !(params.r_on < params.r_off) {
            return Err(PowerStampError::invalid_device(name, "on resistance must be below off resistance"));
        }
        if !(params.u_forward >= 0.0) {
            return Err(PowerStampError::invalid_device(name, "forward voltage must not be negative"));
        }
        if kind == SwitchKind::Thyristor && !(params.recovery_time >= 0.0) {
            return Err(PowerStampError::invalid_device(name, "recovery time must not be negative"));
        }
        self.add_device(name, terminals, DeviceKind::Switch(Switch::new(kind, params)))
    }

    /// Shorthand for a diode.
    pub fn add_diode(&mut self, name: &str, terminals: [usize; 2], params: SwitchParams) -> Result<DeviceId> {
        self.add_switch(name, terminals, SwitchKind::Diode, params)
    }

    /// Set a switch's gate signal.
    pub fn set_gate(&mut self, id: DeviceId, gate: bool) -> Result<()> {
        let device = self.device_entry(id)?;
        if device.set_gate(gate) {
            Ok(())
        } else {
            let name = device.name().to_string();
            Err(PowerStampError::invalid_device(name, "device has no gate"))
        }
    }

    /// Replace the curve of a nonlinear resistor, capacitor or inductor.
    ///
    /// Allowed while a simulator runs the network. The new curve is read at
    /// the next step's prepare phase, subject to the usual relative-change
    /// threshold.
    pub fn set_characteristic(&mut self, id: DeviceId, characteristic: Characteristic) -> Result<()> {
        let device = self.device_entry(id)?;
        let name = device.name().to_string();
        match device.kind {
            DeviceKind::Capacitor(_) => capacitance_curve(&name, &characteristic)?,
            DeviceKind::Inductor(_) => inductance_curve(&name, &characteristic)?,
            _ => {}
        }
        if device.replace_characteristic(characteristic) {
            Ok(())
        } else {
            Err(PowerStampError::invalid_device(name, "not a nonlinear device"))
        }
    }

    /// Swap the waveform driving a voltage or current source.
    pub fn set_waveform(&mut self, id: DeviceId, waveform: Waveform) -> Result<()> {
        let device = self.device_entry(id)?;
        if device.set_waveform(waveform) {
            Ok(())
        } else {
            let name = device.name().to_string();
            Err(PowerStampError::invalid_device(name, "not a source"))
        }
    }

    /// Couple inductors magnetically.
    ///
    /// Every member must be a linear inductor not yet in another group; the
    /// resulting inductance matrix must be symmetric positive definite.
    pub fn add_coupled_group(&mut self, members: &[DeviceId], couplings: &[MutualCoupling]) -> Result<GroupId> {
        self.check_open()?;
        let n = members.len();
        let mut self_inductance = Vec::with_capacity(n);
        let mut terminals = Vec::with_capacity(n);

        for (k, &id) in members.iter().enumerate() {
            let device = self
                .device(id)
                .ok_or_else(|| PowerStampError::invalid_param(format!("unknown device {id}")))?;
            if members[..k].contains(&id) {
                return Err(PowerStampError::invalid_device(device.name(), "listed twice in one group"));
            }
            match &device.kind {
                DeviceKind::Inductor(l) if l.is_coupled() => {
                    return Err(PowerStampError::invalid_device(device.name(), "already coupled"));
                }
                DeviceKind::Inductor(l) if l.characteristic().is_some() => {
                    return Err(PowerStampError::invalid_device(
                        device.name(),
                        "nonlinear inductors cannot be coupled",
                    ));
                }
                DeviceKind::Inductor(l) => self_inductance.push(l.inductance()),
                other => {
                    return Err(PowerStampError::invalid_device(
                        device.name(),
                        format!("a {} cannot be magnetically coupled", other.type_name()),
                    ));
                }
            }
            terminals.push(device.terminals());
        }

        let mut matrix = vec![0.0; n * n];
        for k in 0..n {
            matrix[k * n + k] = self_inductance[k];
        }
        for coupling in couplings {
            let name_of = |id: DeviceId| {
                self.device(id)
                    .map(|d| d.name().to_string())
                    .unwrap_or_else(|| id.to_string())
            };
            let invalid = |message: &str| PowerStampError::InvalidCoupling {
                first: name_of(coupling.first),
                second: name_of(coupling.second),
                message: message.to_string(),
            };
            let a = members.iter().position(|&m| m == coupling.first);
            let b = members.iter().position(|&m| m == coupling.second);
            let (Some(a), Some(b)) = (a, b) else {
                return Err(invalid("both inductors must be members of the group"));
            };
            if a == b {
                return Err(invalid("an inductor cannot couple to itself"));
            }
            if matrix[a * n + b] != 0.0 {
                return Err(invalid("coupling declared twice"));
            }
            let m = coupling.inductance(self_inductance[a], self_inductance[b]);
            if !m.is_finite() {
                return Err(invalid("mutual inductance is not finite"));
            }
            matrix[a * n + b] = m;
            matrix[b * n + a] = m;
        }

        let group = CoupledInductorGroup::new(members.to_vec(), terminals, matrix)?;
        for &id in members {
            if let DeviceKind::Inductor(l) = &mut self.devices[id.0].kind {
                l.mark_coupled();
            }
        }
        self.groups.push(group);
        Ok(GroupId(self.groups.len() - 1))
    }

    fn add_device(&mut self, name: &str, terminals: [usize; 2], kind: DeviceKind) -> Result<DeviceId> {
        self.check_open()?;
        if self.device_names.contains_key(name) {
            return Err(PowerStampError::invalid_device(name, "duplicate device name"));
        }
        let size = self.num_nodes();
        for index in terminals {
            if index >= size {
                return Err(PowerStampError::TerminalOutOfRange {
                    name: name.to_string(),
                    index,
                    size,
                });
            }
        }
        if terminals[0] == terminals[1] {
            return Err(PowerStampError::invalid_device(name, "both terminals on the same node"));
        }

        let id = DeviceId(self.devices.len());
        self.devices.push(Device::new(id, name.to_string(), terminals, kind));
        self.device_names.insert(name.to_string(), id);
        Ok(id)
    }

    fn device_entry(&mut self, id: DeviceId) -> Result<&mut Device> {
        self.devices
            .get_mut(id.0)
            .ok_or_else(|| PowerStampError::invalid_param(format!("unknown device {id}")))
    }

    fn check_open(&self) -> Result<()> {
        if self.finalized {
            return Err(PowerStampError::invalid_param("network is already in use by a simulator"));
        }
        Ok(())
    }

    /// Number the branch rows after the node rows and size the histories.
    pub(crate) fn finalize(&mut self, history_depth: usize) {
        if !self.finalized {
            let offset = self.num_nodes();
            for device in &mut self.devices {
                device.offset_branch(offset);
            }
            self.finalized = true;
        }
        for device in &mut self.devices {
            device.set_history_depth(history_depth);
        }
        info!(
            "Network: {} nodes, {} branch rows, {} devices, {} coupled groups",
            self.num_nodes(),
            self.num_branches,
            self.devices.len(),
            self.groups.len()
        );
    }

    // ============ Per-step operations ============

    /// Whether any capacitor needs the initial-voltage bootstrap.
    pub fn has_initial_voltages(&self) -> bool {
        self.devices
            .iter()
            .any(|d| matches!(&d.kind, DeviceKind::Capacitor(c) if c.init_branch().is_some()))
    }

    pub(crate) fn begin_step(&mut self) {
        for device in &mut self.devices {
            device.begin_step();
        }
    }

    /// Undo every change made since [`begin_step`](Self::begin_step).
    pub(crate) fn abort_step(&mut self) {
        for device in &mut self.devices {
            device.abort_step();
        }
    }

    pub(crate) fn prepare_step(&mut self, ctx: &mut StepContext) {
        for device in &mut self.devices {
            device.prepare(ctx);
        }
        for group in &self.groups {
            group.prepare(&mut self.devices);
        }
    }

    pub(crate) fn stamp_matrix(&self, m: &mut SystemMatrix, ctx: &StepContext) {
        for device in &self.devices {
            device.stamp_matrix(m, ctx);
        }
        for group in &self.groups {
            group.stamp_matrix(m, ctx);
        }
    }

    pub(crate) fn compute_currents(&mut self, p: &[f64], ctx: &mut StepContext, inputs: &SourceInputs<'_>) {
        for device in &mut self.devices {
            device.compute_current(p, ctx, inputs);
        }
        for group in &self.groups {
            group.compute_currents(&mut self.devices, p, ctx);
        }
    }

    /// Currents of all devices, indexed by `DeviceId`.
    pub fn currents(&self) -> Vec<f64> {
        self.devices.iter().map(|d| d.current()).collect()
    }

    pub(crate) fn commit(&mut self, p: &[f64], time: f64, inputs: &SourceInputs<'_>) {
        for device in &mut self.devices {
            device.commit(p, time, inputs);
        }
    }

    /// Roll every device back by one step; refused unless all can.
    pub(crate) fn step_back(&mut self) -> bool {
        if !self.devices.iter().all(Device::can_step_back) {
            return false;
        }
        for device in &mut self.devices {
            device.step_back();
        }
        true
    }
}

fn capacitance_curve(name: &str, characteristic: &Characteristic) -> Result<()> {
    if characteristic.mode() != Interpolation::Log {
        return Err(PowerStampError::invalid_device(
            name,
            "capacitance curves must use log-y interpolation",
        ));
    }
    if characteristic.y().iter().any(|&c| !(c > 0.0)) {
        return Err(PowerStampError::invalid_device(name, "capacitance samples must be positive"));
    }
    Ok(())
}

fn inductance_curve(name: &str, characteristic: &Characteristic) -> Result<()> {
    if characteristic.y().iter().any(|&l| !(l > 0.0)) {
        return Err(PowerStampError::invalid_device(name, "inductance samples must be positive"));
    }
    Ok(())
}

fn positive(name: &str, what: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(PowerStampError::invalid_device(
            name,
            format!("{what} must be positive and finite, got {value}"),
        ))
    }
}
