//! Network validation.

use crate::components::DeviceKind;
use crate::error::{PowerStampError, Result};

use super::{Network, GROUND};

/// Validate a network for simulation.
///
/// Checks:
/// - The network has at least one device
/// - Every node reaches ground through devices that stamp a conductance or
///   a branch (current sources do not count)
pub fn validate_network(network: &Network) -> Result<()> {
    if network.devices().is_empty() {
        return Err(PowerStampError::invalid_param("network has no devices"));
    }

    let n = network.num_nodes();
    let mut parent: Vec<usize> = (0..n).collect();
    for device in network.devices() {
        if matches!(device.kind(), DeviceKind::CurrentSource(_)) {
            continue;
        }
        let [a, b] = device.terminals();
        let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
        if ra != rb {
            parent[ra] = rb;
        }
    }

    let ground = find(&mut parent, GROUND);
    let floating: Vec<&str> = (1..n)
        .filter(|&node| find(&mut parent, node) != ground)
        .filter_map(|node| network.node_name(node))
        .collect();
    if !floating.is_empty() {
        return Err(PowerStampError::invalid_param(format!(
            "nodes without a path to ground: {}",
            floating.join(", ")
        )));
    }
    Ok(())
}

fn find(parent: &mut [usize], mut node: usize) -> usize {
    while parent[node] != node {
        parent[node] = parent[parent[node]];
        node = parent[node];
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::TimeFunction;

    #[test]
    fn test_empty_network_rejected() {
        assert!(validate_network(&Network::new()).is_err());
    }

    #[test]
    fn test_floating_node_rejected() {
        let mut net = Network::new();
        let a = net.node("a");
        let b = net.node("b");
        let c = net.node("c");
        net.add_resistor("R1", [a, 0], 1.0).unwrap();
        net.add_capacitor("C1", [b, c], 1e-6).unwrap();
        let err = validate_network(&net).unwrap_err().to_string();
        assert!(err.contains("b, c"), "{err}");
    }

    #[test]
    fn test_current_source_is_not_a_path() {
        let mut net = Network::new();
        let a = net.node("a");
        net.add_current_source("I1", [a, 0], TimeFunction::constant(1.0))
            .unwrap();
        assert!(validate_network(&net).is_err());
        net.add_inductor("L1", [a, 0], 1e-3).unwrap();
        assert!(validate_network(&net).is_ok());
    }
}
