//! Core types for network representation.

use std::fmt;
use std::str::FromStr;

/// Index of the reference (ground) node in the potential vector.
pub const GROUND: usize = 0;

/// A unique identifier for a device calculator in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

/// A unique identifier for a coupled-inductor group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub usize);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "K{}", self.0)
    }
}

/// Implicit time-integration scheme used to build companion models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IntegrationScheme {
    /// First-order backward Euler
    #[default]
    BackwardEuler,
    /// Second-order trapezoidal rule
    Trapezoidal,
    /// Two-step Gear-Shichman (BDF2)
    GearShichman,
}

impl IntegrationScheme {
    /// Factor applied to `dt / L` for the inductive conductance.
    ///
    /// 1 for backward Euler, 1/2 for trapezoidal, 2/3 for Gear-Shichman.
    pub fn inductive_coefficient(self) -> f64 {
        match self {
            IntegrationScheme::BackwardEuler => 1.0,
            IntegrationScheme::Trapezoidal => 0.5,
            IntegrationScheme::GearShichman => 2.0 / 3.0,
        }
    }

    /// Factor applied to `C / dt` for the capacitive conductance.
    pub fn capacitive_coefficient(self) -> f64 {
        match self {
            IntegrationScheme::BackwardEuler => 1.0,
            IntegrationScheme::Trapezoidal => 2.0,
            IntegrationScheme::GearShichman => 1.5,
        }
    }

    /// Short name used on the command line.
    pub fn short_name(self) -> &'static str {
        match self {
            IntegrationScheme::BackwardEuler => "be",
            IntegrationScheme::Trapezoidal => "trz",
            IntegrationScheme::GearShichman => "gs",
        }
    }
}

impl fmt::Display for IntegrationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntegrationScheme::BackwardEuler => "backward-euler",
            IntegrationScheme::Trapezoidal => "trapezoidal",
            IntegrationScheme::GearShichman => "gear-shichman",
        };
        f.write_str(name)
    }
}

impl FromStr for IntegrationScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "be" | "euler" | "backward-euler" => Ok(IntegrationScheme::BackwardEuler),
            "trz" | "trap" | "trapezoidal" => Ok(IntegrationScheme::Trapezoidal),
            "gs" | "gear" | "gear-shichman" | "bdf2" => Ok(IntegrationScheme::GearShichman),
            other => Err(format!("unknown integration scheme '{other}' (expected be, trz or gs)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_parsing() {
        assert_eq!("be".parse::<IntegrationScheme>(), Ok(IntegrationScheme::BackwardEuler));
        assert_eq!("TRZ".parse::<IntegrationScheme>(), Ok(IntegrationScheme::Trapezoidal));
        assert_eq!("gear".parse::<IntegrationScheme>(), Ok(IntegrationScheme::GearShichman));
        assert!("rk4".parse::<IntegrationScheme>().is_err());
    }

    #[test]
    fn test_trapezoidal_doubles_capacitive_conductance() {
        let be = IntegrationScheme::BackwardEuler.capacitive_coefficient();
        let trz = IntegrationScheme::Trapezoidal.capacitive_coefficient();
        assert_eq!(trz, 2.0 * be);
    }
}
