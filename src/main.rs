//! Powerstamp - companion-model circuit stepping from the command line.
//!
//! # Usage
//!
//! ```bash
//! powerstamp eval cap.txt 0 50 250 --log
//! powerstamp rectifier --scheme trz --dt 1u --steps 40000 > rectifier.csv
//! ```

use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use powerstamp::characteristic::{read_characteristic, Interpolation};
use powerstamp::components::{SwitchParams, TimeFunction, Waveform};
use powerstamp::error::Result;
use powerstamp::trace::TraceWriter;
use powerstamp::units::parse_arg;
use powerstamp::{IntegrationScheme, Network, Simulator, SimulatorConfig};

/// Companion-model stamping engine for power-electronics circuits
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interpolate a two-column characteristic file
    Eval {
        /// Path to the characteristic file ("x y" per line)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Query points
        #[arg(value_name = "X", required = true, allow_hyphen_values = true, value_parser = parse_arg)]
        x: Vec<f64>,

        /// Interpolate log10(y) instead of y
        #[arg(long)]
        log: bool,

        /// Evaluate 1/y (reluctance curves)
        #[arg(long)]
        inverse: bool,
    },

    /// Simulate a half-wave rectifier and print CSV to stdout
    Rectifier {
        /// Integration scheme (be, trz, gs)
        #[arg(long, default_value = "be")]
        scheme: IntegrationScheme,

        /// Time step in seconds
        #[arg(long, default_value = "1u", value_parser = parse_arg)]
        dt: f64,

        /// Number of steps
        #[arg(long, default_value_t = 40_000)]
        steps: usize,

        /// Source amplitude in volts
        #[arg(long, default_value = "10", value_parser = parse_arg)]
        amplitude: f64,

        /// Source frequency in hertz
        #[arg(long, default_value = "50", value_parser = parse_arg)]
        frequency: f64,

        /// Load resistance in ohms
        #[arg(long, default_value = "100", value_parser = parse_arg)]
        load: f64,

        /// Smoothing capacitance in farads
        #[arg(long, default_value = "100u", value_parser = parse_arg)]
        capacitance: f64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Eval {
            file,
            x,
            log,
            inverse,
        } => {
            let mode = if log {
                Interpolation::Log
            } else {
                Interpolation::Linear
            };
            let curve = read_characteristic(&file, mode)?;
            for value in x {
                let y = if inverse {
                    curve.interpolate_inverse(value)
                } else {
                    curve.interpolate(value)
                };
                println!("{value:e}\t{y:e}");
            }
        }

        Command::Rectifier {
            scheme,
            dt,
            steps,
            amplitude,
            frequency,
            load,
            capacitance,
        } => {
            let mut net = Network::new();
            let src = net.node("src");
            let out = net.node("out");
            net.add_voltage_source("V1", [src, 0], TimeFunction::new(Waveform::sine(amplitude, frequency)))?;
            let diode = net.add_diode("D1", [src, out], SwitchParams::default())?;
            net.add_resistor("R1", [out, 0], load)?;
            net.add_capacitor("C1", [out, 0], capacitance)?;

            let config = SimulatorConfig::new().with_scheme(scheme).with_dt(dt);
            let mut sim = Simulator::new(net, config)?;

            let mut trace = TraceWriter::new(
                io::stdout().lock(),
                "<stdout>",
                &["time", "v_source", "v_load", "i_diode"],
            )?;
            for _ in 0..steps {
                sim.step()?;
                let p = sim.potentials();
                let i = sim.current(diode).unwrap_or(0.0);
                trace.write_row(&[sim.time(), p[src], p[out], i])?;
            }
            trace.flush()?;
        }
    }

    Ok(())
}
