//! Stateful greenhouse environment simulator for local development.
//!
//! Every channel is a random walk with mean reversion toward its set point,
//! a slow scenario-dependent drift, per-reading noise and occasional spikes.
//! Output is encoded the way the field controller publishes it: water
//! temperature x10 and pH x100 as integers.

use serde_json::{json, Value};
use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Hovers at the set points. Low noise, rare spikes.
    Stable,
    /// Warming, CO2 build-up and nutrient concentration over time.
    Drifting,
    /// High noise, frequent spikes and occasional unreadable payloads.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "drifting" => Self::Drifting,
            "flaky" => Self::Flaky,
            _ => Self::Stable,
        }
    }

    /// (walk scale, drift scale, spike probability, glitch probability)
    fn params(self) -> (f64, f64, f32, f32) {
        match self {
            Scenario::Stable => (0.5, 0.0, 0.005, 0.0),
            Scenario::Drifting => (1.0, 1.0, 0.02, 0.0),
            Scenario::Flaky => (2.5, 0.3, 0.10, 0.05),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Drifting => write!(f, "drifting"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-channel walk
// ---------------------------------------------------------------------------

struct Walk {
    value: f64,
    center: f64,
    walk_sigma: f64,
    noise_sigma: f64,
    drift: f64,
    min: f64,
    max: f64,
}

/// Mean-reversion strength per sample.
const REVERSION: f64 = 0.05;

impl Walk {
    fn new(center: f64, walk_sigma: f64, noise_sigma: f64, drift: f64, min: f64, max: f64) -> Self {
        Self {
            value: center + gaussian(0.0, walk_sigma),
            center,
            walk_sigma,
            noise_sigma,
            drift,
            min,
            max,
        }
    }

    fn step(&mut self, walk_scale: f64, drift_scale: f64, spike_prob: f32) -> f64 {
        let pull = REVERSION * (self.center - self.value);
        let walk = gaussian(0.0, self.walk_sigma * walk_scale);
        self.value = (self.value + pull + walk + self.drift * drift_scale).clamp(self.min, self.max);

        let noise = gaussian(0.0, self.noise_sigma * walk_scale);
        let spike = if fastrand::f32() < spike_prob {
            gaussian(0.0, self.walk_sigma * 20.0)
        } else {
            0.0
        };
        (self.value + noise + spike).clamp(self.min, self.max)
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// One reading of every channel, in display units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub air_temperature: f64,
    pub air_humidity: f64,
    pub co2: f64,
    pub water_temperature: f64,
    pub ph: f64,
    pub ec: f64,
}

pub struct EnvSim {
    scenario: Scenario,
    air_temperature: Walk,
    air_humidity: Walk,
    co2: Walk,
    water_temperature: Walk,
    ph: Walk,
    ec: Walk,
}

impl EnvSim {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            air_temperature: Walk::new(24.0, 0.15, 0.1, 0.02, 5.0, 45.0),
            air_humidity: Walk::new(60.0, 0.8, 0.3, -0.05, 10.0, 100.0),
            co2: Walk::new(800.0, 15.0, 5.0, 6.0, 400.0, 5000.0),
            water_temperature: Walk::new(22.0, 0.05, 0.05, 0.01, 5.0, 35.0),
            ph: Walk::new(6.8, 0.02, 0.01, -0.002, 4.0, 9.0),
            ec: Walk::new(1200.0, 10.0, 5.0, 1.0, 200.0, 3000.0),
        }
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    /// Advance every channel by one tick.
    pub fn sample(&mut self) -> Sample {
        let (w, d, s, _) = self.scenario.params();
        Sample {
            air_temperature: self.air_temperature.step(w, d, s),
            air_humidity: self.air_humidity.step(w, d, s),
            co2: self.co2.step(w, d, s),
            water_temperature: self.water_temperature.step(w, d, s),
            ph: self.ph.step(w, d, s),
            ec: self.ec.step(w, d, s),
        }
    }

    /// Whether this tick should publish an unreadable payload.
    pub fn glitch(&self) -> bool {
        let (_, _, _, p) = self.scenario.params();
        p > 0.0 && fastrand::f32() < p
    }
}

// ---------------------------------------------------------------------------
// Wire encoding
// ---------------------------------------------------------------------------

/// Payload sent in place of a reading when the sensor glitches.
pub fn glitch_payload() -> Value {
    json!({ "value": "ERR" })
}

/// Topics and payloads for one sample, as the field controller sends them.
pub fn messages(root: &str, s: &Sample) -> Vec<(String, Value)> {
    vec![
        (
            format!("{root}/SCDsensor/pub"),
            json!({
                "temperature": round_to(s.air_temperature, 1),
                "humidity": round_to(s.air_humidity, 1),
                "co2": s.co2.round() as i64,
            }),
        ),
        (
            format!("{root}/watertemp/pub"),
            json!({ "value": (s.water_temperature * 10.0).round() as i64 }),
        ),
        (
            format!("{root}/ph/pub"),
            json!({ "ph": (s.ph * 100.0).round() as i64 }),
        ),
        (
            format!("{root}/ec/pub"),
            json!({ "value": s.ec.round() as i64 }),
        ),
    ]
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let f = 10f64.powi(decimals);
    (v * f).round() / f
}

// ===========================================================================
// Tests
// ===========================================================================
