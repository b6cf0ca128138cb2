//! Sample clocks of data interfaces.
//!
//! Recordings are sampled at a fixed rate, so their aligned clock stays an
//! affine map of the sample index and is stored as `starting_time + i / rate`.
//! Behavioral streams carry explicit timestamps.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Timebase {
    Regular { starting_time: f64, rate: f64 },
    Irregular(Vec<f64>),
}

impl Timebase {
    pub fn regular(starting_time: f64, rate: f64) -> Self {
        Timebase::Regular {
            starting_time,
            rate,
        }
    }

    /// Time of sample `index`
    pub fn at(&self, index: usize) -> Option<f64> {
        match self {
            Timebase::Regular {
                starting_time,
                rate,
            } => Some(starting_time + index as f64 / rate),
            Timebase::Irregular(times) => times.get(index).copied(),
        }
    }

    pub fn first(&self) -> Option<f64> {
        self.at(0)
    }

    /// Map every timestamp `t` to `intercept + coef * (start + t)`.
    pub fn affine(&self, intercept: f64, coef: f64, start: f64) -> Self {
        match self {
            Timebase::Regular {
                starting_time,
                rate,
            } => Timebase::Regular {
                starting_time: intercept + coef * (start + starting_time),
                rate: rate / coef,
            },
            Timebase::Irregular(times) => Timebase::Irregular(
                times
                    .iter()
                    .map(|t| intercept + coef * (start + t))
                    .collect(),
            ),
        }
    }

    pub fn shift(&mut self, offset: f64) {
        match self {
            Timebase::Regular { starting_time, .. } => *starting_time += offset,
            Timebase::Irregular(times) => times.iter_mut().for_each(|t| *t += offset),
        }
    }

    /// Explicit timestamps for the first `len` samples
    pub fn materialize(&self, len: usize) -> Vec<f64> {
        match self {
            Timebase::Regular { .. } => (0..len).filter_map(|i| self.at(i)).collect(),
            Timebase::Irregular(times) => times.iter().take(len).copied().collect(),
        }
    }
}
