use crate::error::{ConversionError, Result};
use serde::Serialize;

/// Contact positions of a probe in micrometers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeGeometry {
    pub name: String,
    pub positions: Vec<[f64; 2]>,
}

impl ProbeGeometry {
    /// Single column of contacts spaced `ypitch` apart
    pub fn linear(name: &str, num_contacts: usize, ypitch: f64) -> Self {
        Self {
            name: name.to_string(),
            positions: (0..num_contacts)
                .map(|i| [0.0, i as f64 * ypitch])
                .collect(),
        }
    }

    /// Explicit contact locations, one `[x, y, ...]` row per contact
    pub fn from_locations(name: &str, locations: &[Vec<f64>]) -> Result<Self> {
        let positions = locations
            .iter()
            .map(|row| match row.as_slice() {
                [x, y, ..] => Ok([*x, *y]),
                _ => Err(ConversionError::InvalidData(format!(
                    "electrode location needs two coordinates, got {:?}",
                    row
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.to_string(),
            positions,
        })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_probe() {
        let probe = ProbeGeometry::linear("vprobe0", 64, 50.0);
        assert_eq!(probe.len(), 64);
        assert_eq!(probe.positions[0], [0.0, 0.0]);
        assert_eq!(probe.positions[63], [0.0, 3150.0]);
    }

    #[test]
    fn test_explicit_locations() {
        let probe = ProbeGeometry::from_locations("vprobe1", &[vec![0.0, 10.0, 5.0], vec![0.0, 60.0]]).unwrap();
        assert_eq!(probe.positions, vec![[0.0, 10.0], [0.0, 60.0]]);

        assert!(ProbeGeometry::from_locations("vprobe1", &[vec![1.0]]).is_err());
    }
}
