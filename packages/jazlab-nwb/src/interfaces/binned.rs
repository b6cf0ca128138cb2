//! Trial-aligned firing rates from the `smooth_session` matrix of a
//! `*_whole_trial_FR.mat` file.
//!
//! Each matrix row holds the rates of one unit on one trial; the `nrns` and
//! `trial_indices_all` fields of the session's `save_all_data` struct name
//! the unit and trial of every row.

use super::sorting::{ECEPHYS_DESCRIPTION, ECEPHYS_MODULE};
use super::trials::{per_trial_values, GOOD_TRIALS_SUFFIX};
use super::{DataInterface, InterfaceOptions};
use crate::discovery::get_single_file;
use crate::error::{ConversionError, Result};
use crate::nwb::{BinnedAlignedSpikes, Container, NwbFile};
use crate::readers::mat::{read_matrix, read_struct_fields, unique_values};
use ndarray::{s, Array2, Array3};
use std::path::Path;

/// File name suffix of the binned rates
pub const WHOLE_TRIAL_FR_SUFFIX: &str = "_whole_trial_FR.mat";

const RATES_VARIABLE: &str = "smooth_session";
const ROW_FIELDS: &[&str] = &["nrns", "trial_indices_all", "geo_present"];
const BIN_WIDTH_MS: f64 = 1.0;
const FIRST_BIN_OFFSET_MS: f64 = 0.0;

fn index_of(order: &[f64], id: f64) -> Option<usize> {
    order.iter().position(|&x| x == id)
}

/// Place row `i` of `rates` at `[.., trial(i), unit(i)]` of a
/// `(bins, trials, units)` array; trials and units are indexed in ascending
/// id order and cells without a row stay NaN
pub fn reorganize(rates: &Array2<f64>, units: &[f64], trial_ids: &[f64]) -> Result<Array3<f64>> {
    let rows = rates.nrows();
    if units.len() != rows || trial_ids.len() != rows {
        return Err(ConversionError::InvalidData(format!(
            "{} rows of rates but {} unit and {} trial ids",
            rows,
            units.len(),
            trial_ids.len()
        )));
    }
    let unit_order = unique_values(units);
    let trial_order = unique_values(trial_ids);

    let mut data = Array3::from_elem((rates.ncols(), trial_order.len(), unit_order.len()), f64::NAN);
    for (row, rate) in rates.outer_iter().enumerate() {
        let (Some(trial), Some(unit)) = (index_of(&trial_order, trial_ids[row]), index_of(&unit_order, units[row])) else {
            return Err(ConversionError::InvalidData(format!("row {} has no unit or trial id", row)));
        };
        data.slice_mut(s![.., trial, unit]).assign(&rate);
    }
    Ok(data)
}

pub struct BinnedSpikesInterface {
    binned: BinnedAlignedSpikes,
}

impl BinnedSpikesInterface {
    /// Read the rates in `folder`, aligned to each trial's `geo_present`
    pub fn load(folder: &Path) -> Result<Self> {
        let rates_path = get_single_file(folder, WHOLE_TRIAL_FR_SUFFIX)?;
        let behavior_path = get_single_file(folder, GOOD_TRIALS_SUFFIX)?;
        log::info!("Reading binned rates from {}", rates_path.display());

        let rates = read_matrix(&rates_path, RATES_VARIABLE)?;
        let fields = read_struct_fields(&behavior_path, "save_all_data", ROW_FIELDS)?;
        let field = |name: &str| {
            fields
                .get(name)
                .ok_or_else(|| ConversionError::parse(&behavior_path, format!("no field '{}'", name)))
        };
        let trial_ids = field("trial_indices_all")?;
        Self::from_parts(&rates, field("nrns")?, trial_ids, field("geo_present")?)
    }

    pub fn from_parts(rates: &Array2<f64>, units: &[f64], trial_ids: &[f64], geo_present: &[f64]) -> Result<Self> {
        let data = reorganize(rates, units, trial_ids)?;
        let event_timestamps = per_trial_values("geo_present", geo_present, trial_ids, &unique_values(trial_ids))?;
        log::debug!(
            "Binned rates of {} units over {} trials, {} bins each",
            data.dim().2,
            data.dim().1,
            data.dim().0
        );
        Ok(Self {
            binned: BinnedAlignedSpikes {
                name: "BinnedAlignedSpikes".to_string(),
                description: "Smoothed firing rates of each unit, aligned to trial start".to_string(),
                data: data.into_dyn(),
                event_timestamps,
                bin_width_in_milliseconds: BIN_WIDTH_MS,
                milliseconds_from_event_to_first_bin: FIRST_BIN_OFFSET_MS,
            },
        })
    }

    pub fn binned(&self) -> &BinnedAlignedSpikes {
        &self.binned
    }
}

impl DataInterface for BinnedSpikesInterface {
    fn interface_name(&self) -> &str {
        "BinnedSpikesInterface"
    }

    fn first_timestamp(&self) -> Option<f64> {
        self.binned.event_timestamps.iter().copied().find(|t| !t.is_nan())
    }

    fn shift(&mut self, offset: f64) {
        self.binned.event_timestamps.iter_mut().for_each(|t| *t += offset);
    }

    fn add_to_nwbfile(&self, file: &mut NwbFile, _options: &InterfaceOptions) -> Result<()> {
        file.processing_module(ECEPHYS_MODULE, ECEPHYS_DESCRIPTION)
            .add(Container::BinnedAlignedSpikes(self.binned.clone()))
    }
}
