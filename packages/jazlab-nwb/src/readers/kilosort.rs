/// Kilosort / Phy Output Reader
///
/// A sorter output folder holds:
/// - `spike_times.npy`: spike sample indices
/// - `spike_clusters.npy`: cluster of each spike (falls back to `spike_templates.npy`)
/// - `params.py`: sorter parameters, `sample_rate` among them
/// - `cluster_*.tsv`: per-cluster properties (`KSLabel`, `group`, `cluster_info`)
/// - `templates.npy`: optional template waveforms `(templates, samples, channels)`
use super::npy::{read_f64_array, read_i64_vector};
use super::tables::TsvTable;
use crate::error::{ConversionError, Result};
use ndarray::{s, Array3, ArrayD, Axis, Ix3};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct KilosortFolder {
    pub folder: PathBuf,
    pub sampling_rate: f64,
    pub unit_ids: Vec<i64>,
    /// Sorted spike sample indices of each unit
    pub spike_trains: Vec<Vec<u64>>,
    /// Property columns aligned with `unit_ids`
    pub properties: BTreeMap<String, Vec<String>>,
    /// Template used by most spikes of each unit, when known
    template_ids: Vec<Option<usize>>,
}

impl KilosortFolder {
    pub fn load(folder: &Path, keep_good_only: bool) -> Result<Self> {
        if !folder.is_dir() {
            return Err(ConversionError::FileNotFound(folder.display().to_string()));
        }

        let sampling_rate = read_sample_rate(&folder.join("params.py"))?;
        let spike_times = read_i64_vector(&folder.join("spike_times.npy"))?;

        let templates_path = folder.join("spike_templates.npy");
        let spike_templates = if templates_path.exists() {
            Some(read_i64_vector(&templates_path)?)
        } else {
            None
        };
        let clusters_path = folder.join("spike_clusters.npy");
        let spike_clusters = if clusters_path.exists() {
            read_i64_vector(&clusters_path)?
        } else {
            spike_templates.clone().ok_or_else(|| {
                ConversionError::FileNotFound(clusters_path.display().to_string())
            })?
        };

        if spike_clusters.len() != spike_times.len() {
            return Err(ConversionError::InvalidData(format!(
                "{}: {} spike times but {} cluster labels",
                folder.display(),
                spike_times.len(),
                spike_clusters.len()
            )));
        }

        let mut trains: BTreeMap<i64, Vec<u64>> = BTreeMap::new();
        let mut template_counts: HashMap<i64, HashMap<i64, usize>> = HashMap::new();
        for (i, (&time, &cluster)) in spike_times.iter().zip(&spike_clusters).enumerate() {
            let sample = u64::try_from(time).map_err(|_| {
                ConversionError::InvalidData(format!("negative spike time {} in {}", time, folder.display()))
            })?;
            trains.entry(cluster).or_default().push(sample);
            if let Some(template) = spike_templates.as_ref().and_then(|t| t.get(i)) {
                *template_counts
                    .entry(cluster)
                    .or_default()
                    .entry(*template)
                    .or_default() += 1;
            }
        }

        let unit_ids: Vec<i64> = trains.keys().copied().collect();
        let spike_trains: Vec<Vec<u64>> = trains
            .into_values()
            .map(|mut train| {
                train.sort_unstable();
                train
            })
            .collect();
        let template_ids = unit_ids
            .iter()
            .map(|id| match template_counts.get(id) {
                Some(counts) => counts
                    .iter()
                    .max_by_key(|(template, count)| (**count, -**template))
                    .and_then(|(template, _)| usize::try_from(*template).ok()),
                None => usize::try_from(*id).ok(),
            })
            .collect();

        let properties = read_cluster_properties(folder, &unit_ids)?;

        let mut sorting = Self {
            folder: folder.to_path_buf(),
            sampling_rate,
            unit_ids,
            spike_trains,
            properties,
            template_ids,
        };

        if keep_good_only {
            let labels = sorting.properties.get("KSLabel").cloned().ok_or_else(|| {
                ConversionError::InvalidData(format!(
                    "{}: keep_good_only needs cluster_KSLabel.tsv",
                    folder.display()
                ))
            })?;
            let good: Vec<usize> = labels
                .iter()
                .enumerate()
                .filter(|(_, label)| label.as_str() == "good")
                .map(|(i, _)| i)
                .collect();
            sorting.select_units(&good)?;
        }

        log::debug!(
            "Loaded {} units from {}",
            sorting.unit_ids.len(),
            sorting.folder.display()
        );

        Ok(sorting)
    }

    pub fn num_units(&self) -> usize {
        self.unit_ids.len()
    }

    pub fn num_spikes(&self) -> usize {
        self.spike_trains.iter().map(Vec::len).sum()
    }

    pub fn last_spike_sample(&self) -> Option<u64> {
        self.spike_trains.iter().filter_map(|t| t.last().copied()).max()
    }

    /// Keep only the units at `indices`, in that order
    pub fn select_units(&mut self, indices: &[usize]) -> Result<()> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.unit_ids.len()) {
            return Err(ConversionError::InvalidData(format!(
                "unit index {} out of range for {} units",
                bad,
                self.unit_ids.len()
            )));
        }

        self.unit_ids = indices.iter().map(|&i| self.unit_ids[i]).collect();
        self.spike_trains = indices.iter().map(|&i| self.spike_trains[i].clone()).collect();
        self.template_ids = indices.iter().map(|&i| self.template_ids[i]).collect();
        for values in self.properties.values_mut() {
            *values = indices.iter().map(|&i| values[i].clone()).collect();
        }
        Ok(())
    }

    /// Drop spikes at or after `end_frame`; returns how many were removed
    pub fn truncate_spikes(&mut self, end_frame: u64) -> usize {
        let mut removed = 0;
        for train in self.spike_trains.iter_mut() {
            let keep = train.partition_point(|&s| s < end_frame);
            removed += train.len() - keep;
            train.truncate(keep);
        }
        removed
    }

    /// Mean waveform of every unit from `templates.npy`, `(units, samples, channels)`
    pub fn mean_waveforms(&self) -> Result<Option<Array3<f64>>> {
        let path = self.folder.join("templates.npy");
        if !path.exists() {
            return Ok(None);
        }

        let templates: ArrayD<f64> = read_f64_array(&path)?;
        let templates = templates
            .into_dimensionality::<Ix3>()
            .map_err(|e| ConversionError::parse(&path, e))?;
        let (count, samples, channels) = templates.dim();

        let mut waveforms = Array3::<f64>::zeros((self.unit_ids.len(), samples, channels));
        for (unit, template) in self.template_ids.iter().enumerate() {
            match template {
                Some(t) if *t < count => {
                    waveforms
                        .index_axis_mut(Axis(0), unit)
                        .assign(&templates.slice(s![*t, .., ..]));
                }
                _ => {
                    return Err(ConversionError::InvalidData(format!(
                        "no template for unit {} in {}",
                        self.unit_ids[unit],
                        path.display()
                    )))
                }
            }
        }
        Ok(Some(waveforms))
    }
}

fn read_sample_rate(path: &Path) -> Result<f64> {
    let text = fs::read_to_string(path)
        .map_err(|_| ConversionError::FileNotFound(path.display().to_string()))?;

    text.lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == "sample_rate")
        .and_then(|(_, value)| value.trim().trim_end_matches('.').parse::<f64>().ok())
        .ok_or_else(|| ConversionError::parse(path, "missing sample_rate"))
}

fn read_cluster_properties(folder: &Path, unit_ids: &[i64]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut properties: BTreeMap<String, Vec<String>> = BTreeMap::new();

    let pattern = format!("{}/cluster_*.tsv", glob::Pattern::escape(&folder.display().to_string()));
    let mut files: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| ConversionError::InvalidData(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();

    for file in files {
        let table = TsvTable::read(&file)?;
        let key = if table.headers.iter().any(|h| h == "cluster_id") {
            "cluster_id"
        } else if table.headers.iter().any(|h| h == "id") {
            "id"
        } else {
            log::warn!("Skipping {}: no cluster_id column", file.display());
            continue;
        };

        for header in table.headers.iter().filter(|h| *h != "cluster_id" && *h != "id") {
            let name = if header == "group" { "quality" } else { header.as_str() };
            let by_id = table.column_by_key(key, header);
            let values = unit_ids
                .iter()
                .map(|id| by_id.get(&id.to_string()).cloned().unwrap_or_default())
                .collect();
            properties.insert(name.to_string(), values);
        }
    }

    Ok(properties)
}
