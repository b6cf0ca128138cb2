/// HDF5 backend for NWB files
///
/// Groups, attributes and datasets go straight into an HDF5 file. Recordings
/// are streamed in blocks of `RECORDING_CHUNK_FRAMES` into a chunked, gzip
/// compressed `(frames, channels)` dataset.
///
/// Object references (the electrodes `group` column, the `table` attribute of
/// region datasets) are stored as HDF5 paths.
use super::sink::{AttrValue, ContainerSink, DatasetValues, LayoutManifest, LayoutNode, NodeKind, RECORDING_CHUNK_FRAMES};
use crate::error::{ConversionError, Result};
use crate::readers::{SampleBlock, SampleSource, SampleType};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group, Location};
use ndarray::{s, ArrayView1, ArrayViewD};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

const DEFLATE_LEVEL: u8 = 4;

pub struct Hdf5Sink {
    file: File,
}

impl Hdf5Sink {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            file: File::create(path)?,
        })
    }

    fn location_attr(&self, path: &str, name: &str, value: &AttrValue) -> Result<()> {
        let rel = relative(path);
        if rel.is_empty() {
            return write_attr_at(&self.file, name, value);
        }
        if let Ok(group) = self.file.group(rel) {
            return write_attr_at(&group, name, value);
        }
        let dataset = self
            .file
            .dataset(rel)
            .map_err(|e| ConversionError::WriteError(format!("no object at {}: {}", path, e)))?;
        write_attr_at(&dataset, name, value)
    }
}

fn relative(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| ConversionError::WriteError(format!("invalid string '{}': {}", value, e)))
}

fn write_attr_at(location: &Location, name: &str, value: &AttrValue) -> Result<()> {
    match value {
        AttrValue::Text(text) => location
            .new_attr::<VarLenUnicode>()
            .create(name)?
            .write_scalar(&to_var_len_unicode(text)?)?,
        AttrValue::TextList(items) => {
            let values = items
                .iter()
                .map(|s| to_var_len_unicode(s))
                .collect::<Result<Vec<_>>>()?;
            location
                .new_attr::<VarLenUnicode>()
                .shape(values.len())
                .create(name)?
                .write(ArrayView1::from(values.as_slice()))?
        }
        AttrValue::Int(v) => location.new_attr::<i64>().create(name)?.write_scalar(v)?,
        AttrValue::Float(v) => location.new_attr::<f64>().create(name)?.write_scalar(v)?,
    }
    Ok(())
}

fn create_array<T: H5Type>(file: &File, name: &str, data: ArrayViewD<T>, compress: bool) -> Result<()> {
    let mut builder = file.new_dataset::<T>().shape(data.shape().to_vec());
    if compress && !data.is_empty() {
        builder = builder.deflate(DEFLATE_LEVEL).shuffle();
    }
    let dataset = builder.create(name)?;
    if !data.is_empty() {
        dataset.write(data)?;
    }
    Ok(())
}

fn create_vector<T: H5Type>(file: &File, name: &str, data: &[T], compress: bool) -> Result<()> {
    create_array(file, name, ArrayView1::from(data).into_dyn(), compress)
}

fn create_recording_dataset<T: H5Type>(file: &File, name: &str, frames: usize, channels: usize) -> Result<Dataset> {
    let mut builder = file.new_dataset::<T>().shape((frames, channels));
    if frames > 0 && channels > 0 {
        builder = builder
            .chunk((frames.min(RECORDING_CHUNK_FRAMES), channels))
            .deflate(DEFLATE_LEVEL);
    }
    Ok(builder.create(name)?)
}

impl ContainerSink for Hdf5Sink {
    fn create_group(&mut self, path: &str) -> Result<()> {
        self.file.create_group(relative(path))?;
        Ok(())
    }

    fn write_attr(&mut self, path: &str, name: &str, value: &AttrValue) -> Result<()> {
        self.location_attr(path, name, value)
    }

    fn write_dataset(&mut self, path: &str, values: &DatasetValues, compress: bool) -> Result<()> {
        let name = relative(path);
        match values {
            DatasetValues::ScalarText(text) => self
                .file
                .new_dataset::<VarLenUnicode>()
                .create(name)?
                .write_scalar(&to_var_len_unicode(text)?)?,
            DatasetValues::ScalarFloat(value) => {
                self.file.new_dataset::<f64>().create(name)?.write_scalar(value)?
            }
            DatasetValues::Float(a) => create_array(&self.file, name, a.view(), compress)?,
            DatasetValues::Int(a) => create_array(&self.file, name, a.view(), compress)?,
            DatasetValues::UInt(v) => create_vector(&self.file, name, v, compress)?,
            DatasetValues::UInt8(v) => create_vector(&self.file, name, v, compress)?,
            DatasetValues::Bool(v) => create_vector(&self.file, name, v, compress)?,
            DatasetValues::Text(v) => {
                let values = v
                    .iter()
                    .map(|s| to_var_len_unicode(s))
                    .collect::<Result<Vec<_>>>()?;
                create_vector(&self.file, name, &values, compress)?
            }
        }
        Ok(())
    }

    fn write_recording(&mut self, path: &str, source: &dyn SampleSource, num_frames: usize) -> Result<()> {
        let info = source.info();
        let frames = num_frames.min(info.num_frames);
        let channels = info.num_channels;
        let name = relative(path);

        let dataset = match info.sample_type {
            SampleType::Int16 => create_recording_dataset::<i16>(&self.file, name, frames, channels)?,
            SampleType::Float32 => create_recording_dataset::<f32>(&self.file, name, frames, channels)?,
            SampleType::Float64 => create_recording_dataset::<f64>(&self.file, name, frames, channels)?,
        };

        let mut start = 0;
        while start < frames {
            let block = source.read_frames(start, RECORDING_CHUNK_FRAMES.min(frames - start))?;
            if block.frames() == 0 {
                return Err(ConversionError::WriteError(format!(
                    "{} ended at frame {} of {}",
                    info.file_path, start, frames
                )));
            }
            let end = start + block.frames();
            match &block {
                SampleBlock::Int16(a) => dataset.write_slice(a.view(), s![start..end, ..])?,
                SampleBlock::Float32(a) => dataset.write_slice(a.view(), s![start..end, ..])?,
                SampleBlock::Float64(a) => dataset.write_slice(a.view(), s![start..end, ..])?,
            }
            log::debug!("{}: wrote frames {}..{}", path, start, end);
            start = end;
        }
        Ok(())
    }

    fn link(&mut self, path: &str, target: &str) -> Result<()> {
        self.file.link_soft(target, relative(path))?;
        Ok(())
    }
}

fn read_attrs(location: &Location) -> BTreeMap<String, AttrValue> {
    let mut attributes = BTreeMap::new();
    for name in location.attr_names().unwrap_or_default() {
        let attr = match location.attr(&name) {
            Ok(attr) => attr,
            Err(_) => continue,
        };
        let value = if let Ok(text) = attr.read_scalar::<VarLenUnicode>() {
            AttrValue::Text(text.as_str().to_string())
        } else if let Ok(list) = attr.read_raw::<VarLenUnicode>() {
            AttrValue::TextList(list.iter().map(|s| s.as_str().to_string()).collect())
        } else if let Ok(v) = attr.read_scalar::<i64>() {
            AttrValue::Int(v)
        } else if let Ok(v) = attr.read_scalar::<f64>() {
            AttrValue::Float(v)
        } else {
            continue;
        };
        attributes.insert(name, value);
    }
    attributes
}

fn walk(group: &Group, path: &str, manifest: &mut LayoutManifest) -> Result<()> {
    for name in group.member_names()? {
        let child = if path == "/" { format!("/{}", name) } else { format!("{}/{}", path, name) };
        if let Ok(sub) = group.group(&name) {
            manifest.nodes.insert(
                child.clone(),
                LayoutNode {
                    kind: NodeKind::Group,
                    attributes: read_attrs(&sub),
                    dtype: None,
                    shape: None,
                    values: None,
                    target: None,
                    compressed: false,
                },
            );
            // device links point back into /general/devices
            if name != "device" {
                walk(&sub, &child, manifest)?;
            }
        } else if let Ok(dataset) = group.dataset(&name) {
            manifest.nodes.insert(
                child,
                LayoutNode {
                    kind: NodeKind::Dataset,
                    attributes: read_attrs(&dataset),
                    dtype: None,
                    shape: Some(dataset.shape()),
                    values: None,
                    target: None,
                    compressed: dataset.is_chunked(),
                },
            );
        }
    }
    Ok(())
}

/// Read the layout of an existing NWB file
pub fn inspect(path: &Path) -> Result<LayoutManifest> {
    let file = File::open(path)?;
    let mut manifest = LayoutManifest::default();
    if let Some(root) = manifest.nodes.get_mut("/") {
        root.attributes = read_attrs(&file);
    }
    walk(&file, "/", &mut manifest)?;
    Ok(manifest)
}
