//! Lays an `NwbFile` out with the NWB 2.x group structure.

use super::sink::{AttrValue, ContainerSink, DatasetValues};
use super::table::{ColumnData, DynamicTable};
use super::{BinnedAlignedSpikes, Container, ElectricalSeries, LabeledEvents, NwbFile, TimeSeries, NWB_VERSION};
use crate::error::Result;
use crate::timebase::Timebase;

const CORE: &str = "core";
const HDMF_COMMON: &str = "hdmf-common";
const NDX_EVENTS: &str = "ndx-events";
const NDX_BINNED_SPIKES: &str = "ndx-binned-spikes";
pub const ELECTRODES_PATH: &str = "/general/extracellular_ephys/electrodes";

/// Write `file` into `sink`
pub fn emit(file: &NwbFile, sink: &mut dyn ContainerSink) -> Result<()> {
    sink.write_attr("/", "namespace", &AttrValue::text(CORE))?;
    sink.write_attr("/", "neurodata_type", &AttrValue::text("NWBFile"))?;
    sink.write_attr("/", "nwb_version", &AttrValue::text(NWB_VERSION))?;
    sink.write_attr("/", "object_id", &AttrValue::text(object_id()))?;

    let start = file.session_start_time.to_rfc3339();
    sink.write_dataset("/identifier", &DatasetValues::ScalarText(file.identifier.clone()), false)?;
    sink.write_dataset(
        "/session_description",
        &DatasetValues::ScalarText(file.session_description.clone()),
        false,
    )?;
    sink.write_dataset("/session_start_time", &DatasetValues::ScalarText(start.clone()), false)?;
    sink.write_dataset("/timestamps_reference_time", &DatasetValues::ScalarText(start), false)?;
    sink.write_dataset(
        "/file_create_date",
        &DatasetValues::Text(vec![file.file_create_date.to_rfc3339()]),
        false,
    )?;

    for group in ["/acquisition", "/analysis", "/processing", "/stimulus", "/stimulus/presentation", "/stimulus/templates"] {
        sink.create_group(group)?;
    }

    emit_general(file, sink)?;

    for series in &file.acquisition {
        emit_electrical_series(series, sink)?;
    }

    for module in &file.processing {
        let path = format!("/processing/{}", module.name);
        typed_group(sink, &path, "ProcessingModule", CORE)?;
        sink.write_attr(&path, "description", &AttrValue::text(&module.description))?;
        for container in &module.containers {
            let child = format!("{}/{}", path, container.name());
            match container {
                Container::TimeSeries(series) => emit_time_series(series, &child, sink)?,
                Container::LabeledEvents(events) => emit_labeled_events(events, &child, sink)?,
                Container::BinnedAlignedSpikes(binned) => emit_binned_aligned_spikes(binned, &child, sink)?,
                Container::Table(table) => emit_table(table, &child, sink)?,
            }
        }
    }

    if !file.intervals.is_empty() {
        sink.create_group("/intervals")?;
        for table in &file.intervals {
            emit_table(table, &format!("/intervals/{}", table.name), sink)?;
        }
    }

    if let Some(units) = &file.units {
        emit_table(units, "/units", sink)?;
    }

    Ok(())
}

fn object_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn typed_group(sink: &mut dyn ContainerSink, path: &str, neurodata_type: &str, namespace: &str) -> Result<()> {
    sink.create_group(path)?;
    sink.write_attr(path, "namespace", &AttrValue::text(namespace))?;
    sink.write_attr(path, "neurodata_type", &AttrValue::text(neurodata_type))?;
    sink.write_attr(path, "object_id", &AttrValue::text(object_id()))
}

fn text(sink: &mut dyn ContainerSink, path: &str, value: &str) -> Result<()> {
    sink.write_dataset(path, &DatasetValues::ScalarText(value.to_string()), false)
}

fn emit_general(file: &NwbFile, sink: &mut dyn ContainerSink) -> Result<()> {
    sink.create_group("/general")?;
    if let Some(session_id) = &file.session_id {
        text(sink, "/general/session_id", session_id)?;
    }
    text(sink, "/general/institution", &file.institution)?;
    text(sink, "/general/lab", &file.lab)?;
    if !file.experimenter.is_empty() {
        sink.write_dataset("/general/experimenter", &DatasetValues::Text(file.experimenter.clone()), false)?;
    }

    if let Some(subject) = &file.subject {
        typed_group(sink, "/general/subject", "Subject", CORE)?;
        text(sink, "/general/subject/subject_id", &subject.subject_id)?;
        text(sink, "/general/subject/sex", &subject.sex)?;
        if !subject.age.is_empty() {
            text(sink, "/general/subject/age", &subject.age)?;
        }
        text(sink, "/general/subject/species", &subject.species)?;
    }

    sink.create_group("/general/devices")?;
    for device in &file.devices {
        let path = format!("/general/devices/{}", device.name);
        typed_group(sink, &path, "Device", CORE)?;
        sink.write_attr(&path, "description", &AttrValue::text(&device.description))?;
        sink.write_attr(&path, "manufacturer", &AttrValue::text(&device.manufacturer))?;
    }

    if file.electrode_groups.is_empty() && file.electrodes.is_empty() {
        return Ok(());
    }

    sink.create_group("/general/extracellular_ephys")?;
    for group in &file.electrode_groups {
        let path = format!("/general/extracellular_ephys/{}", group.name);
        typed_group(sink, &path, "ElectrodeGroup", CORE)?;
        sink.write_attr(&path, "description", &AttrValue::text(&group.description))?;
        sink.write_attr(&path, "location", &AttrValue::text(&group.location))?;
        if let Some(position) = &group.position {
            sink.write_dataset(&format!("{}/position", path), &DatasetValues::floats(position.clone()), false)?;
        }
        sink.link(&format!("{}/device", path), &format!("/general/devices/{}", group.device))?;
    }

    if !file.electrodes.is_empty() {
        let mut table = DynamicTable::new("electrodes", "DynamicTable", "metadata about extracellular electrodes");
        let rows = &file.electrodes;
        let columns = [
            ("location", "the location of channel within the subject e.g. brain region", ColumnData::Text(rows.iter().map(|e| e.location.clone()).collect())),
            (
                "group",
                "path of the ElectrodeGroup object that the electrode belongs to",
                ColumnData::Text(rows.iter().map(|e| format!("/general/extracellular_ephys/{}", e.group)).collect()),
            ),
            ("group_name", "the name of the ElectrodeGroup this electrode is a part of", ColumnData::Text(rows.iter().map(|e| e.group.clone()).collect())),
            ("channel_name", "unique channel reference", ColumnData::Text(rows.iter().map(|e| e.channel_name.clone()).collect())),
            ("rel_x", "x position of the contact on the probe in micrometers", ColumnData::Float(rows.iter().map(|e| e.rel_x).collect())),
            ("rel_y", "y position of the contact on the probe in micrometers", ColumnData::Float(rows.iter().map(|e| e.rel_y).collect())),
        ];
        for (name, description, data) in columns {
            table.add_column(super::Column::new(name, description, data))?;
        }
        emit_table(&table, ELECTRODES_PATH, sink)?;
    }
    Ok(())
}

fn emit_timestamps(sink: &mut dyn ContainerSink, path: &str, timestamps: Vec<f64>, compress: bool) -> Result<()> {
    sink.write_dataset(path, &DatasetValues::floats(timestamps), compress)?;
    sink.write_attr(path, "interval", &AttrValue::Int(1))?;
    sink.write_attr(path, "unit", &AttrValue::text("seconds"))
}

fn emit_electrical_series(series: &ElectricalSeries, sink: &mut dyn ContainerSink) -> Result<()> {
    let path = format!("/acquisition/{}", series.name);
    typed_group(sink, &path, "ElectricalSeries", CORE)?;
    sink.write_attr(&path, "description", &AttrValue::text(&series.description))?;
    sink.write_attr(&path, "comments", &AttrValue::text("no comments"))?;

    let data = format!("{}/data", path);
    sink.write_recording(&data, series.source.as_ref(), series.num_frames)?;
    sink.write_attr(&data, "conversion", &AttrValue::Float(series.conversion))?;
    sink.write_attr(&data, "offset", &AttrValue::Float(series.offset))?;
    sink.write_attr(&data, "resolution", &AttrValue::Float(-1.0))?;
    sink.write_attr(&data, "unit", &AttrValue::text("volts"))?;

    match &series.timebase {
        Timebase::Regular { starting_time, rate } => {
            let start = format!("{}/starting_time", path);
            sink.write_dataset(&start, &DatasetValues::ScalarFloat(*starting_time), false)?;
            sink.write_attr(&start, "rate", &AttrValue::Float(*rate))?;
            sink.write_attr(&start, "unit", &AttrValue::text("seconds"))?;
        }
        Timebase::Irregular(_) => {
            let frames = series.num_frames.min(series.source.info().num_frames);
            emit_timestamps(sink, &format!("{}/timestamps", path), series.timebase.materialize(frames), true)?;
        }
    }

    let electrodes = format!("{}/electrodes", path);
    sink.write_dataset(
        &electrodes,
        &DatasetValues::ints(series.electrodes.iter().map(|&i| i as i64).collect()),
        false,
    )?;
    sink.write_attr(&electrodes, "namespace", &AttrValue::text(HDMF_COMMON))?;
    sink.write_attr(&electrodes, "neurodata_type", &AttrValue::text("DynamicTableRegion"))?;
    sink.write_attr(&electrodes, "description", &AttrValue::text("electrode_table_region"))?;
    sink.write_attr(&electrodes, "table", &AttrValue::text(ELECTRODES_PATH))?;

    if let Some(gains) = &series.channel_conversion {
        let conversion = format!("{}/channel_conversion", path);
        sink.write_dataset(&conversion, &DatasetValues::floats(gains.clone()), false)?;
        sink.write_attr(&conversion, "axis", &AttrValue::Int(1))?;
    }
    Ok(())
}

fn emit_time_series(series: &TimeSeries, path: &str, sink: &mut dyn ContainerSink) -> Result<()> {
    typed_group(sink, path, series.neurodata_type, CORE)?;
    sink.write_attr(path, "description", &AttrValue::text(&series.description))?;
    sink.write_attr(path, "comments", &AttrValue::text("no comments"))?;

    let data = format!("{}/data", path);
    sink.write_dataset(&data, &DatasetValues::Float(series.data.clone()), series.compress)?;
    sink.write_attr(&data, "conversion", &AttrValue::Float(series.conversion))?;
    sink.write_attr(&data, "offset", &AttrValue::Float(0.0))?;
    sink.write_attr(&data, "resolution", &AttrValue::Float(-1.0))?;
    sink.write_attr(&data, "unit", &AttrValue::text(&series.unit))?;

    if let Some(frame) = &series.reference_frame {
        text(sink, &format!("{}/reference_frame", path), frame)?;
    }
    emit_timestamps(sink, &format!("{}/timestamps", path), series.timestamps.clone(), series.compress)
}

fn emit_labeled_events(events: &LabeledEvents, path: &str, sink: &mut dyn ContainerSink) -> Result<()> {
    typed_group(sink, path, "LabeledEvents", NDX_EVENTS)?;
    sink.write_attr(path, "description", &AttrValue::text(&events.description))?;
    sink.write_attr(path, "labels", &AttrValue::TextList(events.labels.clone()))?;
    emit_timestamps(sink, &format!("{}/timestamps", path), events.timestamps.clone(), true)?;
    sink.write_dataset(&format!("{}/data", path), &DatasetValues::UInt8(events.data.clone()), false)
}

fn emit_binned_aligned_spikes(binned: &BinnedAlignedSpikes, path: &str, sink: &mut dyn ContainerSink) -> Result<()> {
    typed_group(sink, path, "BinnedAlignedSpikes", NDX_BINNED_SPIKES)?;
    sink.write_attr(path, "description", &AttrValue::text(&binned.description))?;
    sink.write_attr(path, "bin_width_in_milliseconds", &AttrValue::Float(binned.bin_width_in_milliseconds))?;
    sink.write_attr(
        path,
        "milliseconds_from_event_to_first_bin",
        &AttrValue::Float(binned.milliseconds_from_event_to_first_bin),
    )?;
    sink.write_dataset(&format!("{}/data", path), &DatasetValues::Float(binned.data.clone()), true)?;
    emit_timestamps(
        sink,
        &format!("{}/event_timestamps", path),
        binned.event_timestamps.clone(),
        false,
    )
}

fn vector_data(sink: &mut dyn ContainerSink, path: &str, values: DatasetValues, description: &str) -> Result<()> {
    sink.write_dataset(path, &values, false)?;
    sink.write_attr(path, "namespace", &AttrValue::text(HDMF_COMMON))?;
    sink.write_attr(path, "neurodata_type", &AttrValue::text("VectorData"))?;
    sink.write_attr(path, "description", &AttrValue::text(description))
}

fn vector_index(sink: &mut dyn ContainerSink, path: &str, index: &[u64], target: &str) -> Result<()> {
    sink.write_dataset(path, &DatasetValues::UInt(index.to_vec()), false)?;
    sink.write_attr(path, "namespace", &AttrValue::text(HDMF_COMMON))?;
    sink.write_attr(path, "neurodata_type", &AttrValue::text("VectorIndex"))?;
    sink.write_attr(path, "description", &AttrValue::text(format!("Index for VectorData '{}'", target)))?;
    sink.write_attr(path, "target", &AttrValue::text(target))
}

/// Write a `DynamicTable` (or subtype) at `path`
pub fn emit_table(table: &DynamicTable, path: &str, sink: &mut dyn ContainerSink) -> Result<()> {
    let namespace = if table.neurodata_type == "DynamicTable" { HDMF_COMMON } else { CORE };
    typed_group(sink, path, table.neurodata_type, namespace)?;
    sink.write_attr(path, "description", &AttrValue::text(&table.description))?;
    sink.write_attr(
        path,
        "colnames",
        &AttrValue::TextList(table.columns.iter().map(|c| c.name.clone()).collect()),
    )?;

    let id = format!("{}/id", path);
    sink.write_dataset(&id, &DatasetValues::ints((0..table.num_rows() as i64).collect()), false)?;
    sink.write_attr(&id, "namespace", &AttrValue::text(HDMF_COMMON))?;
    sink.write_attr(&id, "neurodata_type", &AttrValue::text("ElementIdentifiers"))?;

    for column in &table.columns {
        let column_path = format!("{}/{}", path, column.name);
        let index_path = format!("{}_index", column_path);
        match &column.data {
            ColumnData::Float(v) => vector_data(sink, &column_path, DatasetValues::floats(v.clone()), &column.description)?,
            ColumnData::Int(v) => vector_data(sink, &column_path, DatasetValues::ints(v.clone()), &column.description)?,
            ColumnData::Bool(v) => vector_data(sink, &column_path, DatasetValues::Bool(v.clone()), &column.description)?,
            ColumnData::Text(v) => vector_data(sink, &column_path, DatasetValues::Text(v.clone()), &column.description)?,
            ColumnData::Array(a) => vector_data(sink, &column_path, DatasetValues::Float(a.clone()), &column.description)?,
            ColumnData::Ragged { values, index } => {
                vector_data(sink, &column_path, DatasetValues::floats(values.clone()), &column.description)?;
                vector_index(sink, &index_path, index, &column_path)?;
            }
            ColumnData::RaggedBool { values, index } => {
                vector_data(sink, &column_path, DatasetValues::Bool(values.clone()), &column.description)?;
                vector_index(sink, &index_path, index, &column_path)?;
            }
        }
    }
    Ok(())
}
