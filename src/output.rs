//! Column labels and the artifacts written at the end of a run.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use log::info;

use crate::{
    acquisition::SampleSet,
    plot::ChartBackend,
    registry::Registry,
    sampler::{self, Plan, Selector},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(#[from] io::Error),

    #[error("csv error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("plot error: {0}")]
    PlotError(String),
}

/// Labels of the data columns `selector` yields on the current registry.
pub fn label_columns(
    registry: &mut Registry,
    selector: &Selector,
) -> Result<Vec<String>, sampler::Error> {
    Ok(Plan::new(registry, selector)?.labels())
}

pub fn file_name(now: DateTime<Local>, extension: &str) -> String {
    format!("{}.{}", now.format("sensorshell_data_%Y_%m_%d_%H_%M_%S"), extension)
}

fn output_path(dir: &Path, extension: &str) -> Result<PathBuf, Error> {
    fs::create_dir_all(dir)?;
    Ok(dir.join(file_name(Local::now(), extension)))
}

/// Write `samples` as delimited text into a new time-stamped file in `dir`.
pub fn write_table(samples: &SampleSet, dir: &Path) -> Result<PathBuf, Error> {
    let path = output_path(dir, "txt")?;
    write_table_to(samples, &path)?;
    info!("wrote {} records to {}", samples.len(), path.display());
    Ok(path)
}

/// Header `# timestamp, <label>, ...` followed by one row per record.
pub fn write_table_to(samples: &SampleSet, path: &Path) -> Result<(), Error> {
    let mut file = File::create(path)?;
    let header: Vec<&str> = std::iter::once("timestamp")
        .chain(samples.labels().iter().map(String::as_str))
        .collect();
    writeln!(file, "# {}", header.join(", "))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    for record in samples.records() {
        let row = std::iter::once(record.timestamp)
            .chain(record.values.iter().copied())
            .map(|value| value.to_string());
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// A named line on a chart.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub values: Vec<f64>,
}

/// Time series of a watch run, one line per device.
#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub x_label: String,
    pub y_label: String,
    pub times: Vec<f64>,
    pub series: Vec<Series>,
}

impl Chart {
    /// One line per device taking part in `plan`, labelled by device id.
    pub fn for_measurement(measurement: &str, plan: &Plan) -> Chart {
        let unit = plan
            .columns()
            .first()
            .map(|column| column.unit.as_str())
            .unwrap_or_default();
        let y_label = format!("{measurement} ({unit})");
        let names = plan.columns().iter().map(|column| column.device.to_string());

        Chart {
            x_label: "Time (s)".to_string(),
            y_label,
            times: Vec::new(),
            series: names
                .into_iter()
                .map(|name| Series {
                    name,
                    values: Vec::new(),
                })
                .collect(),
        }
    }

    pub fn push(&mut self, time: f64, values: &[f64]) {
        self.times.push(time);
        for (series, value) in self.series.iter_mut().zip(values) {
            series.values.push(*value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Save `chart` as a new time-stamped figure in `dir`.
pub fn render_snapshot(
    chart: &Chart,
    backend: &mut dyn ChartBackend,
    dir: &Path,
) -> Result<PathBuf, Error> {
    let path = output_path(dir, backend.extension())?;
    backend.save(chart, &path)?;
    info!("saved figure with {} points to {}", chart.times.len(), path.display());
    Ok(path)
}
