use std::io::{Read, Write};
use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::error::{AnalysisError, Result};
use crate::excitation::ExcitationType;
use crate::structure::{Coordinate, FretData, Observation, TrackTable};

/// Column order of CSV output
pub const CSV_HEADER: [&str; 14] = [
    "particle",
    "frame",
    "donor_mass",
    "acceptor_mass",
    "x",
    "y",
    "has_neighbor",
    "interp",
    "exc_type",
    "d_mass",
    "eff",
    "stoi",
    "a_mass",
    "a_seg",
];

/// One CSV row. Only `particle` and `frame` are mandatory; derived columns
/// are read back so that analysis steps can be chained through files.
#[derive(Debug, Clone, Deserialize)]
struct TrackRecord {
    particle: i64,
    frame: i64,
    #[serde(default)]
    donor_mass: Option<f64>,
    #[serde(default)]
    acceptor_mass: Option<f64>,
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    y: Option<f64>,
    #[serde(default)]
    has_neighbor: Option<String>,
    #[serde(default)]
    interp: Option<String>,
    #[serde(default)]
    exc_type: Option<String>,
    #[serde(default)]
    d_mass: Option<f64>,
    #[serde(default)]
    eff: Option<f64>,
    #[serde(default)]
    stoi: Option<f64>,
    #[serde(default)]
    a_mass: Option<f64>,
    #[serde(default)]
    a_seg: Option<i64>,
}

fn parse_flag(value: Option<&str>, column: &str) -> Result<Option<bool>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" => Ok(Some(false)),
            _ => Err(AnalysisError::config(format!(
                "Invalid value '{}' in column '{}': expected true/false",
                v, column
            ))),
        },
    }
}

impl TrackRecord {
    fn into_observation(self) -> Result<Observation> {
        let coords = match (self.x, self.y) {
            (Some(x), Some(y)) => Some(Coordinate::new(x, y)),
            _ => None,
        };
        let exc_type = match self.exc_type.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(t) => Some(ExcitationType::from_token(t)?),
        };
        Ok(Observation {
            particle: self.particle,
            frame: self.frame,
            donor_mass: self.donor_mass.unwrap_or(f64::NAN),
            acceptor_mass: self.acceptor_mass.unwrap_or(f64::NAN),
            coords,
            has_neighbor: parse_flag(self.has_neighbor.as_deref(), "has_neighbor")?,
            interp: parse_flag(self.interp.as_deref(), "interp")?.unwrap_or(false),
            fret: FretData {
                exc_type,
                d_mass: self.d_mass,
                eff: self.eff,
                stoi: self.stoi,
                a_mass: self.a_mass,
                a_seg: self.a_seg,
            },
        })
    }
}

/// Read tracking data in CSV format
pub fn read_tracks<R: Read>(reader: R) -> Result<TrackTable> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let record: TrackRecord = result?;
        rows.push(record.into_observation()?);
    }
    Ok(TrackTable::new(rows))
}

/// Load tracking data from CSV file
pub fn load_tracks_from_csv(csv_path: impl AsRef<Path>) -> Result<TrackTable> {
    let csv_path = csv_path.as_ref();
    let file = std::fs::File::open(csv_path)?;
    let table = read_tracks(file)?;
    debug!("Loaded {} localizations from {}", table.len(), csv_path.display());
    Ok(table)
}

fn opt_to_string<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

/// Write tracking data in CSV format
pub fn write_tracks<W: Write>(table: &TrackTable, writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(CSV_HEADER)?;

    for row in table.rows() {
        writer.write_record(&[
            row.particle.to_string(),
            row.frame.to_string(),
            row.donor_mass.to_string(),
            row.acceptor_mass.to_string(),
            opt_to_string(row.coords.map(|c| c.x)),
            opt_to_string(row.coords.map(|c| c.y)),
            opt_to_string(row.has_neighbor),
            row.interp.to_string(),
            opt_to_string(row.fret.exc_type),
            opt_to_string(row.fret.d_mass),
            opt_to_string(row.fret.eff),
            opt_to_string(row.fret.stoi),
            opt_to_string(row.fret.a_mass),
            opt_to_string(row.fret.a_seg),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Save tracking data to CSV file, creating the parent directory if needed
pub fn save_tracks_to_csv(table: &TrackTable, output_path: impl AsRef<Path>) -> Result<()> {
    let output_path = output_path.as_ref();
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(output_path)?;
    write_tracks(table, file)?;
    debug!("Saved {} localizations to {}", table.len(), output_path.display());
    Ok(())
}
