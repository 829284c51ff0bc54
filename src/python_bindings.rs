use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use std::path::{Path, PathBuf};

use crate::analyzer::FretAnalyzer;
use crate::bleach::StepOutcome;
use crate::changepoint::{CostModel, Pelt};
use crate::error::AnalysisError;
use crate::interpolation::InterpKind;
use crate::metrics::AnalyzeOptions;
use crate::structure::TrackTable;
use crate::tracks::{load_tracks_from_csv, save_tracks_to_csv};

fn to_py_err(e: AnalysisError) -> PyErr {
    match e {
        AnalysisError::Io(_) | AnalysisError::Csv(_) => {
            PyErr::new::<pyo3::exceptions::PyIOError, _>(e.to_string())
        }
        AnalysisError::Config(_)
        | AnalysisError::UnknownColumn(_)
        | AnalysisError::Expression { .. } => {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string())
        }
        _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string()),
    }
}

/// `<stem>_<step>.csv` next to `input_file` unless `output_csv` is given
fn output_path(input_file: &str, output_csv: Option<&str>, step: &str) -> PathBuf {
    if let Some(csv_path) = output_csv {
        PathBuf::from(csv_path)
    } else {
        let input_path = Path::new(input_file);
        let input_dir = input_path.parent().unwrap_or(Path::new("."));
        let base_name = input_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("tracks");
        input_dir.join(format!("{}_{}.csv", base_name, step))
    }
}

/// Convert a track table to a Python list of dicts, one per localization
fn tracks_to_py(py: Python<'_>, tracks: &TrackTable) -> PyResult<PyObject> {
    let py_rows = PyList::empty_bound(py);
    for row in tracks.rows() {
        let py_dict = PyDict::new_bound(py);
        py_dict.set_item("particle", row.particle)?;
        py_dict.set_item("frame", row.frame)?;
        py_dict.set_item("donor_mass", row.donor_mass)?;
        py_dict.set_item("acceptor_mass", row.acceptor_mass)?;
        py_dict.set_item("x", row.coords.map(|c| c.x))?;
        py_dict.set_item("y", row.coords.map(|c| c.y))?;
        py_dict.set_item("has_neighbor", row.has_neighbor)?;
        py_dict.set_item("interp", row.interp)?;
        py_dict.set_item("exc_type", row.fret.exc_type.map(|t| t.to_string()))?;
        py_dict.set_item("d_mass", row.fret.d_mass)?;
        py_dict.set_item("eff", row.fret.eff)?;
        py_dict.set_item("stoi", row.fret.stoi)?;
        py_dict.set_item("a_mass", row.fret.a_mass)?;
        py_dict.set_item("a_seg", row.fret.a_seg)?;
        py_rows.append(py_dict)?;
    }
    Ok(py_rows.into())
}

fn outcomes_to_py(py: Python<'_>, outcomes: &[(i64, StepOutcome)]) -> PyResult<PyObject> {
    let py_outcomes = PyDict::new_bound(py);
    for (particle, outcome) in outcomes {
        let label = match outcome {
            StepOutcome::Accepted { .. } => "accepted",
            StepOutcome::Rejected => "rejected",
            StepOutcome::Undefined => "undefined",
        };
        py_outcomes.set_item(particle, label)?;
    }
    Ok(py_outcomes.into())
}

/// Python binding: calculate FRET values of a tracking data CSV
#[pyfunction]
#[pyo3(signature = (tracks_file, excitation_seq, keep_d_mass=false, invalid_nan=true, a_mass_interp="linear", use_neighbor_flag=true, output_csv=None))]
fn analyze(
    py: Python<'_>,
    tracks_file: &str,
    excitation_seq: &str,
    keep_d_mass: bool,
    invalid_nan: bool,
    a_mass_interp: &str,
    use_neighbor_flag: bool,
    output_csv: Option<&str>,
) -> PyResult<PyObject> {
    let tracks = load_tracks_from_csv(tracks_file).map_err(to_py_err)?;
    let options = AnalyzeOptions {
        keep_d_mass,
        invalid_nan,
        a_mass_interp: a_mass_interp.parse::<InterpKind>().map_err(to_py_err)?,
        use_neighbor_flag,
    };

    let mut ana = FretAnalyzer::new(tracks, excitation_seq).map_err(to_py_err)?;
    ana.analyze(&options);

    let output_path = output_path(tracks_file, output_csv, "analyzed");
    save_tracks_to_csv(ana.tracks(), &output_path).map_err(to_py_err)?;
    tracks_to_py(py, ana.tracks())
}

/// Python binding: analysis, segmentation and bleach step filtering in one go.
///
/// Returns a dict with the remaining localizations ("tracks") and the bleach
/// step result per particle ("outcomes").
#[pyfunction]
#[pyo3(signature = (tracks_file, excitation_seq, penalty, brightness_thresh, truncate=true, cost_model="l2", min_size=1, jump=1, max_iterations=None, radius=None, output_csv=None))]
fn pipeline(
    py: Python<'_>,
    tracks_file: &str,
    excitation_seq: &str,
    penalty: f64,
    brightness_thresh: f64,
    truncate: bool,
    cost_model: &str,
    min_size: usize,
    jump: usize,
    max_iterations: Option<usize>,
    radius: Option<f64>,
    output_csv: Option<&str>,
) -> PyResult<PyObject> {
    let tracks = load_tracks_from_csv(tracks_file).map_err(to_py_err)?;
    let mut detector = Pelt::new(
        cost_model.parse::<CostModel>().map_err(to_py_err)?,
        min_size,
        jump,
    );
    if let Some(max) = max_iterations {
        detector = detector.with_max_iterations(max);
    }

    let mut ana =
        FretAnalyzer::with_detector(tracks, excitation_seq, detector).map_err(to_py_err)?;
    if let Some(r) = radius {
        ana.has_near_neighbor(r);
    }
    ana.analyze(&AnalyzeOptions::default());
    // Release the GIL while segmenting, which is the expensive part
    py.allow_threads(|| ana.segment_a_mass(penalty))
        .map_err(to_py_err)?;
    let outcomes = ana.acceptor_bleach_step(brightness_thresh, truncate);

    let output_path = output_path(tracks_file, output_csv, "pipeline");
    save_tracks_to_csv(ana.tracks(), &output_path).map_err(to_py_err)?;

    let result = PyDict::new_bound(py);
    result.set_item("tracks", tracks_to_py(py, ana.tracks())?)?;
    result.set_item("outcomes", outcomes_to_py(py, &outcomes)?)?;
    Ok(result.into())
}

/// Python binding: keep particles fulfilling `expr` in at least `min_count` frames
#[pyfunction]
#[pyo3(signature = (tracks_file, expr, min_count=1, output_csv=None))]
fn filter_particles(
    py: Python<'_>,
    tracks_file: &str,
    expr: &str,
    min_count: i64,
    output_csv: Option<&str>,
) -> PyResult<PyObject> {
    let mut tracks = load_tracks_from_csv(tracks_file).map_err(to_py_err)?;
    crate::query::filter_particles_in_place(&mut tracks, expr, min_count).map_err(to_py_err)?;

    let output_path = output_path(tracks_file, output_csv, "filtered");
    save_tracks_to_csv(&tracks, &output_path).map_err(to_py_err)?;
    tracks_to_py(py, &tracks)
}

/// Python binding: evaluate `expr` for each localization of a CSV
#[pyfunction]
fn eval(py: Python<'_>, tracks_file: &str, expr: &str) -> PyResult<PyObject> {
    let tracks = load_tracks_from_csv(tracks_file).map_err(to_py_err)?;
    let mask = crate::query::evaluate(&tracks, expr).map_err(to_py_err)?;
    Ok(PyList::new_bound(py, mask).into())
}

/// Python module definition
#[pymodule]
fn fret_analysis_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(analyze, m)?)?;
    m.add_function(wrap_pyfunction!(pipeline, m)?)?;
    m.add_function(wrap_pyfunction!(filter_particles, m)?)?;
    m.add_function(wrap_pyfunction!(eval, m)?)?;
    m.add("__doc__", "smFRET analysis Rust library with Python bindings")?;
    Ok(())
}
