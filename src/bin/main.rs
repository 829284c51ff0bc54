use clap::{Parser, Subcommand};
use fret_analysis_rs::bleach::bleach_step_in_place;
use fret_analysis_rs::metrics::analyze_in_place;
use fret_analysis_rs::query::{filter_in_place, filter_particles_in_place};
use fret_analysis_rs::segmentation::segment_in_place;
use fret_analysis_rs::spatial::{has_near_neighbor, interpolate_coords};
use fret_analysis_rs::{
    load_tracks_from_csv, save_tracks_to_csv, AnalyzeOptions, CostModel, ExcitationSchedule,
    FretAnalyzer, InterpKind, Pelt, StepOutcome, TrackTable,
};
use std::path::{Path, PathBuf};

/// Command-line tool for analyzing single-molecule FRET tracking data
#[derive(Parser)]
#[command(name = "fret-analysis")]
#[command(about = "Analyze smFRET tracking data with alternating excitation", long_about = None)]
struct Cli {
    /// Number of worker threads (default: one per CPU)
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

/// Changepoint detector settings
#[derive(clap::Args)]
struct DetectorArgs {
    /// Penalty per segment for changepoint detection
    #[arg(short, long)]
    penalty: f64,

    /// Segment cost model (l1 or l2)
    #[arg(long, default_value = "l2")]
    cost_model: CostModel,

    /// Minimum number of acceptor frames per segment
    #[arg(long, default_value_t = 1)]
    min_size: usize,

    /// Subsample changepoint candidates (1 means every acceptor frame)
    #[arg(long, default_value_t = 1)]
    jump: usize,

    /// Give up segmenting a particle after this many cost evaluations
    #[arg(long)]
    max_iterations: Option<usize>,
}

impl DetectorArgs {
    fn detector(&self) -> Pelt {
        let pelt = Pelt::new(self.cost_model, self.min_size, self.jump);
        match self.max_iterations {
            Some(max) => pelt.with_max_iterations(max),
            None => pelt,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Calculate excitation types, FRET efficiency, stoichiometry and direct acceptor brightness
    Analyze {
        /// Path to the tracking data CSV (columns: particle, frame, donor_mass, acceptor_mass)
        #[arg(short, long)]
        input: PathBuf,

        /// Excitation sequence, e.g. "da" or "ddddda"
        #[arg(short, long)]
        excitation_seq: String,

        /// Use the d_mass column of the input instead of donor_mass + acceptor_mass
        #[arg(long)]
        keep_d_mass: bool,

        /// Keep efficiency and stoichiometry for frames without donor excitation
        #[arg(long)]
        keep_invalid: bool,

        /// Interpolation of the direct acceptor brightness (linear or nearest)
        #[arg(long, default_value = "linear")]
        a_mass_interp: InterpKind,

        /// Do not skip acceptor excitation frames flagged with has_neighbor
        #[arg(long)]
        ignore_neighbor_flag: bool,

        /// Output CSV path (default: auto-generated from input path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Segment the direct acceptor brightness of each particle (input from analyze)
    Segment {
        /// Path to the analyzed CSV
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        detector: DetectorArgs,

        /// Output CSV path (default: auto-generated from input path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Keep only particles whose acceptor bleached in a single step (input from segment)
    BleachStep {
        /// Path to the segmented CSV
        #[arg(short, long)]
        input: PathBuf,

        /// Segments with median acceptor brightness below this value count as bleached
        #[arg(short, long)]
        brightness_thresh: f64,

        /// Keep frames after the bleach step
        #[arg(long)]
        no_truncate: bool,

        /// Output CSV path (default: auto-generated from input path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Keep only localizations fulfilling an expression, e.g. "fret_eff > 0.2"
    Query {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        expr: String,

        /// Output CSV path (default: auto-generated from input path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Keep only particles fulfilling an expression in enough frames
    FilterParticles {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        expr: String,

        /// Minimum number of matching frames; 0 or negative means all but |min_count|
        #[arg(short, long, default_value_t = 1, allow_hyphen_values = true)]
        min_count: i64,

        /// Output CSV path (default: auto-generated from input path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Flag localizations with another localization nearby in the same frame
    Neighbors {
        #[arg(short, long)]
        input: PathBuf,

        /// Localizations closer than this are neighbors
        #[arg(short, long)]
        radius: f64,

        /// Output CSV path (default: auto-generated from input path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Insert rows for frames in which a particle was not localized
    Interpolate {
        #[arg(short, long)]
        input: PathBuf,

        /// Output CSV path (default: auto-generated from input path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run neighbor flagging, analysis, segmentation and bleach step filtering
    Pipeline {
        #[arg(short, long)]
        input: PathBuf,

        /// Excitation sequence, e.g. "da" or "ddddda"
        #[arg(short, long)]
        excitation_seq: String,

        #[command(flatten)]
        detector: DetectorArgs,

        /// Segments with median acceptor brightness below this value count as bleached
        #[arg(short, long)]
        brightness_thresh: f64,

        /// Keep frames after the bleach step
        #[arg(long)]
        no_truncate: bool,

        /// Flag near neighbors before the analysis
        #[arg(short, long)]
        radius: Option<f64>,

        /// Finally keep only localizations fulfilling this expression
        #[arg(long)]
        expr: Option<String>,

        /// Output CSV path (default: auto-generated from input path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Output path given on the command line, or `<stem>_<step>.csv` next to the input
fn output_path(input: &Path, output: Option<PathBuf>, step: &str) -> PathBuf {
    output.unwrap_or_else(|| {
        let base = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("tracks");
        let dir = input.parent().unwrap_or(Path::new("."));
        dir.join(format!("{}_{}.csv", base, step))
    })
}

fn load(input: &Path) -> TrackTable {
    println!("Reading tracking data: {:?}", input);
    match load_tracks_from_csv(input) {
        Ok(t) => {
            println!(
                "✅ Loaded {} localizations ({} particles)",
                t.len(),
                t.particles().len()
            );
            t
        }
        Err(e) => {
            eprintln!("❌ Error loading CSV: {}", e);
            std::process::exit(1);
        }
    }
}

fn save(table: &TrackTable, output_path: &Path) {
    match save_tracks_to_csv(table, output_path) {
        Ok(()) => println!("📄 Results saved to: {:?}", output_path),
        Err(e) => {
            eprintln!("❌ Error saving CSV: {}", e);
            std::process::exit(1);
        }
    }
}

fn report_outcomes(outcomes: &[(i64, StepOutcome)]) {
    let accepted = outcomes.iter().filter(|(_, o)| o.is_accepted()).count();
    let undefined = outcomes
        .iter()
        .filter(|(_, o)| matches!(o, StepOutcome::Undefined))
        .count();
    println!(
        "✅ {} of {} particles show a single acceptor bleach step ({} not segmented)",
        accepted,
        outcomes.len(),
        undefined
    );
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Some(n) = cli.threads {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(n).build_global() {
            eprintln!("❌ Error setting up {} worker threads: {}", n, e);
            std::process::exit(1);
        }
    }

    match cli.command {
        Commands::Analyze {
            input,
            excitation_seq,
            keep_d_mass,
            keep_invalid,
            a_mass_interp,
            ignore_neighbor_flag,
            output,
        } => {
            let schedule = match ExcitationSchedule::new(&excitation_seq) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("❌ Invalid excitation sequence: {}", e);
                    std::process::exit(1);
                }
            };
            println!("Excitation sequence: {}", schedule);

            let mut tracks = load(&input);
            let options = AnalyzeOptions {
                keep_d_mass,
                invalid_nan: !keep_invalid,
                a_mass_interp,
                use_neighbor_flag: !ignore_neighbor_flag,
            };
            analyze_in_place(&mut tracks, &schedule, &options);
            println!("✅ Successfully analyzed {} localizations", tracks.len());
            save(&tracks, &output_path(&input, output, "analyzed"));
        }

        Commands::Segment {
            input,
            detector,
            output,
        } => {
            println!("Penalty: {}", detector.penalty);
            let mut tracks = load(&input);
            let pelt = detector.detector();
            if let Err(e) = segment_in_place(&mut tracks, &pelt, detector.penalty, true, || false) {
                eprintln!("❌ Error segmenting acceptor brightness: {}", e);
                std::process::exit(1);
            }
            println!("✅ Successfully segmented {} particles", tracks.particles().len());
            save(&tracks, &output_path(&input, output, "segmented"));
        }

        Commands::BleachStep {
            input,
            brightness_thresh,
            no_truncate,
            output,
        } => {
            println!("Brightness threshold: {}", brightness_thresh);
            let mut tracks = load(&input);
            let outcomes = bleach_step_in_place(&mut tracks, brightness_thresh, !no_truncate);
            report_outcomes(&outcomes);
            save(&tracks, &output_path(&input, output, "bleach_step"));
        }

        Commands::Query {
            input,
            expr,
            output,
        } => {
            println!("Query: {}", expr);
            let mut tracks = load(&input);
            if let Err(e) = filter_in_place(&mut tracks, &expr) {
                eprintln!("❌ Error evaluating query: {}", e);
                std::process::exit(1);
            }
            println!("✅ {} localizations fulfill the query", tracks.len());
            save(&tracks, &output_path(&input, output, "query"));
        }

        Commands::FilterParticles {
            input,
            expr,
            min_count,
            output,
        } => {
            println!("Query: {} (min_count: {})", expr, min_count);
            let mut tracks = load(&input);
            if let Err(e) = filter_particles_in_place(&mut tracks, &expr, min_count) {
                eprintln!("❌ Error evaluating query: {}", e);
                std::process::exit(1);
            }
            println!("✅ {} particles fulfill the query", tracks.particles().len());
            save(&tracks, &output_path(&input, output, "filtered"));
        }

        Commands::Neighbors {
            input,
            radius,
            output,
        } => {
            println!("Radius: {}", radius);
            let mut tracks = load(&input);
            has_near_neighbor(&mut tracks, radius);
            let flagged = tracks
                .rows()
                .iter()
                .filter(|r| r.has_neighbor == Some(true))
                .count();
            println!("✅ {} localizations have near neighbors", flagged);
            save(&tracks, &output_path(&input, output, "neighbors"));
        }

        Commands::Interpolate { input, output } => {
            let tracks = load(&input);
            let n_before = tracks.len();
            let tracks = interpolate_coords(&tracks);
            println!(
                "✅ Inserted {} missing localizations",
                tracks.len() - n_before
            );
            save(&tracks, &output_path(&input, output, "interpolated"));
        }

        Commands::Pipeline {
            input,
            excitation_seq,
            detector,
            brightness_thresh,
            no_truncate,
            radius,
            expr,
            output,
        } => {
            let tracks = load(&input);
            let mut ana = match FretAnalyzer::with_detector(tracks, &excitation_seq, detector.detector()) {
                Ok(a) => a.with_progress(true),
                Err(e) => {
                    eprintln!("❌ Invalid excitation sequence: {}", e);
                    std::process::exit(1);
                }
            };

            if let Some(r) = radius {
                ana.has_near_neighbor(r);
            }
            ana.analyze(&AnalyzeOptions::default());
            if let Err(e) = ana.segment_a_mass(detector.penalty) {
                eprintln!("❌ Error segmenting acceptor brightness: {}", e);
                std::process::exit(1);
            }
            let outcomes = ana.acceptor_bleach_step(brightness_thresh, !no_truncate);
            report_outcomes(&outcomes);

            if let Some(expr) = expr {
                if let Err(e) = ana.query(&expr) {
                    eprintln!("❌ Error evaluating query: {}", e);
                    std::process::exit(1);
                }
                println!("✅ {} localizations fulfill the query", ana.tracks().len());
            }
            save(ana.tracks(), &output_path(&input, output, "pipeline"));
        }
    }
}
