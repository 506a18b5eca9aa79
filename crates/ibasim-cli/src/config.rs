//! TOML configuration deserialisation for simulation and fit jobs.
//!
//! Angles are given in degrees and solid angles in msr; the runner converts
//! them to the radians and steradians used by the engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ibasim_core::geometry::Aperture;
use ibasim_core::SimCalcParams;
use serde::Deserialize;

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    pub beam: BeamConfig,
    pub sample: SampleConfig,
    #[serde(default = "default_detectors")]
    pub detector: Vec<DetectorConfig>,
    #[serde(default)]
    pub reactions: ReactionsConfig,
    #[serde(default)]
    pub fit: Option<FitConfig>,
    #[serde(default)]
    pub output: OutputConfig,
    /// Directory of the job file; relative paths are resolved against it.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl JobConfig {
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }
}

/// Engine settings.
#[derive(Debug, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_fluence")]
    pub fluence: f64,
    /// Transport cutoff energy (keV).
    #[serde(default = "default_emin")]
    pub emin: f64,
    #[serde(default = "default_one")]
    pub channeling: f64,
    /// Stopping model: "analytic" or "constant".
    #[serde(default = "default_stopping")]
    pub stopping: String,
    /// keV/tfu, for the constant model.
    #[serde(default)]
    pub constant_stopping: f64,
    /// keV²/tfu, for the constant model.
    #[serde(default)]
    pub constant_straggling: f64,
    /// Cross sections: "andersen" or "rutherford".
    #[serde(default = "default_cross_section")]
    pub cross_section: String,
    /// Compute backend: "auto", "cpu" or "serial". Default: "auto".
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Worker threads for the cpu backend; 0 uses rayon's default.
    #[serde(default)]
    pub threads: usize,
    #[serde(default)]
    pub params: SimCalcParams,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fluence: default_fluence(),
            emin: default_emin(),
            channeling: default_one(),
            stopping: default_stopping(),
            constant_stopping: 0.0,
            constant_straggling: 0.0,
            cross_section: default_cross_section(),
            backend: default_backend(),
            threads: 0,
            params: SimCalcParams::default(),
        }
    }
}

fn default_fluence() -> f64 {
    1.0e12
}
fn default_emin() -> f64 {
    10.0
}
fn default_one() -> f64 {
    1.0
}
fn default_stopping() -> String {
    "analytic".into()
}
fn default_cross_section() -> String {
    "andersen".into()
}
fn default_backend() -> String {
    "auto".into()
}

/// Incident beam.
#[derive(Debug, Deserialize)]
pub struct BeamConfig {
    /// Nuclide name, e.g. "4He".
    pub ion: String,
    /// keV
    pub energy: f64,
    /// FWHM (keV).
    #[serde(default)]
    pub energy_spread: f64,
    /// Sample tilt (deg).
    #[serde(default)]
    pub alpha: f64,
    /// Sample tilt azimuth (deg).
    #[serde(default)]
    pub phi: f64,
    #[serde(default)]
    pub aperture: Aperture,
}

#[derive(Debug, Deserialize)]
pub struct SampleConfig {
    pub layer: Vec<LayerConfig>,
}

/// One sample or foil layer.
#[derive(Debug, Clone, Deserialize)]
pub struct LayerConfig {
    /// tfu
    pub thickness: f64,
    /// Nuclide name to concentration, e.g. `{ "28Si" = 1, "16O" = 2 }`.
    /// Normalised per layer.
    pub composition: BTreeMap<String, f64>,
    /// Composition at the bottom of the layer.
    #[serde(default)]
    pub composition_end: Option<BTreeMap<String, f64>>,
    /// Thickness standard deviation (tfu).
    #[serde(default)]
    pub roughness: f64,
    #[serde(default = "default_rough_n")]
    pub rough_n: usize,
    #[serde(default = "default_one")]
    pub yield_factor: f64,
    #[serde(default)]
    pub yield_slope: f64,
    #[serde(default = "default_one")]
    pub bragg: f64,
    #[serde(default = "default_one")]
    pub stragg: f64,
}

fn default_rough_n() -> usize {
    5
}

/// One detector.
#[derive(Debug, Deserialize)]
pub struct DetectorConfig {
    /// Scattering angle (deg).
    #[serde(default = "default_theta")]
    pub theta: f64,
    /// Azimuth (deg).
    #[serde(default)]
    pub phi: f64,
    /// Solid angle (msr).
    #[serde(default = "default_one")]
    pub solid: f64,
    /// keV per channel.
    #[serde(default = "default_one")]
    pub slope: f64,
    /// keV
    #[serde(default)]
    pub offset: f64,
    /// FWHM (keV).
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    #[serde(default = "default_channels")]
    pub channels: usize,
    /// Sample to detector distance (mm).
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub aperture: Aperture,
    /// Absorber foil layers.
    #[serde(default)]
    pub foil: Vec<LayerConfig>,
    /// Measured spectrum, two columns: channel and counts.
    #[serde(default)]
    pub experimental: Option<String>,
    /// Fit ranges, e.g. `["[300:500]"]`.
    #[serde(default)]
    pub rois: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            theta: default_theta(),
            phi: 0.0,
            solid: default_one(),
            slope: default_one(),
            offset: 0.0,
            resolution: default_resolution(),
            channels: default_channels(),
            distance: 0.0,
            aperture: Aperture::default(),
            foil: Vec::new(),
            experimental: None,
            rois: Vec::new(),
        }
    }
}

fn default_detectors() -> Vec<DetectorConfig> {
    vec![DetectorConfig::default()]
}
fn default_theta() -> f64 {
    165.0
}
fn default_resolution() -> f64 {
    15.0
}
fn default_channels() -> usize {
    16_384
}

/// Automatically generated reactions.
#[derive(Debug, Deserialize)]
pub struct ReactionsConfig {
    #[serde(default = "default_true")]
    pub rbs: bool,
    #[serde(default)]
    pub erd: bool,
}

impl Default for ReactionsConfig {
    fn default() -> Self {
        Self { rbs: true, erd: false }
    }
}

/// Fit settings.
#[derive(Debug, Deserialize)]
pub struct FitConfig {
    /// Comma-separated variable names, e.g. "fluence,thick1,calib".
    pub variables: String,
    #[serde(default = "default_n_iters_max")]
    pub n_iters_max: usize,
    #[serde(default = "default_xtol")]
    pub xtol: f64,
    #[serde(default = "default_chisq_tol")]
    pub chisq_tol: f64,
    #[serde(default = "default_chisq_fast_tol")]
    pub chisq_fast_tol: f64,
    /// Run the fast phase first (default: true).
    #[serde(default = "default_true")]
    pub fast_phase: bool,
}

fn default_n_iters_max() -> usize {
    150
}
fn default_xtol() -> f64 {
    1e-7
}
fn default_chisq_tol() -> f64 {
    1e-6
}
fn default_chisq_fast_tol() -> f64 {
    0.1
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Whether to save spectra as CSV (default: true).
    #[serde(default = "default_true")]
    pub save_spectra: bool,
    /// Whether to save the brick tables (default: false).
    #[serde(default)]
    pub save_bricks: bool,
    /// Whether to save the fit result as JSON (default: true).
    #[serde(default = "default_true")]
    pub save_fit_json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            save_spectra: true,
            save_bricks: false,
            save_fit_json: true,
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_true() -> bool {
    true
}

/// Parse a TOML job configuration.
pub fn parse_config(content: &str) -> anyhow::Result<JobConfig> {
    let config: JobConfig = toml::from_str(content)?;
    Ok(config)
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<JobConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    let mut config = parse_config(&content).with_context(|| format!("Invalid job file {}", path.display()))?;
    config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [beam]
        ion = "4He"
        energy = 2000.0

        [[sample.layer]]
        thickness = 100.0
        composition = { "197Au" = 1.0 }
    "#;

    #[test]
    fn test_minimal_job_uses_defaults() {
        let job = parse_config(MINIMAL).unwrap();
        assert_eq!(job.beam.ion, "4He");
        assert_eq!(job.simulation.fluence, 1.0e12);
        assert_eq!(job.simulation.backend, "auto");
        assert_eq!(job.detector.len(), 1);
        assert_eq!(job.detector[0].theta, 165.0);
        assert!(job.reactions.rbs);
        assert!(!job.reactions.erd);
        assert!(job.fit.is_none());
        assert_eq!(job.output.directory, "./output");
        assert_eq!(job.sample.layer[0].rough_n, 5);
        assert_eq!(job.sample.layer[0].bragg, 1.0);
    }

    #[test]
    fn test_full_job() {
        let job = parse_config(
            r#"
            [simulation]
            stopping = "constant"
            constant_stopping = 0.05
            backend = "serial"

            [simulation.params]
            geostragg = true
            incident = { sigmas = 1.0 }

            [beam]
            ion = "4He"
            energy = 2275.0
            alpha = 5.0
            aperture = { shape = "circle", width = 1.0 }

            [[sample.layer]]
            thickness = 50.0
            composition = { "197Au" = 1.0 }
            roughness = 5.0

            [[sample.layer]]
            thickness = 3000.0
            composition = { "28Si" = 1.0, "16O" = 2.0 }

            [[detector]]
            theta = 170.0
            solid = 3.5
            distance = 100.0
            experimental = "det1.dat"
            rois = ["[300:900]"]

            [[detector.foil]]
            thickness = 500.0
            composition = { "12C" = 1.0 }

            [fit]
            variables = "fluence,thick1"
            fast_phase = false
            "#,
        )
        .unwrap();
        assert_eq!(job.simulation.stopping, "constant");
        assert!(job.simulation.params.geostragg);
        assert_eq!(job.simulation.params.incident.sigmas, 1.0);
        assert_eq!(job.beam.aperture, Aperture::circle(1.0));
        assert_eq!(job.sample.layer[1].composition.len(), 2);
        assert_eq!(job.detector[0].foil.len(), 1);
        assert_eq!(job.detector[0].rois, vec!["[300:900]".to_string()]);
        let fit = job.fit.unwrap();
        assert_eq!(fit.variables, "fluence,thick1");
        assert!(!fit.fast_phase);
        assert_eq!(fit.xtol, 1e-7);
    }

    #[test]
    fn test_missing_beam_is_rejected() {
        assert!(parse_config("[[sample.layer]]\nthickness = 1.0\ncomposition = {}\n").is_err());
    }

    #[test]
    fn test_relative_paths_follow_job_file() {
        let mut job = parse_config(MINIMAL).unwrap();
        job.base_dir = PathBuf::from("/data/run1");
        assert_eq!(job.resolve("det1.dat"), PathBuf::from("/data/run1/det1.dat"));
        assert_eq!(job.resolve("/abs/x.dat"), PathBuf::from("/abs/x.dat"));
    }
}
