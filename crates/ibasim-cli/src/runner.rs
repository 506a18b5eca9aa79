//! Job runner: builds the simulation, runs it or fits it, writes results.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use ibasim_compute::{ComputeBackend, CpuBackend, SerialBackend};
use ibasim_core::{
    export, Calibration, Detector, LayerModel, Roughness, SampleModel, Simulation,
    SpectrumWorkspace,
};
use ibasim_fit::{FitDriver, FitOutcome, FitPhase, FitStats, Roi};
use ibasim_physics::cross_section::Rutherford;
use ibasim_physics::stopping::{AnalyticStopping, ConstantStopping};
use ibasim_physics::{CrossSectionRegistry, Nuclide, StoppingModel};

use crate::config::{DetectorConfig, JobConfig, LayerConfig};

/// Spectra of one run, one workspace per detector.
pub struct SimulationOutput {
    pub workspaces: Vec<SpectrumWorkspace>,
    pub experimental: Vec<Option<Vec<f64>>>,
}

/// Result of a fit run.
pub struct FitRunOutput {
    pub outcome: FitOutcome,
    pub spectra: SimulationOutput,
}

/// Build the engine's [`Simulation`] from a parsed job.
pub fn build_simulation(job: &JobConfig) -> Result<Simulation> {
    let beam = Arc::new(Nuclide::lookup(&job.beam.ion).with_context(|| "Beam ion")?);
    let sample = build_sample(&job.sample.layer).context("Sample")?;

    let stopping: Arc<dyn StoppingModel> = match job.simulation.stopping.as_str() {
        "analytic" => Arc::new(AnalyticStopping),
        "constant" => Arc::new(ConstantStopping {
            stopping: job.simulation.constant_stopping,
            straggling: job.simulation.constant_straggling,
        }),
        other => anyhow::bail!("Unknown stopping model '{}'. Valid models: analytic, constant", other),
    };

    let mut sim = Simulation::new(beam, job.beam.energy, sample, stopping);
    sim.cross_sections = match job.simulation.cross_section.as_str() {
        "andersen" => CrossSectionRegistry::default(),
        "rutherford" => CrossSectionRegistry::new(Arc::new(Rutherford), Arc::new(Rutherford)),
        other => anyhow::bail!("Unknown cross section model '{}'. Valid models: andersen, rutherford", other),
    };
    sim.beam_energy_spread = job.beam.energy_spread;
    sim.alpha = job.beam.alpha.to_radians();
    sim.sample_phi = job.beam.phi.to_radians();
    sim.beam_aperture = job.beam.aperture;
    sim.fluence = job.simulation.fluence;
    sim.emin = job.simulation.emin;
    sim.channeling = job.simulation.channeling;
    sim.params = job.simulation.params.clone();
    sim.detectors = job
        .detector
        .iter()
        .enumerate()
        .map(|(i, d)| build_detector(d).with_context(|| format!("Detector {}", i + 1)))
        .collect::<Result<_>>()?;
    sim.add_auto_reactions(job.reactions.rbs, job.reactions.erd);
    if sim.reactions.is_empty() {
        anyhow::bail!("No reactions. Enable rbs or erd (erd needs a forward detector).");
    }
    sim.sanity_check().context("Simulation failed sanity check")?;
    Ok(sim)
}

fn build_detector(d: &DetectorConfig) -> Result<Detector> {
    let foil = if d.foil.is_empty() {
        None
    } else {
        Some(build_sample(&d.foil).context("Foil")?)
    };
    Ok(Detector {
        theta: d.theta.to_radians(),
        phi: d.phi.to_radians(),
        solid: d.solid * 1e-3,
        calibration: Calibration {
            slope: d.slope,
            offset: d.offset,
            resolution: d.resolution,
        },
        channels: d.channels,
        distance: d.distance,
        aperture: d.aperture,
        foil,
    })
}

/// Collect the nuclides of `layers` in order of first appearance and build
/// one [`LayerModel`] per layer, concentrations normalised.
fn build_sample(layers: &[LayerConfig]) -> Result<SampleModel> {
    let mut nuclides: Vec<Arc<Nuclide>> = Vec::new();
    let mut lookup = |name: &str| -> Result<usize> {
        let n = Nuclide::lookup(name)?;
        if let Some(i) = nuclides.iter().position(|x| x.same_isotope(&n)) {
            return Ok(i);
        }
        nuclides.push(Arc::new(n));
        Ok(nuclides.len() - 1)
    };

    let mut indexed = Vec::with_capacity(layers.len());
    for layer in layers {
        let start = index_composition(&layer.composition, &mut lookup)?;
        let end = layer
            .composition_end
            .as_ref()
            .map(|c| index_composition(c, &mut lookup))
            .transpose()?;
        indexed.push((start, end));
    }

    let n = nuclides.len();
    let models = layers
        .iter()
        .zip(indexed)
        .map(|(layer, (start, end))| LayerModel {
            thickness: layer.thickness,
            concentrations: dense(&start, n),
            concentrations_end: end.map(|e| dense(&e, n)),
            roughness: if layer.roughness > 0.0 {
                Roughness::gamma(layer.roughness, layer.rough_n)
            } else {
                Roughness::default()
            },
            yield_factor: layer.yield_factor,
            yield_slope: layer.yield_slope,
            bragg: layer.bragg,
            stragg: layer.stragg,
        })
        .collect();

    let mut model = SampleModel::new(nuclides, models);
    model.renormalize();
    Ok(model)
}

fn index_composition(
    composition: &BTreeMap<String, f64>,
    lookup: &mut impl FnMut(&str) -> Result<usize>,
) -> Result<Vec<(usize, f64)>> {
    composition
        .iter()
        .map(|(name, &c)| Ok((lookup(name)?, c)))
        .collect()
}

fn dense(entries: &[(usize, f64)], n: usize) -> Vec<f64> {
    let mut c = vec![0.0; n];
    for &(i, v) in entries {
        c[i] += v;
    }
    c
}

/// Create a compute backend based on the user's preference string.
///
/// - `"serial"`: calling thread only.
/// - `"cpu"` / `"auto"` (default): rayon, optionally with a fixed thread count.
pub fn create_backend(preference: &str, threads: usize) -> Result<Box<dyn ComputeBackend>> {
    let backend: Box<dyn ComputeBackend> = match preference {
        "serial" => Box::new(SerialBackend),
        "cpu" | "auto" if threads > 0 => Box::new(CpuBackend::with_threads(threads)?),
        "cpu" | "auto" => Box::new(CpuBackend::new()),
        other => anyhow::bail!("Unknown backend '{}'. Valid backends: auto, cpu, serial", other),
    };
    let info = backend.device_info();
    match info.compute_units {
        Some(n) => println!("Backend: {} ({} threads)", info.name, n),
        None => println!("Backend: {}", info.name),
    }
    Ok(backend)
}

/// Load each detector's measured spectrum, if configured.
pub fn load_experimental(job: &JobConfig) -> Result<Vec<Option<Vec<f64>>>> {
    job.detector
        .iter()
        .map(|d| {
            d.experimental
                .as_deref()
                .map(|p| read_experimental(&job.resolve(p)))
                .transpose()
        })
        .collect()
}

/// Read a two-column (channel, counts) text spectrum.
pub fn read_experimental(path: &Path) -> Result<Vec<f64>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    parse_experimental(&content).with_context(|| format!("Invalid spectrum {}", path.display()))
}

/// Parse a two-column (channel, counts) spectrum. Blank lines and lines
/// starting with `#` are skipped; missing channels are zero.
pub fn parse_experimental(content: &str) -> Result<Vec<f64>> {
    let mut counts = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut cols = line.split(|c: char| c.is_whitespace() || c == ',').filter(|s| !s.is_empty());
        let (Some(ch), Some(value)) = (cols.next(), cols.next()) else {
            anyhow::bail!("line {}: expected two columns", lineno + 1);
        };
        let ch: usize = ch
            .parse()
            .with_context(|| format!("line {}: bad channel '{}'", lineno + 1, ch))?;
        let value: f64 = value
            .parse()
            .with_context(|| format!("line {}: bad count '{}'", lineno + 1, value))?;
        if counts.len() <= ch {
            counts.resize(ch + 1, 0.0);
        }
        counts[ch] = value;
    }
    if counts.is_empty() {
        anyhow::bail!("no data");
    }
    Ok(counts)
}

/// Simulate every detector of the job.
pub fn run_simulation(job: &JobConfig) -> Result<SimulationOutput> {
    let sim = build_simulation(job)?;
    print_summary(&sim);
    let experimental = load_experimental(job)?;
    let backend = create_backend(&job.simulation.backend, job.simulation.threads)?;

    let mut workspaces = (0..sim.detectors.len())
        .map(|i| SpectrumWorkspace::new(&sim, i).with_context(|| format!("Detector {}", i + 1)))
        .collect::<Result<Vec<_>>>()?;
    let mut batch: Vec<&mut SpectrumWorkspace> = workspaces.iter_mut().collect();
    backend.simulate_batch(&sim, &mut batch)?;

    for (i, ws) in workspaces.iter().enumerate() {
        println!(
            "  Detector {}: {} channels, {} reactions, {:.1} counts",
            i + 1,
            ws.n_channels,
            ws.channels.len(),
            ws.sum.sum()
        );
    }
    Ok(SimulationOutput {
        workspaces,
        experimental,
    })
}

/// Fit the job's simulation to its measured spectra.
pub fn run_fit(job: &JobConfig) -> Result<FitRunOutput> {
    let fit = job.fit.as_ref().context("Job has no [fit] section")?;
    let sim = build_simulation(job)?;
    print_summary(&sim);
    let experimental = load_experimental(job)?;
    let backend = create_backend(&job.simulation.backend, job.simulation.threads)?;

    let mut driver = FitDriver::new(sim, backend);
    {
        let config = driver.config_mut();
        config.n_iters_max = fit.n_iters_max;
        config.xtol = fit.xtol;
        config.chisq_tol = fit.chisq_tol;
        config.chisq_fast_tol = fit.chisq_fast_tol;
        config.phase_start = if fit.fast_phase { FitPhase::Fast } else { FitPhase::Slow };
    }
    for (i, exp) in experimental.iter().enumerate() {
        if let Some(counts) = exp {
            driver.set_experimental(i, counts.clone())?;
        }
    }
    for (i, det) in job.detector.iter().enumerate() {
        for roi in &det.rois {
            driver.add_roi(Roi::parse(i, roi)?)?;
        }
    }
    let n_active = driver.params_mut().activate_list(&fit.variables)?;
    println!("Fitting {} variables over {} ranges", n_active, driver.rois().len());
    for i in 0..job.detector.len() {
        println!("  Detector {}: lowest energy of interest {:.1} keV", i + 1, driver.fit_emin(i));
    }

    let mut phase = None;
    driver.set_callback(move |stats: &FitStats| {
        if phase != Some(stats.phase) {
            phase = Some(stats.phase);
            println!("Phase {}", stats.phase.number());
            println!("{}", FitStats::header());
        }
        if stats.iter_call > 0 {
            println!("{stats}");
        }
        false
    });

    let outcome = driver.fit()?;
    println!("Fit finished: {}", outcome.status);
    for v in &outcome.variables {
        println!("  {:<24} = {:14.6e} +- {:12.4e} {}", v.name, v.value, v.error, v.unit);
    }
    for r in &outcome.rois {
        println!(
            "  Det {} {:>14}: exp {:10.0} sim {:12.1} ratio {:.5}",
            r.roi.detector + 1,
            r.roi.to_string(),
            r.experimental,
            r.simulated,
            r.ratio()
        );
    }

    let workspaces = driver.into_workspaces();
    Ok(FitRunOutput {
        outcome,
        spectra: SimulationOutput {
            workspaces,
            experimental,
        },
    })
}

fn print_summary(sim: &Simulation) {
    println!(
        "Beam: {} at {} keV, fluence {:e}",
        sim.beam, sim.beam_energy, sim.fluence
    );
    println!(
        "Sample: {} layers, {:.1} tfu, {} nuclides",
        sim.sample_model.layers.len(),
        sim.sample_model.total_thickness(),
        sim.sample_model.nuclides.len()
    );
    println!("Detectors: {}, reactions: {}", sim.detectors.len(), sim.reactions.len());
}

fn create_file(path: &Path) -> Result<std::io::BufWriter<std::fs::File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path).with_context(|| format!("Could not create {}", path.display()))?;
    Ok(std::io::BufWriter::new(file))
}

/// File name for detector `i` (0-based).
pub fn detector_path(dir: &Path, stem: &str, i: usize, ext: &str) -> PathBuf {
    dir.join(format!("{stem}_det{}.{ext}", i + 1))
}

/// Write each detector's spectra to a CSV file.
pub fn write_spectra_csv(output: &SimulationOutput, dir: &Path) -> Result<()> {
    for (i, ws) in output.workspaces.iter().enumerate() {
        let path = detector_path(dir, "spectrum", i, "csv");
        let mut file = create_file(&path)?;
        let exp = output.experimental.get(i).and_then(|e| e.as_deref());
        export::write_spectra_csv(&mut file, ws, exp)?;
        file.flush()?;
        println!("Spectra written to: {}", path.display());
    }
    Ok(())
}

/// Write each detector's brick tables.
pub fn write_bricks(output: &SimulationOutput, dir: &Path) -> Result<()> {
    for (i, ws) in output.workspaces.iter().enumerate() {
        let path = detector_path(dir, "bricks", i, "txt");
        let mut file = create_file(&path)?;
        export::write_bricks(&mut file, ws)?;
        file.flush()?;
        println!("Bricks written to: {}", path.display());
    }
    Ok(())
}

/// Write the fit result to a JSON file.
pub fn write_fit_json(outcome: &FitOutcome, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(outcome)
        .map_err(|e| anyhow::anyhow!("JSON serialisation error: {}", e))?;
    std::fs::write(path, json)?;

    println!("Fit result (JSON) written to: {}", path.display());
    Ok(())
}

/// Size every detector's workspace without simulating. Returns the channel
/// counts.
pub fn dry_run(sim: &Simulation) -> Result<Vec<usize>> {
    (0..sim.detectors.len())
        .map(|i| {
            let ws = SpectrumWorkspace::new(sim, i).with_context(|| format!("Detector {}", i + 1))?;
            Ok(ws.n_channels)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use ibasim_core::simulate_workspace;
    use approx::assert_relative_eq;

    fn simulate_detector(sim: &Simulation, i: usize) -> SpectrumWorkspace {
        let mut ws = SpectrumWorkspace::new(sim, i).unwrap();
        simulate_workspace(&mut ws, sim).unwrap();
        ws
    }

    const JOB: &str = r#"
        [simulation]
        backend = "serial"

        [beam]
        ion = "4He"
        energy = 2000.0
        alpha = 10.0

        [[sample.layer]]
        thickness = 40.0
        composition = { "Au" = 1.0 }

        [[sample.layer]]
        thickness = 2000.0
        composition = { "28Si" = 1.0, "16O" = 2.0 }

        [[detector]]
        theta = 165.0
        solid = 2.0
    "#;

    #[test]
    fn test_build_simulation_converts_units() {
        let job = parse_config(JOB).unwrap();
        let sim = build_simulation(&job).unwrap();
        assert_relative_eq!(sim.alpha, 10f64.to_radians());
        assert_relative_eq!(sim.detectors[0].solid, 2e-3);
        assert_relative_eq!(sim.detectors[0].theta, 165f64.to_radians());
        assert_eq!(sim.sample_model.nuclides.len(), 3);
        assert_eq!(sim.reactions.len(), 3);

        let oxide = &sim.sample_model.layers[1];
        let si = sim.sample_model.nuclide_index(&Nuclide::lookup("28Si").unwrap()).unwrap();
        let o = sim.sample_model.nuclide_index(&Nuclide::lookup("16O").unwrap()).unwrap();
        assert_relative_eq!(oxide.concentrations[si], 1.0 / 3.0);
        assert_relative_eq!(oxide.concentrations[o], 2.0 / 3.0);
    }

    #[test]
    fn test_unknown_models_are_rejected() {
        let mut job = parse_config(JOB).unwrap();
        job.simulation.stopping = "srim".into();
        assert!(build_simulation(&job).is_err());

        let mut job = parse_config(JOB).unwrap();
        job.beam.ion = "Xx".into();
        assert!(build_simulation(&job).is_err());
    }

    #[test]
    fn test_parse_experimental() {
        let counts = parse_experimental("# header\n0 1\n1 2.5\n\n3,7\n").unwrap();
        assert_eq!(counts, vec![1.0, 2.5, 0.0, 7.0]);
        assert!(parse_experimental("0\n").is_err());
        assert!(parse_experimental("x 1\n").is_err());
        assert!(parse_experimental("# only comments\n").is_err());
    }

    #[test]
    fn test_simulation_matches_direct_run() {
        let job = parse_config(JOB).unwrap();
        let output = run_simulation(&job).unwrap();
        let sim = build_simulation(&job).unwrap();
        let direct = simulate_detector(&sim, 0);
        assert!(output.workspaces[0].sum.sum() > 0.0);
        assert_relative_eq!(output.workspaces[0].sum.sum(), direct.sum.sum(), max_relative = 1e-12);
        assert_eq!(dry_run(&sim).unwrap(), vec![direct.n_channels]);
    }

    #[test]
    fn test_spectra_csv_header() {
        let job = parse_config(JOB).unwrap();
        let output = run_simulation(&job).unwrap();
        let mut buf = Vec::new();
        export::write_spectra_csv(&mut buf, &output.workspaces[0], None).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("\"Channel\",\"Energy (keV)\",\"Simulated\""));
        assert_eq!(text.lines().count(), output.workspaces[0].n_channels + 1);
    }
}
