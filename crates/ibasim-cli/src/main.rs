//! ibasim command-line interface.
//!
//! Run simulations and fits from TOML job files:
//! ```sh
//! ibasim simulate job.toml
//! ibasim fit job.toml -o results/
//! ibasim validate job.toml
//! ibasim nuclides
//! ```

mod config;
mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ibasim_physics::Nuclide;

#[derive(Parser)]
#[command(name = "ibasim")]
#[command(about = "ibasim: Ion Beam Analysis Spectrum Simulation and Fitting")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate spectra from a TOML job file.
    Simulate {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Fit the job's simulation to its measured spectra.
    Fit {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Variables to fit (overrides the [fit] section), e.g. "fluence,thick1".
        #[arg(short, long)]
        variables: Option<String>,
    },
    /// Validate a job file without simulating.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// List the built-in nuclides.
    Nuclides,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate { config, output } => {
            println!("ibasim Spectrum Simulation");
            println!("==========================");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());

            let result = runner::run_simulation(&job)?;
            let out_dir = output.unwrap_or_else(|| job.resolve(&job.output.directory));

            if job.output.save_spectra {
                runner::write_spectra_csv(&result, &out_dir)?;
            }
            if job.output.save_bricks {
                runner::write_bricks(&result, &out_dir)?;
            }

            println!("Simulation complete.");
            Ok(())
        }
        Commands::Fit {
            config,
            output,
            variables,
        } => {
            println!("ibasim Spectrum Fit");
            println!("===================");
            let mut job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());
            if let Some(vars) = variables {
                match job.fit.as_mut() {
                    Some(fit) => fit.variables = vars,
                    None => anyhow::bail!("Job has no [fit] section"),
                }
            }

            let result = runner::run_fit(&job)?;
            let out_dir = output.unwrap_or_else(|| job.resolve(&job.output.directory));

            if job.output.save_spectra {
                runner::write_spectra_csv(&result.spectra, &out_dir)?;
            }
            if job.output.save_bricks {
                runner::write_bricks(&result.spectra, &out_dir)?;
            }
            if job.output.save_fit_json {
                runner::write_fit_json(&result.outcome, &out_dir.join("fit.json"))?;
            }

            println!("Fit complete.");
            Ok(())
        }
        Commands::Validate { config } => {
            let job = config::load_config(&config)?;
            let sim = runner::build_simulation(&job)?;
            let channels = runner::dry_run(&sim)?;
            runner::load_experimental(&job)?;
            println!("Configuration is valid: {}", config.display());
            for (i, n) in channels.iter().enumerate() {
                println!("  Detector {}: {} channels", i + 1, n);
            }
            Ok(())
        }
        Commands::Nuclides => {
            println!("Built-in nuclides:");
            println!();
            println!("  {:>6} {:>4} {:>4} {:>12}", "Name", "Z", "A", "Mass (u)");
            for n in Nuclide::builtin() {
                println!("  {:>6} {:>4} {:>4} {:>12.6}", n.name, n.z, n.a, n.mass);
            }
            Ok(())
        }
    }
}
