//! Plain-text export of bricks and spectra.

use std::io::{self, Write};

use crate::workspace::SpectrumWorkspace;

/// Write every reaction's bricks as whitespace-separated columns:
/// reaction index, brick index, depth (tfu), incident energy (keV), exit
/// energy (keV), exit energy spread (keV) and counts.
pub fn write_bricks<W: Write>(w: &mut W, ws: &SpectrumWorkspace) -> io::Result<()> {
    let counts_per_q = ws.fluence * ws.detector.solid;
    for (i, ch) in ws.channels.iter().enumerate() {
        writeln!(w, "#Reaction {}: {}", i, ch.reaction.name())?;
        for (j, b) in ch.bricks.iter().enumerate() {
            writeln!(
                w,
                "{:2} {:2} {:8.3} {:8.3} {:8.3} {:8.3} {:12.3}",
                i,
                j,
                b.depth.x,
                b.energy_in,
                b.energy,
                b.variance.max(0.0).sqrt(),
                b.q * counts_per_q
            )?;
        }
        writeln!(w)?;
        writeln!(w)?;
    }
    Ok(())
}

fn write_value<W: Write>(w: &mut W, value: f64) -> io::Result<()> {
    if value == 0.0 {
        write!(w, ",0")
    } else {
        write!(w, ",{value:e}")
    }
}

/// Write the sum spectrum, optionally the experimental spectrum, and each
/// reaction's spectrum as CSV, one row per channel.
pub fn write_spectra_csv<W: Write>(w: &mut W, ws: &SpectrumWorkspace, experimental: Option<&[f64]>) -> io::Result<()> {
    write!(w, "\"Channel\",\"Energy (keV)\",\"Simulated\"")?;
    if experimental.is_some() {
        write!(w, ",\"Experimental\"")?;
    }
    for ch in &ws.channels {
        write!(w, ",\"{}\"", ch.reaction.name())?;
    }
    writeln!(w)?;

    for i in 0..ws.n_channels {
        write!(w, "{},{}", i, ws.detector.calibration.energy(i))?;
        write_value(w, ws.sum.bins[i])?;
        if let Some(exp) = experimental {
            write_value(w, exp.get(i).copied().unwrap_or(0.0))?;
        }
        for ch in &ws.channels {
            write_value(w, ch.histogram.bins.get(i).copied().unwrap_or(0.0))?;
        }
        writeln!(w)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{LayerModel, SampleModel};
    use crate::simulation::Simulation;
    use ibasim_physics::stopping::AnalyticStopping;
    use ibasim_physics::Nuclide;
    use std::sync::Arc;

    fn workspace() -> SpectrumWorkspace {
        let si = Arc::new(Nuclide::lookup("28Si").unwrap());
        let model = SampleModel::new(vec![si], vec![LayerModel::new(100.0, vec![1.0])]);
        let mut sim = Simulation::new(
            Arc::new(Nuclide::lookup("4He").unwrap()),
            1000.0,
            model,
            Arc::new(AnalyticStopping),
        );
        sim.add_auto_reactions(true, false);
        SpectrumWorkspace::new(&sim, 0).unwrap()
    }

    #[test]
    fn test_csv_header_and_zero_rows() {
        let mut ws = workspace();
        ws.sum.bins[1] = 2.5;
        let mut out = Vec::new();
        write_spectra_csv(&mut out, &ws, Some(&[1.0])).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "\"Channel\",\"Energy (keV)\",\"Simulated\",\"Experimental\",\"28Si (RBS)\""
        );
        assert_eq!(lines.next().unwrap(), "0,0,0,1e0,0");
        assert_eq!(lines.next().unwrap(), "1,1,2.5e0,0,0");
        assert_eq!(text.lines().count(), ws.n_channels + 1);
    }

    #[test]
    fn test_brick_header_per_reaction() {
        let ws = workspace();
        let mut out = Vec::new();
        write_bricks(&mut out, &ws).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("#Reaction 0: 28Si (RBS)\n"));
    }
}
