//! Epoch-stamped cache of per-workspace residual blocks.
//!
//! A *base* evaluation (a trial point of the solver) starts a new epoch and
//! stores every workspace's block together with the values of the variables
//! that affect that workspace. Jacobian evaluations perturb one variable at
//! a time; blocks of workspaces that variable does not affect are served
//! from the cache. A lookup only succeeds when both the epoch and the stored
//! variable values match, so a stale block is never returned.

#[derive(Debug, Clone)]
struct Entry {
    epoch: u64,
    key: Vec<f64>,
    residuals: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ResidualCache {
    epoch: u64,
    entries: Vec<Option<Entry>>,
}

impl ResidualCache {
    pub fn new(n_workspaces: usize) -> Self {
        Self {
            epoch: 0,
            entries: vec![None; n_workspaces],
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Start a new base evaluation. Every stored block becomes stale.
    pub fn begin_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Drop every entry.
    pub fn invalidate(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
        self.epoch += 1;
    }

    pub fn store(&mut self, workspace: usize, key: Vec<f64>, residuals: Vec<f64>) {
        if workspace >= self.entries.len() {
            self.entries.resize(workspace + 1, None);
        }
        self.entries[workspace] = Some(Entry {
            epoch: self.epoch,
            key,
            residuals,
        });
    }

    /// Residual block of `workspace`, if it was computed in the current epoch
    /// at exactly the variable values `key`.
    pub fn lookup(&self, workspace: usize, key: &[f64]) -> Option<&[f64]> {
        let entry = self.entries.get(workspace)?.as_ref()?;
        let same_key = entry.key.len() == key.len()
            && entry.key.iter().zip(key).all(|(a, b)| a.to_bits() == b.to_bits());
        (entry.epoch == self.epoch && same_key).then_some(entry.residuals.as_slice())
    }
}
