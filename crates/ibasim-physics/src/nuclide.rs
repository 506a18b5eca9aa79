//! Nuclide identities and the built-in nuclide table.
//!
//! Names follow the `"<A><Symbol>"` convention (`"4He"`, `"28Si"`). A bare
//! element symbol resolves to that element's most abundant isotope.

use serde::{Deserialize, Serialize};

use crate::provider::PhysicsError;

/// A single nuclide: charge, mass number and atomic mass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nuclide {
    /// Display name, e.g. `"4He"`.
    pub name: String,
    /// Atomic number $Z$.
    pub z: u32,
    /// Mass number $A$.
    pub a: u32,
    /// Atomic mass (u).
    pub mass: f64,
}

/// `(symbol, Z, A, mass)`; each element's most abundant isotope comes first.
const NUCLIDES: &[(&str, u32, u32, f64)] = &[
    ("H", 1, 1, 1.007_825),
    ("H", 1, 2, 2.014_102),
    ("He", 2, 4, 4.002_603),
    ("He", 2, 3, 3.016_029),
    ("Li", 3, 7, 7.016_003),
    ("Li", 3, 6, 6.015_123),
    ("Be", 4, 9, 9.012_183),
    ("B", 5, 11, 11.009_305),
    ("B", 5, 10, 10.012_937),
    ("C", 6, 12, 12.0),
    ("C", 6, 13, 13.003_355),
    ("N", 7, 14, 14.003_074),
    ("N", 7, 15, 15.000_109),
    ("O", 8, 16, 15.994_915),
    ("O", 8, 18, 17.999_160),
    ("F", 9, 19, 18.998_403),
    ("Na", 11, 23, 22.989_769),
    ("Mg", 12, 24, 23.985_042),
    ("Al", 13, 27, 26.981_538),
    ("Si", 14, 28, 27.976_927),
    ("Si", 14, 29, 28.976_495),
    ("Si", 14, 30, 29.973_770),
    ("P", 15, 31, 30.973_762),
    ("S", 16, 32, 31.972_071),
    ("Ar", 18, 40, 39.962_383),
    ("Ti", 22, 48, 47.947_942),
    ("Cr", 24, 52, 51.940_506),
    ("Fe", 26, 56, 55.934_936),
    ("Ni", 28, 58, 57.935_342),
    ("Cu", 29, 63, 62.929_598),
    ("Cu", 29, 65, 64.927_790),
    ("Zn", 30, 64, 63.929_142),
    ("Ga", 31, 69, 68.925_574),
    ("Ge", 32, 74, 73.921_178),
    ("As", 33, 75, 74.921_595),
    ("Ag", 47, 107, 106.905_097),
    ("Ag", 47, 109, 108.904_752),
    ("Ta", 73, 181, 180.947_996),
    ("W", 74, 184, 183.950_931),
    ("Au", 79, 197, 196.966_570),
    ("Pb", 82, 208, 207.976_652),
];

impl Nuclide {
    pub fn new(name: impl Into<String>, z: u32, a: u32, mass: f64) -> Self {
        Self {
            name: name.into(),
            z,
            a,
            mass,
        }
    }

    /// Resolve a nuclide name from the built-in table.
    ///
    /// Accepts `"4He"`, `"He-4"` and bare symbols such as `"Si"`.
    pub fn lookup(name: &str) -> Result<Self, PhysicsError> {
        let trimmed = name.trim();
        let (mass_number, symbol) = split_name(trimmed)
            .ok_or_else(|| PhysicsError::UnknownNuclide(name.to_string()))?;

        NUCLIDES
            .iter()
            .find(|(s, _, a, _)| *s == symbol && mass_number.map_or(true, |m| m == *a))
            .map(|&(s, z, a, mass)| Self::new(format!("{a}{s}"), z, a, mass))
            .ok_or_else(|| PhysicsError::UnknownNuclide(name.to_string()))
    }

    /// Every nuclide in the built-in table.
    pub fn builtin() -> impl Iterator<Item = Nuclide> {
        NUCLIDES
            .iter()
            .map(|&(s, z, a, mass)| Self::new(format!("{a}{s}"), z, a, mass))
    }

    /// Same isotope, ignoring the display name.
    pub fn same_isotope(&self, other: &Nuclide) -> bool {
        self.z == other.z && self.a == other.a
    }
}

impl std::fmt::Display for Nuclide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Split `"4He"` / `"He-4"` / `"He"` into mass number and symbol.
fn split_name(name: &str) -> Option<(Option<u32>, &str)> {
    if name.is_empty() {
        return None;
    }
    if let Some((symbol, mass)) = name.split_once('-') {
        return Some((Some(mass.parse().ok()?), symbol));
    }
    let digits = name.chars().take_while(|c| c.is_ascii_digit()).count();
    let (mass, symbol) = name.split_at(digits);
    if symbol.is_empty() {
        return None;
    }
    let mass = if mass.is_empty() {
        None
    } else {
        Some(mass.parse().ok()?)
    };
    Some((mass, symbol))
}
