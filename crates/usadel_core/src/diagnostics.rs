//! Density-of-states output.

use crate::error::MaterialError;
use crate::material::Material;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Distance kept from each end of the plotted interval, so that adjacent
/// materials never share a position.
pub const EDGE_INSET: f64 = 1e-8;

/// Energies below this count as negative when deciding whether to mirror.
const NEGATIVE_ENERGY: f64 = -1e-16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DosSample {
    pub position: f64,
    pub energy: f64,
    pub dos: f64,
}

/// Density of states of `material` with its normalized locations mapped onto
/// `[x_left, x_right]`, position outer and energy inner.
///
/// When the energy axis has no negative entries, the negative branch is
/// synthesized as `dos(-E) = dos(E)` and listed first.
pub fn dos_table(
    material: &Material,
    x_left: f64,
    x_right: f64,
) -> Result<Vec<DosSample>, MaterialError> {
    if !(x_right - x_left > 2.0 * EDGE_INSET) {
        return Err(MaterialError::InvalidConfiguration(format!(
            "dos interval [{x_left}, {x_right}] is empty"
        )));
    }
    let a = x_left + EDGE_INSET;
    let b = x_right - EDGE_INSET;
    let energy = material.energy();
    let mirror = !energy.iter().any(|&e| e < NEGATIVE_ENERGY);

    let mut order: Vec<(usize, f64)> = Vec::with_capacity(2 * energy.len());
    if mirror {
        order.extend(energy.iter().enumerate().rev().map(|(n, &e)| (n, -e)));
    }
    order.extend(energy.iter().copied().enumerate());

    let mut samples = Vec::with_capacity(order.len() * material.location().len());
    for (p, &z) in material.location().iter().enumerate() {
        let position = a + (b - a) * z;
        for &(n, e) in &order {
            samples.push(DosSample {
                position,
                energy: e,
                dos: material.state().get(n, p).density_of_states(),
            });
        }
    }
    Ok(samples)
}

/// Writes `<position> <energy> <dos>` lines for [`dos_table`].
pub fn write_dos<W: Write>(
    material: &Material,
    writer: &mut W,
    x_left: f64,
    x_right: f64,
) -> Result<(), MaterialError> {
    for sample in dos_table(material, x_left, x_right)? {
        writeln!(
            writer,
            "{:>20.12e} {:>20.12e} {:>20.12e}",
            sample.position, sample.energy, sample.dos
        )?;
    }
    Ok(())
}

impl Material {
    pub fn write_dos<W: Write>(
        &self,
        writer: &mut W,
        x_left: f64,
        x_right: f64,
    ) -> Result<(), MaterialError> {
        write_dos(self, writer, x_left, x_right)
    }

    /// Creates (or truncates) `path` and writes the density of states to it.
    pub fn write_dos_file(
        &self,
        path: impl AsRef<Path>,
        x_left: f64,
        x_right: f64,
    ) -> Result<(), MaterialError> {
        let mut writer = BufWriter::new(File::create(path)?);
        write_dos(self, &mut writer, x_left, x_right)?;
        writer.flush()?;
        Ok(())
    }
}
