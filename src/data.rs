/*!
Measurement preprocessing for SIP spectra.

Raw rows of `(frequency, amplitude, phase, amplitude_error, phase_error)`
are turned into a [`SipData`] record: phase converted to radians, the
complex impedance assembled, measurement errors propagated to the real and
imaginary parts, and everything normalized by the maximum impedance
amplitude so that forward models work on dimensionless spectra.
*/

use std::fs::File;
use std::io::Read;
use std::path::Path;

use ndarray::{Array1, Array2};
use num_complex::Complex64;

use crate::error::{Result, SipError};

/// Unit of the phase columns in the raw input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseUnit {
    /// Milliradians (the common field-instrument convention).
    Mrad,
    /// Degrees.
    Deg,
}

impl PhaseUnit {
    fn to_rad(self, value: f64) -> f64 {
        match self {
            PhaseUnit::Mrad => value / 1000.0,
            PhaseUnit::Deg => value.to_radians(),
        }
    }
}

/// A normalized, error-propagated SIP measurement set.
///
/// All per-frequency arrays share the same length `N`. Phases are stored in
/// radians regardless of the input unit. `zn` and `zn_err` hold the
/// normalized impedance and its error as `2 x N` arrays with row 0 the real
/// part and row 1 the imaginary part.
#[derive(Debug, Clone)]
pub struct SipData {
    /// Measurement frequencies in Hz.
    pub freq: Array1<f64>,
    /// Impedance amplitudes as measured.
    pub amp: Array1<f64>,
    /// Phases in radians.
    pub phase: Array1<f64>,
    /// Amplitude errors.
    pub amp_err: Array1<f64>,
    /// Phase errors in radians.
    pub phase_err: Array1<f64>,
    /// Complex impedance `A * exp(i phase)`.
    pub z: Array1<Complex64>,
    /// Propagated impedance error (real and imaginary parts).
    pub z_err: Array1<Complex64>,
    /// Normalization scalar `max |Z|`, always > 0.
    pub z_max: f64,
    /// Normalized impedance, shape `(2, N)`.
    pub zn: Array2<f64>,
    /// Normalized impedance error, shape `(2, N)`.
    pub zn_err: Array2<f64>,
    /// Angular frequencies `2 * pi * freq`.
    pub w: Array1<f64>,
    /// Spread of the measured phases, a data-quality diagnostic.
    pub phase_range: f64,
}

impl SipData {
    /// Loads a comma-delimited SIP file, skipping `headers` leading rows.
    pub fn from_path<P: AsRef<Path>>(path: P, headers: usize, unit: PhaseUnit) -> Result<Self> {
        Self::from_reader(File::open(path)?, headers, unit)
    }

    /// Parses comma-delimited rows from any reader, skipping `headers`
    /// leading rows. Each data row must have exactly five numeric columns.
    pub fn from_reader<R: Read>(reader: R, headers: usize, unit: PhaseUnit) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut rows = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| {
                SipError::DataFormat(format!("line {}: {}", i + 1, e))
            })?;
            if i < headers {
                continue;
            }
            if record.len() != 5 {
                return Err(SipError::DataFormat(format!(
                    "line {}: expected 5 columns (freq, amp, pha, amp_err, pha_err), got {}",
                    i + 1,
                    record.len()
                )));
            }
            let mut row = [0.0; 5];
            for (j, field) in record.iter().enumerate() {
                row[j] = field.parse::<f64>().map_err(|_| {
                    SipError::DataFormat(format!(
                        "line {}, column {}: `{}` is not a number",
                        i + 1,
                        j + 1,
                        field
                    ))
                })?;
            }
            rows.push(row);
        }
        Self::from_records(&rows, unit)
    }

    /// Builds a measurement set from in-memory rows of
    /// `(freq, amp, pha, amp_err, pha_err)` with phases in `unit`.
    pub fn from_records(rows: &[[f64; 5]], unit: PhaseUnit) -> Result<Self> {
        let n = rows.len();
        if n == 0 {
            return Err(SipError::DataFormat("no data rows".into()));
        }

        let freq = Array1::from_iter(rows.iter().map(|r| r[0]));
        let amp = Array1::from_iter(rows.iter().map(|r| r[1]));
        let phase = Array1::from_iter(rows.iter().map(|r| unit.to_rad(r[2])));
        let amp_err = Array1::from_iter(rows.iter().map(|r| r[3]));
        let phase_err = Array1::from_iter(rows.iter().map(|r| unit.to_rad(r[4])));

        let z = Array1::from_iter(
            amp.iter()
                .zip(phase.iter())
                .map(|(&a, &p)| Complex64::from_polar(a, p)),
        );
        // First-order propagation of amplitude and phase errors.
        let z_err = Array1::from_iter(rows.iter().enumerate().map(|(k, _)| {
            let (a, p) = (amp[k], phase[k]);
            let (ae, pe) = (amp_err[k], phase_err[k]);
            let re = ((a * p.sin() * pe).powi(2) + (p.cos() * ae).powi(2)).sqrt();
            let im = ((a * p.cos() * pe).powi(2) + (p.sin() * ae).powi(2)).sqrt();
            Complex64::new(re, im)
        }));

        let z_max = z.iter().fold(0.0_f64, |acc, zi| acc.max(zi.norm()));
        if !(z_max > 0.0) {
            return Err(SipError::DataFormat(
                "all impedance amplitudes are zero; cannot normalize".into(),
            ));
        }

        let mut zn = Array2::zeros((2, n));
        let mut zn_err = Array2::zeros((2, n));
        for k in 0..n {
            zn[[0, k]] = z[k].re / z_max;
            zn[[1, k]] = z[k].im / z_max;
            zn_err[[0, k]] = z_err[k].re / z_max;
            zn_err[[1, k]] = z_err[k].im / z_max;
        }

        let w = freq.mapv(|f| 2.0 * std::f64::consts::PI * f);
        let max_p = phase.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let min_p = phase.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let phase_range = (max_p - min_p).abs();

        Ok(Self {
            freq,
            amp,
            phase,
            amp_err,
            phase_err,
            z,
            z_err,
            z_max,
            zn,
            zn_err,
            w,
            phase_range,
        })
    }

    /// Number of frequencies in the record.
    pub fn len(&self) -> usize {
        self.freq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freq.is_empty()
    }
}
