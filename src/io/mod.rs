//! I/O helpers for exporting inversion results.

pub mod csv;
