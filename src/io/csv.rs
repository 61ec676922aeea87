/*!
# CSV export of percentile tables

Writes the percentile tables produced by the statistics layer as
comma-delimited text with a header row of parameter names, the layout
downstream reporting tools consume.
*/

use std::fs::File;
use std::path::Path;

use csv::Writer;
use ndarray::ArrayView2;

use crate::error::{Result, SipError};

/**
Saves a percentile table as a CSV file.

The table is expected in the layout of `get_param_percentile`: one row per
requested percentile, one column per parameter. The header row holds the
parameter names in vector order.

# Examples

```rust
use ndarray::arr2;
use sip_mcmc::io::csv::save_percentile_table;

let table = arr2(&[[0.95, 0.1], [1.0, 0.5], [1.05, 0.9]]);
save_percentile_table(table.view(), &["r0", "m1"], "/tmp/percentiles.csv")?;
# Ok::<(), sip_mcmc::error::SipError>(())
```
*/
pub fn save_percentile_table<S: AsRef<str>, P: AsRef<Path>>(
    table: ArrayView2<f64>,
    names: &[S],
    path: P,
) -> Result<()> {
    if table.ncols() != names.len() {
        return Err(SipError::Shape {
            name: "names",
            expected: table.ncols(),
            actual: names.len(),
        });
    }
    let mut wtr = Writer::from_writer(File::create(path)?);
    wtr.write_record(names.iter().map(|n| n.as_ref()))?;
    for row in table.rows() {
        wtr.write_record(row.iter().map(|v| v.to_string()))?;
    }
    wtr.flush()?;
    Ok(())
}
