//! CSV export
//!
//! Columns: `n,t_sec,ax_g,ay_g,az_g` and, for gyro logs, `gx_dps,gy_dps,gz_dps`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{decode_file, DecodeError, DecodedLog};

/// Column names for a log with `channels` int16 channels per sample
pub fn csv_columns(channels: usize) -> &'static [&'static str] {
    const ACC: &[&str] = &["n", "t_sec", "ax_g", "ay_g", "az_g"];
    const ACC_GYRO: &[&str] = &[
        "n", "t_sec", "ax_g", "ay_g", "az_g", "gx_dps", "gy_dps", "gz_dps",
    ];
    if channels == 6 {
        ACC_GYRO
    } else {
        ACC
    }
}

/// Write a decoded log as CSV
pub fn write_csv<W: Write>(writer: W, log: &DecodedLog) -> io::Result<()> {
    let mut writer = BufWriter::new(writer);

    writeln!(writer, "{}", csv_columns(log.channels()).join(","))?;

    for s in &log.samples {
        write!(
            writer,
            "{},{},{},{},{}",
            s.index, s.t_sec, s.accel_g[0], s.accel_g[1], s.accel_g[2]
        )?;
        if let Some(g) = s.gyro_dps {
            write!(writer, ",{},{},{}", g[0], g[1], g[2])?;
        }
        writeln!(writer)?;
    }

    writer.flush()
}

/// Decode `bin_path` and write CSV to `csv_path`, or next to the input with a `.csv` extension
pub fn convert_file(
    bin_path: &Path,
    csv_path: Option<&Path>,
) -> Result<(DecodedLog, PathBuf), DecodeError> {
    let log = decode_file(bin_path)?;
    let out = csv_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| bin_path.with_extension("csv"));
    write_csv(File::create(&out)?, &log)?;
    tracing::info!(input = %bin_path.display(), output = %out.display(), samples = log.samples.len(), "CSV written");
    Ok((log, out))
}
