use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::ensemble::ImageResult;
use crate::error::Error;
use crate::fusion::PixelDetection;

pub const HEADER: [&str; 2] = ["image_id", "PredictionString"];

const LINE_END: &str = "\r\n";

/// `score x y w h` for every detection, space separated.
pub fn prediction_string(detections: &[PixelDetection]) -> String {
    detections
        .iter()
        .map(|d| format!("{} {} {} {} {}", d.score, d.x, d.y, d.width, d.height))
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_field(field: &str) -> std::borrow::Cow<'_, str> {
    if field.contains(|c: char| c == ',' || c == '"' || c == '\r' || c == '\n') {
        format!("\"{}\"", field.replace('"', "\"\"")).into()
    } else {
        field.into()
    }
}

/// Writes the submission table, one row per image in `results` order.
pub fn write_submission<W: Write>(writer: &mut W, results: &[ImageResult]) -> Result<(), Error> {
    write!(writer, "{},{}{}", HEADER[0], HEADER[1], LINE_END)?;

    for result in results {
        write!(
            writer,
            "{},{}{}",
            escape_field(&result.id),
            escape_field(&prediction_string(&result.detections)),
            LINE_END
        )?;
    }

    writer.flush()?;

    Ok(())
}

pub fn write_submission_file<P: AsRef<Path>>(path: P, results: &[ImageResult]) -> Result<(), Error> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    write_submission(&mut writer, results)?;

    tracing::info!(rows = results.len(), "submission written to {:?}", path);

    Ok(())
}
