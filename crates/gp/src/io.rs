//! Delimited text ingestion of observations and rendering of predictions.

use crate::errors::{GpError, Result};
use crate::types::{Observation, Posterior, QueryPoint};
use crate::utils::same_point;

use csv::{ReaderBuilder, Trim, WriterBuilder};
use ndarray::{Array1, ArrayView1};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Header of the predictions table
pub const PREDICTIONS_HEADER: [&str; 4] = ["x", "lower", "upper", "sampled"];

/// Read observations from delimited text without header: the leading `n_inputs` columns
/// of a row give the input point, its last column the observed value.
pub fn read_observations<R: Read>(
    reader: R,
    delimiter: u8,
    n_inputs: usize,
) -> Result<Vec<Observation>> {
    if n_inputs == 0 {
        return Err(GpError::InvalidInput(
            "at least one input column is required".to_string(),
        ));
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut observations = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() < n_inputs + 1 {
            return Err(GpError::InvalidInput(format!(
                "row {}: expected at least {} columns, got {}",
                i + 1,
                n_inputs + 1,
                record.len()
            )));
        }
        let parse = |v: &str| {
            v.parse::<f64>().map_err(|e| {
                GpError::InvalidInput(format!("row {}: cannot parse {:?} ({})", i + 1, v, e))
            })
        };
        let x = record
            .iter()
            .take(n_inputs)
            .map(&parse)
            .collect::<Result<Array1<f64>>>()?;
        let y = parse(&record[record.len() - 1])?;
        observations.push(Observation::new(x, y));
    }
    Ok(observations)
}

/// Read observations from a delimited text file, see [read_observations]
pub fn read_observations_from_file<P: AsRef<Path>>(
    path: P,
    delimiter: u8,
    n_inputs: usize,
) -> Result<Vec<Observation>> {
    read_observations(File::open(path)?, delimiter, n_inputs)
}

fn format_point(x: &ArrayView1<f64>) -> String {
    if x.len() == 1 {
        x[0].to_string()
    } else {
        let coords = x.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        format!("[{}]", coords.join(" "))
    }
}

/// Write one row `x,lower,upper,sampled` per prediction after a header row.
///
/// `lower` and `upper` are the 95% confidence bounds, `sampled` the observed value when
/// the query input is a training input, empty otherwise.
pub fn write_predictions<W: Write>(
    writer: W,
    predictions: &[(QueryPoint, Posterior)],
    observations: &[Observation],
) -> Result<()> {
    let mut writer = WriterBuilder::new().from_writer(writer);
    writer.write_record(PREDICTIONS_HEADER)?;
    for (q, p) in predictions {
        let sampled = observations
            .iter()
            .find(|o| same_point(&o.x(), &q.x()))
            .map_or(String::new(), |o| o.y().to_string());
        writer.write_record(&[
            format_point(&q.x()),
            p.lower_bound().to_string(),
            p.upper_bound().to_string(),
            sampled,
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write predictions to a file, see [write_predictions]
pub fn write_predictions_to_file<P: AsRef<Path>>(
    path: P,
    predictions: &[(QueryPoint, Posterior)],
    observations: &[Observation],
) -> Result<()> {
    write_predictions(File::create(path)?, predictions, observations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_read_observations() {
        let text = "0,0\n1, 1\n2,4\n";
        let obs = read_observations(text.as_bytes(), b',', 1).unwrap();
        assert_eq!(3, obs.len());
        assert_eq!(Observation::new(array![1.], 1.), obs[1]);
    }

    #[test]
    fn test_read_multi_inputs() {
        let text = "0;1;2;10\n3;4;5;6;20\n";
        let obs = read_observations(text.as_bytes(), b';', 3).unwrap();
        assert_eq!(Observation::new(array![0., 1., 2.], 10.), obs[0]);
        // extra columns are skipped, the last one is the observed value
        assert_eq!(Observation::new(array![3., 4., 5.], 20.), obs[1]);
    }

    #[test]
    fn test_read_malformed() {
        assert!(matches!(
            read_observations("0,a\n".as_bytes(), b',', 1),
            Err(GpError::InvalidInput(_))
        ));
        assert!(matches!(
            read_observations("0,1\n2\n".as_bytes(), b',', 1),
            Err(GpError::InvalidInput(_))
        ));
        assert!(read_observations("0,1\n".as_bytes(), b',', 0).is_err());
    }

    #[test]
    fn test_write_predictions() {
        let predictions = vec![
            (QueryPoint::new(0, array![1.]), Posterior::new(1., 0.5)),
            (QueryPoint::new(1, array![1.5]), Posterior::new(2., 1.)),
        ];
        let observations = vec![Observation::new(array![1.], 1.2)];
        let mut out = Vec::new();
        write_predictions(&mut out, &predictions, &observations).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        let (p0, p1) = (predictions[0].1, predictions[1].1);
        assert_eq!(3, lines.len());
        assert_eq!("x,lower,upper,sampled", lines[0]);
        assert_eq!(
            format!("1,{},{},1.2", p0.lower_bound(), p0.upper_bound()),
            lines[1]
        );
        assert_eq!(
            format!("1.5,{},{},", p1.lower_bound(), p1.upper_bound()),
            lines[2]
        );
    }

    #[test]
    fn test_write_multi_inputs() {
        let predictions = vec![(QueryPoint::new(0, array![1., 2.5]), Posterior::new(0., 1.))];
        let mut out = Vec::new();
        write_predictions(&mut out, &predictions, &[]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(Some("[1 2.5],-1.96,1.96,"), text.lines().nth(1));
    }
}
