//! Frequency specification of a row and its expansion into acquisitions.
//!
//! A `freq(mhz)` cell is either a single value or `"start,stop,count"`. A sweep
//! expands into `count` acquisitions with linearly spaced frequencies, both ends
//! included, all sharing one sweep timestamp.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// What the `freq(mhz)` cell asks for.
#[derive(Clone, Debug, PartialEq)]
pub enum FrequencySpec {
    /// One frequency
    Single(f64),
    /// `start,stop,count`
    Sweep(SweepSpec),
}

/// `(start, stop, count)` of a frequency sweep, in MHz.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SweepSpec {
    /// First frequency
    pub start: f64,
    /// Last frequency, included
    pub stop: f64,
    /// Number of points
    pub count: usize,
}

impl FrequencySpec {
    /// Parse the text of a `freq(mhz)` cell.
    pub fn parse(cell: &str) -> Result<Self, String> {
        let parts: Vec<&str> = cell.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [single] => parse_mhz(single).map(FrequencySpec::Single),
            [start, stop, count] => {
                let start = parse_mhz(start)?;
                let stop = parse_mhz(stop)?;
                let count: usize = count
                    .parse()
                    .map_err(|_| format!("sweep count '{count}' is not a whole number"))?;
                if count == 0 {
                    return Err("sweep count must be at least 1".to_string());
                }
                Ok(FrequencySpec::Sweep(SweepSpec { start, stop, count }))
            }
            _ => Err(format!(
                "frequency '{cell}' must be a single value or 'start,stop,count'"
            )),
        }
    }

    /// True for a multi-point sweep.
    pub fn is_sweep(&self) -> bool {
        matches!(self, FrequencySpec::Sweep(_))
    }
}

fn parse_mhz(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("frequency '{s}' is not a number"))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("frequency '{s}' must be positive"));
    }
    Ok(value)
}

impl SweepSpec {
    /// Linearly spaced frequencies from `start` to `stop` inclusive.
    pub fn frequencies(&self) -> Vec<f64> {
        match self.count {
            0 => Vec::new(),
            1 => vec![self.start],
            n => {
                let step = (self.stop - self.start) / (n - 1) as f64;
                (0..n)
                    .map(|i| {
                        if i == n - 1 {
                            self.stop
                        } else {
                            self.start + step * i as f64
                        }
                    })
                    .collect()
            }
        }
    }
}

/// Links the acquisitions of one sweep together.
#[derive(Clone, Debug, PartialEq)]
pub struct SweepContext {
    /// Taken once when the row is expanded; shared by every point
    pub sweepstamp: DateTime<Utc>,
    /// Position of this point within the sweep
    pub index: usize,
    /// Frequency of this point
    pub frequency_mhz: f64,
    /// The sweep this point belongs to
    pub spec: SweepSpec,
}

impl SweepContext {
    /// `sweepstamp` as whole seconds plus microseconds, `<secs>_<micros>`.
    pub fn stamp_label(&self) -> String {
        format!(
            "{}_{:06}",
            self.sweepstamp.timestamp(),
            self.sweepstamp.timestamp_subsec_micros()
        )
    }
}

/// One device acquisition resolved from a row.
#[derive(Clone, Debug, PartialEq)]
pub struct AcquisitionInstance {
    /// Frequency to acquire at
    pub frequency_mhz: f64,
    /// Set for sweep points only
    pub sweep: Option<SweepContext>,
}

/// Expand a frequency spec into the acquisitions to run, in order.
pub fn expand(spec: &FrequencySpec, sweepstamp: DateTime<Utc>) -> Vec<AcquisitionInstance> {
    match spec {
        FrequencySpec::Single(freq) => vec![AcquisitionInstance {
            frequency_mhz: *freq,
            sweep: None,
        }],
        FrequencySpec::Sweep(sweep) => sweep
            .frequencies()
            .into_iter()
            .enumerate()
            .map(|(index, frequency_mhz)| AcquisitionInstance {
                frequency_mhz,
                sweep: Some(SweepContext {
                    sweepstamp,
                    index,
                    frequency_mhz,
                    spec: *sweep,
                }),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single() {
        assert_eq!(FrequencySpec::parse("2.25").unwrap(), FrequencySpec::Single(2.25));
        assert_eq!(FrequencySpec::parse(" 5 ").unwrap(), FrequencySpec::Single(5.0));
    }

    #[test]
    fn test_parse_sweep() {
        let spec = FrequencySpec::parse("1, 5, 5").unwrap();
        assert_eq!(
            spec,
            FrequencySpec::Sweep(SweepSpec {
                start: 1.0,
                stop: 5.0,
                count: 5
            })
        );
        assert!(spec.is_sweep());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(FrequencySpec::parse("1,5").is_err());
        assert!(FrequencySpec::parse("1,5,0").is_err());
        assert!(FrequencySpec::parse("1,5,2.5").is_err());
        assert!(FrequencySpec::parse("abc").is_err());
        assert!(FrequencySpec::parse("-1").is_err());
        assert!(FrequencySpec::parse("").is_err());
    }

    #[test]
    fn test_frequencies_inclusive() {
        let sweep = SweepSpec {
            start: 1.0,
            stop: 2.0,
            count: 5,
        };
        assert_eq!(sweep.frequencies(), vec![1.0, 1.25, 1.5, 1.75, 2.0]);
    }

    #[test]
    fn test_frequencies_single_point_and_descending() {
        let one = SweepSpec {
            start: 3.0,
            stop: 9.0,
            count: 1,
        };
        assert_eq!(one.frequencies(), vec![3.0]);

        let down = SweepSpec {
            start: 4.0,
            stop: 1.0,
            count: 4,
        };
        assert_eq!(down.frequencies(), vec![4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_expand_shares_sweepstamp() {
        let stamp = Utc::now();
        let spec = FrequencySpec::parse("1,3,3").unwrap();
        let instances = expand(&spec, stamp);
        assert_eq!(instances.len(), 3);
        for (i, inst) in instances.iter().enumerate() {
            let ctx = inst.sweep.as_ref().unwrap();
            assert_eq!(ctx.sweepstamp, stamp);
            assert_eq!(ctx.index, i);
            assert_eq!(ctx.frequency_mhz, inst.frequency_mhz);
        }
        assert_eq!(instances[2].frequency_mhz, 3.0);

        let single = expand(&FrequencySpec::Single(2.25), stamp);
        assert_eq!(single.len(), 1);
        assert!(single[0].sweep.is_none());
    }
}
