//! Row extraction for semicolon-delimited time-series files.
//!
//! Records have no header and exactly three fields:
//! `timestamp;execution_time;value`. Rows are validated one at a time as they
//! are read, so a hostile input is rejected as soon as it crosses the row
//! limit rather than after it has been materialized.

use std::io::Read;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::domain::DataPointRow;
use crate::error::ValidationError;

pub const MAX_ROWS: usize = 10_000;

/// Fractional digits kept for decimals, matching the `numeric(18,6)` columns.
pub const DECIMAL_SCALE: u32 = 6;

const FIELD_COUNT: usize = 3;

const OFFSET_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%b %d %Y"];

/// Lazily reads and validates rows from a byte stream.
///
/// The iterator is fused on the first error: once it has yielded an `Err`
/// it only returns `None`.
pub struct RowReader<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
    now: DateTime<Utc>,
    rows_read: usize,
    failed: bool,
}

impl<R: Read> RowReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_clock(reader, Utc::now())
    }

    /// Builds a reader that treats `now` as the latest acceptable timestamp.
    pub fn with_clock(reader: R, now: DateTime<Utc>) -> Self {
        let records = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader)
            .into_records();

        Self {
            records,
            now,
            rows_read: 0,
            failed: false,
        }
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    fn fail(&mut self, err: ValidationError) -> Option<Result<DataPointRow, ValidationError>> {
        self.failed = true;
        Some(Err(err))
    }
}

impl<R: Read> Iterator for RowReader<R> {
    type Item = Result<DataPointRow, ValidationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let record = self.records.next()?;

            // Whitespace-only lines are not records.
            if let Ok(record) = &record {
                if record.len() == 1 && record.get(0).is_some_and(str::is_empty) {
                    continue;
                }
            }

            self.rows_read += 1;
            let row = self.rows_read;

            if row > MAX_ROWS {
                return self.fail(ValidationError::TooManyRows {
                    row,
                    limit: MAX_ROWS,
                });
            }

            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    return self.fail(ValidationError::MalformedRecord {
                        row,
                        message: e.to_string(),
                    })
                }
            };

            return match validate_record(&record, row, self.now) {
                Ok(point) => Some(Ok(point)),
                Err(e) => self.fail(e),
            };
        }
    }
}

/// Reads every row of `reader`, failing on the first invalid one or on an
/// input without rows.
pub fn parse_rows<R: Read>(
    reader: R,
    now: DateTime<Utc>,
) -> Result<Vec<DataPointRow>, ValidationError> {
    let rows = RowReader::with_clock(reader, now).collect::<Result<Vec<_>, _>>()?;
    if rows.is_empty() {
        return Err(ValidationError::EmptyFile);
    }
    Ok(rows)
}

fn validate_record(
    record: &csv::StringRecord,
    row: usize,
    now: DateTime<Utc>,
) -> Result<DataPointRow, ValidationError> {
    if record.len() != FIELD_COUNT {
        return Err(ValidationError::FieldCount {
            row,
            found: record.len(),
        });
    }

    let timestamp =
        parse_timestamp(&record[0]).ok_or(ValidationError::InvalidDate { row })?;
    let execution_time =
        parse_decimal(&record[1]).ok_or(ValidationError::InvalidExecutionTime { row })?;
    let value = parse_decimal(&record[2]).ok_or(ValidationError::InvalidValue { row })?;

    if timestamp < earliest_timestamp() || timestamp > now {
        return Err(ValidationError::DateOutOfRange { row });
    }
    if execution_time < Decimal::ZERO {
        return Err(ValidationError::NegativeExecutionTime { row });
    }
    if value < Decimal::ZERO {
        return Err(ValidationError::NegativeValue { row });
    }
    if !fits_column(execution_time) || !fits_column(value) {
        return Err(ValidationError::DecimalOutOfRange { row });
    }

    Ok(DataPointRow {
        timestamp,
        execution_time: round_to_scale(execution_time),
        value: round_to_scale(value),
    })
}

/// 2000-01-01T00:00:00Z, the earliest timestamp a row may carry.
pub fn earliest_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Parses the common textual date-time forms. Values with an offset are
/// converted to UTC; values without one are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(raw, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    if let Ok(ts) = DateTime::parse_from_rfc2822(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts.and_utc());
        }
    }

    DATE_FORMATS.iter().find_map(|format| {
        NaiveDate::parse_from_str(raw, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|ts| ts.and_utc())
    })
}

/// Parses a dot-separated decimal, accepting scientific notation.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    if !is_decimal_literal(raw) {
        return None;
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// `[+-]digits[.digits][(e|E)[+-]digits]`, with at least one digit in the
/// mantissa. Digit separators are not part of the grammar.
fn is_decimal_literal(raw: &str) -> bool {
    let (mantissa, exponent) = match raw.find(['e', 'E']) {
        Some(at) => (&raw[..at], Some(&raw[at + 1..])),
        None => (raw, None),
    };

    let mantissa = strip_sign(mantissa);
    let (integral, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let mantissa_ok = !(integral.is_empty() && fraction.is_empty())
        && all_digits(integral)
        && all_digits(fraction);

    let exponent_ok = exponent.map_or(true, |exponent| {
        let exponent = strip_sign(exponent);
        !exponent.is_empty() && all_digits(exponent)
    });

    mantissa_ok && exponent_ok
}

fn strip_sign(raw: &str) -> &str {
    raw.strip_prefix(['+', '-']).unwrap_or(raw)
}

fn all_digits(raw: &str) -> bool {
    raw.bytes().all(|b| b.is_ascii_digit())
}

pub fn round_to_scale(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `numeric(18,6)` leaves twelve integral digits.
fn fits_column(value: Decimal) -> bool {
    value.abs() < Decimal::from(1_000_000_000_000_i64)
}
