use rust_decimal::Decimal;

use crate::domain::{DataPointRow, DatasetAggregates};
use crate::error::ValidationError;
use crate::parser::round_to_scale;

/// Reduces a validated row set to its summary statistics.
///
/// Every statistic is recomputed from `rows` and rounded to the column scale.
pub fn compute_aggregates(rows: &[DataPointRow]) -> Result<DatasetAggregates, ValidationError> {
    let first = rows.first().ok_or(ValidationError::EmptyFile)?;

    let mut start = first.timestamp;
    let mut end = first.timestamp;
    let mut min_value = first.value;
    let mut max_value = first.value;
    for row in rows {
        start = start.min(row.timestamp);
        end = end.max(row.timestamp);
        min_value = min_value.min(row.value);
        max_value = max_value.max(row.value);
    }

    let elapsed = end - start;
    let delta_time = elapsed
        .num_microseconds()
        .map(|micros| Decimal::new(micros, 6))
        .unwrap_or_else(|| Decimal::from(elapsed.num_seconds()));

    let values: Vec<Decimal> = rows.iter().map(|row| row.value).collect();
    let execution_times = rows.iter().map(|row| row.execution_time);

    Ok(DatasetAggregates {
        start_time: start,
        delta_time: round_to_scale(delta_time),
        avg_execution_time: round_to_scale(mean(execution_times, rows.len())),
        avg_value: round_to_scale(mean(values.iter().copied(), rows.len())),
        median_value: round_to_scale(median(values)),
        max_value,
        min_value,
    })
}

fn mean(values: impl Iterator<Item = Decimal>, count: usize) -> Decimal {
    values.sum::<Decimal>() / Decimal::from(count)
}

/// Middle element of the sorted values, or the mean of the two middle
/// elements when the count is even. Zero for no values.
pub fn median(mut values: Vec<Decimal>) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / Decimal::TWO
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn row(offset_secs: i64, execution_time: Decimal, value: Decimal) -> DataPointRow {
        DataPointRow {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
                + Duration::seconds(offset_secs),
            execution_time,
            value,
        }
    }

    #[test]
    fn test_three_row_aggregates() {
        let rows = vec![
            row(0, dec!(1.0), dec!(10.0)),
            row(60, dec!(2.0), dec!(20.0)),
            row(120, dec!(3.0), dec!(30.0)),
        ];

        let aggregates = compute_aggregates(&rows).unwrap();

        assert_eq!(aggregates.start_time, rows[0].timestamp);
        assert_eq!(aggregates.delta_time, dec!(120));
        assert_eq!(aggregates.avg_execution_time, dec!(2.0));
        assert_eq!(aggregates.avg_value, dec!(20.0));
        assert_eq!(aggregates.median_value, dec!(20.0));
        assert_eq!(aggregates.max_value, dec!(30.0));
        assert_eq!(aggregates.min_value, dec!(10.0));
    }

    #[test]
    fn test_unordered_rows_use_earliest_and_latest() {
        let rows = vec![
            row(300, dec!(1), dec!(5)),
            row(-100, dec!(1), dec!(7)),
            row(50, dec!(1), dec!(6)),
        ];

        let aggregates = compute_aggregates(&rows).unwrap();

        assert_eq!(aggregates.start_time, rows[1].timestamp);
        assert_eq!(aggregates.delta_time, dec!(400));
        assert_eq!(aggregates.min_value, dec!(5));
        assert_eq!(aggregates.max_value, dec!(7));
    }

    #[test]
    fn test_single_row_has_zero_delta() {
        let aggregates = compute_aggregates(&[row(0, dec!(0.5), dec!(3))]).unwrap();
        assert_eq!(aggregates.delta_time, Decimal::ZERO);
        assert_eq!(aggregates.median_value, dec!(3));
        assert_eq!(aggregates.avg_execution_time, dec!(0.5));
    }

    #[test]
    fn test_sub_second_delta() {
        let mut late = row(1, dec!(1), dec!(1));
        late.timestamp += Duration::milliseconds(250);
        let aggregates = compute_aggregates(&[row(0, dec!(1), dec!(1)), late]).unwrap();
        assert_eq!(aggregates.delta_time, dec!(1.25));
    }

    #[test]
    fn test_median_law() {
        assert_eq!(median(vec![dec!(40), dec!(10), dec!(30), dec!(20)]), dec!(25));
        assert_eq!(median(vec![dec!(30), dec!(10), dec!(20)]), dec!(20));
        assert_eq!(median(vec![dec!(1.5)]), dec!(1.5));
    }

    #[test]
    fn test_averages_round_to_six_places() {
        let rows = vec![
            row(0, dec!(1), dec!(1)),
            row(1, dec!(1), dec!(1)),
            row(2, dec!(2), dec!(2)),
        ];
        let aggregates = compute_aggregates(&rows).unwrap();
        assert_eq!(aggregates.avg_value, dec!(1.333333));
        assert_eq!(aggregates.avg_execution_time, dec!(1.333333));
    }

    #[test]
    fn test_empty_rows_are_rejected() {
        assert_eq!(compute_aggregates(&[]), Err(ValidationError::EmptyFile));
    }
}
