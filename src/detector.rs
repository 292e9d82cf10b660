use std::collections::BTreeMap;

use crate::types::anomaly::Anomaly;
use crate::types::record::MetricRecord;

/// Default change-rate threshold: a point is flagged when the absolute
/// relative change from its predecessor exceeds 5%.
pub const DEFAULT_CHANGE_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CHANGE_THRESHOLD,
        }
    }
}

/// Relative change between consecutive points of one series. A zero
/// predecessor has no finite rate: zero-to-zero is flat (0.0), and
/// zero-to-anything-else is a signed infinite rate, so the transition
/// always flags without ever dividing by zero.
pub fn change_rate(previous: f64, current: f64) -> f64 {
    if previous == 0.0 {
        if current == 0.0 {
            0.0
        } else if current > 0.0 {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        }
    } else {
        (current - previous) / previous
    }
}

/// Scan the records for abrupt changes. Pure function of its inputs.
///
/// Records are grouped by series and re-sorted chronologically within
/// each series (stable, so load order breaks timestamp ties). The first
/// point of a series has no predecessor and is never flagged. The
/// result is ordered by (timestamp, series id) for determinism.
pub fn detect_drops(records: &[MetricRecord], config: &DetectorConfig) -> Vec<Anomaly> {
    let mut series: BTreeMap<&str, Vec<&MetricRecord>> = BTreeMap::new();
    for record in records {
        series
            .entry(record.series_id.as_str())
            .or_default()
            .push(record);
    }

    let mut anomalies = Vec::new();
    for points in series.values_mut() {
        points.sort_by_key(|r| r.timestamp);

        for pair in points.windows(2) {
            let (prev, cur) = (pair[0], pair[1]);
            let rate = change_rate(prev.value, cur.value);
            if rate.abs() > config.threshold {
                anomalies.push(Anomaly {
                    series_id: cur.series_id.clone(),
                    timestamp: cur.timestamp,
                    value: cur.value,
                    previous_value: prev.value,
                    change_rate: rate,
                    threshold: config.threshold,
                    source_file: cur.source_file.clone(),
                });
            }
        }
    }

    anomalies.sort_by(|a, b| (a.timestamp, &a.series_id).cmp(&(b.timestamp, &b.series_id)));
    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(series: &str, timestamp: i64, value: f64) -> MetricRecord {
        MetricRecord {
            series_id: series.to_string(),
            timestamp,
            value,
            metadata: Default::default(),
            source_file: "test.csv".to_string(),
        }
    }

    fn series(values: &[f64]) -> Vec<MetricRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| record("s", i as i64 * 60, v))
            .collect()
    }

    #[test]
    fn every_consecutive_pair_is_examined() {
        // With a zero threshold, every nonzero change flags, so a series
        // of n strictly-changing points yields exactly n-1 anomalies.
        let records = series(&[100.0, 101.0, 103.0, 99.0, 120.0]);
        let config = DetectorConfig { threshold: 0.0 };
        let anomalies = detect_drops(&records, &config);
        assert_eq!(anomalies.len(), records.len() - 1);
    }

    #[test]
    fn first_point_is_never_flagged() {
        let records = series(&[1.0, 1000.0, 1.0]);
        let anomalies = detect_drops(&records, &DetectorConfig::default());
        assert!(anomalies.iter().all(|a| a.timestamp != records[0].timestamp));
    }

    #[test]
    fn zero_to_nonzero_flags_without_arithmetic_error() {
        let records = vec![record("s", 0, 0.0), record("s", 60, 5.0)];
        let anomalies = detect_drops(&records, &DetectorConfig::default());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].change_rate, f64::INFINITY);
        assert_eq!(anomalies[0].previous_value, 0.0);
    }

    #[test]
    fn zero_to_zero_is_flat() {
        let records = vec![record("s", 0, 0.0), record("s", 60, 0.0)];
        assert!(detect_drops(&records, &DetectorConfig::default()).is_empty());
    }

    #[test]
    fn changes_below_threshold_pass() {
        // 4% drop against the default 5% threshold
        let records = series(&[100.0, 96.0]);
        assert!(detect_drops(&records, &DetectorConfig::default()).is_empty());
    }

    #[test]
    fn change_exactly_at_threshold_passes() {
        let records = series(&[100.0, 95.0]);
        assert!(detect_drops(&records, &DetectorConfig::default()).is_empty());
    }

    #[test]
    fn drops_and_spikes_both_flag() {
        let records = series(&[100.0, 50.0, 100.0]);
        let anomalies = detect_drops(&records, &DetectorConfig::default());
        assert_eq!(anomalies.len(), 2);
        assert!(anomalies[0].change_rate < 0.0);
        assert!(anomalies[1].change_rate > 0.0);
    }

    #[test]
    fn unsorted_series_is_resorted_before_comparison() {
        // Chronologically: 100 -> 101 -> 102, no change > 5%. Loaded out
        // of order it would look like 100 -> 102 -> 101; still no flags
        // once re-sorted.
        let records = vec![
            record("s", 0, 100.0),
            record("s", 120, 102.0),
            record("s", 60, 101.0),
        ];
        assert!(detect_drops(&records, &DetectorConfig::default()).is_empty());
    }

    #[test]
    fn series_are_independent() {
        // Interleaved series whose own values are flat; comparing across
        // series would flag wildly.
        let records = vec![
            record("a", 0, 1.0),
            record("b", 30, 1000.0),
            record("a", 60, 1.0),
            record("b", 90, 1000.0),
        ];
        assert!(detect_drops(&records, &DetectorConfig::default()).is_empty());
    }

    #[test]
    fn output_ordered_by_timestamp_then_series() {
        let records = vec![
            record("b", 0, 100.0),
            record("b", 60, 10.0),
            record("a", 0, 100.0),
            record("a", 60, 10.0),
            record("a", 120, 200.0),
        ];
        let anomalies = detect_drops(&records, &DetectorConfig::default());
        let order: Vec<(i64, &str)> = anomalies
            .iter()
            .map(|a| (a.timestamp, a.series_id.as_str()))
            .collect();
        assert_eq!(order, vec![(60, "a"), (60, "b"), (120, "a")]);
    }

    #[test]
    fn detection_is_deterministic() {
        let records = vec![
            record("b", 0, 100.0),
            record("a", 0, 50.0),
            record("b", 60, 10.0),
            record("a", 60, 500.0),
        ];
        let config = DetectorConfig::default();
        let first = serde_json::to_string(&detect_drops(&records, &config)).unwrap();
        let second = serde_json::to_string(&detect_drops(&records, &config)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn single_point_series_yields_nothing() {
        let records = vec![record("s", 0, 100.0)];
        assert!(detect_drops(&records, &DetectorConfig::default()).is_empty());
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(detect_drops(&[], &DetectorConfig::default()).is_empty());
    }

    #[test]
    fn anomaly_carries_the_threshold_in_force() {
        let records = series(&[100.0, 50.0]);
        let config = DetectorConfig { threshold: 0.25 };
        let anomalies = detect_drops(&records, &config);
        assert_eq!(anomalies[0].threshold, 0.25);
    }
}
