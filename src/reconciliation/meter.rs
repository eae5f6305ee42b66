//! Per-asset meter progression checks

use bigdecimal::BigDecimal;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::MeterConfig;
use crate::types::*;

/// Decimal places kept on derived averages and ratios
const DERIVED_SCALE: i64 = 4;

/// Readings derived for a set of assets, plus the findings worth surfacing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeterValidation {
    pub readings: Vec<MeterReading>,
    pub warnings: Vec<ValidationWarning>,
}

/// Derives meter deltas and flags regressions and implausible rates
#[derive(Debug, Clone)]
pub struct MeterReadingValidator {
    max_hours_per_day: BigDecimal,
    max_km_per_day: BigDecimal,
}

impl Default for MeterReadingValidator {
    fn default() -> Self {
        Self::new(&MeterConfig::default())
    }
}

struct MeterCheck<'a> {
    previous: &'a Option<BigDecimal>,
    current: &'a Option<BigDecimal>,
    max_per_day: &'a BigDecimal,
    regression: MeterIssue,
    implausible: MeterIssue,
    unit: &'static str,
}

impl MeterReadingValidator {
    pub fn new(config: &MeterConfig) -> Self {
        Self {
            max_hours_per_day: config.max_hours_per_day.clone(),
            max_km_per_day: config.max_km_per_day.clone(),
        }
    }

    /// Validate consumptions keyed by canonical asset id.
    ///
    /// Readings come back grouped per asset in chronological order.
    pub fn validate(&self, consumptions: &[(String, &Transaction)]) -> MeterValidation {
        let mut per_asset: BTreeMap<&str, Vec<&Transaction>> = BTreeMap::new();
        for (asset, txn) in consumptions {
            per_asset.entry(asset.as_str()).or_default().push(*txn);
        }

        let mut result = MeterValidation::default();
        for (asset, mut history) in per_asset {
            history.sort_by(|a, b| {
                (a.transaction_date, a.source_row_number)
                    .cmp(&(b.transaction_date, b.source_row_number))
            });

            let mut previous: Option<&Transaction> = None;
            for txn in history {
                let reading = self.derive_reading(asset, previous, txn);
                for message in &reading.validation_messages {
                    result.warnings.push(ValidationWarning {
                        row_number: reading.original_row_number,
                        asset_code: asset.to_string(),
                        issue: message.issue,
                        severity: message.severity,
                        message: message.message.clone(),
                    });
                }
                result.readings.push(reading);
                previous = Some(txn);
            }
        }

        let errors = result.readings.iter().filter(|r| r.has_errors).count();
        if errors > 0 {
            warn!("{} meter readings regressed", errors);
        }
        debug!(
            "Derived {} meter readings with {} findings",
            result.readings.len(),
            result.warnings.len()
        );

        result
    }

    fn derive_reading(
        &self,
        asset: &str,
        previous: Option<&Transaction>,
        current: &Transaction,
    ) -> MeterReading {
        let mut reading = MeterReading {
            asset_code: asset.to_string(),
            reading_date: current.transaction_date,
            horometer: current.horometer.clone(),
            kilometer: current.kilometer.clone(),
            horometer_delta: None,
            kilometer_delta: None,
            fuel_consumed: current.quantity_liters.clone(),
            daily_hours_avg: None,
            daily_km_avg: None,
            fuel_efficiency_per_hour: None,
            validation_messages: Vec::new(),
            has_warnings: false,
            has_errors: false,
            original_row_number: current.source_row_number,
        };

        let Some(previous) = previous else {
            return reading;
        };

        let days = (current.transaction_date - previous.transaction_date).num_days();
        if days <= 0 {
            let has_meters = (previous.horometer.is_some() && current.horometer.is_some())
                || (previous.kilometer.is_some() && current.kilometer.is_some());
            if has_meters {
                push_message(
                    &mut reading,
                    MeterIssue::SameDayReading,
                    format!(
                        "another reading on {} precedes this one; delta not computed",
                        current.transaction_date
                    ),
                );
            }
            return reading;
        }
        let days = BigDecimal::from(days);

        let hours = self.check_meter(
            &mut reading,
            &days,
            MeterCheck {
                previous: &previous.horometer,
                current: &current.horometer,
                max_per_day: &self.max_hours_per_day,
                regression: MeterIssue::HorometerRegression,
                implausible: MeterIssue::ImplausibleHourRate,
                unit: "h",
            },
        );
        if let Some((delta, daily)) = hours {
            if delta > BigDecimal::from(0) {
                reading.fuel_efficiency_per_hour =
                    Some((&current.quantity_liters / &delta).round(DERIVED_SCALE));
            }
            reading.horometer_delta = Some(delta);
            reading.daily_hours_avg = Some(daily);
        }

        let km = self.check_meter(
            &mut reading,
            &days,
            MeterCheck {
                previous: &previous.kilometer,
                current: &current.kilometer,
                max_per_day: &self.max_km_per_day,
                regression: MeterIssue::KilometerRegression,
                implausible: MeterIssue::ImplausibleKmRate,
                unit: "km",
            },
        );
        if let Some((delta, daily)) = km {
            reading.kilometer_delta = Some(delta);
            reading.daily_km_avg = Some(daily);
        }

        reading
    }

    /// Delta and daily average for one meter, when both readings carry it
    fn check_meter(
        &self,
        reading: &mut MeterReading,
        days: &BigDecimal,
        check: MeterCheck<'_>,
    ) -> Option<(BigDecimal, BigDecimal)> {
        let (Some(previous), Some(current)) = (check.previous, check.current) else {
            return None;
        };

        let delta = current - previous;
        if delta < BigDecimal::from(0) {
            push_message(
                reading,
                check.regression,
                format!(
                    "meter went back from {} to {} {}",
                    previous, current, check.unit
                ),
            );
        }
        if delta > check.max_per_day * days {
            push_message(
                reading,
                check.implausible,
                format!(
                    "{} {} over {} days exceeds {} {} per day",
                    delta, check.unit, days, check.max_per_day, check.unit
                ),
            );
        }

        let daily = (&delta / days).round(DERIVED_SCALE);
        Some((delta, daily))
    }
}

fn push_message(reading: &mut MeterReading, issue: MeterIssue, message: String) {
    let severity = issue.severity();
    match severity {
        Severity::Error => reading.has_errors = true,
        Severity::Warning => reading.has_warnings = true,
    }
    reading.validation_messages.push(ValidationMessage {
        issue,
        severity,
        message,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn reading(day: u32, row: usize, liters: i64, hours: Option<i64>) -> Transaction {
        let mut txn = Transaction::new(
            TransactionType::Consumption,
            "P01".to_string(),
            "1".to_string(),
            ProductType::Diesel,
            BigDecimal::from(liters),
            NaiveDate::from_ymd_opt(2024, 7, day).unwrap(),
        );
        txn.asset_code = Some("EXC-01".to_string());
        txn.horometer = hours.map(BigDecimal::from);
        txn.source_row_number = Some(row);
        txn
    }

    fn run(transactions: &[Transaction]) -> MeterValidation {
        let keyed: Vec<(String, &Transaction)> = transactions
            .iter()
            .map(|t| ("asset-1".to_string(), t))
            .collect();
        MeterReadingValidator::default().validate(&keyed)
    }

    #[test]
    fn test_deltas_and_efficiency() {
        let history = vec![
            reading(11, 3, 90, Some(1040)),
            reading(1, 1, 100, Some(1000)),
        ];
        let result = run(&history);

        assert_eq!(result.readings.len(), 2);
        let first = &result.readings[0];
        assert_eq!(first.original_row_number, Some(1));
        assert_eq!(first.horometer_delta, None);
        assert_eq!(first.fuel_efficiency_per_hour, None);

        let second = &result.readings[1];
        assert_eq!(second.horometer_delta, Some(BigDecimal::from(40)));
        assert_eq!(second.daily_hours_avg, Some(BigDecimal::from(4)));
        assert_eq!(
            second.fuel_efficiency_per_hour,
            Some("2.25".parse::<BigDecimal>().unwrap())
        );
        assert!(!second.has_errors);
        assert!(!second.has_warnings);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_regression_is_an_error_only() {
        let history = vec![reading(1, 1, 50, Some(500)), reading(3, 2, 50, Some(480))];
        let result = run(&history);

        let second = &result.readings[1];
        assert_eq!(second.horometer_delta, Some(BigDecimal::from(-20)));
        assert!(second.has_errors);
        assert!(!second.has_warnings);
        assert_eq!(second.fuel_efficiency_per_hour, None);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].issue, MeterIssue::HorometerRegression);
        assert_eq!(result.warnings[0].row_number, Some(2));
    }

    #[test]
    fn test_implausible_rate_is_a_warning_only() {
        let history = vec![reading(1, 1, 50, Some(500)), reading(2, 2, 50, Some(530))];
        let result = run(&history);

        let second = &result.readings[1];
        assert!(second.has_warnings);
        assert!(!second.has_errors);
        assert_eq!(
            second.validation_messages[0].issue,
            MeterIssue::ImplausibleHourRate
        );
    }

    #[test]
    fn test_zero_delta_leaves_efficiency_undefined() {
        let history = vec![reading(1, 1, 50, Some(500)), reading(4, 2, 20, Some(500))];
        let second = &run(&history).readings[1];

        assert_eq!(second.horometer_delta, Some(BigDecimal::from(0)));
        assert_eq!(second.daily_hours_avg, Some(BigDecimal::from(0)));
        assert_eq!(second.fuel_efficiency_per_hour, None);
    }

    #[test]
    fn test_missing_meter_or_same_day_skips_delta() {
        let history = vec![
            reading(1, 1, 50, Some(500)),
            reading(2, 2, 50, None),
            reading(3, 3, 50, Some(520)),
            reading(3, 4, 10, Some(522)),
        ];
        let result = run(&history);

        assert_eq!(result.readings[1].horometer_delta, None);
        // previous reading carried no horometer
        assert_eq!(result.readings[2].horometer_delta, None);

        let same_day = &result.readings[3];
        assert_eq!(same_day.horometer_delta, None);
        assert!(same_day.has_warnings);
        assert_eq!(
            same_day.validation_messages[0].issue,
            MeterIssue::SameDayReading
        );
    }

    #[test]
    fn test_kilometers_tracked_independently() {
        let mut first = reading(1, 1, 60, None);
        first.kilometer = Some(BigDecimal::from(12000));
        let mut second = reading(3, 2, 60, None);
        second.kilometer = Some(BigDecimal::from(12450));

        let result = run(&[first, second]);
        let derived = &result.readings[1];
        assert_eq!(derived.kilometer_delta, Some(BigDecimal::from(450)));
        assert_eq!(derived.daily_km_avg, Some(BigDecimal::from(225)));
        assert_eq!(derived.horometer_delta, None);
        assert!(!derived.has_warnings);
    }
}
