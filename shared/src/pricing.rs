use crate::{Car, LeaseType};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::Zero;
use thiserror::Error;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// A monthly lease is billed per started block of this many days.
pub const DAYS_PER_MONTH: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("End date must be after start date")]
    EndNotAfterStart,
    #[error("Rate must not be negative")]
    NegativeRate,
}

/// Whole days billed for a rental; a started day counts as a full day.
pub fn billable_days(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<i64, PricingError> {
    let seconds = (end - start).num_seconds();
    if seconds <= 0 {
        return Err(PricingError::EndNotAfterStart);
    }
    Ok((seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY)
}

pub fn billable_months(days: i64) -> i64 {
    (days + DAYS_PER_MONTH - 1) / DAYS_PER_MONTH
}

pub fn lease_total(
    lease_type: LeaseType,
    daily_rate: &BigDecimal,
    monthly_rate: &BigDecimal,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<BigDecimal, PricingError> {
    let days = billable_days(start, end)?;
    let (rate, units) = match lease_type {
        LeaseType::Daily => (daily_rate, days),
        LeaseType::Monthly => (monthly_rate, billable_months(days)),
    };
    if *rate < BigDecimal::zero() {
        return Err(PricingError::NegativeRate);
    }
    Ok(rate * BigDecimal::from(units))
}

pub fn quote(
    car: &Car,
    lease_type: LeaseType,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<BigDecimal, PricingError> {
    lease_total(lease_type, &car.daily_rate, &car.monthly_rate, start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn four_days_at_a_thousand() {
        let total = lease_total(
            LeaseType::Daily,
            &BigDecimal::from(1000),
            &BigDecimal::from(25000),
            day(2024, 1, 1),
            day(2024, 1, 5),
        )
        .unwrap();
        assert_eq!(total, BigDecimal::from(4000));
    }

    #[test]
    fn partial_days_round_up() {
        let start = day(2024, 1, 1);
        assert_eq!(billable_days(start, start + Duration::hours(1)).unwrap(), 1);
        assert_eq!(billable_days(start, start + Duration::hours(25)).unwrap(), 2);
        assert_eq!(billable_days(start, start + Duration::days(2)).unwrap(), 2);
    }

    #[test]
    fn empty_or_inverted_ranges_are_rejected() {
        let start = day(2024, 1, 5);
        assert_eq!(billable_days(start, start), Err(PricingError::EndNotAfterStart));
        assert_eq!(
            billable_days(start, day(2024, 1, 1)),
            Err(PricingError::EndNotAfterStart)
        );
    }

    #[test]
    fn monthly_leases_bill_started_months() {
        let total = lease_total(
            LeaseType::Monthly,
            &BigDecimal::from(1000),
            &BigDecimal::from(25000),
            day(2024, 1, 1),
            day(2024, 2, 5),
        )
        .unwrap();
        // 35 days -> two started months
        assert_eq!(total, BigDecimal::from(50000));
    }

    #[test]
    fn negative_rates_are_rejected() {
        let result = lease_total(
            LeaseType::Daily,
            &BigDecimal::from(-1),
            &BigDecimal::from(0),
            day(2024, 1, 1),
            day(2024, 1, 2),
        );
        assert_eq!(result, Err(PricingError::NegativeRate));
    }

    proptest! {
        #[test]
        fn total_is_rate_times_days_and_repeatable(
            rate in 0i64..1_000_000,
            offset_hours in 1i64..(24 * 400),
        ) {
            let start = day(2024, 1, 1);
            let end = start + Duration::hours(offset_hours);
            let daily = BigDecimal::from(rate);
            let monthly = BigDecimal::from(rate * 25);

            let first = lease_total(LeaseType::Daily, &daily, &monthly, start, end).unwrap();
            let second = lease_total(LeaseType::Daily, &daily, &monthly, start, end).unwrap();
            let days = billable_days(start, end).unwrap();

            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first, BigDecimal::from(rate * days));
            prop_assert!(days * 24 >= offset_hours);
            prop_assert!((days - 1) * 24 < offset_hours);
        }
    }
}
