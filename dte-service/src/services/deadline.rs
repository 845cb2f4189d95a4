//! Invalidation deadlines per document type.
//!
//! Two regimes apply:
//!
//! - Consumer-facing documents (invoices, export invoices, excluded-subject
//!   vouchers) may be invalidated up to three calendar months after issue.
//! - Contributor documents (CCF, credit/debit notes, retention vouchers) may be
//!   invalidated only until the end of the next business day after issue.
//!
//! Comparisons are by calendar date in the fiscal timezone and deadlines are
//! inclusive: the deadline day itself is still within the window.

use crate::models::DocumentType;
use chrono::{
    DateTime, Datelike, FixedOffset, Months, NaiveDate, NaiveTime, Offset, Utc, Weekday,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Non-working days beyond weekends.
pub trait HolidayCalendar: Send + Sync {
    fn is_holiday(&self, date: NaiveDate) -> bool;
}

/// Calendar with no holidays; only weekends are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHolidays;

impl HolidayCalendar for NoHolidays {
    fn is_holiday(&self, _date: NaiveDate) -> bool {
        false
    }
}

/// Calendar backed by an explicit list of dates.
#[derive(Debug, Clone, Default)]
pub struct FixedHolidays {
    dates: HashSet<NaiveDate>,
}

impl FixedHolidays {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            dates: dates.into_iter().collect(),
        }
    }
}

impl HolidayCalendar for FixedHolidays {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }
}

/// Result of a deadline check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvalidationWindow {
    pub allowed: bool,
    /// Last day (inclusive) on which an invalidation may be filed.
    pub deadline: NaiveDate,
}

/// How the deadline is computed for a document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineRule {
    CalendarMonths(u32),
    NextBusinessDay,
}

pub fn rule_for(document_type: DocumentType) -> DeadlineRule {
    match document_type {
        DocumentType::Invoice
        | DocumentType::ExportInvoice
        | DocumentType::ExcludedSubjectVoucher => DeadlineRule::CalendarMonths(3),
        DocumentType::FiscalCreditVoucher
        | DocumentType::CreditNote
        | DocumentType::DebitNote
        | DocumentType::RetentionVoucher => DeadlineRule::NextBusinessDay,
    }
}

pub fn is_business_day(date: NaiveDate, calendar: &dyn HolidayCalendar) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !calendar.is_holiday(date)
}

/// First business day strictly after `date`.
pub fn next_business_day(date: NaiveDate, calendar: &dyn HolidayCalendar) -> NaiveDate {
    let mut candidate = date;
    loop {
        candidate = match candidate.succ_opt() {
            Some(next) => next,
            None => return NaiveDate::MAX,
        };
        if is_business_day(candidate, calendar) {
            return candidate;
        }
    }
}

/// Last day on which a document issued on `issued_on` may be invalidated.
pub fn deadline_for(
    document_type: DocumentType,
    issued_on: NaiveDate,
    calendar: &dyn HolidayCalendar,
) -> NaiveDate {
    match rule_for(document_type) {
        DeadlineRule::CalendarMonths(months) => issued_on
            .checked_add_months(Months::new(months))
            .unwrap_or(NaiveDate::MAX),
        DeadlineRule::NextBusinessDay => next_business_day(issued_on, calendar),
    }
}

/// Pure deadline check on calendar dates.
pub fn can_invalidate(
    document_type: DocumentType,
    issued_on: NaiveDate,
    today: NaiveDate,
    calendar: &dyn HolidayCalendar,
) -> InvalidationWindow {
    let deadline = deadline_for(document_type, issued_on, calendar);
    InvalidationWindow {
        allowed: today <= deadline,
        deadline,
    }
}

/// Deadline policy bound to a holiday calendar and the fiscal timezone.
#[derive(Clone)]
pub struct DeadlinePolicy {
    calendar: Arc<dyn HolidayCalendar>,
    offset: FixedOffset,
}

impl DeadlinePolicy {
    pub fn new(calendar: Arc<dyn HolidayCalendar>, offset: FixedOffset) -> Self {
        Self { calendar, offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local calendar date of a UTC instant in the fiscal timezone.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// UTC instant at which local `date` begins.
    pub fn day_start(&self, date: NaiveDate) -> DateTime<Utc> {
        let local_midnight = date.and_time(NaiveTime::MIN);
        DateTime::<Utc>::from_naive_utc_and_offset(local_midnight, Utc)
            - chrono::Duration::seconds(i64::from(self.offset.local_minus_utc()))
    }

    pub fn can_invalidate(
        &self,
        document_type: DocumentType,
        issued_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> InvalidationWindow {
        can_invalidate(
            document_type,
            self.local_date(issued_at),
            self.local_date(now),
            self.calendar.as_ref(),
        )
    }
}

/// Fixed offset for a signed minute count; out-of-range values fall back to UTC.
pub fn fiscal_offset(utc_offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        // El Salvador, UTC-06:00 without DST
        Self::new(Arc::new(NoHolidays), fiscal_offset(-360))
    }
}

impl std::fmt::Debug for DeadlinePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlinePolicy")
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn invoice_window_is_three_calendar_months_inclusive() {
        let issued = date(2024, 1, 1);

        let on_time = can_invalidate(
            DocumentType::Invoice,
            issued,
            date(2024, 3, 31),
            &NoHolidays,
        );
        assert!(on_time.allowed);
        assert_eq!(on_time.deadline, date(2024, 4, 1));

        let last_day = can_invalidate(
            DocumentType::Invoice,
            issued,
            date(2024, 4, 1),
            &NoHolidays,
        );
        assert!(last_day.allowed);

        let late = can_invalidate(
            DocumentType::Invoice,
            issued,
            date(2024, 4, 2),
            &NoHolidays,
        );
        assert!(!late.allowed);
        assert_eq!(late.deadline, date(2024, 4, 1));
    }

    #[test]
    fn month_arithmetic_clamps_to_month_end() {
        assert_eq!(
            deadline_for(DocumentType::ExportInvoice, date(2023, 11, 30), &NoHolidays),
            date(2024, 2, 29)
        );
        assert_eq!(
            deadline_for(
                DocumentType::ExcludedSubjectVoucher,
                date(2024, 11, 30),
                &NoHolidays
            ),
            date(2025, 2, 28)
        );
    }

    #[test]
    fn ccf_deadline_is_next_business_day() {
        // Tuesday -> Wednesday
        assert_eq!(
            deadline_for(DocumentType::FiscalCreditVoucher, date(2024, 5, 14), &NoHolidays),
            date(2024, 5, 15)
        );
        // Friday -> Monday
        assert_eq!(
            deadline_for(DocumentType::CreditNote, date(2024, 5, 17), &NoHolidays),
            date(2024, 5, 20)
        );
        // Saturday -> Monday
        assert_eq!(
            deadline_for(DocumentType::DebitNote, date(2024, 5, 18), &NoHolidays),
            date(2024, 5, 20)
        );
    }

    #[test]
    fn holidays_extend_the_next_business_day() {
        let calendar = FixedHolidays::new([date(2024, 5, 20), date(2024, 5, 21)]);
        assert_eq!(
            deadline_for(DocumentType::FiscalCreditVoucher, date(2024, 5, 17), &calendar),
            date(2024, 5, 22)
        );
    }

    #[test]
    fn ccf_window_closes_after_deadline_day() {
        let issued = date(2024, 5, 17);
        let window = |today| {
            can_invalidate(DocumentType::FiscalCreditVoucher, issued, today, &NoHolidays)
        };
        assert!(window(date(2024, 5, 20)).allowed);
        assert!(!window(date(2024, 5, 21)).allowed);
    }

    #[test]
    fn window_is_monotonic_for_every_type() {
        let issued = date(2024, 1, 31);
        for document_type in DocumentType::ALL {
            let mut closed = false;
            let mut today = issued;
            for _ in 0..150 {
                let window = can_invalidate(document_type, issued, today, &NoHolidays);
                if closed {
                    assert!(!window.allowed, "{:?} reopened on {}", document_type, today);
                }
                if !window.allowed {
                    assert!(today > window.deadline);
                    closed = true;
                }
                today = today.succ_opt().unwrap();
            }
            assert!(closed, "{:?} window never closed", document_type);
        }
    }

    #[test]
    fn policy_compares_dates_in_fiscal_timezone() {
        let policy = DeadlinePolicy::default();
        // 2024-01-01 03:00 UTC is still 2023-12-31 in El Salvador.
        let issued_at = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();
        assert_eq!(policy.local_date(issued_at), date(2023, 12, 31));

        let now = Utc.with_ymd_and_hms(2024, 4, 1, 5, 59, 59).unwrap();
        let window = policy.can_invalidate(DocumentType::Invoice, issued_at, now);
        assert_eq!(window.deadline, date(2024, 3, 31));
        assert!(window.allowed);
    }

    #[test]
    fn day_start_is_local_midnight() {
        let policy = DeadlinePolicy::default();
        assert_eq!(
            policy.day_start(date(2024, 3, 1)),
            Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()
        );
    }
}
