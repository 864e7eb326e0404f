//! Keeps the denormalized `applications_count` and `last_application_date`
//! on a company in line with the server's counter cache.
//!
//! While submissions are outstanding, a company's aggregates are an
//! [`Overlay`]: the last values the server stated, plus one speculative bump
//! per unacknowledged submission. Acknowledgements fold a bump into the base,
//! canonical company payloads rebase it, and failures drop the bump. The
//! client never counts children.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;

use crate::models::{Company, wire_date};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSnapshot {
    pub applications_count: i64,
    pub last_application_date: Option<NaiveDate>,
}

impl AggregateSnapshot {
    pub fn of(company: &Company) -> Self {
        Self {
            applications_count: company.applications_count,
            last_application_date: company.last_application_date,
        }
    }

    /// Take every field the payload states.
    pub fn absorb(&mut self, canonical: &CanonicalParent) {
        if let Some(count) = canonical.applications_count {
            self.applications_count = count;
        }
        if let Some(date) = canonical.last_application_date {
            self.last_application_date = date;
        }
    }
}

/// Outstanding submissions for one company, layered over a base.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay<K> {
    base: AggregateSnapshot,
    bumps: Vec<(K, NaiveDate)>,
}

impl<K: PartialEq> Overlay<K> {
    pub fn new(company: &Company) -> Self {
        Self {
            base: AggregateSnapshot::of(company),
            bumps: Vec::new(),
        }
    }

    pub fn base(&self) -> &AggregateSnapshot {
        &self.base
    }

    pub fn is_empty(&self) -> bool {
        self.bumps.is_empty()
    }

    pub fn push(&mut self, key: K, submitted: NaiveDate) {
        self.bumps.push((key, submitted));
    }

    /// Drop a submission the server refused. Returns false if it wasn't held.
    pub fn withdraw(&mut self, key: &K) -> bool {
        match self.bumps.iter().position(|(k, _)| k == key) {
            Some(index) => {
                self.bumps.remove(index);
                true
            }
            None => false,
        }
    }

    /// Fold an acknowledged submission into the base.
    pub fn confirm(&mut self, key: &K) -> bool {
        match self.bumps.iter().position(|(k, _)| k == key) {
            Some(index) => {
                let (_, submitted) = self.bumps.remove(index);
                self.base.applications_count += 1;
                self.base.last_application_date = Some(submitted);
                true
            }
            None => false,
        }
    }

    pub fn rebase(&mut self, canonical: &CanonicalParent) {
        self.base.absorb(canonical);
    }

    pub fn reset(&mut self, base: AggregateSnapshot) {
        self.base = base;
    }

    /// Write base plus outstanding bumps onto the company.
    pub fn apply_to(&self, company: &mut Company) {
        company.applications_count = self.base.applications_count + self.bumps.len() as i64;
        company.last_application_date = self
            .bumps
            .last()
            .map(|(_, submitted)| *submitted)
            .or(self.base.last_application_date);
    }
}

/// The company object embedded in create/delete acknowledgements.
///
/// A field that is present (even `null`) is authoritative; an absent one says
/// nothing, since the server's company serializer does not always include
/// the date.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CanonicalParent {
    pub id: i64,
    #[serde(default)]
    pub applications_count: Option<i64>,
    #[serde(default, deserialize_with = "wire_date::present")]
    pub last_application_date: Option<Option<NaiveDate>>,
}

impl CanonicalParent {
    /// Pull `response.company`, if the response carries a usable one.
    pub fn from_response(response: &Value) -> Option<Self> {
        let company = response.get("company")?;
        serde_json::from_value(company.clone()).ok()
    }
}

pub fn apply_canonical(company: &mut Company, canonical: &CanonicalParent) {
    let mut values = AggregateSnapshot::of(company);
    values.absorb(canonical);
    company.applications_count = values.applications_count;
    company.last_application_date = values.last_application_date;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityId, NewCompany};
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn company_with(count: i64, last: Option<NaiveDate>) -> Company {
        let mut company = Company::provisional(
            EntityId::Confirmed(7),
            &NewCompany { name: "Acme".to_string(), webpage: None },
        );
        company.applications_count = count;
        company.last_application_date = last;
        company
    }

    #[test]
    fn test_single_bump_then_withdraw_is_exact() {
        let mut company = company_with(4, Some(date(2025, 9, 30)));
        let before = company.clone();
        let mut overlay = Overlay::new(&company);

        overlay.push(1, date(2025, 10, 24));
        overlay.apply_to(&mut company);
        assert_eq!(company.applications_count, 5);
        assert_eq!(company.last_application_date, Some(date(2025, 10, 24)));

        assert!(overlay.withdraw(&1));
        overlay.apply_to(&mut company);
        assert_eq!(company, before);
        assert!(overlay.is_empty());
    }

    #[test]
    fn test_withdraw_out_of_order_restores_prior_values() {
        let mut company = company_with(0, None);
        let mut overlay = Overlay::new(&company);
        overlay.push(1, date(2025, 10, 20));
        overlay.push(2, date(2025, 10, 24));

        overlay.withdraw(&1);
        overlay.apply_to(&mut company);
        assert_eq!(company.applications_count, 1);
        assert_eq!(company.last_application_date, Some(date(2025, 10, 24)));

        overlay.withdraw(&2);
        overlay.apply_to(&mut company);
        assert_eq!(company.applications_count, 0);
        assert_eq!(company.last_application_date, None);
    }

    #[test]
    fn test_confirm_then_rebase_keeps_server_count_under_pending() {
        let mut company = company_with(0, None);
        let mut overlay = Overlay::new(&company);
        overlay.push(1, date(2025, 10, 24));
        overlay.push(2, date(2025, 10, 24));

        assert!(overlay.confirm(&1));
        overlay.rebase(&CanonicalParent {
            id: 7,
            applications_count: Some(3),
            last_application_date: None,
        });
        overlay.apply_to(&mut company);
        assert_eq!(company.applications_count, 4);

        overlay.withdraw(&2);
        overlay.apply_to(&mut company);
        assert_eq!(company.applications_count, 3);
        assert_eq!(company.last_application_date, Some(date(2025, 10, 24)));
    }

    #[test]
    fn test_canonical_replaces_wholesale() {
        // Server knows about applications made elsewhere: 9, not our local 5.
        let mut company = company_with(5, Some(date(2025, 10, 24)));
        let canonical = CanonicalParent::from_response(&json!({
            "application": {"id": 1},
            "company": {"id": 7, "applications_count": 9, "last_application_date": "2025-10-01"}
        }))
        .unwrap();
        apply_canonical(&mut company, &canonical);
        assert_eq!(company.applications_count, 9);
        assert_eq!(company.last_application_date, Some(date(2025, 10, 1)));
    }

    #[test]
    fn test_canonical_null_date_clears_absent_date_keeps() {
        let mut company = company_with(1, Some(date(2025, 10, 24)));
        let absent = CanonicalParent::from_response(&json!({
            "company": {"id": 7, "applications_count": 0}
        }))
        .unwrap();
        apply_canonical(&mut company, &absent);
        assert_eq!(company.applications_count, 0);
        assert_eq!(company.last_application_date, Some(date(2025, 10, 24)));

        let null = CanonicalParent::from_response(&json!({
            "company": {"id": 7, "applications_count": 0, "last_application_date": null}
        }))
        .unwrap();
        apply_canonical(&mut company, &null);
        assert_eq!(company.last_application_date, None);
    }

    #[test]
    fn test_response_without_company() {
        assert!(CanonicalParent::from_response(&json!({"message": "ok"})).is_none());
        assert!(CanonicalParent::from_response(&Value::Null).is_none());
    }
}
