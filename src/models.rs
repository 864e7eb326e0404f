use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Identity of a company or application as held by the client.
///
/// Server-assigned ids and locally generated placeholders live in separate
/// variants, so a placeholder can never be mistaken for a real row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityId {
    Confirmed(i64),
    Pending(u64),
}

impl EntityId {
    pub fn is_pending(&self) -> bool {
        matches!(self, EntityId::Pending(_))
    }

    pub fn confirmed(&self) -> Option<i64> {
        match self {
            EntityId::Confirmed(id) => Some(*id),
            EntityId::Pending(_) => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityId::Confirmed(id) => id.to_string(),
            EntityId::Pending(n) => format!("tmp-{}", n),
        };
        f.pad(&s)
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EntityId::Confirmed(id) => serializer.serialize_i64(*id),
            EntityId::Pending(_) => serializer.collect_str(self),
        }
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(EntityId::Confirmed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub webpage: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub favorited: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub applications_count: i64,
    #[serde(default, with = "wire_date::optional")]
    pub last_application_date: Option<NaiveDate>,
}

impl Company {
    pub fn provisional(id: EntityId, new: &NewCompany) -> Self {
        Self {
            id,
            name: new.name.clone(),
            webpage: new.webpage.clone(),
            favorited: false,
            applications_count: 0,
            last_application_date: None,
        }
    }
}

/// Minimal company object embedded in cross-company application listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyRef {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub webpage: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum JobLevel {
    #[serde(alias = "Entry")]
    Entry,
    #[serde(alias = "Mid")]
    Mid,
    #[serde(alias = "Senior")]
    Senior,
    #[serde(alias = "Lead")]
    Lead,
    #[serde(alias = "Manager")]
    Manager,
    #[serde(alias = "Director")]
    Director,
    #[serde(alias = "Executive")]
    Executive,
}

// List endpoints titleize these ("Direct Hire"), create responses don't.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentType {
    #[serde(alias = "Contractor")]
    Contractor,
    #[default]
    #[serde(alias = "Direct Hire")]
    DirectHire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WorkMode {
    #[serde(alias = "Remote")]
    Remote,
    #[serde(alias = "Hybrid")]
    Hybrid,
    #[default]
    #[serde(alias = "Onsite")]
    Onsite,
}

impl fmt::Display for JobLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobLevel::Entry => "entry",
            JobLevel::Mid => "mid",
            JobLevel::Senior => "senior",
            JobLevel::Lead => "lead",
            JobLevel::Manager => "manager",
            JobLevel::Director => "director",
            JobLevel::Executive => "executive",
        };
        f.pad(s)
    }
}

impl fmt::Display for EmploymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            EmploymentType::Contractor => "contractor",
            EmploymentType::DirectHire => "direct hire",
        })
    }
}

impl fmt::Display for WorkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            WorkMode::Remote => "remote",
            WorkMode::Hybrid => "hybrid",
            WorkMode::Onsite => "onsite",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: EntityId,
    #[serde(default)]
    pub company_id: Option<i64>, // absent from list payloads, see adopt_parent
    pub title: String,
    #[serde(default)]
    pub job_level: Option<JobLevel>,
    #[serde(with = "wire_date::required")]
    pub date_submitted: NaiveDate,
    #[serde(default, deserialize_with = "null_as_default")]
    pub employment_type: EmploymentType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub work_mode: WorkMode,
    #[serde(default)]
    pub job_posting_url: Option<String>,
    #[serde(default)]
    pub job_external_id: Option<String>,
    #[serde(default)]
    pub company: Option<CompanyRef>,
}

impl Application {
    pub fn provisional(id: EntityId, company_id: i64, new: &NewApplication) -> Self {
        Self {
            id,
            company_id: Some(company_id),
            title: new.title.clone(),
            job_level: new.job_level,
            date_submitted: new.date_submitted,
            employment_type: new.employment_type,
            work_mode: new.work_mode,
            job_posting_url: new.job_posting_url.clone(),
            job_external_id: new.job_external_id.clone(),
            company: None,
        }
    }

    /// Resolve the owning company id: explicit field, embedded company, or the
    /// company the list was fetched for.
    pub fn adopt_parent(&mut self, context: Option<i64>) {
        if self.company_id.is_none() {
            self.company_id = self.company.as_ref().map(|c| c.id).or(context);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCompany {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webpage: Option<String>,
}

/// Partial company update. Only `favorited` is applied before the server answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompanyUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webpage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorited: Option<bool>,
}

impl CompanyUpdate {
    pub fn favorite(favorited: bool) -> Self {
        Self {
            favorited: Some(favorited),
            ..Self::default()
        }
    }

    pub fn apply_optimistic(&self, company: &mut Company) {
        if let Some(favorited) = self.favorited {
            company.favorited = favorited;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewApplication {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_level: Option<JobLevel>,
    #[serde(with = "wire_date::required")]
    pub date_submitted: NaiveDate,
    pub employment_type: EmploymentType,
    pub work_mode: WorkMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_posting_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_external_id: Option<String>,
}

impl NewApplication {
    pub fn new(title: impl Into<String>, date_submitted: NaiveDate) -> Self {
        Self {
            title: title.into(),
            job_level: None,
            date_submitted,
            employment_type: EmploymentType::default(),
            work_mode: WorkMode::default(),
            job_posting_url: None,
            job_external_id: None,
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Calendar dates on the wire.
///
/// The collaborator sends either `YYYY-MM-DD` or a full timestamp carrying its
/// fixed Eastern offset. The date is read in the transmitted offset; nothing is
/// shifted into the local zone. Dates are always written as `YYYY-MM-DD`.
pub mod wire_date {
    use chrono::{DateTime, NaiveDate};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn parse(s: &str) -> Option<NaiveDate> {
        let s = s.trim();
        NaiveDate::parse_from_str(s, FORMAT)
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
    }

    fn invalid<E: serde::de::Error>(s: &str) -> E {
        E::custom(format!("invalid date '{}', expected ISO 8601", s))
    }

    pub mod required {
        use super::*;

        pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(&date.format(FORMAT))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
            let s = String::deserialize(deserializer)?;
            parse(&s).ok_or_else(|| invalid(&s))
        }
    }

    pub mod optional {
        use super::*;

        pub fn serialize<S: Serializer>(
            date: &Option<NaiveDate>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match date {
                Some(d) => serializer.collect_str(&d.format(FORMAT)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveDate>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(s) if s.trim().is_empty() => Ok(None),
                Some(s) => parse(&s).map(Some).ok_or_else(|| invalid(&s)),
            }
        }
    }

    /// Distinguishes an absent field (`None`) from an explicit `null`
    /// (`Some(None)`). Use together with `#[serde(default)]`.
    pub fn present<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<NaiveDate>>, D::Error> {
        optional::deserialize(deserializer).map(Some)
    }
}
