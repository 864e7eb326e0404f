use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::models::{Application, Company, EntityId};

/// Anything held in a collection, addressable by its client-side id.
pub trait Keyed {
    fn key(&self) -> EntityId;
}

impl Keyed for Company {
    fn key(&self) -> EntityId {
        self.id
    }
}

impl Keyed for Application {
    fn key(&self) -> EntityId {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Idle,
    Loading,
    Succeeded,
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Idle => "idle",
            Status::Loading => "loading",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKey {
    Companies,
    Applications(i64),
    AllApplications,
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionKey::Companies => f.write_str("companies"),
            CollectionKey::Applications(id) => write!(f, "applications of company {}", id),
            CollectionKey::AllApplications => f.write_str("all applications"),
        }
    }
}

/// A list plus its fetch status and last error. Readers get `&[T]`; writes go
/// through the crate-internal methods used by the mutation manager.
#[derive(Debug, Clone)]
pub struct Collection<T> {
    items: Vec<T>,
    status: Status,
    error: Option<String>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            status: Status::Idle,
            error: None,
        }
    }
}

impl<T: Keyed> Collection<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.items.iter().find(|item| item.key() == id)
    }

    pub(crate) fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.items.iter_mut().find(|item| item.key() == id)
    }

    /// Enter `Loading`. Returns false, changing nothing, when a fetch is
    /// already in flight.
    pub(crate) fn begin_fetch(&mut self) -> bool {
        if self.status == Status::Loading {
            return false;
        }
        self.status = Status::Loading;
        true
    }

    pub(crate) fn fetch_succeeded(&mut self, items: Vec<T>) {
        self.items = items;
        self.status = Status::Succeeded;
        self.error = None;
    }

    /// Previously loaded items stay visible.
    pub(crate) fn fetch_failed(&mut self, message: Option<String>) {
        self.status = Status::Failed;
        if message.is_some() {
            self.error = message;
        }
    }

    pub(crate) fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub(crate) fn remove(&mut self, id: EntityId) -> Option<T> {
        let index = self.items.iter().position(|item| item.key() == id)?;
        Some(self.items.remove(index))
    }

    /// Put `item` where the entity `id` sits. If `item`'s own id is already
    /// present elsewhere, that entry is overwritten and `id` is dropped, so
    /// the canonical entity never appears twice. Returns false when neither
    /// is present.
    pub(crate) fn replace(&mut self, id: EntityId, item: T) -> bool {
        let target = item.key();
        if target != id {
            if let Some(existing) = self.get_mut(target) {
                *existing = item;
                self.remove(id);
                return true;
            }
        }
        match self.get_mut(id) {
            Some(slot) => {
                *slot = item;
                true
            }
            None => false,
        }
    }
}

/// The single writable home of everything the dashboard shows.
#[derive(Debug, Default)]
pub struct Store {
    companies: Collection<Company>,
    applications: HashMap<i64, Collection<Application>>,
    all_applications: Collection<Application>,
    /// Ids whose deletion was confirmed, kept out of later fetch results
    /// until a full listing shows the server has dropped them.
    deleted_applications: HashSet<i64>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn companies(&self) -> &Collection<Company> {
        &self.companies
    }

    pub fn company(&self, id: i64) -> Option<&Company> {
        self.companies.get(EntityId::Confirmed(id))
    }

    pub fn applications(&self, company_id: i64) -> Option<&Collection<Application>> {
        self.applications.get(&company_id)
    }

    pub fn all_applications(&self) -> &Collection<Application> {
        &self.all_applications
    }

    pub fn status(&self, key: CollectionKey) -> Status {
        match key {
            CollectionKey::Companies => self.companies.status(),
            CollectionKey::Applications(id) => self
                .applications
                .get(&id)
                .map(Collection::status)
                .unwrap_or_default(),
            CollectionKey::AllApplications => self.all_applications.status(),
        }
    }

    pub fn error(&self, key: CollectionKey) -> Option<&str> {
        match key {
            CollectionKey::Companies => self.companies.error(),
            CollectionKey::Applications(id) => self.applications.get(&id).and_then(Collection::error),
            CollectionKey::AllApplications => self.all_applications.error(),
        }
    }

    pub fn is_deleted(&self, application_id: i64) -> bool {
        self.deleted_applications.contains(&application_id)
    }

    pub(crate) fn deleted_applications(&self) -> &HashSet<i64> {
        &self.deleted_applications
    }

    pub(crate) fn companies_mut(&mut self) -> &mut Collection<Company> {
        &mut self.companies
    }

    pub(crate) fn company_mut(&mut self, id: i64) -> Option<&mut Company> {
        self.companies.get_mut(EntityId::Confirmed(id))
    }

    /// The company's application list, created empty on first use.
    pub(crate) fn applications_mut(&mut self, company_id: i64) -> &mut Collection<Application> {
        self.applications.entry(company_id).or_default()
    }

    pub(crate) fn all_applications_mut(&mut self) -> &mut Collection<Application> {
        &mut self.all_applications
    }

    /// Where an application with this id currently lives, if anywhere.
    pub(crate) fn parent_of_application(&self, id: i64) -> Option<i64> {
        let key = EntityId::Confirmed(id);
        self.applications
            .iter()
            .find(|(_, collection)| collection.get(key).is_some())
            .map(|(company_id, _)| *company_id)
            .or_else(|| self.all_applications.get(key).and_then(|app| app.company_id))
    }

    pub(crate) fn mark_deleted(&mut self, application_id: i64) {
        let key = EntityId::Confirmed(application_id);
        for collection in self.applications.values_mut() {
            collection.remove(key);
        }
        self.all_applications.remove(key);
        self.deleted_applications.insert(application_id);
    }

    pub(crate) fn retain_deleted(&mut self, keep: impl Fn(i64) -> bool) {
        self.deleted_applications.retain(|id| keep(*id));
    }

    /// Leave `Loading` for `Failed`; `None` keeps the previous message.
    pub(crate) fn fail_fetch(&mut self, key: CollectionKey, message: Option<String>) {
        match key {
            CollectionKey::Companies => self.companies.fetch_failed(message),
            CollectionKey::Applications(id) => self.applications_mut(id).fetch_failed(message),
            CollectionKey::AllApplications => self.all_applications.fetch_failed(message),
        }
    }

    /// Set or clear the error of whichever collection `key` names.
    pub(crate) fn set_error(&mut self, key: CollectionKey, message: Option<String>) {
        let slot = match key {
            CollectionKey::Companies => &mut self.companies.error,
            CollectionKey::Applications(id) => &mut self.applications_mut(id).error,
            CollectionKey::AllApplications => &mut self.all_applications.error,
        };
        *slot = message;
    }
}
