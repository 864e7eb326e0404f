use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

use crate::aggregates::{self, AggregateSnapshot, CanonicalParent, Overlay};
use crate::api::ApiRequest;
use crate::error::{ApiError, ErrorPayload};
use crate::merge::{self, FetchMode};
use crate::models::{Application, Company, CompanyUpdate, EntityId, NewApplication, NewCompany};
use crate::store::{CollectionKey, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(u64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request the caller must run and later hand back as a [`Settlement`].
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    pub id: TicketId,
    pub request: ApiRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub ticket: TicketId,
    pub result: Result<Value, ApiError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Pending,
    Confirmed,
    RolledBack,
    /// Failed with no local reversal (updates and deletes).
    Failed,
}

/// What a mutation changed locally. A creation's bump on its parent's
/// aggregates lives in that company's [`Overlay`], keyed by ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
    pub kind: MutationKind,
    pub collection: CollectionKey,
    pub target: EntityId,
    pub sequence: Option<u64>,
    pub status: MutationStatus,
}

impl PendingMutation {
    fn new(kind: MutationKind, collection: CollectionKey, target: EntityId) -> Self {
        Self {
            kind,
            collection,
            target,
            sequence: None,
            status: MutationStatus::Pending,
        }
    }

    pub fn parent_id(&self) -> Option<i64> {
        match self.collection {
            CollectionKey::Applications(company_id) => Some(company_id),
            _ => None,
        }
    }

    fn finish(mut self, status: MutationStatus, target: EntityId, error: Option<String>) -> Outcome {
        self.status = status;
        info!(kind = ?self.kind, collection = %self.collection, %target, status = ?self.status, "mutation settled");
        Outcome::Resolved {
            kind: self.kind,
            target,
            status: self.status,
            error,
        }
    }
}

/// Mutations that have been issued and not yet settled.
#[derive(Debug, Default)]
pub struct PendingLedger {
    records: HashMap<TicketId, PendingMutation>,
}

impl PendingLedger {
    fn insert(&mut self, ticket: TicketId, record: PendingMutation) {
        self.records.insert(ticket, record);
    }

    fn take(&mut self, ticket: TicketId) -> Option<PendingMutation> {
        self.records.remove(&ticket)
    }

    /// Whether the creation that minted this temporary id is still unresolved.
    pub fn is_live_temp(&self, temp: u64) -> bool {
        self.records.values().any(|record| {
            record.status == MutationStatus::Pending && record.target == EntityId::Pending(temp)
        })
    }

    pub fn get(&self, ticket: TicketId) -> Option<&PendingMutation> {
        self.records.get(&ticket)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Sequence {
    issued: u64,
    applied: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Fetched { key: CollectionKey, items: usize },
    FetchFailed { key: CollectionKey, message: String },
    Resolved {
        kind: MutationKind,
        target: EntityId,
        status: MutationStatus,
        error: Option<String>,
    },
    /// An older response for an entity that already has a newer one applied.
    Stale { target: EntityId },
    /// 401/403: left to the session layer.
    SessionExpired,
    /// Nothing was waiting on this ticket.
    Ignored,
}

/// Turns user intents into immediate local changes plus tickets, and settles
/// those tickets against the store when their responses arrive.
///
/// Responses are applied in arrival order. Company updates carry a
/// per-company sequence number so a late response can't overwrite a newer one.
/// Outstanding application submissions are tracked per company so any mix of
/// acknowledgements, failures and canonical payloads leaves the aggregates at
/// the server's values plus whatever is still pending.
#[derive(Debug)]
pub struct MutationManager {
    fetch_mode: FetchMode,
    next_ticket: u64,
    next_temp: u64,
    ledger: PendingLedger,
    fetches: HashMap<TicketId, CollectionKey>,
    sequences: HashMap<i64, Sequence>,
    overlays: HashMap<i64, Overlay<TicketId>>,
}

impl MutationManager {
    pub fn new(fetch_mode: FetchMode) -> Self {
        Self {
            fetch_mode,
            next_ticket: 0,
            next_temp: 0,
            ledger: PendingLedger::default(),
            fetches: HashMap::new(),
            sequences: HashMap::new(),
            overlays: HashMap::new(),
        }
    }

    pub fn ledger(&self) -> &PendingLedger {
        &self.ledger
    }

    /// Aggregates of `company_id` as last stated by the server, under any
    /// outstanding submissions. `None` when nothing is outstanding.
    pub fn aggregate_base(&self, company_id: i64) -> Option<&AggregateSnapshot> {
        self.overlays.get(&company_id).map(Overlay::base)
    }

    fn ticket(&mut self, request: ApiRequest) -> Ticket {
        self.next_ticket += 1;
        Ticket {
            id: TicketId(self.next_ticket),
            request,
        }
    }

    // Counter, not clock: two submissions in the same instant still differ.
    fn temp_id(&mut self) -> EntityId {
        self.next_temp += 1;
        EntityId::Pending(self.next_temp)
    }

    // --- Intents ---

    /// Start loading a collection. `None` when that collection is already loading.
    pub fn fetch(&mut self, store: &mut Store, key: CollectionKey) -> Option<Ticket> {
        let began = match key {
            CollectionKey::Companies => store.companies_mut().begin_fetch(),
            CollectionKey::Applications(id) => store.applications_mut(id).begin_fetch(),
            CollectionKey::AllApplications => store.all_applications_mut().begin_fetch(),
        };
        if !began {
            debug!(%key, "fetch already in flight, suppressing duplicate");
            return None;
        }

        let request = match key {
            CollectionKey::Companies => ApiRequest::ListCompanies,
            CollectionKey::Applications(company_id) => ApiRequest::ListApplications { company_id },
            CollectionKey::AllApplications => ApiRequest::ListAllApplications,
        };
        let ticket = self.ticket(request);
        self.fetches.insert(ticket.id, key);
        Some(ticket)
    }

    pub fn create_company(&mut self, store: &mut Store, new: NewCompany) -> Ticket {
        let temp = self.temp_id();
        store.companies_mut().push(Company::provisional(temp, &new));
        debug!(%temp, name = %new.name, "provisional company inserted");

        let ticket = self.ticket(ApiRequest::CreateCompany(new));
        self.ledger.insert(
            ticket.id,
            PendingMutation::new(MutationKind::Create, CollectionKey::Companies, temp),
        );
        ticket
    }

    /// Optimistic fields are applied now; the rest waits for the server copy.
    pub fn update_company(&mut self, store: &mut Store, id: i64, update: CompanyUpdate) -> Ticket {
        if let Some(company) = store.company_mut(id) {
            update.apply_optimistic(company);
        }
        let sequence = self.sequences.entry(id).or_default();
        sequence.issued += 1;
        let issued = sequence.issued;

        let ticket = self.ticket(ApiRequest::UpdateCompany { id, update });
        let mut record =
            PendingMutation::new(MutationKind::Update, CollectionKey::Companies, EntityId::Confirmed(id));
        record.sequence = Some(issued);
        self.ledger.insert(ticket.id, record);
        ticket
    }

    pub fn create_application(
        &mut self,
        store: &mut Store,
        company_id: i64,
        new: NewApplication,
    ) -> Ticket {
        let temp = self.temp_id();
        let submitted = new.date_submitted;
        store
            .applications_mut(company_id)
            .push(Application::provisional(temp, company_id, &new));
        debug!(%temp, company_id, title = %new.title, "provisional application inserted");

        let ticket = self.ticket(ApiRequest::CreateApplication {
            company_id,
            application: new,
        });
        match store.company_mut(company_id) {
            Some(company) => {
                let overlay = self
                    .overlays
                    .entry(company_id)
                    .or_insert_with(|| Overlay::new(company));
                overlay.push(ticket.id, submitted);
                overlay.apply_to(company);
            }
            None => debug!(company_id, "company not loaded, skipping speculative count"),
        }
        self.ledger.insert(
            ticket.id,
            PendingMutation::new(MutationKind::Create, CollectionKey::Applications(company_id), temp),
        );
        ticket
    }

    /// Not optimistic: the application stays until the server confirms.
    pub fn delete_application(&mut self, store: &mut Store, id: i64) -> Ticket {
        let collection = store
            .parent_of_application(id)
            .map_or(CollectionKey::AllApplications, CollectionKey::Applications);
        let ticket = self.ticket(ApiRequest::DeleteApplication { id });
        self.ledger.insert(
            ticket.id,
            PendingMutation::new(MutationKind::Delete, collection, EntityId::Confirmed(id)),
        );
        ticket
    }

    // --- Settlement ---

    pub fn settle(&mut self, store: &mut Store, settlement: Settlement) -> Outcome {
        let Settlement { ticket, result } = settlement;

        if let Some(key) = self.fetches.remove(&ticket) {
            return self.settle_fetch(store, key, result);
        }
        let Some(record) = self.ledger.take(ticket) else {
            debug!(%ticket, "no pending work for ticket, ignoring");
            return Outcome::Ignored;
        };

        match (record.kind, record.collection) {
            (MutationKind::Create, CollectionKey::Companies) => {
                settle_company_create(store, record, result)
            }
            (MutationKind::Create, _) => self.settle_application_create(store, ticket, record, result),
            (MutationKind::Update, _) => self.settle_company_update(store, record, result),
            (MutationKind::Delete, _) => self.settle_application_delete(store, record, result),
        }
    }

    fn settle_fetch(
        &mut self,
        store: &mut Store,
        key: CollectionKey,
        result: Result<Value, ApiError>,
    ) -> Outcome {
        let raw = match result {
            Ok(raw) => raw,
            Err(err) if err.is_auth() => {
                store.fail_fetch(key, None);
                warn!(%key, "fetch rejected, session expired");
                return Outcome::SessionExpired;
            }
            Err(err) => {
                let message = err.display_message(&format!("Failed to fetch {}", key));
                warn!(%key, error = %err, "fetch failed");
                store.fail_fetch(key, Some(message.clone()));
                return Outcome::FetchFailed { key, message };
            }
        };

        let mut returned_applications = HashSet::new();
        let ledger = &self.ledger;
        let live = |temp: u64| ledger.is_live_temp(temp);
        let items = match key {
            CollectionKey::Companies => {
                let fetched: Vec<Company> = decode_list(raw, "companies");
                for company in &fetched {
                    if let Some(overlay) = company.id.confirmed().and_then(|id| self.overlays.get_mut(&id)) {
                        overlay.reset(AggregateSnapshot::of(company));
                    }
                }
                let merged = merge::fold_fetch(
                    self.fetch_mode,
                    store.companies().items(),
                    fetched,
                    live,
                    &HashSet::new(),
                );
                let count = merged.len();
                store.companies_mut().fetch_succeeded(merged);
                count
            }
            CollectionKey::Applications(company_id) => {
                let fetched = decode_applications(raw, Some(company_id));
                let existing = store
                    .applications(company_id)
                    .map(|collection| collection.items())
                    .unwrap_or_default();
                let merged = merge::fold_fetch(
                    self.fetch_mode,
                    existing,
                    fetched,
                    live,
                    store.deleted_applications(),
                );
                let count = merged.len();
                store.applications_mut(company_id).fetch_succeeded(merged);
                count
            }
            CollectionKey::AllApplications => {
                let fetched = decode_applications(raw, None);
                returned_applications.extend(fetched.iter().filter_map(|app| app.id.confirmed()));
                let merged = merge::fold_fetch(
                    self.fetch_mode,
                    store.all_applications().items(),
                    fetched,
                    live,
                    store.deleted_applications(),
                );
                let count = merged.len();
                store.all_applications_mut().fetch_succeeded(merged);
                count
            }
        };
        match key {
            CollectionKey::Companies => self.reapply_overlays(store),
            // The full list no longer mentioning an id means the server's
            // deletion is visible to every later fetch. Only safe when no
            // application fetch issued earlier is still out.
            CollectionKey::AllApplications if !self.application_fetch_in_flight() => {
                store.retain_deleted(|id| returned_applications.contains(&id));
            }
            _ => {}
        }
        debug!(%key, items, "fetch folded into store");
        Outcome::Fetched { key, items }
    }

    fn settle_company_update(
        &mut self,
        store: &mut Store,
        record: PendingMutation,
        result: Result<Value, ApiError>,
    ) -> Outcome {
        let target = record.target;
        let Some(id) = target.confirmed() else {
            return Outcome::Ignored;
        };
        let issued = record.sequence.unwrap_or_default();
        let applied = self.sequences.get(&id).map_or(0, |sequence| sequence.applied);
        if issued < applied {
            info!(%target, issued, applied, "discarding out-of-order update response");
            return Outcome::Stale { target };
        }

        // Aggregates go through the canonical path so absent fields and
        // outstanding submissions are respected.
        let result = result.and_then(|raw| {
            let aggregates = serde_json::from_value::<CanonicalParent>(raw.clone()).ok();
            decode::<Company>(raw).map(|company| (company, aggregates))
        });
        match result {
            Ok((mut company, aggregates)) => {
                self.sequences.entry(id).or_default().applied = issued;
                if let Some(current) = store.company(id) {
                    company.applications_count = current.applications_count;
                    company.last_application_date = current.last_application_date;
                }
                if !store.companies_mut().replace(target, company) {
                    debug!(%target, "updated company no longer held, response absorbed");
                }
                if let Some(aggregates) = aggregates {
                    self.correct_parent(store, &aggregates);
                }
                store.set_error(CollectionKey::Companies, None);
                record.finish(MutationStatus::Confirmed, target, None)
            }
            // Update failures are surfaced, never reverted.
            Err(err) => match surface(store, CollectionKey::Companies, &err, "Failed to update company") {
                Some(message) => record.finish(MutationStatus::Failed, target, Some(message)),
                None => Outcome::SessionExpired,
            },
        }
    }

    fn settle_application_create(
        &mut self,
        store: &mut Store,
        ticket: TicketId,
        record: PendingMutation,
        result: Result<Value, ApiError>,
    ) -> Outcome {
        let temp = record.target;
        let Some(company_id) = record.parent_id() else {
            return Outcome::Ignored;
        };
        let key = CollectionKey::Applications(company_id);

        let result = result.and_then(|raw| {
            let parent = CanonicalParent::from_response(&raw);
            decode::<Application>(merge::unwrap_entity(raw, "application")).map(|app| (app, parent))
        });
        match result {
            Ok((mut application, parent)) => {
                application.adopt_parent(Some(company_id));
                let id = application.id;
                if !store.applications_mut(company_id).replace(temp, application) {
                    debug!(%temp, "provisional application gone, acknowledgement absorbed");
                }
                if let Some(overlay) = self.overlays.get_mut(&company_id) {
                    overlay.confirm(&ticket);
                }
                match parent {
                    Some(parent) => self.correct_parent(store, &parent),
                    None => self.reapply_overlay(store, company_id),
                }
                store.set_error(key, None);
                record.finish(MutationStatus::Confirmed, id, None)
            }
            Err(err) => {
                store.applications_mut(company_id).remove(temp);
                if let Some(overlay) = self.overlays.get_mut(&company_id) {
                    overlay.withdraw(&ticket);
                }
                self.reapply_overlay(store, company_id);
                warn!(%temp, company_id, error = %err, "application creation rolled back");
                match surface(store, key, &err, "Failed to create application") {
                    Some(message) => record.finish(MutationStatus::RolledBack, temp, Some(message)),
                    None => Outcome::SessionExpired,
                }
            }
        }
    }

    fn settle_application_delete(
        &mut self,
        store: &mut Store,
        record: PendingMutation,
        result: Result<Value, ApiError>,
    ) -> Outcome {
        let target = record.target;
        let Some(id) = target.confirmed() else {
            return Outcome::Ignored;
        };
        match result {
            Ok(raw) => {
                store.mark_deleted(id);
                // An empty acknowledgement leaves the counter for the next fetch.
                if let Some(parent) = CanonicalParent::from_response(&raw) {
                    self.correct_parent(store, &parent);
                }
                store.set_error(record.collection, None);
                record.finish(MutationStatus::Confirmed, target, None)
            }
            Err(err) => match surface(store, record.collection, &err, "Failed to delete application") {
                Some(message) => record.finish(MutationStatus::Failed, target, Some(message)),
                None => Outcome::SessionExpired,
            },
        }
    }

    // --- Aggregates ---

    /// Take the server's stated aggregates, keeping outstanding bumps on top.
    fn correct_parent(&mut self, store: &mut Store, parent: &CanonicalParent) {
        match self.overlays.get_mut(&parent.id) {
            Some(overlay) => {
                overlay.rebase(parent);
                self.reapply_overlay(store, parent.id);
            }
            None => match store.company_mut(parent.id) {
                Some(company) => aggregates::apply_canonical(company, parent),
                None => debug!(company_id = parent.id, "canonical company not held locally"),
            },
        }
    }

    /// Write the overlay onto the company; forget it once nothing is outstanding.
    fn reapply_overlay(&mut self, store: &mut Store, company_id: i64) {
        let Some(overlay) = self.overlays.get(&company_id) else {
            return;
        };
        if let Some(company) = store.company_mut(company_id) {
            overlay.apply_to(company);
        }
        if overlay.is_empty() {
            self.overlays.remove(&company_id);
        }
    }

    fn reapply_overlays(&mut self, store: &mut Store) {
        let held: Vec<i64> = self.overlays.keys().copied().collect();
        for company_id in held {
            self.reapply_overlay(store, company_id);
        }
    }

    fn application_fetch_in_flight(&self) -> bool {
        self.fetches
            .values()
            .any(|key| matches!(key, CollectionKey::Applications(_) | CollectionKey::AllApplications))
    }
}

fn settle_company_create(
    store: &mut Store,
    record: PendingMutation,
    result: Result<Value, ApiError>,
) -> Outcome {
    let temp = record.target;
    match result.and_then(|raw| decode::<Company>(merge::unwrap_entity(raw, "company"))) {
        Ok(company) => {
            let id = company.id;
            if !store.companies_mut().replace(temp, company) {
                debug!(%temp, "provisional company gone, acknowledgement absorbed");
            }
            store.set_error(CollectionKey::Companies, None);
            record.finish(MutationStatus::Confirmed, id, None)
        }
        Err(err) => {
            store.companies_mut().remove(temp);
            warn!(%temp, error = %err, "company creation rolled back");
            match surface(store, CollectionKey::Companies, &err, "Failed to create company") {
                Some(message) => record.finish(MutationStatus::RolledBack, temp, Some(message)),
                None => Outcome::SessionExpired,
            }
        }
    }
}

/// Put a display-ready message on `key`. Auth failures are left to the
/// session layer and return `None`.
fn surface(store: &mut Store, key: CollectionKey, err: &ApiError, fallback: &str) -> Option<String> {
    if err.is_auth() {
        warn!(%key, "request rejected, session expired");
        return None;
    }
    let message = err.display_message(fallback);
    store.set_error(key, Some(message.clone()));
    Some(message)
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::Server {
        status: 200,
        payload: ErrorPayload::Message(format!("Unexpected response shape: {}", e)),
    })
}

fn decode_list<T: DeserializeOwned>(raw: Value, field: &str) -> Vec<T> {
    merge::normalize_fetch_payload(raw, field)
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(entity) => Some(entity),
            Err(e) => {
                warn!(field, error = %e, "skipping malformed list entry");
                None
            }
        })
        .collect()
}

fn decode_applications(raw: Value, company_id: Option<i64>) -> Vec<Application> {
    let mut applications: Vec<Application> = decode_list(raw, "applications");
    for application in &mut applications {
        application.adopt_parent(company_id);
    }
    applications
}
