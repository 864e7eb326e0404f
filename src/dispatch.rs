use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error};

use crate::api::RemoteApi;
use crate::error::ApiError;
use crate::mutation::{MutationManager, Outcome, Settlement, Ticket};
use crate::store::Store;

/// Runs tickets against the remote API concurrently and hands their
/// settlements back in completion order.
pub struct Dispatcher {
    api: Arc<dyn RemoteApi>,
    tx: UnboundedSender<Settlement>,
    rx: UnboundedReceiver<Settlement>,
    in_flight: usize,
}

impl Dispatcher {
    pub fn new(api: Arc<dyn RemoteApi>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            api,
            tx,
            rx,
            in_flight: 0,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Start the request. Must be called from within a tokio runtime.
    pub fn submit(&mut self, ticket: Ticket) {
        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        self.in_flight += 1;
        debug!(ticket = %ticket.id, path = %ticket.request.path(), "dispatching");

        tokio::spawn(async move {
            let Ticket { id, request } = ticket;
            let result = tokio::task::spawn_blocking(move || api.execute(&request))
                .await
                .unwrap_or_else(|e| Err(ApiError::Network(format!("request worker failed: {}", e))));
            if tx.send(Settlement { ticket: id, result }).is_err() {
                error!(ticket = %id, "dispatcher dropped before settlement");
            }
        });
    }

    /// Next settlement to arrive, or `None` with nothing in flight.
    pub async fn next(&mut self) -> Option<Settlement> {
        if self.in_flight == 0 {
            return None;
        }
        let settlement = self.rx.recv().await?;
        self.in_flight -= 1;
        Some(settlement)
    }

    /// Settle everything in flight, in arrival order.
    pub async fn drain(&mut self, manager: &mut MutationManager, store: &mut Store) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Some(settlement) = self.next().await {
            outcomes.push(manager.settle(store, settlement));
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiRequest;
    use crate::merge::FetchMode;
    use crate::models::{EntityId, NewCompany};
    use crate::store::CollectionKey;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers every request with a canned response and records what it saw.
    struct FakeApi {
        calls: Mutex<Vec<ApiRequest>>,
        respond: Box<dyn Fn(&ApiRequest) -> Result<Value, ApiError> + Send + Sync>,
    }

    impl FakeApi {
        fn new(respond: impl Fn(&ApiRequest) -> Result<Value, ApiError> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }

        fn calls(&self) -> Vec<ApiRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RemoteApi for FakeApi {
        fn execute(&self, request: &ApiRequest) -> Result<Value, ApiError> {
            self.calls.lock().unwrap().push(request.clone());
            (self.respond)(request)
        }
    }

    #[tokio::test]
    async fn test_duplicate_fetch_hits_server_once() {
        let api = FakeApi::new(|_| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(json!([{"id": 1, "name": "Acme"}]))
        });
        let mut dispatcher = Dispatcher::new(api.clone());
        let mut manager = MutationManager::new(FetchMode::Merge);
        let mut store = Store::new();

        for _ in 0..3 {
            if let Some(ticket) = manager.fetch(&mut store, CollectionKey::Companies) {
                dispatcher.submit(ticket);
            }
        }
        assert_eq!(dispatcher.in_flight(), 1);

        let outcomes = dispatcher.drain(&mut manager, &mut store).await;
        assert_eq!(api.calls(), vec![ApiRequest::ListCompanies]);
        assert_eq!(outcomes, vec![Outcome::Fetched { key: CollectionKey::Companies, items: 1 }]);
        assert_eq!(store.companies().items().len(), 1);
    }

    #[tokio::test]
    async fn test_create_and_fetch_overlap_without_duplicates() {
        let api = FakeApi::new(|request| match request {
            ApiRequest::CreateCompany(new) => {
                std::thread::sleep(Duration::from_millis(30));
                Ok(json!({"id": 42, "name": new.name}))
            }
            // The list already contains the row the create is about to confirm.
            _ => Ok(json!([{"id": 42, "name": "Acme"}, {"id": 5, "name": "Initech"}])),
        });
        let mut dispatcher = Dispatcher::new(api);
        let mut manager = MutationManager::new(FetchMode::Merge);
        let mut store = Store::new();

        let create = manager.create_company(
            &mut store,
            NewCompany { name: "Acme".to_string(), webpage: None },
        );
        dispatcher.submit(create);
        if let Some(fetch) = manager.fetch(&mut store, CollectionKey::Companies) {
            dispatcher.submit(fetch);
        }
        let outcomes = dispatcher.drain(&mut manager, &mut store).await;

        assert_eq!(outcomes.len(), 2);
        let mut ids: Vec<EntityId> = store.companies().items().iter().map(|c| c.id).collect();
        ids.sort_by_key(|id| id.confirmed());
        assert_eq!(ids, vec![EntityId::Confirmed(5), EntityId::Confirmed(42)]);
    }

    #[tokio::test]
    async fn test_next_with_nothing_in_flight() {
        let api = FakeApi::new(|_| Ok(Value::Null));
        let mut dispatcher = Dispatcher::new(api);
        assert!(dispatcher.next().await.is_none());
    }
}
