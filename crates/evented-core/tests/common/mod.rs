//! Shared helpers for repository integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use evented_core::config::RepositoryConfig;
use evented_core::data_set::AggregateDataSet;
use evented_core::repository::Repository;
use evented_test_support::{
    Account, AccountEvent, AccountEventKind, FixedClock, InMemoryBackingStore,
};
use uuid::Uuid;

pub fn clock() -> FixedClock {
    FixedClock::default()
}

/// Builds an account repository over a fresh in-memory store.
pub fn account_repository(
    keep_in_memory: bool,
) -> (Repository<Account>, Arc<InMemoryBackingStore<Account>>) {
    let store = Arc::new(InMemoryBackingStore::<Account>::new());
    let repository = Repository::new(
        store.clone(),
        RepositoryConfig::new().with_keep_in_memory(keep_in_memory),
    );
    (repository, store)
}

/// Stored history of an account opened by `owner` followed by one deposit
/// of 100 cents per extra version, ending at `version`.
pub fn stored_account(id: Uuid, owner: &str, version: u64) -> AggregateDataSet<Account> {
    let mut events = vec![AccountEvent::stored(
        id,
        1,
        AccountEventKind::Opened {
            owner: owner.to_owned(),
        },
    )];
    for v in 2..=version {
        events.push(AccountEvent::stored(id, v, AccountEventKind::Deposited { cents: 100 }));
    }
    AggregateDataSet::from_events(id, events)
}
