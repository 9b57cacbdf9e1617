//! Runs the ledger against a real Redis. Needs `CANTEEN_TEST_REDIS_URL` pointing at a database
//! the test may wipe, skips otherwise.
mod common;

use std::{sync::Arc, time::Duration};

use canteen_server::{
    broadcast::{Broadcaster, ChangeEvent},
    config::{Config, StoreKind},
    database::{RedisStore, init_redis, publish_event, run_event_relay},
    error::LedgerError,
    model::{ItemId, MenuItem},
    store::{Store, StoreError, Write},
};
use redis::aio::ConnectionManager;
use tokio::time::{sleep, timeout};

use common::{Harness, selections};

const URL_VAR: &str = "CANTEEN_TEST_REDIS_URL";

async fn flushed(url: &str) -> (ConnectionManager, Arc<RedisStore>) {
    let mut connection = init_redis(url).await.unwrap();
    redis::cmd("FLUSHDB")
        .query_async::<()>(&mut connection)
        .await
        .unwrap();

    (connection.clone(), Arc::new(RedisStore::new(connection)))
}

async fn harness(url: &str) -> Harness {
    let (_, store) = flushed(url).await;
    let config = Config {
        store: StoreKind::Redis,
        redis_url: url.to_string(),
        ..Config::default()
    };

    Harness::with_store(config, store).await
}

async fn cast_swap_cancel(url: &str) {
    let h = harness(url).await;
    let mika = h.voter("mika").await;
    let burger = h.item("Burger", &["cheese"]).await;
    let salad = h.item("Salad", &[]).await;

    h.state
        .ledger
        .cast_or_update(mika, burger, selections(&["cheese"]), "no onions".into())
        .await
        .unwrap();
    assert_eq!(h.tally(burger).await, 1);

    let updated = h
        .state
        .ledger
        .cast_or_update(mika, burger, selections(&[]), "extra pickles".into())
        .await
        .unwrap();
    assert_eq!(updated.notes, "extra pickles");
    assert_eq!(h.tally(burger).await, 1);

    h.state
        .ledger
        .cast_or_update(mika, salad, selections(&[]), String::new())
        .await
        .unwrap();
    assert_eq!(h.tally(burger).await, 0);
    assert_eq!(h.tally(salad).await, 1);
    assert_eq!(
        h.state.ledger.current_vote(mika).await.unwrap().map(|v| v.item),
        Some(salad)
    );

    h.state.ledger.cancel(mika).await.unwrap();
    assert_eq!(h.tally(salad).await, 0);
    assert_eq!(h.state.ledger.current_vote(mika).await.unwrap(), None);
    assert!(matches!(
        h.state.ledger.cancel(mika).await,
        Err(LedgerError::NoActiveVote)
    ));
    h.assert_consistent().await;
}

async fn reset(url: &str) {
    let h = harness(url).await;
    let mika = h.voter("mika").await;
    let ana = h.voter("ana").await;
    let burger = h.item("Burger", &[]).await;

    for voter in [mika, ana] {
        h.state
            .ledger
            .cast_or_update(voter, burger, selections(&[]), String::new())
            .await
            .unwrap();
    }
    h.state.admission.set_closed(&h.root, true).await.unwrap();
    assert!(matches!(
        h.state.ledger.cancel(mika).await,
        Err(LedgerError::VotingClosed)
    ));

    h.state.admission.reset_cycle(&h.root).await.unwrap();

    assert!(!h.state.admission.status().await.unwrap().closed);
    assert_eq!(h.tally(burger).await, 0);
    assert!(h.state.ledger.orders().await.unwrap().is_empty());
    assert_eq!(h.state.catalog.items(false).await.unwrap().len(), 1);
}

async fn delete_item_cascade(url: &str) {
    let h = harness(url).await;
    let mika = h.voter("mika").await;
    let burger = h.item("Burger", &[]).await;
    let salad = h.item("Salad", &[]).await;

    h.state
        .ledger
        .cast_or_update(mika, burger, selections(&[]), String::new())
        .await
        .unwrap();
    h.state.favorites.toggle(mika, burger).await.unwrap();
    h.state.favorites.toggle(mika, salad).await.unwrap();

    h.state.catalog.remove_item(&h.root, burger).await.unwrap();

    assert_eq!(h.state.ledger.current_vote(mika).await.unwrap(), None);
    assert_eq!(
        h.state.favorites.list(mika).await.unwrap().into_iter().collect::<Vec<_>>(),
        vec![salad]
    );
    let ids: Vec<ItemId> = h
        .state
        .ledger
        .tally_snapshot()
        .await
        .unwrap()
        .iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(ids, vec![salad]);
}

async fn participant_removal_cascade(url: &str) {
    let h = harness(url).await;
    let mika = h.voter("mika").await;
    let burger = h.item("Burger", &[]).await;

    h.state
        .ledger
        .cast_or_update(mika, burger, selections(&[]), String::new())
        .await
        .unwrap();
    h.state.favorites.toggle(mika, burger).await.unwrap();

    h.state.roster.remove(&h.root, mika).await.unwrap();

    assert_eq!(h.tally(burger).await, 0);
    assert_eq!(h.state.ledger.current_vote(mika).await.unwrap(), None);
    assert!(h.state.favorites.list(mika).await.unwrap().is_empty());
    assert!(matches!(
        h.state.favorites.toggle(mika, burger).await,
        Err(LedgerError::Unauthorized)
    ));
}

fn menu_item(id: u64, name: &str) -> MenuItem {
    MenuItem {
        id: ItemId(id),
        name: name.to_string(),
        image_url: None,
        options: vec![],
        is_active: true,
        tally: 0,
    }
}

async fn stale_reads(url: &str) {
    let (_, store) = flushed(url).await;
    let burger = ItemId(1);
    store
        .commit(&[], &[Write::PutItem(menu_item(1, "Burger"))])
        .await
        .unwrap();

    // A tally move leaves item reads valid.
    let seen = store.item(burger).await.unwrap();
    store
        .commit(&[], &[Write::AdjustTally { item: burger, delta: 1 }])
        .await
        .unwrap();
    store
        .commit(&[seen.read()], &[Write::AdjustTally { item: burger, delta: 1 }])
        .await
        .unwrap();
    assert_eq!(store.item(burger).await.unwrap().value.unwrap().tally, 2);

    // An edit does not.
    let seen = store.item(burger).await.unwrap();
    store
        .commit(&[], &[Write::PutItem(menu_item(1, "Cheeseburger"))])
        .await
        .unwrap();

    let result = store
        .commit(&[seen.read()], &[Write::AdjustTally { item: burger, delta: 1 }])
        .await;
    assert!(matches!(result, Err(StoreError::Conflict)));

    let item = store.item(burger).await.unwrap().value.unwrap();
    assert_eq!(item.name, "Cheeseburger");
    assert_eq!(item.tally, 2);
}

async fn event_relay(url: &str) {
    let (mut connection, _) = flushed(url).await;
    let broadcaster = Broadcaster::new(8);
    let mut session = broadcaster.subscribe();
    let relay = tokio::spawn(run_event_relay(url.to_string(), broadcaster.clone()));

    // The relay subscribes in the background, publish until it is listening.
    let mut listening = false;
    for _ in 0..100 {
        if publish_event(&mut connection, ChangeEvent::MenuChanged).await.unwrap() > 0 {
            listening = true;
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(listening, "relay never subscribed");

    let event = timeout(Duration::from_secs(2), session.recv()).await.unwrap();
    assert_eq!(event, Some(ChangeEvent::MenuChanged));

    relay.abort();
}

#[tokio::test]
async fn test_redis_store_end_to_end() {
    let Ok(url) = std::env::var(URL_VAR) else {
        eprintln!("{URL_VAR} not set, skipping Redis tests");
        return;
    };

    // Scenarios share one database, so they run one after another.
    cast_swap_cancel(&url).await;
    reset(&url).await;
    delete_item_cascade(&url).await;
    participant_removal_cascade(&url).await;
    stale_reads(&url).await;
    event_relay(&url).await;
}
