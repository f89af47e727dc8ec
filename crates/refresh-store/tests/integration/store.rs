use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use refresh_store::{Store, StoreConfig, StoreError, UpdateContext};

use crate::utils::setup;

#[tokio::test]
async fn test_end_to_end() {
    setup();

    let store = Store::new(
        |_ctx: UpdateContext| async { Ok::<_, String>(42) },
        StoreConfig {
            update_interval: Duration::from_millis(10),
            update_timeout: Duration::from_millis(5),
            result_validity: Duration::ZERO,
        },
    );

    assert_eq!(store.get(), Err(StoreError::Unset));
    assert_eq!(store.wait(Duration::from_secs(1)).await, Ok(()));
    assert_eq!(store.get(), Ok(42));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers() {
    setup();

    let counter = Arc::new(AtomicU64::new(0));
    let producer = {
        let counter = Arc::clone(&counter);
        move |_ctx: UpdateContext| {
            let next = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<_, String>(next) }
        }
    };
    let store = Store::new(
        producer,
        StoreConfig {
            update_interval: Duration::from_millis(5),
            update_timeout: Duration::from_millis(5),
            ..Default::default()
        },
    );

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store.wait(Duration::from_secs(5)).await.unwrap();
                let mut last = 0;
                for _ in 0..200 {
                    let value = store.get().unwrap();
                    // a reader never sees an older update after a newer one
                    assert!(value >= last, "{value} after {last}");
                    last = value;
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                last
            })
        })
        .collect();

    for reader in readers {
        let last = reader.await.unwrap();
        assert!(last >= 1);
    }

    store.shutdown();
}

#[tokio::test]
async fn test_producer_sees_deadline() {
    setup();

    let store = Store::new(
        |ctx: UpdateContext| async move {
            match ctx.run(std::future::pending::<()>()).await {
                Ok(()) => Ok(()),
                Err(err) => Err(err.to_string()),
            }
        },
        StoreConfig {
            update_interval: Duration::from_millis(20),
            update_timeout: Duration::from_millis(10),
            ..Default::default()
        },
    );

    store.wait(Duration::from_secs(1)).await.unwrap();
    assert_eq!(
        store.get(),
        Err(StoreError::Producer("update deadline exceeded".to_owned()))
    );
}
