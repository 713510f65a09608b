//! Internal stress tests for the multiplexed connection and the pool.
//!
//! Many tasks share one client whose pool is much smaller than the number
//! of concurrent batches, so every pipeline and transaction has to wait
//! for, use, and give back a dedicated connection.

use std::time::Duration;

use bytes::Bytes;

use crate::core::builder::ClientBuilder;
use crate::testing::MockServer;

#[tokio::test]
async fn test_multiplexing_stress() {
    let server = MockServer::start().await.unwrap();
    let client = ClientBuilder::new()
        .address(server.url())
        .queue_size(10000)
        .build()
        .await
        .expect("Failed to connect");

    let mut handles = Vec::new();
    for _ in 0..1000 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            assert_eq!(client.ping().await.unwrap(), "PONG");
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_concurrent_pipelines_share_small_pool() {
    let server = MockServer::start().await.unwrap();
    let client = ClientBuilder::new()
        .address(server.url())
        .pool_size(4)
        .acquire_timeout(Duration::from_secs(5))
        .build()
        .await
        .unwrap();

    let mut handles = Vec::new();
    for task in 0..64 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let mut pipe = client.pipelined().await.unwrap();
            let mut reads = Vec::new();
            for i in 0..20 {
                let key = format!("stress:{task}:{i}");
                pipe.set(&key, format!("{task}-{i}"));
                reads.push(pipe.get(&key));
            }
            pipe.close().await.unwrap();

            for (i, read) in reads.iter().enumerate() {
                assert_eq!(read.get().unwrap(), Some(Bytes::from(format!("{task}-{i}"))));
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert!(server.connections_accepted() <= 1 + 4);
}

#[tokio::test]
async fn test_concurrent_watch_retry_loops_lose_no_updates() {
    let server = MockServer::start().await.unwrap();
    let client = ClientBuilder::new()
        .address(server.url())
        .pool_size(3)
        .build()
        .await
        .unwrap();
    client.set("stress:counter", "0").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let mut trans = client.transaction(false).await.unwrap();
                trans.watch(&["stress:counter"]).await.unwrap();
                let current = client.get("stress:counter").await.unwrap().unwrap();
                let next: i64 = std::str::from_utf8(&current).unwrap().parse::<i64>().unwrap() + 1;

                trans.multi().await.unwrap();
                let set = trans.set("stress:counter", next.to_string()).unwrap();
                let committed = trans.exec().await.unwrap().is_some();
                trans.close().await.unwrap();

                if committed {
                    assert_eq!(set.get().unwrap(), "OK");
                    break;
                }
                assert!(set.get().is_err());
                tokio::task::yield_now().await;
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(server.value("stress:counter"), Some(Bytes::from("16")));
}
