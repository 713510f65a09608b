//! Pipeline and transaction tests against a live Redis on localhost:6379.
//!
//! Run with: cargo test --test pipe_trans -- --ignored

use bytes::Bytes;
use redpipe::{Client, ClientBuilder, Error};

async fn connect() -> Client {
    Client::connect("redis://127.0.0.1:6379")
        .await
        .expect("Failed to connect")
}

#[tokio::test]
#[ignore]
async fn test_basic_pipeline() {
    let client = connect().await;
    let seats: Vec<String> = (0..5).map(|i| format!("it:seat:{i}")).collect();
    client.del_many(&seats).await.unwrap();

    let mut pipe = client.pipelined().await.unwrap();
    let sets: Vec<_> = seats
        .iter()
        .enumerate()
        .map(|(i, seat)| pipe.set(seat, format!("#{i}")))
        .collect();
    pipe.close().await.unwrap();
    for set in &sets {
        assert_eq!(set.get().unwrap(), "OK");
    }

    let mut pipe = client.pipelined().await.unwrap();
    let resp0 = pipe.get("it:seat:0");
    let resp3 = pipe.get("it:seat:3");
    let resp4 = pipe.get("it:seat:4");
    assert!(matches!(resp0.get(), Err(Error::ResponseNotReady)));
    pipe.sync().await.unwrap();

    assert_eq!(resp0.get().unwrap(), Some(Bytes::from("#0")));
    assert_eq!(resp3.get().unwrap(), Some(Bytes::from("#3")));
    assert_eq!(resp4.get().unwrap(), Some(Bytes::from("#4")));
    pipe.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_basic_transaction() {
    let client = connect().await;
    client
        .del_many(&["it:counter:1", "it:counter:2", "it:counter:3"])
        .await
        .unwrap();

    let mut trans = client.multi().await.unwrap();
    let first = trans.incr_by("it:counter:1", 1).unwrap();
    trans.incr_by("it:counter:2", 2).unwrap();
    trans.incr_by("it:counter:3", 3).unwrap();
    let results = trans.exec().await.unwrap().expect("not watching, cannot abort");
    trans.close().await.unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(first.get().unwrap(), 1);
    assert_eq!(client.get("it:counter:1").await.unwrap(), Some(Bytes::from("1")));
    assert_eq!(client.get("it:counter:2").await.unwrap(), Some(Bytes::from("2")));
    assert_eq!(client.get("it:counter:3").await.unwrap(), Some(Bytes::from("3")));
}

#[tokio::test]
#[ignore]
async fn test_watched_transaction_commits() {
    let client = connect().await;
    client.set("it:shellpath", "/usr/syscmds/").await.unwrap();

    let mut trans = client.transaction(false).await.unwrap();
    trans.watch(&["it:shellpath"]).await.unwrap();
    trans.multi().await.unwrap();

    let current = client.get("it:shellpath").await.unwrap().unwrap();
    let new_path = format!("{}:/usr/mycmds/", String::from_utf8_lossy(&current));
    let set_result = trans.set("it:shellpath", new_path).unwrap();
    let results = trans.exec().await.unwrap().expect("key was not touched");
    trans.close().await.unwrap();

    assert_eq!(set_result.get().unwrap(), "OK");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].to_string(), "OK");
    assert_eq!(
        client.get("it:shellpath").await.unwrap(),
        Some(Bytes::from("/usr/syscmds/:/usr/mycmds/"))
    );
}

#[tokio::test]
#[ignore]
async fn test_watched_transaction_aborts_on_concurrent_write() {
    let client = connect().await;
    client.set("it:watched", "before").await.unwrap();

    let mut trans = client.transaction(false).await.unwrap();
    trans.watch(&["it:watched"]).await.unwrap();
    client.set("it:watched", "other writer").await.unwrap();
    trans.multi().await.unwrap();
    let set_result = trans.set("it:watched", "mine").unwrap();

    assert!(trans.exec().await.unwrap().is_none());
    assert!(matches!(set_result.get(), Err(Error::Discarded)));
    trans.close().await.unwrap();
    assert_eq!(
        client.get("it:watched").await.unwrap(),
        Some(Bytes::from("other writer"))
    );
}

#[tokio::test]
#[ignore]
async fn test_small_pool_is_reused() {
    let client = ClientBuilder::new()
        .address("redis://127.0.0.1:6379")
        .pool_size(1)
        .build()
        .await
        .unwrap();

    for i in 0..10 {
        let mut pipe = client.pipelined().await.unwrap();
        let n = pipe.incr("it:pool:counter");
        pipe.close().await.unwrap();
        assert!(n.get().unwrap() > i);
    }
    client.del("it:pool:counter").await.unwrap();
}
