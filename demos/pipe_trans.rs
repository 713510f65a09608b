//! Pipelines and transactions against a local Redis.
//!
//! Run with: cargo run --example pipe_trans
//!
//! Set `RUST_LOG=redpipe=debug` to see connections being checked out of
//! and returned to the pool.

use bytes::Bytes;
use redpipe::{Client, Result};
use tracing_subscriber::EnvFilter;

fn show(value: Option<Bytes>) -> String {
    value
        .map(|v| String::from_utf8_lossy(&v).into_owned())
        .unwrap_or_else(|| "(nil)".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client = Client::connect("redis://127.0.0.1:6379").await?;

    let seats: Vec<String> = (0..5).map(|i| format!("seat:{i}")).collect();
    client.del_many(&seats).await?;
    client
        .del_many(&["counter:1", "counter:2", "counter:3", "shellpath"])
        .await?;

    // Closing a pipeline flushes it and returns its connection to the pool.
    let mut pipe = client.pipelined().await?;
    for (i, seat) in seats.iter().enumerate() {
        pipe.set(seat, format!("#{i}"));
    }
    pipe.close().await?;

    let mut pipe = client.pipelined().await?;
    let resp0 = pipe.get("seat:0");
    let resp3 = pipe.get("seat:3");
    let resp4 = pipe.get("seat:4");
    pipe.sync().await?;

    // Responses are available after the pipeline has executed.
    println!("{}", show(resp0.get()?)); // >>> #0
    println!("{}", show(resp3.get()?)); // >>> #3
    println!("{}", show(resp4.get()?)); // >>> #4
    pipe.close().await?;

    let mut trans = client.multi().await?;
    trans.incr_by("counter:1", 1)?;
    trans.incr_by("counter:2", 2)?;
    trans.incr_by("counter:3", 3)?;
    trans.exec().await?;
    trans.close().await?;

    println!("{}", show(client.get("counter:1").await?)); // >>> 1
    println!("{}", show(client.get("counter:2").await?)); // >>> 2
    println!("{}", show(client.get("counter:3").await?)); // >>> 3

    client.set("shellpath", "/usr/syscmds/").await?;

    // No MULTI yet, so the key can be watched first.
    let mut trans = client.transaction(false).await?;
    trans.watch(&["shellpath"]).await?;
    trans.multi().await?;

    let current = show(client.get("shellpath").await?);
    let set_result = trans.set("shellpath", format!("{current}:/usr/mycmds/"))?;

    match trans.exec().await? {
        Some(results) => {
            println!("{}", set_result.get()?); // >>> OK
            for item in &results {
                println!("{item}"); // >>> OK
            }
            println!("{}", show(client.get("shellpath").await?));
            // >>> /usr/syscmds/:/usr/mycmds/
        }
        None => println!("shellpath was modified concurrently, nothing applied"),
    }
    trans.close().await?;

    client.close();
    Ok(())
}
