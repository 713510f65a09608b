//! Example using ClientBuilder for advanced configuration.
//!
//! Run with: cargo run --example builder

use std::time::Duration;

use redpipe::{ClientBuilder, Result};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    // Two dedicated connections opened up front, at most four in total.
    let client = ClientBuilder::new()
        .address("redis://127.0.0.1:6379")
        .database(0)
        .client_name("redpipe-builder-demo")
        .connection_timeout(Duration::from_secs(2))
        .read_timeout(Some(Duration::from_secs(1)))
        .pool_size(4)
        .min_idle(2)
        .acquire_timeout(Duration::from_millis(500))
        .build()
        .await?;

    println!("PING response: {}", client.ping().await?);

    let mut pipe = client.pipelined().await?;
    let counter = pipe.incr("builder_example:hits");
    let length = pipe.append("builder_example:log", "hit;");
    pipe.close().await?;
    println!("hits = {}, log length = {}", counter.get()?, length.get()?);

    client
        .del_many(&["builder_example:hits", "builder_example:log"])
        .await?;
    client.close();
    Ok(())
}
