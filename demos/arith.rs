//! Arithmetic service - client and server in one process.
//!
//! This example demonstrates:
//! - Registering typed method handlers on a [`Server`]
//! - Calling them concurrently from a [`Client`]
//! - Handler errors surfacing as `RpcError::Application`
//!
//! # Running
//!
//! ```text
//! RUST_LOG=textwire_rpc=debug cargo run --example arith
//! ```

use std::collections::BTreeMap;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use textwire_rpc::transport::Listener;
use textwire_rpc::{Client, RpcError, Server};
use tracing_subscriber::EnvFilter;

/// Two operands.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "PascalCase")]
struct Operands {
    a: i64,
    b: i64,
}

/// Operands folded into a one-entry map.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "PascalCase")]
struct Folded {
    mp: BTreeMap<i64, i64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut server = Server::new();
    server.register("add", |o: Operands| async move { Ok::<_, String>(o.a + o.b) })?;
    server.register("map", |o: Operands| async move {
        Ok::<_, String>(Folded {
            mp: BTreeMap::from([(o.a, o.b)]),
        })
    })?;
    server.register("div", |o: Operands| async move {
        if o.b == 0 {
            return Err("division by zero".to_string());
        }
        Ok(o.a / o.b)
    })?;

    let listener = Listener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?.to_string();
    tokio::spawn(server.serve(listener));

    let client = Client::dial(&address).await?;

    let sum: i64 = client.call("add", &Operands { a: 1, b: 2 }).await?;
    println!("add(1, 2) = {sum}");

    let folded: Folded = client.call("map", &Operands { a: 1, b: 2 }).await?;
    println!("map(1, 2) = {:?}", folded.mp);

    // Fire several calls at once; each gets its own reply.
    let calls = (0..5).map(|i| {
        let client = client.clone();
        async move { client.call::<_, i64>("add", &Operands { a: i, b: i }).await }
    });
    for (i, result) in join_all(calls).await.into_iter().enumerate() {
        println!("add({i}, {i}) = {}", result?);
    }

    match client.call::<_, i64>("div", &Operands { a: 1, b: 0 }).await {
        Err(RpcError::Application(text)) => println!("div(1, 0) failed: {text}"),
        other => println!("div(1, 0) unexpectedly returned {other:?}"),
    }

    client.close()?;
    Ok(())
}
