//! TCP client example demonstrating the runtime over a real socket.
//!
//! This example shows:
//! - Connecting to a host listener with the handshake secret
//! - Registering a `Custom` method handler the host can call
//! - Making an outbound `Transform` call and reading the response
//!
//! Start a compatible host listener on 127.0.0.1:9000 first, then run
//! with `cargo run --example tcp_client --features ...` (adjust to
//! whatever feature set your workspace wires this crate under).

use std::sync::Arc;

use tether::context::RequestContext;
use tether::envelope::Method;
use tether::error::RuntimeError;
use tether::{Runtime, RuntimeConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RuntimeConfig::new("127.0.0.1:9000", 0);
    println!("Connecting to {}...", config.service_addr);

    let runtime = Arc::new(Runtime::connect(config).await?);
    println!("Connected!");

    runtime
        .registry()
        .register_method("echo", false, |ctx: RequestContext| async move {
            Ok::<_, RuntimeError>(ctx.params)
        })?;

    let run_handle = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.run().await })
    };

    println!("\nCalling Transform...");
    match runtime.exec_request(Method::Transform, b"hello from the workload".to_vec()).await {
        Ok(payload) => println!("  Result: {}", String::from_utf8_lossy(&payload)),
        Err(e) => eprintln!("  Transform call failed: {e}"),
    }

    runtime.stop();
    run_handle.await??;
    println!("\nDone!");

    Ok(())
}
