//! Redis Ops - Entry Point
//!
//! Stores a value in Redis and reads it back.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    queuing_redis_ops::run().await
}
