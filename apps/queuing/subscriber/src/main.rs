//! Subscriber - Entry Point
//!
//! Prints messages from `ALX channel` until told to stop.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    queuing_subscriber::run().await
}
