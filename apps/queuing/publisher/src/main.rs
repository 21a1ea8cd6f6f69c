//! Publisher - Entry Point
//!
//! Publishes the course announcements on `ALX channel`.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    queuing_publisher::run().await
}
