//! Job Creator - Entry Point
//!
//! Enqueues a push notification job and processes it.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    queuing_job_creator::run().await
}
