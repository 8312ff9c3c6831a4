//! eventstream-listen: direct queue tap
//!
//! Listens on a point-to-point queue and logs every message it receives.
//! Useful for checking that `direct_to` senders reach the broker.
//!
//! ## Configuration
//! - EVENTSTREAM_CONFIG / eventstream.yaml / EVENTSTREAM__AMQP__URL: broker settings
//! - EVENTSTREAM_LISTEN_QUEUE: Queue to listen on (default: eventstream.listen)
//! - EVENTSTREAM_LOG: Log filter (default: info)

use tracing::info;

use eventstream::codec::DirectMessage;
use eventstream::config::Config;
use eventstream::error::HandlerError;
use eventstream::utils::bootstrap::init_tracing;
use eventstream::EventStream;

const QUEUE_ENV_VAR: &str = "EVENTSTREAM_LISTEN_QUEUE";
const DEFAULT_QUEUE: &str = "eventstream.listen";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    let queue = std::env::var(QUEUE_ENV_VAR).unwrap_or_else(|_| DEFAULT_QUEUE.to_string());

    let stream = EventStream::from_config(&config);
    stream
        .listen_to(&queue, |message: DirectMessage| async move {
            info!(
                queue = %message.queue,
                bytes = message.data.len(),
                body = message.text().unwrap_or("<binary>"),
                "Message received"
            );
            Ok::<(), HandlerError>(())
        })
        .await?;

    info!(queue = %queue, url = %config.amqp.url, "eventstream-listen started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    Ok(())
}
