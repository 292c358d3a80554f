pub mod config;
pub mod error;
pub mod model;
pub mod retry;
pub mod stats;

pub use error::{ErrorKind, KgError, KgResult};
pub use retry::{retry_with_backoff, RetryPolicy};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
