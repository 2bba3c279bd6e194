use anyhow::{Error, Result};
use notification_pipeline::{app, config::Config, logging};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;

    logging::init(config.log_format);

    app::run(config).await
}
