use mediabucket_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    let (_state, router) = mediabucket_api::setup::initialize_app(&config).await?;

    mediabucket_api::setup::server::start_server(&config, router).await?;

    Ok(())
}
