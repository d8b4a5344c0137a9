use channel_sync::config;
use log::info;
use rocket::fairing::AdHoc;

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    config::load_environment();
    config::init_logger();

    let state = config::create_app_state().await?;
    let shutdown = state.shutdown.clone();

    let _rocket = channel_sync::build_rocket(state)?
        .attach(AdHoc::on_shutdown("Cancel running sync", |_| {
            Box::pin(async move {
                info!("Shutting down, cancelling any running sync");
                shutdown.cancel();
            })
        }))
        .launch()
        .await?;

    Ok(())
}
