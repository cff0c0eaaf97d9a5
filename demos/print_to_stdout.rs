use keymaster::{find_keyboards, Config, KeyMaster, KeymasterError, Listener};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), KeymasterError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let keymaster = KeyMaster::new(Config::default())?;
    keymaster.start()?;
    keymaster.register_listener(&Listener::new(|ev| match ev.to_key_event() {
        Ok(key) => println!("{ev} -> {:?} {}", key.action, key.code),
        Err(_) => println!("{ev}"),
    }));

    for keyboard in find_keyboards()? {
        info!("registering {:?} ({})", keyboard.name(), keyboard.sysfs());
        keymaster.monitor_device(&keyboard)?;
    }

    info!("capturing for 10 seconds");
    tokio::time::sleep(Duration::from_secs(10)).await;

    keymaster.stop().await
}
