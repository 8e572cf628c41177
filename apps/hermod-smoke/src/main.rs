use std::env;

use hermod_client::{
    Api, ApiConfig, LoginCredentials, ReqwestTransport, SyncConfig, SyncEngine,
};

mod logging;

#[tokio::main]
async fn main() {
    logging::init();

    let homeserver =
        env::var("HERMOD_HOMESERVER").unwrap_or_else(|_| "https://matrix.example.org".to_owned());

    let transport = match ReqwestTransport::new() {
        Ok(transport) => transport,
        Err(err) => {
            eprintln!("Failed to build HTTP client: {err}");
            std::process::exit(1);
        }
    };
    let api = match Api::new(transport, &homeserver, ApiConfig::default()) {
        Ok(api) => api,
        Err(err) => {
            eprintln!("Failed to configure client: {err}");
            std::process::exit(1);
        }
    };
    let mut engine = SyncEngine::new(api, SyncConfig::default());

    let (user_id, password) = match (env::var("HERMOD_USER"), env::var("HERMOD_PASSWORD")) {
        (Ok(user_id), Ok(password)) => (user_id, password),
        _ => {
            println!("Client configured against {homeserver}.");
            println!("Set HERMOD_USER and HERMOD_PASSWORD to run a live smoke.");
            return;
        }
    };

    if let Err(err) = engine
        .login(&LoginCredentials::Password { user_id, password })
        .await
    {
        eprintln!("Login failed: {err}");
        std::process::exit(1);
    }

    if let Err(err) = engine.sync_once().await {
        eprintln!("Initial sync failed: {err}");
        std::process::exit(1);
    }
    println!(
        "Initial sync complete, tracking {} room(s).",
        engine.rooms().len()
    );

    if let Ok(target) = env::var("HERMOD_ROOM") {
        match engine.send_text(&target, "hermod smoke check").await {
            Ok(response) => println!("Sent smoke message: {}", response["event_id"]),
            Err(err) => eprintln!("Send failed: {err}"),
        }
    }

    if let Err(err) = engine.logout().await {
        eprintln!("Logout failed: {err}");
    }
}
