//! cableguy - Ethernet interface addressing daemon

mod cli;

use cableguy::config::{self, CableguyConfig};
use cableguy::error::{Error, Result};
use cableguy::manager::Engine;
use cableguy::os::{IpRoute, Platform};
use cableguy::profile::DefaultProfile;
use cableguy::store::{LoadSource, SettingsStore};
use cli::{Cli, Commands};
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if let Some(Commands::Completion { shell }) = cli.command {
        Cli::generate_completion(shell);
        return Ok(());
    }

    let config = config::load_or_default(&cli.config)?;
    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(|| config.settings.path.clone());
    let store = SettingsStore::new(settings_path, config.engine.managed_prefixes.clone());

    match cli.command {
        Some(Commands::Show { json }) => show(&store, cli.default_config, json),
        Some(Commands::Check) => check(&store),
        Some(Commands::Run) | None => daemon(config, store, cli.default_config),
        Some(Commands::Completion { .. }) => Ok(()),
    }
}

/// Print the desired state the daemon would start from
fn show(store: &SettingsStore, profile: DefaultProfile, json: bool) -> Result<()> {
    let (state, source) = store.load_or_default(profile.interfaces());

    if json {
        let out = serde_json::to_string_pretty(&state.to_vec())
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        println!("{}", out);
        return Ok(());
    }

    match &source {
        LoadSource::Settings => println!("Settings: {}", store.path().display()),
        LoadSource::DefaultMissing => println!("Settings: default profile '{}' (no file)", profile),
        LoadSource::DefaultInvalid(reason) => {
            println!("Settings: default profile '{}' ({})", profile, reason)
        }
    }

    for interface in state.iter() {
        println!("{}", interface.name);
        if interface.addresses.is_empty() {
            println!("  (no addresses)");
        }
        for address in &interface.addresses {
            println!("  {}", address);
        }
        if let Some(server) = &interface.dhcp_server {
            println!(
                "  dhcp server: gateway {}, lease {}s",
                server.gateway, server.lease_time_secs
            );
        }
    }

    Ok(())
}

/// Validate the settings file strictly
fn check(store: &SettingsStore) -> Result<()> {
    let state = store.load()?;
    println!(
        "Settings '{}' are valid ({} interfaces)",
        store.path().display(),
        state.len()
    );
    Ok(())
}

/// Run the interface manager until Ctrl+C or SIGTERM
fn daemon(config: CableguyConfig, store: SettingsStore, profile: DefaultProfile) -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        return Err(Error::NotRoot);
    }

    IpRoute::new(config.tools.ip.clone(), config.engine.command_timeout()).check_available()?;

    let (state, source) = store.load_or_default(profile.interfaces());
    if source != LoadSource::Settings {
        info!(profile = %profile, "starting from default profile");
    }

    let platform = Platform::linux(&config);
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let (engine, manager) = Engine::new(state, platform, store, config.engine.clone());
        let engine_task = tokio::spawn(engine.run());

        wait_for_shutdown_signal().await?;
        info!("shutting down");

        let result = manager.shutdown().await;
        let _ = engine_task.await;
        result
    })
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }

    Ok(())
}
