//! Keyglow Daemon CLI
//!
//! Maps system telemetry signals onto per-key keyboard lighting.

use clap::Parser;
use keyglow_hal::NullOpener;
use tracing::info;

use keyglow::{
    AnimationMapper, Engine, EngineEvent, EventChannel, MappingLibrary, ProfileLayer,
    SettingsStore, SignalBus,
};

// CLI definitions
mod cli;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("keyglow=info".parse()?),
        )
        .init();

    let config_dir = cli.config_dir.unwrap_or_else(SettingsStore::config_dir);
    let settings = SettingsStore::open(config_dir.clone())?;
    let library = MappingLibrary::load_default(&config_dir)?;

    match cli.command {
        None | Some(Commands::Serve) => serve(settings, library).await?,

        Some(Commands::Signals) => {
            let channel = EventChannel::new();
            let mut bus = SignalBus::new(channel.sender());
            bus.register_plugin(keyglow::signal::providers::built_in_plugin());
            let enabled = &settings.settings().signals;
            for signal in bus.signals() {
                let marker = if enabled.contains(&signal.name) { "*" } else { " " };
                let description = signal.description.as_deref().unwrap_or("");
                println!("{marker} {:24} {description}", signal.name);
            }
        }

        Some(Commands::Profiles) => {
            let layer = ProfileLayer::load(
                settings.profiles_dir(),
                &settings.settings().profile,
                &settings.settings().layout,
            );
            let active = layer.active().id.clone();
            for profile in layer.profiles() {
                let marker = if profile.id == active { "*" } else { " " };
                println!("{marker} {:18} {}", profile.id, profile.name);
            }
        }

        Some(Commands::Mappings) => {
            for mapping in &library.mappings {
                let layouts: Vec<&str> = mapping.layouts.keys().map(String::as_str).collect();
                println!(
                    "{:24} [{}, {}] {} range(s), layouts: {}",
                    mapping.signal,
                    mapping.min,
                    mapping.max,
                    mapping.ranges.len(),
                    layouts.join(", ")
                );
            }
        }

        Some(Commands::Info) => {
            println!("config dir:      {}", config_dir.display());
            println!("active profile:  {}", settings.settings().profile);
            println!("layout:          {}", settings.settings().layout);
            println!("enabled signals: {}", settings.settings().signals.join(", "));
        }
    }

    Ok(())
}

async fn serve(settings: SettingsStore, library: MappingLibrary) -> anyhow::Result<()> {
    let mut channel = EventChannel::new();
    let events = channel.sender();

    let ctrlc_events = events.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_events.send(EngineEvent::Shutdown);
    })?;

    let mapper = AnimationMapper::new(library);
    let mut engine = Engine::new(settings, mapper, Box::new(NullOpener), events.clone());

    // The virtual backend is always present; hardware backends would feed
    // real hotplug events here instead.
    let _ = events.send(EngineEvent::DeviceAttached);

    info!("keyglow running, ctrl-c to stop");
    engine.run(&mut channel).await;

    Ok(())
}
