mod app;
mod config;
mod world;

use anyhow::Result;
use clap::Parser;

use app::HostApp;
use config::HostConfig;

#[derive(Parser)]
#[command(name = "tether-host")]
#[command(about = "Hosts or joins a replicated session of bouncing bodies")]
struct Args {
    #[arg(short, long, help = "Join the host at this address instead of hosting")]
    join: Option<String>,

    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = tether::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = tether::DEFAULT_MAX_CLIENTS)]
    max_clients: usize,

    #[arg(short, long, default_value_t = tether::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 8, help = "Bodies simulated by this process")]
    entities: usize,

    #[arg(short, long, help = "Exit after this many seconds")]
    duration: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = HostConfig {
        bind: args.bind,
        port: args.port,
        join: args.join,
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        entities: args.entities,
        duration_secs: args.duration,
        ..Default::default()
    };

    let mut app = HostApp::new(config)?;
    app.run();

    Ok(())
}
