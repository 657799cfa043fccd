use clap::Parser;
use server::network::Server;
use std::time::Duration;

/// Authoritative UDP server for the multiplayer snake game.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Simulation ticks per second
    #[clap(short, long, default_value = "10")]
    tick_rate: u32,
    /// Concurrent player slots; later joiners wait in the queue
    #[clap(short, long, default_value = "3")]
    max_players: usize,
    /// Seconds of inactivity before a session is evicted
    #[clap(short, long, default_value = "20")]
    afk_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let tick_rate = args.tick_rate.max(1);

    let mut server = Server::new(
        &address,
        Duration::from_secs_f64(1.0 / f64::from(tick_rate)),
        args.max_players,
        Duration::from_secs(args.afk_timeout),
    )
    .await?;

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    }
}
