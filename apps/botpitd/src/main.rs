use botpit::{Configs, Server};
use tracing::{info, Level};

mod demo;

#[derive(Clone, Debug)]
struct Args {
    config_path: String,
}

fn usage_and_exit() -> ! {
    eprintln!(
        "botpitd (turn-based game server)\n\n\
USAGE:\n  botpitd [--config PATH]\n\n\
ENV:\n  BOTPIT_CONFIG         default server.conf\n  BOTPIT_CLIENT_TOKENS  comma-separated demo client tokens (default 2 built-ins)\n  BOTPIT_DEMO_TURNS     demo match length in turns (default 50)\n"
    );
    std::process::exit(2);
}

fn parse_args() -> Args {
    let mut config_path =
        std::env::var("BOTPIT_CONFIG").unwrap_or_else(|_| "server.conf".to_string());

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                config_path = it.next().unwrap_or_else(|| usage_and_exit());
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Args { config_path }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,botpit=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args();
    let configs = Configs::load(&args.config_path)?;

    let factory = demo::CountdownFactory::from_env();
    let server = Server::new(configs, Box::new(factory)).await?;
    let addr = server.start().await?;
    info!(%addr, "botpitd ready; waiting for operator commands");

    server.wait_for_exit().await;
    info!("operator requested exit");
    Ok(())
}
