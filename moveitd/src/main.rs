use std::path::PathBuf;

use anyhow::Context;
use moveitd::daemon::DaemonRuntime;
use moveitd::settings::Settings;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run { config: Option<PathBuf> },
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut config = None;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = args.next().context("--config requires a path")?;
                config = Some(PathBuf::from(value));
            }
            "--help" | "-h" => return Ok(CliMode::Help),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(CliMode::Run { config })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("Usage: moveitd [--config <path>]");
            println!("  --config <path>   Settings file (default: appsettings.json)");
            println!();
            println!("Environment overrides: MOVEIT_SETTINGS, MOVEIT_SERVER_URL,");
            println!("  MOVEIT_USERNAME, MOVEIT_PASSWORD, MOVEIT_LOCAL_DIR");
            return Ok(());
        }
        CliMode::Run { config } => {
            config.or_else(|| std::env::var_os("MOVEIT_SETTINGS").map(PathBuf::from))
        }
    };

    let settings = Settings::load(config.as_deref())?;
    let daemon = DaemonRuntime::bootstrap(settings).await?;
    daemon.run().await
}
