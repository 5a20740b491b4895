use clap::{Parser, Subcommand};
use gpvpn::auth::AuthorizationError;
use gpvpn::ipc::ClientError;
use gpvpn::protocol::UNKNOWN_REPLY_MESSAGE;
use gpvpn::{
    ClientOptions, Command, Config, IpcClient, IpcServer, ReturnCode, SessionController,
    VpnDispatcher,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Exit status when the user is not allowed to use the daemon (EX_NOPERM)
const EXIT_NOT_AUTHORIZED: u8 = 77;

#[derive(Parser)]
#[command(name = "gpvpn")]
#[command(about = "Control the GlobalProtect VPN through the gpvpn server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ./gpvpn.toml, then user and system config)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether the VPN connection is active
    #[command(alias = "s")]
    Status,
    /// Authenticate and bring the VPN connection up
    #[command(alias = "c")]
    Connect,
    /// Bring the VPN connection down
    #[command(alias = "d")]
    Disconnect,
    /// Ask the gpvpn server to exit
    #[command(name = "stop_server")]
    StopServer,
    /// Run the gpvpn server in the foreground
    ///
    /// Needs to run as root so it can start gpclient and hand the control
    /// socket to the gpvpn group.
    Server,
    /// Generate default config file
    Init,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so client output stays clean; RUST_LOG overrides
    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let command = match cli.command {
        Commands::Status => Command::Status,
        Commands::Connect => Command::Open,
        Commands::Disconnect => Command::Close,
        Commands::StopServer => Command::Quit,
        Commands::Server => {
            let config = Config::resolve(cli.config.as_deref())?;
            run_server(&config).await?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Init => {
            info!("Generating default config...");
            let path = PathBuf::from(gpvpn::config::LOCAL_CONFIG_FILE);
            Config::default().save(&path)?;
            println!("Created default config: {}", path.display());
            return Ok(ExitCode::SUCCESS);
        }
    };

    let config = Config::resolve(cli.config.as_deref())?;
    Ok(run_client(&config, command).await)
}

async fn run_server(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let controller = SessionController::new(&config.vpn);
    let mut server = IpcServer::new(&config.server, VpnDispatcher::new(controller));
    server.open()?;

    let stop = server.stop_handle();
    ctrlc::set_handler(move || stop.stop())?;

    server.run().await?;
    Ok(())
}

async fn run_client(config: &Config, command: Command) -> ExitCode {
    let options = ClientOptions::from_config(config);

    match IpcClient::send_request(&options, command).await {
        Ok(reply) => {
            println!("{}", reply.return_code.describe(command));
            match reply.return_code {
                ReturnCode::Failed | ReturnCode::CommandNotUnderstood => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            }
        }
        Err(ClientError::Decode(e)) => {
            error!("{}", e);
            println!("{}", UNKNOWN_REPLY_MESSAGE);
            ExitCode::FAILURE
        }
        Err(ClientError::Unauthorized(e)) => {
            match &e {
                AuthorizationError::GroupNotFound(group) => eprintln!(
                    "Group '{}' does not exist, ask your administrator to create it",
                    group
                ),
                _ => eprintln!("{}", e),
            }
            ExitCode::from(EXIT_NOT_AUTHORIZED)
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
