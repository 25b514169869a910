use chrono::Local;
use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use std::sync::Arc;
use verto_rtc::transport::TlsPolicy;
use verto_rtc::types::Event;
use verto_rtc::{Client, ClientConfig, Credentials, Environment, Params, RequestError};
use vertocore::Method;

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    Production,
    Development,
}

#[derive(Parser)]
#[command(name = "verto_probe")]
#[command(about = "Connects to a Verto signaling endpoint and prints what happens")]
struct Cli {
    #[arg(short, long, value_enum, default_value_t = Target::Development)]
    env: Target,

    /// Overrides the endpoint for `--env`.
    #[arg(long)]
    url: Option<String>,

    #[arg(long, conflicts_with_all = ["user", "password"])]
    token: Option<String>,

    #[arg(long, requires = "password")]
    user: Option<String>,

    #[arg(long, requires = "user")]
    password: Option<String>,

    /// Accept any server certificate. Refused for production.
    #[arg(long)]
    insecure: bool,

    /// Send an `echo` once connected and print the response.
    #[arg(long)]
    echo: bool,
}

impl Cli {
    fn config(&self) -> ClientConfig {
        let environment = match (&self.url, self.env) {
            (Some(url), _) => Environment::Custom(url.clone()),
            (None, Target::Production) => Environment::Production,
            (None, Target::Development) => Environment::Development,
        };
        let mut config = ClientConfig::with_environment(environment);
        if self.insecure {
            config.tls = TlsPolicy::Permissive;
        }
        config.credentials = match (&self.token, &self.user, &self.password) {
            (Some(token), _, _) => Some(Credentials::Token(token.clone())),
            (None, Some(user), Some(password)) => Some(Credentials::SipUser {
                user: user.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        config
    }
}

fn print_event(event: &Event) {
    match event {
        Event::Connected => info!("Connected"),
        Event::Disconnected(reason) => warn!("Disconnected: {reason}"),
        Event::Reconnecting { attempt, delay } => {
            info!("Reconnect attempt {attempt} in {delay:?}")
        }
        Event::ConnectionLost { attempts } => {
            error!("Gave up after {attempts} reconnect attempts")
        }
        Event::SessionEstablished { session_id } => info!("Logged in, session {session_id}"),
        Event::ServerError(e) => warn!("Server error: {e}"),
        other => info!("{other:?}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    info!("Probing {}", config.url());

    let client = Client::with_default_transport(config, Arc::new(print_event))?;
    client.connect()?;

    if cli.echo {
        let client = client.clone();
        tokio::spawn(async move {
            while !client.is_connected() {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
            match client.request(Method::Echo, Params::new()).await {
                Ok(result) => info!("echo -> {result}"),
                Err(RequestError::Protocol(e)) => warn!("echo rejected: {e}"),
                Err(e) => error!("echo failed: {e}"),
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, disconnecting");
    client.disconnect().await;
    Ok(())
}
