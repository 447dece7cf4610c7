use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::signal;
use totp_rs::{Algorithm, Secret, TOTP};

use cordlink::auth::{AuthClient, Credentials, LoginResult, MfaChallenge, MfaResult};
use cordlink::config::Config;
use cordlink::gateway::events::GatewayEvent;
use cordlink::gateway::GatewaySession;
use cordlink::transport::Transport;

#[derive(Parser)]
#[command(name = "cordlink", version, about = "Chat service client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and print the session token.
    Login {
        /// Account email or phone number. Prompted for when omitted.
        #[arg(long)]
        login: Option<String>,
        /// Base32 TOTP secret used to answer an MFA challenge without prompting.
        #[arg(long)]
        totp_secret: Option<String>,
    },
    /// Connect to the gateway and print events until interrupted.
    Gateway {
        /// Overrides CORDLINK_TOKEN.
        #[arg(long)]
        token: Option<String>,
    },
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::from_env();

    let default_filter = if config.gateway.verbose_logging {
        "cordlink=debug"
    } else {
        "cordlink=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Version => {
            println!("cordlink {} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_SHA"));
            ExitCode::SUCCESS
        }
        Command::Login { login, totp_secret } => {
            print_banner(&config);
            run_login(&config, login, totp_secret).await
        }
        Command::Gateway { token } => {
            print_banner(&config);
            run_gateway(config, token).await
        }
    }
}

fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let sha = env!("GIT_SHA");
    let gateway = config
        .gateway
        .gateway_url
        .as_deref()
        .unwrap_or("discovered via GET /gateway");

    eprintln!();
    eprintln!("  \x1b[1;36mcordlink\x1b[0m \x1b[2mv{version} ({sha})\x1b[0m");
    eprintln!();
    eprintln!("  \x1b[2mapi\x1b[0m          {}", config.api_base);
    eprintln!("  \x1b[2mgateway\x1b[0m      {gateway}");
    eprintln!("  \x1b[2mintents\x1b[0m      {}", config.gateway.intents);

    if config.gateway.verbose_logging {
        eprintln!();
        eprintln!("  \x1b[33m! verbose gateway logging\x1b[0m");
    }

    eprintln!();
}

fn prompt(label: &str) -> io::Result<String> {
    eprint!("{label}: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn totp_code(secret: &str) -> Result<String, String> {
    let bytes = Secret::Encoded(secret.replace(' ', "").to_uppercase())
        .to_bytes()
        .map_err(|e| format!("invalid TOTP secret: {e:?}"))?;
    let totp = TOTP::new_unchecked(Algorithm::SHA1, 6, 1, 30, bytes);
    totp.generate_current()
        .map_err(|e| format!("system clock error: {e}"))
}

async fn answer_challenge(
    challenge: &MfaChallenge,
    totp_secret: Option<&str>,
) -> Result<MfaResult, String> {
    let (protocol, code) = match totp_secret {
        Some(secret) if challenge.offers("totp") => ("totp".to_string(), totp_code(secret)?),
        _ => {
            eprintln!("MFA required; offered: {}", challenge.protocols.join(", "));
            let protocol = prompt("protocol").map_err(|e| e.to_string())?;
            let code = prompt("code").map_err(|e| e.to_string())?;
            (protocol, code)
        }
    };
    challenge
        .complete(&protocol, &code)
        .await
        .map_err(|e| e.to_string())
}

async fn run_login(config: &Config, login: Option<String>, totp_secret: Option<String>) -> ExitCode {
    let login = match login {
        Some(login) => login,
        None => match prompt("login") {
            Ok(login) => login,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        },
    };
    let password = match std::env::var("CORDLINK_PASSWORD") {
        Ok(password) => password,
        Err(_) => match prompt("password") {
            Ok(password) => password,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        },
    };

    let auth = AuthClient::new(Transport::new(&config.api_base));
    let result = match auth.login(Credentials::new(login, password)).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: login request failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let token = match result {
        LoginResult::Authenticated { token } => token,
        LoginResult::MfaRequired(challenge) => {
            match answer_challenge(&challenge, totp_secret.as_deref()).await {
                Ok(MfaResult::Completed { token }) => token,
                Ok(MfaResult::Rejected(e)) => {
                    eprintln!("error: {e}");
                    return ExitCode::FAILURE;
                }
                Ok(MfaResult::Failure(resp)) => {
                    eprintln!("error: MFA failed with status {}", resp.status);
                    return ExitCode::FAILURE;
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        LoginResult::Failure(resp) => {
            eprintln!("error: login failed with status {}", resp.status);
            return ExitCode::FAILURE;
        }
    };

    println!("{token}");
    ExitCode::SUCCESS
}

async fn run_gateway(config: Config, token: Option<String>) -> ExitCode {
    let Some(token) = token.or(config.token) else {
        eprintln!("error: no token; pass --token or set CORDLINK_TOKEN");
        return ExitCode::FAILURE;
    };

    let transport = Transport::new(&config.api_base).with_token(&token);
    let mut session = GatewaySession::new(config.gateway, transport);
    let mut events = session.subscribe();

    if let Err(e) = session.connect(token).await {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Ok(GatewayEvent::Dispatch { name, sequence, data }) => {
                    println!("{name} {} {data}", sequence.map(|s| s.to_string()).unwrap_or_default());
                }
                Ok(event) => println!("{event:?}"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("dropped {n} gateway events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    session.disconnect().await;
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
