use clap::{Parser, Subcommand};
use idaas_session::{
    store::FileStore, Credentials, SessionConfig, SessionManager, SsoIdentifier,
};

#[derive(Debug, Parser)]
struct Opts {
    /// The directory holding the persisted session
    #[arg(short = 'd', long, env, default_value = ".")]
    credentials_dir: std::path::PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in with a password
    Login {
        /// Identify by email address
        #[arg(long, conflicts_with = "username", required_unless_present = "username")]
        email: Option<String>,
        /// Identify by username
        #[arg(long)]
        username: Option<String>,
        /// The user's password
        #[arg(long, env = "IDAAS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Fetch a captcha and request a sign-on code by email
    Sso {
        /// Where to send the code
        email: String,
        /// The answer to a previously shown captcha
        #[arg(long)]
        captcha_code: Option<String>,
    },
    /// Report whether the stored session is usable
    Status,
    /// Print the signed-in user's profile
    User {
        /// Skip the cached copy
        #[arg(long)]
        refresh: bool,
    },
    /// End the session
    Logout,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let config = SessionConfig::from_env()?;

    let store = FileStore::in_directory(&opts.credentials_dir, &config.namespace);
    let manager = SessionManager::connect(&config, store)?.with_deauth_handler(|reason| {
        tracing::warn!(?reason, "session is no longer usable; log in again");
    });
    manager.init().await?;

    match opts.command {
        Command::Login {
            email,
            username,
            password,
        } => {
            let credentials = match (email, username) {
                (Some(email), _) => Credentials::with_email(email, password),
                (None, Some(username)) => Credentials::with_username(username, password),
                (None, None) => color_eyre::eyre::bail!("an email or username is required"),
            };
            if !manager.login(&credentials).await {
                color_eyre::eyre::bail!("login failed");
            }
            println!("logged in");
        }
        Command::Sso {
            email,
            captcha_code,
        } => match captcha_code {
            None => {
                let captcha = manager
                    .obtain_captcha()
                    .await
                    .ok_or_else(|| color_eyre::eyre::eyre!("unable to obtain captcha"))?;
                println!("{}", serde_json::to_string_pretty(&captcha.challenge)?);
                println!("captcha token: {}", captcha.token);
            }
            Some(code) => {
                if let Ok(token) = std::env::var("IDAAS_CAPTCHA_TOKEN") {
                    manager.set_captcha_token(token.into()).await;
                }
                let status = manager
                    .start_sso(&code, &SsoIdentifier::Email(email))
                    .await;
                println!("{:?}", status);
            }
        },
        Command::Status => {
            let authenticated = manager.is_authenticated().await;
            println!(
                "{}",
                if authenticated {
                    "authenticated"
                } else {
                    "not authenticated"
                }
            );
        }
        Command::User { refresh } => match manager.fetch_user(refresh).await {
            Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
            None => color_eyre::eyre::bail!("no user profile available"),
        },
        Command::Logout => {
            if manager.logout().await {
                println!("logged out");
            } else {
                println!("no session");
            }
        }
    }

    Ok(())
}
