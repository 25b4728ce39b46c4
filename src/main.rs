use anyhow::{bail, Context};
use chat_ragent::core::config::DEFAULT_MODEL_LABEL;
use chat_ragent::{
    capture_page, ChatOptions, Config, Credentials, DefaultBrowser, InteractionRequest,
    InteractionResult, Workflow,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chat-ragent", version, about = "Drive a chat web app from the terminal")]
struct Cli {
    /// JSON config file; missing fields use defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show the browser window
    #[arg(long, global = true)]
    headed: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a message and/or file and print the reply
    Chat(ChatArgs),
    /// Screenshot a page once its network traffic has settled
    Snapshot(SnapshotArgs),
}

#[derive(Args)]
struct ChatArgs {
    #[arg(long)]
    url: String,

    #[arg(long, short)]
    message: Option<String>,

    #[arg(long, short)]
    file: Option<PathBuf>,

    /// Where to save the screenshot
    #[arg(long, default_value = "screenshot.png")]
    save: PathBuf,

    #[arg(long, default_value = DEFAULT_MODEL_LABEL)]
    model: String,

    /// Keep chat history instead of using an ephemeral chat
    #[arg(long)]
    no_ephemeral: bool,

    /// Chat without logging in
    #[arg(long)]
    anonymous: bool,

    #[arg(long, env = "CHAT_EMAIL")]
    email: Option<String>,

    #[arg(long, env = "CHAT_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Args)]
struct SnapshotArgs {
    #[arg(long)]
    url: String,

    #[arg(long, default_value = "page.png")]
    save: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    if cli.headed {
        config.browser.headless = false;
    }

    match cli.command {
        Command::Chat(args) => chat(config, args).await,
        Command::Snapshot(args) => {
            let path = capture_page(&DefaultBrowser::new, &config, &args.url, &args.save)
                .await
                .context("page snapshot failed")?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

async fn chat(mut config: Config, args: ChatArgs) -> anyhow::Result<()> {
    if args.anonymous {
        config.session.require_login = false;
    }

    let options = ChatOptions {
        ephemeral: Some(!args.no_ephemeral),
        model_label: Some(args.model),
    };
    let mut request = InteractionRequest::new(args.url, args.save)
        .with_options(options)
        .with_timeouts(config.timeouts.clone());
    request.message = args.message;
    request.file_path = args.file;

    let mut workflow = Workflow::new(DefaultBrowser::new, config);
    match (args.email, args.password) {
        (Some(email), Some(password)) => {
            workflow = workflow.with_credentials(Credentials::new(email, password));
        }
        (None, None) => {}
        _ => bail!("both --email and --password are needed to log in"),
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; closing the browser");
            on_interrupt.cancel();
        }
    });

    match workflow.run_with_cancel(&request, cancel).await {
        InteractionResult::Completed(reply) => {
            match &reply.artifact {
                Ok(path) => info!(path = %path.display(), "screenshot saved"),
                Err(failure) => warn!(error = %failure, "no screenshot"),
            }
            println!("{}", reply.text);
            Ok(())
        }
        InteractionResult::Failed(failure) => {
            error!(phase = %failure.phase, "interaction failed");
            Err(failure).context("chat interaction failed")
        }
    }
}
