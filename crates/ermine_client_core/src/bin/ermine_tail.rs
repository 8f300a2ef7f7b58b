#![forbid(unsafe_code)]

use ermine_client_core::{ApiConfig, SessionContext, login_with_credentials, login_with_token};
use ermine_domain::ServerId;
use ermine_protocol::ServerEvent;
use ermine_store::{ActiveContext, Selection};
use tokio::sync::broadcast;
use tracing::{info, warn};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: ermine_tail [--api URL] [--token TOKEN | --email EMAIL --password PASSWORD [--totp CODE]] [--server ID]\n\
\n\
Options:\n\
	--api       REST API root (default: https://api.stoat.chat; gateway/CDN discovered from it)\n\
	--token     Existing session token (env fallback: ERMINE_TOKEN)\n\
	--email     Account email for credential login\n\
	--password  Account password for credential login\n\
	--totp      TOTP code when the account has MFA enabled\n\
	--server    Server id to select and subscribe to\n\
	--help      Show this help\n\
\n\
Examples:\n\
	ERMINE_TOKEN=... ermine_tail --server 01H8MECHZX3TBDSZ7XQJD1Y4WR\n\
	ermine_tail --email me@example.com --password hunter2 --totp 123456\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,ermine_client_core=debug".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[derive(Default)]
struct Args {
	api: Option<String>,
	token: Option<String>,
	email: Option<String>,
	password: Option<String>,
	totp: Option<String>,
	server: Option<String>,
}

fn parse_args() -> Args {
	let mut args = Args::default();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--api" => args.api = Some(it.next().unwrap_or_else(|| usage_and_exit())),
			"--token" => args.token = Some(it.next().unwrap_or_else(|| usage_and_exit())),
			"--email" => args.email = Some(it.next().unwrap_or_else(|| usage_and_exit())),
			"--password" => args.password = Some(it.next().unwrap_or_else(|| usage_and_exit())),
			"--totp" => args.totp = Some(it.next().unwrap_or_else(|| usage_and_exit())),
			"--server" => args.server = Some(it.next().unwrap_or_else(|| usage_and_exit())),
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	if args.token.is_none() {
		args.token = std::env::var("ERMINE_TOKEN").ok().and_then(|v| {
			let v = v.trim().to_string();
			(!v.is_empty()).then_some(v)
		});
	}

	args
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let args = parse_args();

	let config = match &args.api {
		Some(api) => ApiConfig::with_api_url(api),
		None => ApiConfig::default(),
	};
	let config = config.discover().await;

	let credentials = match (&args.token, &args.email, &args.password) {
		(Some(token), _, _) => login_with_token(&config, token.clone()).await?,
		(None, Some(email), Some(password)) => {
			login_with_credentials(&config, email, password, args.totp.as_deref()).await?
		}
		_ => {
			eprintln!("Either --token (or ERMINE_TOKEN) or --email/--password is required");
			usage_and_exit();
		}
	};

	info!(user = %credentials.user_id, "logged in");

	let session = SessionContext::start(&config, credentials)?;
	let mut events = session.gateway.subscribe_events();
	let mut status = session.gateway.status();

	if let Some(server) = &args.server {
		let server = ServerId::new(server)?;
		session.select(Selection {
			context: ActiveContext::Server(server),
			channel: None,
		});
	}

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				info!("interrupted");
				break;
			}
			changed = status.changed() => {
				if changed.is_err() {
					break;
				}
				info!(status = ?*status.borrow(), "gateway status");
			}
			event = events.recv() => match event {
				Ok(ServerEvent::Message(message)) => {
					let author = session
						.store
						.user(message.author.user_id())
						.map(|user| user.username)
						.unwrap_or_else(|| message.author.user_id().to_string());
					println!(
						"[{}] {}: {}",
						message.channel,
						author,
						message.content.as_deref().unwrap_or("<attachment>")
					);
				}
				Ok(_) => {}
				Err(broadcast::error::RecvError::Lagged(missed)) => {
					warn!(missed, "event tail lagged");
				}
				Err(broadcast::error::RecvError::Closed) => break,
			}
		}
	}

	session.teardown();
	Ok(())
}
