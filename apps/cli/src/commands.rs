//! Subcommand implementations.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use reqwest::Method;
use tracing::{info, warn};

use worldbest_api_client::{ApiClient, AuthApi, ProgressCallback, RequestOptions, UploadFile};
use worldbest_protocol::envelope::MessageType;
use worldbest_realtime::{ConnectionEvent, ConnectionManager};
use worldbest_session::{CredentialStore, FileStore, MemoryStore, Session};

use crate::config::ClientConfig;

/// Events printed by `listen` when none are named.
const DEFAULT_EVENTS: &[MessageType] = &[
    MessageType::CursorUpdate,
    MessageType::SelectionUpdate,
    MessageType::ContentUpdate,
    MessageType::PresenceUpdate,
    MessageType::Notification,
    MessageType::Alert,
    MessageType::SystemMessage,
    MessageType::Error,
];

fn open_session(config: &ClientConfig) -> anyhow::Result<Arc<Session>> {
    let store: Arc<dyn CredentialStore> = match config.credentials_path() {
        Some(path) => Arc::new(
            FileStore::new(path.clone())
                .with_context(|| format!("opening credentials at {}", path.display()))?,
        ),
        None => {
            warn!("no config directory, credentials will not persist");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(Arc::new(Session::new(store)))
}

fn api_client(config: &ClientConfig, session: Arc<Session>) -> anyhow::Result<ApiClient> {
    Ok(ApiClient::builder()
        .base_url(&config.api_url)
        .timeout(config.request_timeout())
        .build(session)?)
}

fn read_password() -> anyhow::Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("password is required");
    }
    Ok(password)
}

pub(crate) async fn login(
    config: &ClientConfig,
    email: &str,
    password: Option<String>,
) -> anyhow::Result<()> {
    let password = match password {
        Some(p) => p,
        None => read_password()?,
    };
    let auth = AuthApi::new(api_client(config, open_session(config)?)?);
    let user = auth.login(email, &password).await?;
    println!("Signed in as {} <{}>", user.display_name, user.email);
    Ok(())
}

pub(crate) async fn logout(config: &ClientConfig) -> anyhow::Result<()> {
    let auth = AuthApi::new(api_client(config, open_session(config)?)?);
    auth.logout().await?;
    println!("Signed out");
    Ok(())
}

pub(crate) async fn whoami(config: &ClientConfig) -> anyhow::Result<()> {
    let auth = AuthApi::new(api_client(config, open_session(config)?)?);
    match auth.restore().await? {
        Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
        None => bail!("not signed in"),
    }
    Ok(())
}

/// Splits `key=value` pairs given on the command line.
fn parse_query(pairs: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("query parameter {pair:?} is not key=value"))
        })
        .collect()
}

pub(crate) async fn request(
    config: &ClientConfig,
    method: &str,
    path: &str,
    data: Option<&str>,
    query: &[String],
) -> anyhow::Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method {method:?}"))?;
    let body: Option<serde_json::Value> = data
        .map(serde_json::from_str)
        .transpose()
        .context("--data must be valid JSON")?;

    let mut options = RequestOptions::default();
    for (k, v) in parse_query(query)? {
        options = options.query(k, v);
    }

    let client = api_client(config, open_session(config)?)?;
    let resp = client.request(method, path, body.as_ref(), options).await?;

    match resp.json::<serde_json::Value>() {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", resp.text()),
    }
    Ok(())
}

pub(crate) async fn upload(config: &ClientConfig, path: &str, file: &Path) -> anyhow::Result<()> {
    let client = api_client(config, open_session(config)?)?;
    let file = UploadFile::from_path(file).await?;
    let on_progress: ProgressCallback = Box::new(|percent| {
        eprint!("\rUploading... {percent:>3}%");
        if percent == 100 {
            eprintln!();
        }
    });

    let resp = client.upload(path, file, Some(on_progress)).await?;
    println!("{}", resp.text());
    Ok(())
}

pub(crate) async fn listen(config: &ClientConfig, events: Vec<String>) -> anyhow::Result<()> {
    let session = open_session(config)?;
    if !session.is_authenticated() {
        bail!("not signed in");
    }

    let manager = ConnectionManager::new(
        config.ws_url.clone(),
        session,
        (&config.reconnect).into(),
    );

    let wanted: Vec<MessageType> = if events.is_empty() {
        DEFAULT_EVENTS.to_vec()
    } else {
        events.into_iter().map(MessageType::from).collect()
    };
    for event in wanted {
        manager.on(event, |msg| match serde_json::to_string(msg) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to encode event"),
        });
    }

    let mut conn_events = manager
        .take_events()
        .await
        .context("connection events already taken")?;
    manager.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, closing connection");
                break;
            }
            event = conn_events.recv() => match event {
                Some(ConnectionEvent::StateChanged(state)) => info!(?state, "connection state"),
                Some(ConnectionEvent::Reconnecting { attempt, next_retry_secs }) => {
                    warn!(attempt, next_retry_secs, "reconnecting");
                }
                Some(ConnectionEvent::ReconnectExhausted { attempts }) => {
                    manager.shutdown();
                    bail!("gave up after {attempts} reconnect attempts");
                }
                Some(ConnectionEvent::AuthRejected) => {
                    manager.shutdown();
                    bail!("server rejected the stored credentials; sign in again");
                }
                Some(ConnectionEvent::ServerClosed { code, reason }) => {
                    manager.shutdown();
                    bail!("server closed the connection (code {code:?}): {reason}");
                }
                None => break,
            },
        }
    }

    manager.shutdown();
    Ok(())
}
