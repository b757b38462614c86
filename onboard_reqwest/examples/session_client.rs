use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use onboard_reqwest::{ClientConfig, SessionClient, TracingReporter};
use onboard_tokens::{
    store::FileStore, AccessToken, CredentialStore, RefreshToken, SessionExpired,
};

#[derive(Debug, Parser)]
struct Opts {
    /// The backend's base URL
    #[arg(short, long, env)]
    base_url: reqwest::Url,

    /// Path prefix placed before every request path
    #[arg(short, long, env, default_value = "api")]
    path_prefix: String,

    /// An access token to start the session with
    #[arg(long, env, hide_env_values = true)]
    access_token: Option<AccessToken>,

    /// A refresh token to start the session with
    #[arg(long, env, hide_env_values = true)]
    refresh_token: Option<RefreshToken>,

    /// The local file used to persist credentials
    #[arg(short = 'f', long, env, default_value = ".credentials.json")]
    credentials_file: PathBuf,

    /// The paths to request
    #[arg(default_value = "users/me/")]
    paths: Vec<String>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let config = ClientConfig::new(opts.base_url).with_path_prefix(opts.path_prefix);
    let store = CredentialStore::new(FileStore::new(opts.credentials_file))
        .with_keys(config.storage_keys.clone());

    let client = SessionClient::builder(config)
        .with_store(store)
        .with_reporter(Arc::new(TracingReporter))
        .build()?;

    if let (Some(access), Some(refresh)) = (&opts.access_token, &opts.refresh_token) {
        client.login(access, refresh, None).await?;
    }

    let requests = opts.paths.iter().map(|path| {
        let req = client.get(path);
        async move { (path, req.send().await) }
    });

    for (path, result) in futures::future::join_all(requests).await {
        match result {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await?;
                tracing::info!(path = %path, %status, body = %body, "request completed");
            }
            Err(reqwest_middleware::Error::Middleware(err))
                if err.downcast_ref::<SessionExpired>().is_some() =>
            {
                tracing::warn!(path = %path, "session expired, log in again");
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}
