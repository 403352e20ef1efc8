//! Credentials command: exchange the device certificate for temporary keys.

use super::{CommandResult, ConnectArgs, OutputFormat};
use serde::Serialize;
use std::time::Duration;
use thingshadow_credentials::{CredentialsConfig, CredentialsProvider};

/// Printed credentials. The secret is only shown when asked for.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsOutput<'a> {
    access_key_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_access_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_token: Option<&'a str>,
    expiration: &'a str,
}

/// Runs the credentials command.
pub async fn run(
    connect: &ConnectArgs,
    url: &str,
    show_secrets: bool,
    format: OutputFormat,
) -> CommandResult {
    let thing = connect.thing_name()?;
    let (cert, key) = connect.identity()?;

    let mut config = CredentialsConfig::new(url, thing, cert, key)
        .with_timeout(Duration::from_secs(connect.timeout.max(1)));
    if let Some(ca) = &connect.ca {
        config = config.with_ca(ca);
    }

    let provider = CredentialsProvider::new(&config)?;
    let credentials = provider.fetch().await?;

    let output = CredentialsOutput {
        access_key_id: &credentials.access_key_id,
        secret_access_key: show_secrets.then_some(credentials.secret_access_key.as_str()),
        session_token: show_secrets.then_some(credentials.session_token.as_str()),
        expiration: &credentials.expiration,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Raw => {
            println!("Access key:  {}", output.access_key_id);
            if let Some(secret) = output.secret_access_key {
                println!("Secret key:  {secret}");
            }
            if let Some(token) = output.session_token {
                println!("Token:       {token}");
            }
            println!("Expiration:  {}", output.expiration);
        }
    }

    Ok(())
}
