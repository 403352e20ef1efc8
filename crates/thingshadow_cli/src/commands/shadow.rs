//! Shadow document commands: get, update, delete and watch.

use super::{read_payload, render, CommandResult, ConnectArgs, OutputFormat};
use std::path::PathBuf;
use thingshadow_session::{CancelToken, ShadowError};

/// Fetches the shadow document and prints it.
pub async fn get(connect: &ConnectArgs, format: OutputFormat) -> CommandResult {
    let session = connect.connect().await?;
    let cancel = ctrl_c_token();

    let result = session.get_shadow_with(&cancel).await;
    session.disconnect().await?;

    println!("{}", render(&result?, format));
    Ok(())
}

/// Deletes the shadow document and prints the service's answer.
pub async fn delete(connect: &ConnectArgs, format: OutputFormat) -> CommandResult {
    let session = connect.connect().await?;
    let cancel = ctrl_c_token();

    let result = session.delete_shadow_with(&cancel).await;
    session.disconnect().await?;

    println!("{}", render(&result?, format));
    Ok(())
}

/// Publishes an update request.
///
/// With `wait` the command listens on the update response topics and
/// prints whichever answer arrives first.
pub async fn update(
    connect: &ConnectArgs,
    payload: Option<String>,
    file: Option<PathBuf>,
    wait: bool,
    format: OutputFormat,
) -> CommandResult {
    let payload = read_payload(payload, file)?;
    let session = connect.connect().await?;

    if !wait {
        session.update_shadow(payload).await?;
        session.disconnect().await?;
        return Ok(());
    }

    let mut changes = session.subscribe_to_shadow_changes().await?;
    session.update_shadow(payload).await?;

    let answer = tokio::select! {
        accepted = changes.accepted.recv() => accepted.map(Ok),
        rejected = changes.rejected.recv() => rejected.map(Err),
        _ = tokio::signal::ctrl_c() => None,
    };
    session.disconnect().await?;

    match answer {
        Some(Ok(accepted)) => {
            println!("{}", render(&accepted, format));
            Ok(())
        }
        Some(Err(rejected)) => {
            eprintln!("{}", render(&rejected, format));
            Err("update rejected".into())
        }
        None => Err(ShadowError::Cancelled.into()),
    }
}

/// Publishes a document to `update/documents`.
pub async fn update_document(
    connect: &ConnectArgs,
    payload: Option<String>,
    file: Option<PathBuf>,
) -> CommandResult {
    let payload = read_payload(payload, file)?;
    let session = connect.connect().await?;

    session.update_shadow_document(payload).await?;
    session.disconnect().await?;
    Ok(())
}

/// Prints update answers until interrupted.
pub async fn watch(connect: &ConnectArgs, format: OutputFormat) -> CommandResult {
    let session = connect.connect().await?;
    let mut changes = session.subscribe_to_shadow_changes().await?;
    tracing::info!(thing = %session.thing_name(), "watching shadow updates");

    loop {
        tokio::select! {
            accepted = changes.accepted.recv() => match accepted {
                Some(shadow) => println!("accepted: {}", render(&shadow, format)),
                None => break,
            },
            rejected = changes.rejected.recv() => match rejected {
                Some(shadow) => println!("rejected: {}", render(&shadow, format)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.disconnect().await?;
    Ok(())
}

/// A token cancelled by Ctrl-C.
fn ctrl_c_token() -> CancelToken {
    let token = CancelToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}
