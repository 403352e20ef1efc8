//! Commands for custom topics under the thing's shadow namespace.

use super::{read_payload, render, CommandResult, ConnectArgs, OutputFormat};
use std::path::PathBuf;

/// Prints messages on a custom topic.
///
/// Stops after `count` messages when given, otherwise on Ctrl-C.
pub async fn subscribe(
    connect: &ConnectArgs,
    suffix: &str,
    count: Option<usize>,
    format: OutputFormat,
) -> CommandResult {
    let session = connect.connect().await?;
    let mut stream = session.subscribe_to_topic(suffix).await?;
    tracing::info!(filter = stream.filter(), "subscribed");

    let mut received = 0usize;
    while count.map_or(true, |limit| received < limit) {
        tokio::select! {
            message = stream.recv() => match message {
                Some(shadow) => {
                    println!("{}", render(&shadow, format));
                    received += 1;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.disconnect().await?;
    Ok(())
}

/// Publishes a payload to a custom topic.
pub async fn publish(
    connect: &ConnectArgs,
    suffix: &str,
    payload: Option<String>,
    file: Option<PathBuf>,
) -> CommandResult {
    let payload = read_payload(payload, file)?;
    let session = connect.connect().await?;

    session.publish_to_topic(payload, suffix).await?;
    session.disconnect().await?;
    Ok(())
}

/// Removes the broker subscription for a custom topic.
pub async fn unsubscribe(connect: &ConnectArgs, suffix: &str) -> CommandResult {
    let session = connect.connect().await?;

    session.unsubscribe_from_topic(suffix).await?;
    session.disconnect().await?;
    Ok(())
}
