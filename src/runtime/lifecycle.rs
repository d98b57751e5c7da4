use anyhow::Result;
use tokio::{select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// App visibility transitions forwarded to the track reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Foreground,
    Background,
}

/// Cancels the token on Ctrl-C. Returns early if something else cancels it first.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => (),
    };
}

/// Maps `SIGUSR1` to [Lifecycle::Background] and `SIGUSR2` to [Lifecycle::Foreground], which
/// is how a shell process tells the runtime about visibility changes.
#[cfg(unix)]
pub async fn detect_lifecycle(
    sender: mpsc::Sender<Lifecycle>,
    cancelation: CancellationToken,
) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::debug;

    let mut background = signal(SignalKind::user_defined1())?;
    let mut foreground = signal(SignalKind::user_defined2())?;
    loop {
        let event = select! {
            _ = cancelation.cancelled() => return Ok(()),
            _ = background.recv() => Lifecycle::Background,
            _ = foreground.recv() => Lifecycle::Foreground,
        };
        debug!("Lifecycle signal {event:?}");
        if sender.send(event).await.is_err() {
            return Ok(());
        }
    }
}

/// There are no user signals to listen to here, lifecycle changes only come from callers
/// holding a sender.
#[cfg(not(unix))]
pub async fn detect_lifecycle(
    sender: mpsc::Sender<Lifecycle>,
    cancelation: CancellationToken,
) -> Result<()> {
    cancelation.cancelled().await;
    drop(sender);
    Ok(())
}
