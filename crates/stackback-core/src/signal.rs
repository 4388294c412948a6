//! Process signals that end a run early.

/// Resolve with the name of the first SIGINT, SIGTERM or SIGHUP received.
/// If the handlers cannot be installed this never resolves.
#[cfg(unix)]
pub async fn shutdown_signal() -> String {
    use tokio::signal::unix::{signal, SignalKind};

    let handlers = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    );
    let (mut int, mut term, mut hup) = match handlers {
        (Ok(i), Ok(t), Ok(h)) => (i, t, h),
        _ => {
            tracing::warn!("could not install signal handlers; interrupts will not be handled");
            return std::future::pending().await;
        }
    };
    let name = tokio::select! {
        _ = int.recv() => "SIGINT",
        _ = term.recv() => "SIGTERM",
        _ = hup.recv() => "SIGHUP",
    };
    name.to_string()
}

#[cfg(not(unix))]
pub async fn shutdown_signal() -> String {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("could not install ctrl-c handler; interrupts will not be handled");
        return std::future::pending().await;
    }
    "ctrl-c".to_string()
}
