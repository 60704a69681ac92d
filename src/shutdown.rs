use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Wire SIGTERM and SIGINT to a `CancellationToken` for the tick loop.
///
/// Stopping the daemon must not kill the jobs: running units belong to
/// systemd, keep executing after we exit, and are re-adopted (or finalized
/// as orphans) by the recovery pass on the next start. So the first signal
/// only asks the loop to finish its current tick. A second signal while
/// draining exits immediately.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        tracing::info!(signal = name, "draining scheduler; running jobs stay under their units");
        token_clone.cancel();

        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        };
        tracing::warn!("second signal received, exiting now");
        std::process::exit(130);
    });

    token
}
