//! Termination signal listener
//!
//! One background task turns SIGINT, SIGTERM and SIGHUP into messages for
//! the supervisor loop. It never touches the child handles.

use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::debug;

/// Install the handlers and return the receiving end
///
/// Must be called from within a Tokio runtime.
pub fn listen() -> std::io::Result<mpsc::Receiver<Signal>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let (tx, rx) = mpsc::channel(8);

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = interrupt.recv() => Signal::SIGINT,
                Some(()) = terminate.recv() => Signal::SIGTERM,
                Some(()) = hangup.recv() => Signal::SIGHUP,
                else => break,
            };
            debug!("Caught {}", received);
            if tx.send(received).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}
