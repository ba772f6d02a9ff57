use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::oneshot;

pub const TERMINATION_SIGNALS: [libc::c_int; 4] =
    [libc::SIGINT, libc::SIGTERM, libc::SIGQUIT, libc::SIGHUP];

/// Resolves with the number of the first received signal.
///
/// The receiver errors if none of the handlers could be installed.
pub fn any_signal<I>(signals: I) -> oneshot::Receiver<libc::c_int>
where
    I: IntoIterator<Item = libc::c_int>,
{
    let (tx, rx) = oneshot::channel();

    let mut handlers = Vec::new();
    for signum in signals {
        match signal(SignalKind::from_raw(signum)) {
            Ok(handler) => handlers.push((signum, handler)),
            Err(e) => tracing::warn!(signum, "failed to install signal handler: {e}"),
        }
    }

    if handlers.is_empty() {
        return rx;
    }

    tokio::spawn(async move {
        let futures = handlers.iter_mut().map(|(signum, handler)| {
            let signum = *signum;
            Box::pin(async move {
                handler.recv().await;
                signum
            })
        });

        let (signum, ..) = futures_util::future::select_all(futures).await;
        tx.send(signum).ok();
    });

    rx
}
