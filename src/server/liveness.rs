//! Per-session liveness check.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::protocol::DisconnectReason;
use crate::server::session::Session;

/// Watch the session's poll arrivals and end it once they stop for longer
/// than the configured threshold.
///
/// The clock runs from creation, so a session whose handshake never
/// arrives is reaped too. A connected session is disconnected with
/// `ConnectionLost`; one that never completed the handshake is destroyed
/// without a notice, since nobody is polling for it.
///
/// The task holds only a weak reference; it ends when the session is
/// dropped, destroyed, or declared lost. Thresholds are re-read on every
/// check, so a config reload applies from the next tick. Returns `None`
/// outside a tokio runtime.
pub(crate) fn spawn(session: &Arc<Session>) -> Option<JoinHandle<()>> {
    let runtime = Handle::try_current().ok()?;
    let weak = Arc::downgrade(session);
    let period = session
        .core()
        .map(|core| core.settings.load().liveness_check_period())
        .unwrap_or(std::time::Duration::from_millis(200));

    Some(runtime.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;

            let Some(session) = weak.upgrade() else { break };
            if session.is_destroyed() {
                break;
            }
            let Some(core) = session.core() else { break };
            let Some(threshold) = core.settings.load().liveness_threshold() else {
                continue;
            };
            let silence = session.since_last_poll();
            if silence <= threshold || session.is_disconnecting() {
                continue;
            }

            if !session.is_connected() {
                tracing::debug!(
                    session_id = %session.id(),
                    silence_ms = silence.as_millis() as u64,
                    "Handshake never completed; dropping session"
                );
                session.destroy();
                break;
            }

            tracing::warn!(
                session_id = %session.id(),
                silence_ms = silence.as_millis() as u64,
                threshold_ms = threshold.as_millis() as u64,
                "Session stopped polling; disconnecting"
            );
            // Disconnecting aborts this task, so it runs on its own.
            tokio::spawn(async move {
                session.disconnect(DisconnectReason::ConnectionLost).await;
            });
            break;
        }
    }))
}
