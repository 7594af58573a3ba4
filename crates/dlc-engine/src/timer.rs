//! # OS Timer Boundary
//!
//! The scheduler arms one-shot timers through [`OsTimer`]. A fired timer
//! delivers its [`WakeToken`] to the embedding application, which hands it
//! back to [`crate::DeviceLockEngine::on_wake`].
//!
//! [`TokioTimer`] is an in-process implementation. It cannot wake a dead
//! process; after a restart the scheduler re-arms every persisted timer
//! from its stored target instead.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use dlc_state::TimerKind;

use crate::error::TimerError;

/// Opaque identity of an armed timer. One per timer kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WakeToken(pub TimerKind);

impl WakeToken {
    /// The timer kind this token wakes.
    pub fn kind(&self) -> TimerKind {
        self.0
    }
}

impl std::fmt::Display for WakeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dlc.wake.{}", self.0)
    }
}

impl From<TimerKind> for WakeToken {
    fn from(kind: TimerKind) -> Self {
        Self(kind)
    }
}

/// One-shot wake timers. Arming a token that is already armed replaces it.
#[async_trait]
pub trait OsTimer: Send + Sync {
    /// Fire `token` after `delay`.
    async fn arm_one_shot(&self, delay: Duration, token: WakeToken) -> Result<(), TimerError>;
}

/// In-process timer backed by `tokio::time::sleep`.
///
/// Fired tokens are sent to the channel returned by [`TokioTimer::new`].
#[derive(Debug)]
pub struct TokioTimer {
    sender: mpsc::UnboundedSender<WakeToken>,
    armed: Mutex<HashMap<WakeToken, JoinHandle<()>>>,
}

impl TokioTimer {
    /// Create a timer and the receiver its wake tokens arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WakeToken>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                armed: Mutex::new(HashMap::new()),
            },
            receiver,
        )
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        for (_, handle) in self.armed.lock().drain() {
            handle.abort();
        }
    }
}

#[async_trait]
impl OsTimer for TokioTimer {
    async fn arm_one_shot(&self, delay: Duration, token: WakeToken) -> Result<(), TimerError> {
        if self.sender.is_closed() {
            return Err(TimerError {
                token: token.to_string(),
                reason: "wake receiver dropped".to_string(),
            });
        }
        let sender = self.sender.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(token).is_err() {
                tracing::warn!(%token, "timer fired after wake receiver was dropped");
            }
        });
        if let Some(previous) = self.armed.lock().insert(token, handle) {
            previous.abort();
        }
        tracing::debug!(%token, delay_ms = delay.as_millis() as u64, "timer armed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_token_after_delay() {
        let (timer, mut rx) = TokioTimer::new();
        timer
            .arm_one_shot(Duration::from_millis(5), TimerKind::RetryCheckIn.into())
            .await
            .unwrap();
        let fired = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(fired, Some(WakeToken(TimerKind::RetryCheckIn)));
    }

    #[tokio::test]
    async fn rearming_replaces_previous_timer() {
        let (timer, mut rx) = TokioTimer::new();
        let token = WakeToken(TimerKind::ResetDevice);
        timer.arm_one_shot(Duration::from_millis(5), token).await.unwrap();
        timer.arm_one_shot(Duration::from_secs(60), token).await.unwrap();
        let fired = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(fired.is_err(), "replaced timer must not fire");
    }

    #[tokio::test]
    async fn arming_without_receiver_fails() {
        let (timer, rx) = TokioTimer::new();
        drop(rx);
        assert!(timer
            .arm_one_shot(Duration::from_millis(1), TimerKind::ResumeProvision.into())
            .await
            .is_err());
    }

    #[test]
    fn token_display() {
        assert_eq!(
            WakeToken(TimerKind::NextProvisionFailedStep).to_string(),
            "dlc.wake.next_provision_failed_step"
        );
    }
}
