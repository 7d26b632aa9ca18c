use std::time::Duration;

use tokio::time::Instant;

/// Lifecycle of a lazily-started source (a pull source with
/// `sourceOnDemand`, or a `runOnDemand` publisher command).
///
/// `Initial -> WaitingReady` on first interest, `WaitingReady -> Ready` when
/// the source declares media, `Ready -> Closing` while nothing is attached,
/// `Closing -> Initial` when the close timer fires. Re-attachment while
/// `Closing` disarms the timer in the same transition, so a fresh request
/// can never race an expiring timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OnDemandState {
    Initial,
    WaitingReady,
    Ready,
    Closing,
}

pub(crate) struct OnDemand {
    state: OnDemandState,
    start_timeout: Duration,
    close_after: Duration,
    start_deadline: Option<Instant>,
    close_deadline: Option<Instant>,
}

impl OnDemand {
    pub fn new(start_timeout: Duration, close_after: Duration) -> Self {
        OnDemand {
            state: OnDemandState::Initial,
            start_timeout,
            close_after,
            start_deadline: None,
            close_deadline: None,
        }
    }

    pub fn state(&self) -> OnDemandState {
        self.state
    }

    pub fn start_deadline(&self) -> Option<Instant> {
        self.start_deadline
    }

    pub fn close_deadline(&self) -> Option<Instant> {
        self.close_deadline
    }

    /// Returns true when the caller must actually start the source (first
    /// interest only).
    pub fn start(&mut self) -> bool {
        match self.state {
            OnDemandState::Initial => {
                self.state = OnDemandState::WaitingReady;
                self.start_deadline = Some(Instant::now() + self.start_timeout);
                true
            }
            _ => false,
        }
    }

    pub fn set_ready(&mut self, have_readers: bool) {
        self.start_deadline = None;
        if have_readers {
            self.state = OnDemandState::Ready;
            self.close_deadline = None;
        } else {
            self.state = OnDemandState::Closing;
            self.close_deadline = Some(Instant::now() + self.close_after);
        }
    }

    pub fn reader_attached(&mut self) {
        if matches!(self.state, OnDemandState::Ready | OnDemandState::Closing) {
            self.state = OnDemandState::Ready;
            self.close_deadline = None;
        }
    }

    pub fn readers_gone(&mut self) {
        if self.state == OnDemandState::Ready {
            self.state = OnDemandState::Closing;
            self.close_deadline = Some(Instant::now() + self.close_after);
        }
    }

    /// Start timeout or close timeout fired, or the source failed: back to
    /// square one. The caller stops the source.
    pub fn reset(&mut self) {
        self.state = OnDemandState::Initial;
        self.start_deadline = None;
        self.close_deadline = None;
    }
}
