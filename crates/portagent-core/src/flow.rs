//! Producer flow control.
//!
//! Upstream sources that can outrun a slow driver (datalog replayers,
//! off-reactor readers) register with the router as producers. When a
//! driver's outbound queue crosses the high watermark the router pauses
//! every producer; once drained it resumes them. Shutdown stops them for
//! good.

use tokio::sync::watch;

/// Capability interface the router invokes on registered upstreams.
pub trait Producer: Send + Sync {
    /// Stop emitting until resumed.
    fn pause(&self);
    /// Continue emitting.
    fn resume(&self);
    /// Stop emitting permanently.
    fn stop(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Running,
    Paused,
    Stopped,
}

/// Watch-channel implementation of [`Producer`].
///
/// The producing task polls its [`FlowSignal`] between units of work and
/// parks while paused.
#[derive(Debug)]
pub struct FlowGate {
    state: watch::Sender<GateState>,
}

impl Default for FlowGate {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowGate {
    /// Create a gate in the running state.
    pub fn new() -> Self {
        Self { state: watch::Sender::new(GateState::Running) }
    }

    /// Signal handle for the producing task.
    pub fn subscribe(&self) -> FlowSignal {
        FlowSignal { rx: self.state.subscribe() }
    }
}

impl Producer for FlowGate {
    fn pause(&self) {
        self.state.send_if_modified(|state| {
            if *state == GateState::Running {
                *state = GateState::Paused;
                return true;
            }
            false
        });
    }

    fn resume(&self) {
        self.state.send_if_modified(|state| {
            if *state == GateState::Paused {
                *state = GateState::Running;
                return true;
            }
            false
        });
    }

    fn stop(&self) {
        self.state.send_replace(GateState::Stopped);
    }
}

/// Consumer side of a [`FlowGate`].
#[derive(Debug, Clone)]
pub struct FlowSignal {
    rx: watch::Receiver<GateState>,
}

impl FlowSignal {
    /// Wait until the gate is running.
    ///
    /// Returns `false` once the gate is stopped (or its [`FlowGate`] was
    /// dropped); the producer should exit.
    pub async fn ready(&mut self) -> bool {
        loop {
            let state = *self.rx.borrow_and_update();
            match state {
                GateState::Running => return true,
                GateState::Stopped => return false,
                GateState::Paused => {},
            }
            if self.rx.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Whether the gate has been stopped.
    pub fn stopped(&self) -> bool {
        *self.rx.borrow() == GateState::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_until_paused() {
        let gate = FlowGate::new();
        let mut signal = gate.subscribe();

        assert!(signal.ready().await);

        gate.pause();
        gate.resume();
        assert!(signal.ready().await);
    }

    #[tokio::test]
    async fn pause_parks_the_producer() {
        let gate = FlowGate::new();
        let mut signal = gate.subscribe();
        gate.pause();

        let waiter = tokio::spawn(async move { signal.ready().await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        gate.resume();
        assert!(waiter.await.unwrap_or(false));
    }

    #[tokio::test]
    async fn stop_is_terminal() {
        let gate = FlowGate::new();
        let mut signal = gate.subscribe();

        gate.stop();
        gate.resume();
        assert!(!signal.ready().await);
        assert!(signal.stopped());
    }

    #[tokio::test]
    async fn dropped_gate_reads_as_stopped() {
        let gate = FlowGate::new();
        let mut signal = gate.subscribe();
        gate.pause();
        drop(gate);
        assert!(!signal.ready().await);
    }
}
