//! OS signal delivery for the orchestrator.
//!
//! The orchestrator reads signals from a [`SignalSource`]. [`OsSignals`]
//! listens to process signals; [`ChannelSignals`] lets embedders and tests
//! inject them.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Process signals the orchestrator can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Term,
    Quit,
    Int,
    Hup,
    Usr1,
    Usr2,
}

/// Signals that trigger shutdown unless configured otherwise.
pub const DEFAULT_SIGNALS: [Signal; 3] = [Signal::Term, Signal::Quit, Signal::Int];

impl Signal {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Term => "SIGTERM",
            Self::Quit => "SIGQUIT",
            Self::Int => "SIGINT",
            Self::Hup => "SIGHUP",
            Self::Usr1 => "SIGUSR1",
            Self::Usr2 => "SIGUSR2",
        }
    }

    #[cfg(unix)]
    fn kind(self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;
        match self {
            Self::Term => SignalKind::terminate(),
            Self::Quit => SignalKind::quit(),
            Self::Int => SignalKind::interrupt(),
            Self::Hup => SignalKind::hangup(),
            Self::Usr1 => SignalKind::user_defined1(),
            Self::Usr2 => SignalKind::user_defined2(),
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stream of delivered signals. `None` means no more signals will arrive.
#[async_trait]
pub trait SignalSource: Send + 'static {
    async fn recv(&mut self) -> Option<Signal>;
}

// ---------------------------------------------------------------------------
// OsSignals
// ---------------------------------------------------------------------------

/// Process signal listener. Must be created inside a Tokio runtime.
#[derive(Debug)]
pub struct OsSignals {
    #[cfg(unix)]
    streams: Vec<(Signal, tokio::signal::unix::Signal)>,
    #[cfg(not(unix))]
    interrupt: bool,
}

impl OsSignals {
    /// Installs handlers for `signals`.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler cannot be installed.
    #[cfg(unix)]
    pub fn new(signals: &[Signal]) -> std::io::Result<Self> {
        let mut streams = Vec::with_capacity(signals.len());
        for &signal in signals {
            streams.push((signal, tokio::signal::unix::signal(signal.kind())?));
        }
        Ok(Self { streams })
    }

    /// Only Ctrl-C is observable off unix; it is reported as `SIGINT`.
    ///
    /// # Errors
    ///
    /// Never fails on this platform.
    #[cfg(not(unix))]
    pub fn new(signals: &[Signal]) -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signals.contains(&Signal::Int),
        })
    }

    #[cfg(unix)]
    async fn next(&mut self) -> Option<Signal> {
        if self.streams.is_empty() {
            return None;
        }
        let waits = self.streams.iter_mut().map(|(signal, stream)| {
            let signal = *signal;
            Box::pin(async move { stream.recv().await.map(|()| signal) })
        });
        let (received, _, _) = futures_util::future::select_all(waits).await;
        received
    }

    #[cfg(not(unix))]
    async fn next(&mut self) -> Option<Signal> {
        if !self.interrupt {
            return None;
        }
        tokio::signal::ctrl_c().await.ok().map(|()| Signal::Int)
    }
}

#[async_trait]
impl SignalSource for OsSignals {
    async fn recv(&mut self) -> Option<Signal> {
        self.next().await
    }
}

// ---------------------------------------------------------------------------
// ChannelSignals
// ---------------------------------------------------------------------------

/// Signals injected through a channel.
#[derive(Debug)]
pub struct ChannelSignals(mpsc::UnboundedReceiver<Signal>);

/// Creates an injectable signal source and the sender that feeds it.
#[must_use]
pub fn signal_channel() -> (mpsc::UnboundedSender<Signal>, ChannelSignals) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, ChannelSignals(rx))
}

#[async_trait]
impl SignalSource for ChannelSignals {
    async fn recv(&mut self) -> Option<Signal> {
        self.0.recv().await
    }
}
