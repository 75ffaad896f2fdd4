use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};
use super::consts::*;
use super::io;
use super::HandshakeFlags;

/// One of the three reads that make up the fixed newstyle greeting.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy)]
pub enum Step {
    Magic,
    OptionMode,
    Flags,
}
impl Step {
    /// Number of bytes the step pulls off the stream.
    pub fn wire_len(self) -> usize {
        match self {
            Step::Magic | Step::OptionMode => 8,
            Step::Flags => 2,
        }
    }
}
impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Magic => "magic",
            Step::OptionMode => "option mode",
            Step::Flags => "handshake flags",
        };
        f.write_str(s)
    }
}

struct Token<'a>(&'a [u8]);
impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

fn is_cliserv(received: &[u8; 8]) -> bool {
    u64::from_be_bytes(*received) == NBD_CLISERV_MAGIC
}
fn oldstyle_note(received: &[u8; 8]) -> &'static str {
    if is_cliserv(received) {
        " (server speaks oldstyle negotiation)"
    } else {
        ""
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("stream ended before {wanted} bytes of {step} arrived")]
    ShortRead {
        step: Step,
        wanted: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("bad magic: expected \"NBDMAGIC\", got \"{}\"", Token(.received))]
    MagicMismatch { received: [u8; 8] },
    #[error("bad option mode marker: expected \"IHAVEOPT\", got \"{}\"{}", Token(.received), oldstyle_note(.received))]
    OptionModeMismatch { received: [u8; 8] },
    #[error("unsupported handshake flags {:#06x}: required {:#06x}", .flags.bits(), .required.bits())]
    UnsupportedFlags {
        flags: HandshakeFlags,
        required: HandshakeFlags,
    },
    #[error("handshake already failed at {step}")]
    Terminated { step: Step },
}
impl HandshakeError {
    /// The step the handshake failed at.
    pub fn step(&self) -> Step {
        match self {
            HandshakeError::ShortRead { step, .. } => *step,
            HandshakeError::MagicMismatch { .. } => Step::Magic,
            HandshakeError::OptionModeMismatch { .. } => Step::OptionMode,
            HandshakeError::UnsupportedFlags { .. } => Step::Flags,
            HandshakeError::Terminated { step } => *step,
        }
    }
    /// True if the peer sent the oldstyle cliserv magic where IHAVEOPT belongs.
    pub fn is_oldstyle(&self) -> bool {
        match self {
            HandshakeError::OptionModeMismatch { received } => is_cliserv(received),
            _ => false,
        }
    }
}

#[derive(Debug, Hash, Eq, PartialEq, Clone)]
pub struct HandshakeConfig {
    /// Bits the server must advertise. Empty means anything goes.
    pub required_flags: HandshakeFlags,
    /// Deadline for each individual read. `None` waits forever.
    pub read_timeout: Option<Duration>,
}
impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            required_flags: HandshakeFlags::REQUIRED,
            read_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// A successfully verified greeting.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
pub struct Established {
    pub flags: HandshakeFlags,
}
impl Established {
    /// Server will skip the 124 byte zero padding after NBD_OPT_EXPORT_NAME.
    pub fn no_zeroes(&self) -> bool {
        self.flags.contains(HandshakeFlags::NO_ZEROES)
    }
}

#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
pub enum State {
    Start,
    MagicChecked,
    OptionModeChecked,
    FlagsRead(HandshakeFlags),
    Established(Established),
    Failed(Step),
}
impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Established(_) | State::Failed(_))
    }
}

async fn deadline<T, F>(limit: Option<Duration>, fut: F) -> std::io::Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match limit {
        Some(d) => match tokio::time::timeout(d, fut).await {
            Ok(res) => res,
            Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "peer stopped sending")),
        },
        None => fut.await,
    }
}

/// Drives the fixed newstyle greeting one step at a time.
///
/// Borrows the stream and never closes it. Once a step fails the verifier
/// stays in `State::Failed` and won't read again.
pub struct Verifier<'a, IO> {
    c: &'a mut IO,
    config: HandshakeConfig,
    state: State,
}
impl<'a, IO: AsyncRead + Unpin> Verifier<'a, IO> {
    pub fn new(c: &'a mut IO, config: HandshakeConfig) -> Self {
        if config.required_flags.is_empty() {
            warn!("required handshake flags are empty, the flags check will accept anything");
        }
        Self {
            c,
            config,
            state: State::Start,
        }
    }
    pub fn state(&self) -> State {
        self.state
    }

    async fn expect(&mut self, step: Step, token: &'static [u8; 8]) -> Result<[u8; 8], HandshakeError> {
        let received = deadline(self.config.read_timeout, io::read_array::<_, 8>(&mut *self.c))
            .await
            .map_err(|source| HandshakeError::ShortRead { step, wanted: step.wire_len(), source })?;
        if &received != token {
            return Err(match step {
                Step::Magic => HandshakeError::MagicMismatch { received },
                _ => HandshakeError::OptionModeMismatch { received },
            });
        }
        debug!("received {}", Token(&received));
        Ok(received)
    }

    async fn step_once(&mut self) -> Result<State, HandshakeError> {
        let state = self.state;
        let next = match state {
            State::Start => {
                self.expect(Step::Magic, NBD_MAGIC).await?;
                State::MagicChecked
            }
            State::MagicChecked => {
                self.expect(Step::OptionMode, NBD_IHAVEOPT).await?;
                State::OptionModeChecked
            }
            State::OptionModeChecked => {
                let step = Step::Flags;
                let raw = deadline(self.config.read_timeout, io::read_u16(&mut *self.c))
                    .await
                    .map_err(|source| HandshakeError::ShortRead { step, wanted: step.wire_len(), source })?;
                debug!("received handshake flags: {:#06x}", raw);
                State::FlagsRead(HandshakeFlags::from_wire(raw))
            }
            State::FlagsRead(flags) => {
                let required = self.config.required_flags;
                if !flags.satisfies(required) {
                    return Err(HandshakeError::UnsupportedFlags { flags, required });
                }
                State::Established(Established { flags })
            }
            State::Established(_) => state,
            State::Failed(step) => return Err(HandshakeError::Terminated { step }),
        };
        Ok(next)
    }

    /// Performs the next transition. Terminal states are sticky.
    pub async fn advance(&mut self) -> Result<State, HandshakeError> {
        match self.step_once().await {
            Ok(next) => {
                self.state = next;
                Ok(next)
            }
            Err(e) => {
                if !matches!(e, HandshakeError::Terminated { .. }) {
                    warn!(step = %e.step(), "handshake failed: {}", e);
                }
                self.state = State::Failed(e.step());
                Err(e)
            }
        }
    }

    pub async fn run(mut self) -> Result<Established, HandshakeError> {
        loop {
            if let State::Established(est) = self.advance().await? {
                info!("handshake established, flags {:#06x}", est.flags.bits());
                return Ok(est);
            }
        }
    }
}

/// Reads and checks NBDMAGIC, IHAVEOPT and the handshake flags, in that order.
pub async fn handshake<IO: AsyncRead + Unpin>(c: &mut IO, config: &HandshakeConfig) -> Result<Established, HandshakeError> {
    Verifier::new(c, config.clone()).run().await
}
