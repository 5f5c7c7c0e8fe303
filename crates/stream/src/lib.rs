//! Synchronized multi-board TX/RX streaming between radios and raw IQ files.

pub mod clock;
pub mod config;
pub mod error;
pub mod rx;
pub mod session;
pub mod stop;
pub mod tx;

pub use clock::{ClockDomain, ClockRole, ClockSynchronizer};
pub use config::{ClockConfig, RxConfig, SessionConfig, TxConfig};
pub use error::StreamError;
pub use rx::{ChannelFile, RxExit, RxReport, RxWorker, RxWorkerConfig};
pub use session::{Session, SessionReport};
pub use stop::{InterruptListener, StopSignal};
pub use tx::{TxReport, TxWorker, TxWorkerConfig};
