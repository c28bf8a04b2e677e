//! # carbond Server
//!
//! Network front end of the daemon: the plaintext line protocol, its TCP and
//! UDP receivers, and the process lifecycle around the storage workers.
//!
//! ```ignore
//! let daemon = Daemon::start(Path::new("/etc/carbon/carbon.conf"))?;
//! let stats = daemon.run_until(terminate_signal()).await?;
//! ```

pub mod daemon;
pub mod protocol;
pub mod receiver;

pub use daemon::{reload, terminate_signal, Daemon};
pub use protocol::{parse_line, process_payload, PayloadReport, Sample};
