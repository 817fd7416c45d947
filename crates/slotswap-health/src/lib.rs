//! slotswap-health — readiness probing for freshly started slots.
//!
//! A slot is ready once its service port accepts TCP connections. The
//! prober polls until that happens or a bound elapses:
//!
//! ```text
//! wait_for_ready(addr, timeout)
//!   ├── tcp_probe(addr) → ProbeResult   (each attempt self-bounded)
//!   ├── sleep(interval)
//!   └── ReadinessError::Timeout { address, waited } once the bound passes
//! ```
//!
//! There is no external cancellation; the timeout is the only way out.

pub mod prober;

pub use prober::{ProbeResult, ReadinessError, ReadinessProber, tcp_probe};
