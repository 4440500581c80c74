//! The agent's autonomous loops: recurring schedules, the price oracle with
//! conditional-order triggering, the balances snapshot, and the advisor.
//!
//! Each loop owns a re-entrancy guard (skip, don't queue) and catches every
//! error at its boundary. Schedule firings and conditional triggers use the
//! same single-transaction store semantics as externally submitted commands.

mod advisor;
mod balances;
mod oracle;
mod scheduler;

pub use advisor::{Advisor, AdvisorConfig};
pub use balances::BalancesLoop;
pub use oracle::PriceOracle;
pub use scheduler::Scheduler;
