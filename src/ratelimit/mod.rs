//! Platform rate limiting: policies, window state and the admission engine.

mod backend;
mod clock;
mod limiter;
mod policy;
mod store;
mod window;

pub use backend::{RateLimiterBackend, ShutdownSignal};
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{PlatformRateLimiter, QuotaStatus};
pub use policy::{PolicyTable, RateLimitPolicy, MAX_WINDOW_SECONDS};
pub use store::{Admission, InMemoryWindowStore, WindowStore};
pub use window::{RateWindow, WindowKey};
