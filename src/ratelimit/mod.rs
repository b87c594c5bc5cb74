//! Rate limiting logic and state management.

mod clock;
mod gate;
mod identity;
mod policy;
mod store;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use gate::{Gate, Verdict};
pub use identity::{
    ForwardedHeaderResolver, IdentityResolver, RateLimitKey, FORWARDED_FOR, REAL_IP,
    UNKNOWN_IDENTITY,
};
pub use policy::{PolicyFile, PolicyRule, PolicyTable, RoutePolicy, DEFAULT_MESSAGE};
pub use store::{Attempt, CounterEntry, WindowStore, DEFAULT_SWEEP_INTERVAL_MS};
pub use window::WindowConfig;
