//! The publish pipeline: link records tying a content variant to a network,
//! the state machine those links move through, the dispatcher that performs
//! sends, and the scheduler that fires due ones.

pub mod dispatch;
pub mod links;
pub mod scheduler;
pub mod status;

pub use self::dispatch::{send_all, send_one, BroadcastReport, NetworkOutcome};
pub use self::links::PublishLink;
pub use self::scheduler::Scheduler;
pub use self::status::PublishStatus;
