pub mod clock;
pub mod code;
pub mod error;
pub mod lifecycle;
pub mod report;

pub use clock::{Clock, SystemClock};
pub use code::CodeGenerator;
pub use error::TicketError;
pub use lifecycle::LifecycleManager;
pub use report::DailyReporter;
