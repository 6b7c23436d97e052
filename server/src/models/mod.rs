pub mod batch;
pub mod report;
pub mod ticket;

pub use batch::{BatchDetail, BatchSummary, IssuedBatch, NewBatch, StatusCounts, TicketBatch};
pub use report::{DailyReport, DenominationCount, DenominationSubtotal};
pub use ticket::{Denomination, Ticket, TicketStatus};
