pub mod clock;
pub mod interval;
pub mod schedule;
pub mod exception;
pub mod booking;
pub mod availability;

pub use clock::{Clock, SystemClock, FixedClock};
pub use schedule::ScheduleService;
pub use exception::ExceptionService;
pub use booking::BookingService;
pub use availability::AvailabilityService;
