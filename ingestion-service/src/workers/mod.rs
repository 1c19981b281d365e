mod dispatcher;
mod executor;

pub use dispatcher::{BatchFailure, BatchReport, NotificationDispatcher, PushNotification};
pub use executor::{CommandError, CommandExecutor};
