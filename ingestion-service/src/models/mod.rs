mod account;
mod extract;
mod message;
mod movement;

pub use account::{Account, GoogleCredential};
pub use extract::{Extract, ExtractStatus};
pub use message::{Message, MessageStatus, MessageType};
pub use movement::{
    Category, Movement, MovementRow, MovementSource, MovementType, MovementValidationError,
};
