pub mod attachments;
pub mod classifier;
pub mod database;
pub mod extract_manager;
pub mod mail;
pub mod memory;
pub mod message_processor;
pub mod metrics;
pub mod movements;
pub mod postgres;
pub mod repositories;
pub mod storage;

pub use attachments::{statement_period, AttachmentStore, StatementFile};
pub use classifier::{Classification, InstitutionProfile, MessageClassifier};
pub use database::MongoDb;
pub use extract_manager::ExtractManager;
pub use memory::InMemoryStore;
pub use message_processor::MessageProcessor;
pub use metrics::init_metrics;
pub use movements::{
    CategoryClassifier, CategoryPrediction, HttpCategoryClassifier, MovementPage, MovementService,
};
pub use postgres::Database;
pub use repositories::{ExtractRepository, MessageRepository, MovementFilter, MovementRepository};
pub use storage::{LocalStorage, Storage};
