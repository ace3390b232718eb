pub mod prompt_log;
pub mod receipts;
pub mod summary;
