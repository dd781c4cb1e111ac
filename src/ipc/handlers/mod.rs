pub mod backup_exchange;
pub mod bulletin;
pub mod core;
pub mod dashboard;
pub mod grades;
pub mod import_export;
pub mod students;
pub mod subjects;
