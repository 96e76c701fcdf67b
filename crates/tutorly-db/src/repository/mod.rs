//! SurrealDB repository implementations.

mod audit;
mod change_request;
mod invoice;
mod invoice_alert;
mod logging_alert;
mod occurrence;
mod student;
mod template;
mod timesheet;
mod watermark;

pub use audit::SurrealAuditLogRepository;
pub use change_request::SurrealChangeRequestRepository;
pub use invoice::SurrealInvoiceRepository;
pub use invoice_alert::SurrealInvoiceAlertRepository;
pub use logging_alert::SurrealLoggingAlertRepository;
pub use occurrence::SurrealOccurrenceRepository;
pub use student::SurrealStudentRepository;
pub use template::SurrealTemplateRepository;
pub use timesheet::SurrealTimesheetRepository;
pub use watermark::SurrealScanWatermarkRepository;
