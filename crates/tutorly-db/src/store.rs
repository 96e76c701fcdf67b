//! [`Store`] implementation backed by a single SurrealDB handle.

use surrealdb::{Connection, Surreal};
use tutorly_core::repository::Store;

use crate::repository::{
    SurrealAuditLogRepository, SurrealChangeRequestRepository, SurrealInvoiceAlertRepository,
    SurrealInvoiceRepository, SurrealLoggingAlertRepository, SurrealOccurrenceRepository,
    SurrealScanWatermarkRepository, SurrealStudentRepository, SurrealTemplateRepository,
    SurrealTimesheetRepository,
};

/// Every repository over one connection. Cloning is cheap: the
/// underlying client is reference counted.
#[derive(Clone)]
pub struct SurrealStore<C: Connection> {
    templates: SurrealTemplateRepository<C>,
    occurrences: SurrealOccurrenceRepository<C>,
    change_requests: SurrealChangeRequestRepository<C>,
    timesheets: SurrealTimesheetRepository<C>,
    logging_alerts: SurrealLoggingAlertRepository<C>,
    invoice_alerts: SurrealInvoiceAlertRepository<C>,
    students: SurrealStudentRepository<C>,
    invoices: SurrealInvoiceRepository<C>,
    audit: SurrealAuditLogRepository<C>,
    watermarks: SurrealScanWatermarkRepository<C>,
}

impl<C: Connection> SurrealStore<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self {
            templates: SurrealTemplateRepository::new(db.clone()),
            occurrences: SurrealOccurrenceRepository::new(db.clone()),
            change_requests: SurrealChangeRequestRepository::new(db.clone()),
            timesheets: SurrealTimesheetRepository::new(db.clone()),
            logging_alerts: SurrealLoggingAlertRepository::new(db.clone()),
            invoice_alerts: SurrealInvoiceAlertRepository::new(db.clone()),
            students: SurrealStudentRepository::new(db.clone()),
            invoices: SurrealInvoiceRepository::new(db.clone()),
            audit: SurrealAuditLogRepository::new(db.clone()),
            watermarks: SurrealScanWatermarkRepository::new(db),
        }
    }
}

impl<C: Connection> Store for SurrealStore<C> {
    type Templates = SurrealTemplateRepository<C>;
    type Occurrences = SurrealOccurrenceRepository<C>;
    type ChangeRequests = SurrealChangeRequestRepository<C>;
    type Timesheets = SurrealTimesheetRepository<C>;
    type LoggingAlerts = SurrealLoggingAlertRepository<C>;
    type InvoiceAlerts = SurrealInvoiceAlertRepository<C>;
    type Students = SurrealStudentRepository<C>;
    type Invoices = SurrealInvoiceRepository<C>;
    type Audit = SurrealAuditLogRepository<C>;
    type Watermarks = SurrealScanWatermarkRepository<C>;

    fn templates(&self) -> &Self::Templates {
        &self.templates
    }

    fn occurrences(&self) -> &Self::Occurrences {
        &self.occurrences
    }

    fn change_requests(&self) -> &Self::ChangeRequests {
        &self.change_requests
    }

    fn timesheets(&self) -> &Self::Timesheets {
        &self.timesheets
    }

    fn logging_alerts(&self) -> &Self::LoggingAlerts {
        &self.logging_alerts
    }

    fn invoice_alerts(&self) -> &Self::InvoiceAlerts {
        &self.invoice_alerts
    }

    fn students(&self) -> &Self::Students {
        &self.students
    }

    fn invoices(&self) -> &Self::Invoices {
        &self.invoices
    }

    fn audit(&self) -> &Self::Audit {
        &self.audit
    }

    fn watermarks(&self) -> &Self::Watermarks {
        &self.watermarks
    }
}
