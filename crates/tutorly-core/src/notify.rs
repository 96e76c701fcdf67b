//! Notification sink abstraction.
//!
//! Delivery (email, push, in-app) lives outside the engine. The engine
//! only asks for a notification to be created and treats the call as
//! fire-and-forget: failures are logged by the caller, never
//! propagated into the business operation that produced them.

use crate::error::TutorlyResult;
use crate::models::notification::CreateNotification;

pub trait NotificationSink: Send + Sync {
    fn create_notification(
        &self,
        input: CreateNotification,
    ) -> impl Future<Output = TutorlyResult<()>> + Send;
}
