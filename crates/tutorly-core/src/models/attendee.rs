//! Who a session is for: a single student or a student group.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Attendee {
    Student(Uuid),
    Group(Uuid),
}

impl Attendee {
    pub fn student_id(&self) -> Option<Uuid> {
        match self {
            Attendee::Student(id) => Some(*id),
            Attendee::Group(_) => None,
        }
    }

    pub fn group_id(&self) -> Option<Uuid> {
        match self {
            Attendee::Group(id) => Some(*id),
            Attendee::Student(_) => None,
        }
    }
}
