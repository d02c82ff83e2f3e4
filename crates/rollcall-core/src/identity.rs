use crate::attendance::StoreError;
use serde::{Deserialize, Serialize};

/// Display metadata for an enrollee, owned by the school records system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub enrollee_id: String,
    pub first_name: String,
    pub last_name: String,
    pub code: Option<String>,
    pub level: Option<String>,
    pub grade: Option<String>,
    pub section: Option<String>,
}

impl StudentProfile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// Read-only lookup of enrollee metadata for reporting match results.
pub trait IdentityDirectory: Send + Sync {
    fn lookup(&self, enrollee_id: &str) -> Result<Option<StudentProfile>, StoreError>;
}
