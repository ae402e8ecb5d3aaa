use serde::{Deserialize, Serialize};

use crate::model::attendance::EmployeeId;

/// `hr.employee` record, only the fields used for matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEmployee {
    pub id: EmployeeId,
    pub name: String,

    /// Badge number, matched against the terminal `emp_code`
    pub barcode: Option<String>,
}

/// Personnel entry on the terminal side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalEmployee {
    pub emp_code: String,
    pub name: String,
    pub department: Option<String>,
}
