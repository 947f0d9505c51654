use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewAssignedCourses,
    ViewAssignedStudents,
    EditAssignedStudents,
    RegisterStudentAttendance,
    RecordOwnAttendance,
    NotifyDirector,
    RegisterFamilyMembers,
    RecordPickups,

    ViewAllCourses,
    ManageCourses,
    ManageSchoolYears,
    AssignStaff,
    ManageStudents,
    ForceMarkAbsences,
    ProcessNotices,
    ManageStaffAttendance,
    ManageSystemConfig,
    ManageTuition,
    RecordPayments,
    ViewFinancialStatistics,
    SendReminders,
    EditUserCapabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Teacher,
    Director,
}

static TEACHER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewAssignedCourses);
    permissions.insert(Permission::ViewAssignedStudents);
    permissions.insert(Permission::EditAssignedStudents);
    permissions.insert(Permission::RegisterStudentAttendance);
    permissions.insert(Permission::RecordOwnAttendance);
    permissions.insert(Permission::NotifyDirector);
    permissions.insert(Permission::RegisterFamilyMembers);
    permissions.insert(Permission::RecordPickups);

    permissions
});

static DIRECTOR_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewAssignedCourses);
    permissions.insert(Permission::ViewAssignedStudents);
    permissions.insert(Permission::EditAssignedStudents);
    permissions.insert(Permission::RegisterStudentAttendance);
    permissions.insert(Permission::RegisterFamilyMembers);
    permissions.insert(Permission::RecordPickups);

    permissions.insert(Permission::ViewAllCourses);
    permissions.insert(Permission::ManageCourses);
    permissions.insert(Permission::ManageSchoolYears);
    permissions.insert(Permission::AssignStaff);
    permissions.insert(Permission::ManageStudents);
    permissions.insert(Permission::ForceMarkAbsences);
    permissions.insert(Permission::ProcessNotices);
    permissions.insert(Permission::ManageStaffAttendance);
    permissions.insert(Permission::ManageSystemConfig);
    permissions.insert(Permission::ManageTuition);
    permissions.insert(Permission::RecordPayments);
    permissions.insert(Permission::ViewFinancialStatistics);
    permissions.insert(Permission::SendReminders);
    permissions.insert(Permission::EditUserCapabilities);

    permissions
});

impl Capability {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Capability::Teacher => &TEACHER_PERMISSIONS,
            Capability::Director => &DIRECTOR_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Teacher => "teacher",
            Capability::Director => "director",
        }
    }
}

impl FromStr for Capability {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "teacher" => Ok(Capability::Teacher),
            "director" => Ok(Capability::Director),
            _ => Err(AppError::Validation(format!("Unknown capability: {}", s))),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teacher_cannot_manage_school() {
        assert!(Capability::Teacher.has_permission(Permission::RecordOwnAttendance));
        assert!(Capability::Teacher.has_permission(Permission::RegisterStudentAttendance));
        assert!(!Capability::Teacher.has_permission(Permission::ManageCourses));
        assert!(!Capability::Teacher.has_permission(Permission::ForceMarkAbsences));
        assert!(!Capability::Teacher.has_permission(Permission::ManageTuition));
    }

    #[test]
    fn test_director_does_not_self_record_attendance() {
        assert!(Capability::Director.has_permission(Permission::ManageSystemConfig));
        assert!(Capability::Director.has_permission(Permission::RecordPayments));
        assert!(!Capability::Director.has_permission(Permission::RecordOwnAttendance));
        assert!(!Capability::Director.has_permission(Permission::NotifyDirector));
    }

    #[test]
    fn test_capability_parsing() {
        assert_eq!("teacher".parse::<Capability>().unwrap(), Capability::Teacher);
        assert_eq!("director".parse::<Capability>().unwrap(), Capability::Director);
        assert!("janitor".parse::<Capability>().is_err());
    }
}
