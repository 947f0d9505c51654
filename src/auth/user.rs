use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};

use super::{Capability, Permission};
use crate::db::is_staff_assigned;
use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub dni: String,
    pub phone: String,
    pub address: String,
    pub birth_date: Option<NaiveDate>,
    pub capabilities: Vec<Capability>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub dni: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub is_teacher: Option<bool>,
    pub is_director: Option<bool>,
}

impl From<DbUser> for User {
    fn from(user: DbUser) -> Self {
        let mut capabilities = Vec::new();
        if user.is_teacher.unwrap_or_default() {
            capabilities.push(Capability::Teacher);
        }
        if user.is_director.unwrap_or_default() {
            capabilities.push(Capability::Director);
        }

        Self {
            id: user.id.unwrap_or_default(),
            username: user.username.unwrap_or_default(),
            first_name: user.first_name.unwrap_or_default(),
            last_name: user.last_name.unwrap_or_default(),
            email: user.email.unwrap_or_default(),
            dni: user.dni.unwrap_or_default(),
            phone: user.phone.unwrap_or_default(),
            address: user.address.unwrap_or_default(),
            birth_date: user.birth_date,
            capabilities,
        }
    }
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_teacher(&self) -> bool {
        self.has_capability(Capability::Teacher)
    }

    pub fn is_director(&self) -> bool {
        self.has_capability(Capability::Director)
    }

    fn capability_names(&self) -> String {
        self.capabilities
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.has_permission(permission))
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), AppError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.username,
                capabilities = %self.capability_names(),
                permission = ?permission,
                "Permission denied"
            );
            Err(AppError::Authorization(format!(
                "You don't have permission to perform this action ({:?})",
                permission
            )))
        }
    }

    pub fn require_any_permission(&self, permissions: &[Permission]) -> Result<(), AppError> {
        if permissions.iter().any(|p| self.has_permission(*p)) {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.username,
                capabilities = %self.capability_names(),
                permissions = ?permissions,
                "Permission denied (require any)"
            );
            Err(AppError::Authorization(
                "You don't have permission to perform this action".to_string(),
            ))
        }
    }

    pub fn require_all_permissions(&self, permissions: &[Permission]) -> Result<(), AppError> {
        if permissions.iter().all(|p| self.has_permission(*p)) {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.username,
                capabilities = %self.capability_names(),
                permissions = ?permissions,
                "Permission denied (require all)"
            );
            Err(AppError::Authorization(
                "You don't have permission to perform this action".to_string(),
            ))
        }
    }

    /// Directors see every course; teachers only the ones they are assigned to.
    pub async fn require_course_access(
        &self,
        pool: &Pool<Sqlite>,
        course_id: i64,
    ) -> Result<(), AppError> {
        if self.has_permission(Permission::ViewAllCourses) {
            return Ok(());
        }

        if self.has_permission(Permission::ViewAssignedCourses)
            && is_staff_assigned(pool, course_id, self.id).await?
        {
            return Ok(());
        }

        tracing::warn!(
            username = %self.username,
            course_id = course_id,
            "Course access denied"
        );
        Err(AppError::Authorization(
            "You are not assigned to this course".to_string(),
        ))
    }
}
