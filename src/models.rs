use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = profiles)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = profiles)]
pub struct NewProfile {
    pub id: Uuid,
    pub email: String,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = projects)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub location: Option<serde_json::Value>,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = projects)]
pub struct NewProject {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub location: Option<serde_json::Value>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = project_assignments)]
#[diesel(belongs_to(Project))]
#[diesel(belongs_to(Profile, foreign_key = assigned_user_id))]
pub struct ProjectAssignment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub assigned_user_id: Uuid,
    pub assigned_by: Option<Uuid>,
    pub assigned_at: NaiveDateTime,
    pub role: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = project_assignments)]
pub struct NewProjectAssignment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub assigned_user_id: Uuid,
    pub assigned_by: Option<Uuid>,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = files)]
#[diesel(belongs_to(Project))]
pub struct StoredFile {
    pub id: Uuid,
    pub file_name: String,
    pub file_url: String,
    pub file_size: i64,
    pub thumbnail_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub height: Option<f64>,
    pub rotation: Option<f64>,
    pub project_id: Uuid,
    pub uploaded_by: Uuid,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = files)]
pub struct NewStoredFile {
    pub id: Uuid,
    pub file_name: String,
    pub file_url: String,
    pub file_size: i64,
    pub thumbnail_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub height: Option<f64>,
    pub rotation: Option<f64>,
    pub project_id: Uuid,
    pub uploaded_by: Uuid,
}
