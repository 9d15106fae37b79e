//! Location code registry
//!
//! Validation, decomposition, allocation/approval and masking of the
//! 6-character code namespace.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{ConfigHandle, MaskingPolicy};
use crate::error::{AppError, Result};
use crate::models::{
    validate_segment, AllocateRequest, Area, BindingStatus, CodeApplication, CodeRecord,
    Decomposed, LocationCode, PointType, School, ALPHABET,
};
use crate::permission;
use crate::store::Store;

/// Apply a role's rule from `policy` to a code
pub fn mask_code(code: &LocationCode, is_public: bool, role: &str, policy: &MaskingPolicy) -> String {
    let visible = policy.rule_for(role).visible(is_public).min(code.as_str().len());
    let mut masked = String::with_capacity(code.as_str().len());
    masked.push_str(&code.as_str()[..visible]);
    masked.extend(std::iter::repeat(policy.mask_char).take(code.as_str().len() - visible));
    masked
}

/// What a viewer may see of one code
#[derive(Debug, Clone, Serialize)]
pub struct CodeView {
    pub display: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub school: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point: Option<String>,
    pub point_type: PointType,
    pub is_active: bool,
}

#[derive(Clone)]
pub struct CodeRegistry {
    store: Store,
    config: Arc<ConfigHandle>,
}

impl CodeRegistry {
    pub fn new(store: Store, config: Arc<ConfigHandle>) -> Self {
        Self { store, config }
    }

    pub fn decompose(code: &LocationCode) -> Decomposed {
        code.decompose()
    }

    /// Format check plus active school and area lookups; no writes
    pub async fn validate(&self, raw: &str) -> Result<LocationCode> {
        let code = LocationCode::parse(raw)?;

        let school_active = self
            .store
            .get_school(code.school())
            .await?
            .map(|s| s.is_active)
            .unwrap_or(false);
        if !school_active {
            return Err(AppError::InvalidCodeFormat(format!(
                "school segment {} does not name an active school",
                code.school()
            )));
        }

        let area_active = self
            .store
            .get_area(code.school(), code.area())
            .await?
            .map(|a| a.is_active)
            .unwrap_or(false);
        if !area_active {
            return Err(AppError::InvalidCodeFormat(format!(
                "area segment {} does not name an active area",
                code.area()
            )));
        }

        Ok(code)
    }

    pub async fn create_school(&self, code: &str, name: &str) -> Result<School> {
        validate_segment("school", code)?;
        let school = School {
            code: code.to_string(),
            name: name.to_string(),
            is_active: true,
            managed_by: None,
            created_at: Utc::now(),
        };
        self.store.insert_school(&school).await?;
        tracing::info!(school = %school.code, "School created");
        Ok(school)
    }

    pub async fn create_area(&self, school: &str, area: &str, name: &str) -> Result<Area> {
        validate_segment("school", school)?;
        validate_segment("area", area)?;
        match self.store.get_school(school).await? {
            Some(s) if s.is_active => {}
            Some(_) => {
                return Err(AppError::BadRequest(format!("school {} is inactive", school)));
            }
            None => return Err(AppError::NotFound(format!("School {} not found", school))),
        }

        let area = Area {
            school: school.to_string(),
            area: area.to_string(),
            name: name.to_string(),
            is_active: true,
            managed_by: None,
            created_at: Utc::now(),
        };
        self.store.insert_area(&area).await?;
        tracing::info!(school = %area.school, area = %area.area, "Area created");
        Ok(area)
    }

    /// Deactivate an area; its codes are retired, never deleted
    pub async fn deactivate_area(&self, school: &str, area: &str) -> Result<u64> {
        let retired = self.store.deactivate_area(school, area).await?;
        tracing::info!(%school, %area, retired, "Area deactivated");
        Ok(retired)
    }

    pub async fn deactivate_school(&self, school: &str) -> Result<u64> {
        let retired = self.store.deactivate_school(school).await?;
        tracing::info!(%school, retired, "School deactivated");
        Ok(retired)
    }

    /// Reserve a point segment in an area, pending approval
    pub async fn allocate(&self, request: AllocateRequest) -> Result<CodeApplication> {
        validate_segment("school", &request.school)?;
        validate_segment("area", &request.area)?;
        if request.requested_by.trim().is_empty() {
            return Err(AppError::BadRequest("requested_by must not be empty".to_string()));
        }
        self.validate(&format!("{}{}00", request.school, request.area))
            .await?;

        let taken = self.store.taken_points(&request.school, &request.area).await?;
        let point = match request.preferred_point {
            Some(point) => {
                validate_segment("point", &point)?;
                if taken.contains(&point) {
                    return Err(AppError::CodeNotAvailable(format!(
                        "point {} in {}{} is taken",
                        point, request.school, request.area
                    )));
                }
                point
            }
            None => first_free_point(|p| taken.contains(p)).ok_or_else(|| {
                AppError::CodeNotAvailable(format!(
                    "area {}{} has no free points",
                    request.school, request.area
                ))
            })?,
        };

        let application = CodeApplication {
            id: Uuid::new_v4(),
            code: LocationCode::compose(&request.school, &request.area, &point)?,
            point_type: request.point_type,
            is_public: request.is_public,
            requested_by: request.requested_by,
            status: BindingStatus::Pending,
            reviewed_by: None,
            created_at: Utc::now(),
            reviewed_at: None,
        };
        self.store.insert_application(&application).await?;

        tracing::info!(application_id = %application.id, "Code reserved");
        Ok(application)
    }

    /// Activate a pending application's code
    pub async fn approve(&self, application_id: Uuid, approver_id: Uuid) -> Result<CodeRecord> {
        let application = self.load_pending(application_id).await?;
        self.ensure_reviewer(&application, approver_id).await?;

        // The area may have been retired since the reservation was made
        self.validate(application.code.as_str()).await.map_err(|_| {
            AppError::CodeNotAvailable(format!(
                "application {} targets an inactive area",
                application_id
            ))
        })?;

        let record = self
            .store
            .activate_code(&application, approver_id, Utc::now())
            .await?;
        tracing::info!(%application_id, %approver_id, "Code application approved");
        Ok(record)
    }

    /// Refuse a pending application, freeing its reservation
    pub async fn reject(&self, application_id: Uuid, reviewer_id: Uuid) -> Result<CodeApplication> {
        let application = self.load_pending(application_id).await?;
        self.ensure_reviewer(&application, reviewer_id).await?;

        if !self
            .store
            .reject_application(application_id, reviewer_id, Utc::now())
            .await?
        {
            return Err(AppError::InvalidStateTransition(format!(
                "application {} is no longer pending",
                application_id
            )));
        }
        tracing::info!(%application_id, %reviewer_id, "Code application rejected");
        self.store.get_application(application_id).await
    }

    pub fn mask(&self, code: &LocationCode, is_public: bool, role: &str) -> String {
        mask_code(code, is_public, role, &self.config.current().masking)
    }

    /// Decompose and mask a registered code for a viewer
    pub async fn view(&self, raw: &str, viewer_id: Option<Uuid>) -> Result<CodeView> {
        let code = LocationCode::parse(raw)?;
        let record = self
            .store
            .get_code(&code)
            .await?
            .ok_or_else(|| AppError::NotFound("Code not found".to_string()))?;

        let viewer = match viewer_id {
            Some(id) => Some(self.store.get_courier(id).await?),
            None => None,
        };
        let role = permission::viewer_role(viewer.as_ref(), code.as_str());

        let policy = self.config.current();
        let visible = policy
            .masking
            .rule_for(role)
            .visible(record.is_public)
            .min(code.as_str().len());
        let parts = code.decompose();

        Ok(CodeView {
            display: mask_code(&code, record.is_public, role, &policy.masking),
            role: role.to_string(),
            school: (visible >= 2).then_some(parts.school),
            area: (visible >= 4).then_some(parts.area),
            point: (visible >= 6).then_some(parts.point),
            point_type: record.point_type,
            is_active: record.is_active,
        })
    }

    async fn load_pending(&self, application_id: Uuid) -> Result<CodeApplication> {
        let application = self.store.get_application(application_id).await?;
        if application.status != BindingStatus::Pending {
            return Err(AppError::InvalidStateTransition(format!(
                "application {} is already {}",
                application_id,
                application.status.as_str()
            )));
        }
        Ok(application)
    }

    async fn ensure_reviewer(&self, application: &CodeApplication, courier_id: Uuid) -> Result<()> {
        let courier = self.store.get_courier(courier_id).await?;
        if !permission::can_approve(&courier, application.code.as_str()) {
            tracing::warn!(%courier_id, application_id = %application.id, "Approval outside scope");
            return Err(AppError::PermissionDenied(format!(
                "courier {} may not review application {}",
                courier_id, application.id
            )));
        }
        Ok(())
    }
}

/// First point segment in alphabet order for which `taken` is false
fn first_free_point(taken: impl Fn(&str) -> bool) -> Option<String> {
    ALPHABET.iter().find_map(|&hi| {
        ALPHABET.iter().find_map(|&lo| {
            let point: String = [hi as char, lo as char].iter().collect();
            (!taken(&point)).then_some(point)
        })
    })
}
