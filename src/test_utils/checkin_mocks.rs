use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::use_cases::checkin::{CheckinProfile, CheckinRepo, CheckinTx, GymQrCode},
    domain::entities::checkin_status::CheckinStatus,
};

#[derive(Default)]
struct CheckinState {
    gyms: HashSet<Uuid>,
    qr_codes: Vec<GymQrCode>,
    faces: HashMap<Uuid, String>,
    /// Insertion order doubles as creation order.
    checkins: Vec<CheckinProfile>,
}

#[derive(Default)]
pub struct InMemoryCheckinRepo {
    state: Arc<Mutex<CheckinState>>,
}

impl InMemoryCheckinRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_gym(&self, gym_id: Uuid) {
        self.state.lock().unwrap().gyms.insert(gym_id);
    }

    pub fn add_qr(&self, gym_id: Uuid, nonce: &str, is_active: bool) {
        self.state.lock().unwrap().qr_codes.push(GymQrCode {
            gym_id,
            qr_nonce: nonce.to_string(),
            is_active,
            created_at: Utc::now(),
        });
    }

    pub fn register_face(&self, user_id: Uuid, url: &str) {
        self.state
            .lock()
            .unwrap()
            .faces
            .insert(user_id, url.to_string());
    }

    pub fn stored(&self, id: Uuid) -> Option<CheckinProfile> {
        self.state
            .lock()
            .unwrap()
            .checkins
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    pub fn all(&self) -> Vec<CheckinProfile> {
        self.state.lock().unwrap().checkins.clone()
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().checkins.len()
    }
}

#[async_trait]
impl CheckinRepo for InMemoryCheckinRepo {
    async fn gym_exists(&self, gym_id: Uuid) -> AppResult<bool> {
        Ok(self.state.lock().unwrap().gyms.contains(&gym_id))
    }

    async fn find_active_qr(&self, gym_id: Uuid, nonce: &str) -> AppResult<Option<GymQrCode>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .qr_codes
            .iter()
            .find(|q| q.gym_id == gym_id && q.qr_nonce == nonce && q.is_active)
            .cloned())
    }

    async fn face_reference_url(&self, user_id: Uuid) -> AppResult<Option<String>> {
        Ok(self.state.lock().unwrap().faces.get(&user_id).cloned())
    }

    async fn has_confirmed_on(&self, user_id: Uuid, gym_id: Uuid, day: NaiveDate) -> AppResult<bool> {
        Ok(self.state.lock().unwrap().checkins.iter().any(|c| {
            c.user_id == user_id
                && c.gym_id == Some(gym_id)
                && c.checkin_date == day
                && c.status == CheckinStatus::Confirmed
        }))
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> AppResult<Vec<CheckinProfile>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .checkins
            .iter()
            .rev()
            .filter(|c| c.user_id == user_id)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn begin(&self) -> AppResult<Box<dyn CheckinTx>> {
        Ok(Box::new(InMemoryCheckinTx {
            state: self.state.clone(),
            staged: Vec::new(),
        }))
    }
}

pub struct InMemoryCheckinTx {
    state: Arc<Mutex<CheckinState>>,
    staged: Vec<CheckinProfile>,
}

#[async_trait]
impl CheckinTx for InMemoryCheckinTx {
    async fn insert(&mut self, checkin: &CheckinProfile) -> AppResult<()> {
        self.staged.push(checkin.clone());
        Ok(())
    }

    async fn update(&mut self, checkin: &CheckinProfile) -> AppResult<()> {
        match self.staged.iter_mut().find(|c| c.id == checkin.id) {
            Some(staged) => *staged = checkin.clone(),
            None => self.staged.push(checkin.clone()),
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        for c in self.staged.iter().filter(|c| c.status == CheckinStatus::Confirmed) {
            let duplicate = state.checkins.iter().any(|existing| {
                existing.id != c.id
                    && existing.user_id == c.user_id
                    && existing.gym_id == c.gym_id
                    && existing.checkin_date == c.checkin_date
                    && existing.status == CheckinStatus::Confirmed
            });
            if duplicate {
                return Err(AppError::Conflict(
                    "duplicate key value violates unique constraint \"uq_checkins_confirmed_per_day\""
                        .into(),
                ));
            }
        }
        for c in &self.staged {
            match state.checkins.iter_mut().find(|existing| existing.id == c.id) {
                Some(existing) => *existing = c.clone(),
                None => state.checkins.push(c.clone()),
            }
        }
        Ok(())
    }
}
