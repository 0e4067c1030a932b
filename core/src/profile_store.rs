/// Profile directory — persists user profiles in sled DB
use crate::conversation::ParticipantId;
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: ParticipantId,
    pub name: String,
    pub email: String,
    pub bio: String,
    pub hobbies: String,
    pub updated_at: String, // RFC3339
}

/// Partial edit: only the fields that are `Some` are written
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub hobbies: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.bio.is_none() && self.hobbies.is_none()
    }

    fn apply(self, profile: &mut Profile) {
        if let Some(name) = self.name {
            profile.name = name;
        }
        if let Some(email) = self.email {
            profile.email = email;
        }
        if let Some(bio) = self.bio {
            profile.bio = bio;
        }
        if let Some(hobbies) = self.hobbies {
            profile.hobbies = hobbies;
        }
    }
}

pub struct ProfileStore {
    db: sled::Db,
}

impl ProfileStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db = sled::open(data_dir.join("profiles.db"))
            .map_err(|e| ChatError::Storage(format!("profiles DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Merge `update` into the stored profile, creating it if missing
    pub fn upsert(&self, user_id: &ParticipantId, update: ProfileUpdate) -> Result<Profile> {
        let mut profile = self.get(user_id)?.unwrap_or_else(|| Profile {
            user_id: user_id.clone(),
            ..Default::default()
        });
        update.apply(&mut profile);
        profile.updated_at = chrono::Utc::now().to_rfc3339();

        let val = serde_json::to_vec(&profile).map_err(ChatError::Serialization)?;
        self.db
            .insert(user_id.as_str().as_bytes(), val)
            .map_err(|e| ChatError::Storage(format!("upsert_profile: {}", e)))?;
        debug!("Profile of {} updated", user_id);
        Ok(profile)
    }

    pub fn get(&self, user_id: &ParticipantId) -> Result<Option<Profile>> {
        match self
            .db
            .get(user_id.as_str().as_bytes())
            .map_err(|e| ChatError::Storage(format!("get_profile: {}", e)))?
        {
            Some(val) => {
                let p = serde_json::from_slice::<Profile>(&val).map_err(ChatError::Serialization)?;
                Ok(Some(p))
            }
            None => Ok(None),
        }
    }

    /// Name to show for `user_id`; falls back to the id itself
    pub fn display_name(&self, user_id: &ParticipantId) -> String {
        match self.get(user_id) {
            Ok(Some(p)) if !p.name.is_empty() => p.name,
            _ => user_id.to_string(),
        }
    }
}

impl Clone for ProfileStore {
    fn clone(&self) -> Self {
        Self { db: self.db.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_upsert_merges_fields() {
        let temp_dir = TempDir::new().unwrap();
        let store = ProfileStore::new(temp_dir.path()).unwrap();
        let alice = ParticipantId::from("alice");

        store
            .upsert(
                &alice,
                ProfileUpdate {
                    name: Some("Alice".to_string()),
                    bio: Some("climber".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let p = store
            .upsert(
                &alice,
                ProfileUpdate {
                    hobbies: Some("chess".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(p.name, "Alice");
        assert_eq!(p.bio, "climber");
        assert_eq!(p.hobbies, "chess");
        assert_eq!(store.get(&alice).unwrap(), Some(p));
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let temp_dir = TempDir::new().unwrap();
        let store = ProfileStore::new(temp_dir.path()).unwrap();
        assert_eq!(store.display_name(&"bob".into()), "bob");

        store
            .upsert(
                &"bob".into(),
                ProfileUpdate {
                    name: Some("Bob".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(store.display_name(&"bob".into()), "Bob");
    }
}
