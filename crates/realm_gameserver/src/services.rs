//! External collaborators: the user directory, avatar resources, locations
//! and the instance store.
//!
//! The gameserver only sees these through [`WorldServices`]. Lookups are
//! spawned off the event loop, so every method returns an owned `'static`
//! future.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use realm_net::UserId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LookupError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("lookup service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    /// Name of the avatar resource set.
    pub avatar_id: String,
    #[serde(default)]
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Avatar,
    UserThumbnail,
}

/// A static resource belonging to an avatar set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvatarResource {
    pub name: String,
    pub url: String,
    pub kind: ResourceKind,
    /// Owner of a private resource; public when unset.
    #[serde(default)]
    pub user_id: Option<UserId>,
}

/// What other peers need to render a user's avatar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvatarDetail {
    pub avatar_id: String,
    pub avatar_url: String,
    pub thumbnail_url: String,
}

impl AvatarDetail {
    /// Fold a resource set into one detail record.
    #[must_use]
    pub fn from_resources(avatar_id: &str, resources: &[AvatarResource]) -> Self {
        let mut detail = Self {
            avatar_id: avatar_id.to_string(),
            ..Self::default()
        };
        for resource in resources {
            match resource.kind {
                ResourceKind::Avatar => detail.avatar_url.clone_from(&resource.url),
                ResourceKind::UserThumbnail => detail.thumbnail_url.clone_from(&resource.url),
            }
        }
        detail
    }
}

/// A world location and the scene it loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub id: String,
    /// URL-safe name the gameserver is started with.
    pub slug: String,
    #[serde(default)]
    pub name: String,
    pub scene_id: String,
}

/// One running world instance, as the instance store sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub scene_id: Option<String>,
    /// Where peers reach the gameserver hosting it.
    pub address: String,
    #[serde(default)]
    pub current_users: usize,
    #[serde(default)]
    pub ended: bool,
}

/// What a gameserver registers when it comes up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInstance {
    pub id: String,
    pub location_id: Option<String>,
    pub scene_id: Option<String>,
    pub address: String,
}

/// Fields of the instance record the gameserver keeps current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancePatch {
    pub current_users: usize,
}

pub trait WorldServices: Send + Sync + 'static {
    fn find_user(&self, id: &UserId) -> BoxFuture<'static, Result<UserRecord, LookupError>>;

    /// Resources named `avatar_id` that are public or owned by `user`. An
    /// unknown avatar yields an empty list, not an error.
    fn find_avatar_resources(
        &self,
        avatar_id: &str,
        user: &UserId,
    ) -> BoxFuture<'static, Result<Vec<AvatarResource>, LookupError>>;

    fn find_location(&self, slug: &str) -> BoxFuture<'static, Result<LocationRecord, LookupError>>;

    /// Mark every live instance registered at `address` as ended. Returns
    /// how many were still open.
    fn end_stale_instances(&self, address: &str) -> BoxFuture<'static, Result<usize, LookupError>>;

    fn create_instance(
        &self,
        instance: NewInstance,
    ) -> BoxFuture<'static, Result<InstanceRecord, LookupError>>;

    fn patch_instance(
        &self,
        instance_id: &str,
        patch: InstancePatch,
    ) -> BoxFuture<'static, Result<(), LookupError>>;
}

#[derive(Debug, Default, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    users: Vec<UserRecord>,
    #[serde(default)]
    avatars: Vec<AvatarResource>,
    #[serde(default)]
    locations: Vec<LocationRecord>,
}

/// In-process directory for standalone runs and tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDirectory {
    users: Arc<DashMap<UserId, UserRecord>>,
    avatars: Arc<DashMap<String, Vec<AvatarResource>>>,
    locations: Arc<DashMap<String, LocationRecord>>,
    instances: Arc<DashMap<String, InstanceRecord>>,
    delay: Option<Duration>,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{ "users": [...], "avatars": [...], "locations": [...] }` from a
    /// JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading user directory {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing user directory {}", path.display()))
    }

    /// # Errors
    ///
    /// Returns an error if `text` is not a valid directory document.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let file: DirectoryFile = serde_json::from_str(text)?;
        let directory = Self::new();
        for user in file.users {
            directory.insert_user(user);
        }
        for resource in file.avatars {
            directory.insert_avatar_resource(resource);
        }
        for location in file.locations {
            directory.insert_location(location);
        }
        Ok(directory)
    }

    /// Make every lookup wait `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn insert_user(&self, user: UserRecord) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn insert_avatar_resource(&self, resource: AvatarResource) {
        self.avatars
            .entry(resource.name.clone())
            .or_default()
            .push(resource);
    }

    pub fn insert_location(&self, location: LocationRecord) {
        self.locations.insert(location.slug.clone(), location);
    }

    pub fn insert_instance(&self, instance: InstanceRecord) {
        self.instances.insert(instance.id.clone(), instance);
    }

    #[must_use]
    pub fn instance(&self, instance_id: &str) -> Option<InstanceRecord> {
        self.instances.get(instance_id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    fn delayed<T: Send + 'static>(
        &self,
        result: Result<T, LookupError>,
    ) -> BoxFuture<'static, Result<T, LookupError>> {
        let delay = self.delay;
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        }
        .boxed()
    }
}

impl WorldServices for InMemoryDirectory {
    fn find_user(&self, id: &UserId) -> BoxFuture<'static, Result<UserRecord, LookupError>> {
        let result = self
            .users
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LookupError::NotFound {
                kind: "user",
                id: id.to_string(),
            });
        self.delayed(result)
    }

    fn find_avatar_resources(
        &self,
        avatar_id: &str,
        user: &UserId,
    ) -> BoxFuture<'static, Result<Vec<AvatarResource>, LookupError>> {
        let visible: Vec<AvatarResource> = self
            .avatars
            .get(avatar_id)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|r| r.user_id.as_ref().is_none_or(|owner| owner == user))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        self.delayed(Ok(visible))
    }

    fn find_location(&self, slug: &str) -> BoxFuture<'static, Result<LocationRecord, LookupError>> {
        let result = self
            .locations
            .get(slug)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LookupError::NotFound {
                kind: "location",
                id: slug.to_string(),
            });
        self.delayed(result)
    }

    fn end_stale_instances(&self, address: &str) -> BoxFuture<'static, Result<usize, LookupError>> {
        let mut ended = 0;
        for mut entry in self.instances.iter_mut() {
            if entry.address == address && !entry.ended {
                entry.ended = true;
                ended += 1;
            }
        }
        self.delayed(Ok(ended))
    }

    fn create_instance(
        &self,
        instance: NewInstance,
    ) -> BoxFuture<'static, Result<InstanceRecord, LookupError>> {
        let record = InstanceRecord {
            id: instance.id,
            location_id: instance.location_id,
            scene_id: instance.scene_id,
            address: instance.address,
            current_users: 0,
            ended: false,
        };
        self.instances.insert(record.id.clone(), record.clone());
        self.delayed(Ok(record))
    }

    fn patch_instance(
        &self,
        instance_id: &str,
        patch: InstancePatch,
    ) -> BoxFuture<'static, Result<(), LookupError>> {
        let result = match self.instances.get_mut(instance_id) {
            Some(mut entry) => {
                entry.current_users = patch.current_users;
                Ok(())
            }
            None => Err(LookupError::NotFound {
                kind: "instance",
                id: instance_id.to_string(),
            }),
        };
        self.delayed(result)
    }
}
