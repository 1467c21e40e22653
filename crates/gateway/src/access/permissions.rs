//! Role-based access control with custom grants, denies, and time-bounded
//! elevation.
//!
//! Roles form a total order; a group may locally promote a user, and the
//! effective role is the maximum of the global and group roles.  Elevation
//! is orthogonal: it grants `ElevatedOperations` for its TTL without
//! changing the role, and never downgrades anything.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use cb_domain::config::AccessConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roles & permissions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// User roles, ordered from least to most privileged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Moderator,
    Admin,
    Owner,
}

/// Available permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    SendMessage,
    UseCommands,
    UseAgent,
    ExecuteCode,
    FileAccess,
    TerminalAccess,
    ManageUsers,
    ManageGroup,
    ManageBot,
    ElevatedOperations,
    SystemAccess,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::UseCommands => "use_commands",
            Self::UseAgent => "use_agent",
            Self::ExecuteCode => "execute_code",
            Self::FileAccess => "file_access",
            Self::TerminalAccess => "terminal_access",
            Self::ManageUsers => "manage_users",
            Self::ManageGroup => "manage_group",
            Self::ManageBot => "manage_bot",
            Self::ElevatedOperations => "elevated_operations",
            Self::SystemAccess => "system_access",
        }
    }
}

/// The fixed permission set carried by each role.
fn role_permissions(role: Role) -> &'static [Permission] {
    use Permission::*;
    match role {
        Role::User => &[SendMessage, UseCommands, UseAgent],
        Role::Moderator => &[
            SendMessage,
            UseCommands,
            UseAgent,
            ExecuteCode,
            FileAccess,
            ManageUsers,
        ],
        Role::Admin => &[
            SendMessage,
            UseCommands,
            UseAgent,
            ExecuteCode,
            FileAccess,
            TerminalAccess,
            ManageUsers,
            ManageGroup,
        ],
        Role::Owner => &[
            SendMessage,
            UseCommands,
            UseAgent,
            ExecuteCode,
            FileAccess,
            TerminalAccess,
            ManageUsers,
            ManageGroup,
            ManageBot,
            ElevatedOperations,
            SystemAccess,
        ],
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-user / per-group records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Permissions for a specific user.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserPermissions {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub custom_grants: HashSet<Permission>,
    #[serde(default)]
    pub custom_denies: HashSet<Permission>,
    #[serde(default)]
    pub elevated_until: Option<DateTime<Utc>>,
}

impl UserPermissions {
    /// Effective permission check for a given role (already group-merged).
    ///
    /// Deny wins over everything; elevation only ever grants
    /// `ElevatedOperations` while unexpired.
    fn has(&self, permission: Permission, effective_role: Role, now: DateTime<Utc>) -> bool {
        if self.custom_denies.contains(&permission) {
            return false;
        }
        if self.custom_grants.contains(&permission) {
            return true;
        }
        if permission == Permission::ElevatedOperations {
            if let Some(until) = self.elevated_until {
                if now < until {
                    return true;
                }
            }
        }
        role_permissions(effective_role).contains(&permission)
    }
}

/// Settings for a specific group chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSettings {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// When set, only whitelisted users (and group admins) may use the bot.
    #[serde(default)]
    pub whitelist_mode: bool,
    #[serde(default)]
    pub whitelist: HashSet<String>,
    #[serde(default)]
    pub blacklist: HashSet<String>,
    #[serde(default)]
    pub admins: HashSet<String>,
    #[serde(default)]
    pub moderators: HashSet<String>,
    #[serde(default)]
    pub allowed_commands: HashSet<String>,
    #[serde(default)]
    pub disabled_commands: HashSet<String>,
}

fn d_true() -> bool {
    true
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            whitelist_mode: false,
            whitelist: HashSet::new(),
            blacklist: HashSet::new(),
            admins: HashSet::new(),
            moderators: HashSet::new(),
            allowed_commands: HashSet::new(),
            disabled_commands: HashSet::new(),
        }
    }
}

impl GroupSettings {
    pub fn is_user_allowed(&self, user_id: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if self.blacklist.contains(user_id) {
            return false;
        }
        if self.whitelist_mode {
            return self.whitelist.contains(user_id) || self.admins.contains(user_id);
        }
        true
    }

    /// Deny-set takes precedence over the allow-set.
    pub fn is_command_allowed(&self, command: &str) -> bool {
        if self.disabled_commands.contains(command) {
            return false;
        }
        if !self.allowed_commands.is_empty() && !self.allowed_commands.contains(command) {
            return false;
        }
        true
    }

    /// The user's locally promoted role in this group.
    pub fn role_of(&self, user_id: &str) -> Role {
        if self.admins.contains(user_id) {
            Role::Admin
        } else if self.moderators.contains(user_id) {
            Role::Moderator
        } else {
            Role::User
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permission manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Snapshot written to `permissions.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PermissionSnapshot {
    users: HashMap<String, UserPermissions>,
    groups: HashMap<String, GroupSettings>,
}

pub struct PermissionManager {
    users: RwLock<HashMap<String, UserPermissions>>,
    groups: RwLock<HashMap<String, GroupSettings>>,
    global_admins: RwLock<HashSet<String>>,
    global_blacklist: RwLock<HashSet<String>>,
    snapshot_path: Option<PathBuf>,
}

impl PermissionManager {
    pub fn from_config(config: &AccessConfig, state_path: Option<&Path>) -> Self {
        let snapshot_path = state_path.map(|p| p.join("permissions.json"));
        let snapshot = snapshot_path
            .as_deref()
            .and_then(load_snapshot)
            .unwrap_or_default();

        let mut admins = config.global_admins.clone();
        let mut users = snapshot.users;
        if let Some(owner) = &config.owner {
            admins.insert(owner.clone());
            users.entry(owner.clone()).or_default().role = Role::Owner;
        }

        Self {
            users: RwLock::new(users),
            groups: RwLock::new(snapshot.groups),
            global_admins: RwLock::new(admins),
            global_blacklist: RwLock::new(config.global_blacklist.clone()),
            snapshot_path,
        }
    }

    // ── Global sets ──────────────────────────────────────────────────

    pub fn is_global_admin(&self, user_id: &str) -> bool {
        self.global_admins.read().contains(user_id)
    }

    pub fn add_global_admin(&self, user_id: &str) {
        self.global_admins.write().insert(user_id.to_owned());
    }

    pub fn is_globally_blacklisted(&self, user_id: &str) -> bool {
        self.global_blacklist.read().contains(user_id)
    }

    pub fn blacklist(&self, user_id: &str) {
        self.global_blacklist.write().insert(user_id.to_owned());
        tracing::warn!(user_id, "user added to global blacklist");
    }

    pub fn unblacklist(&self, user_id: &str) {
        self.global_blacklist.write().remove(user_id);
    }

    // ── Roles & grants ───────────────────────────────────────────────

    pub fn set_role(&self, user_id: &str, role: Role) {
        self.users.write().entry(user_id.to_owned()).or_default().role = role;
        self.persist();
    }

    pub fn role_of(&self, user_id: &str) -> Role {
        self.users
            .read()
            .get(user_id)
            .map(|u| u.role)
            .unwrap_or_default()
    }

    pub fn grant(&self, user_id: &str, permission: Permission) {
        let mut users = self.users.write();
        let entry = users.entry(user_id.to_owned()).or_default();
        entry.custom_grants.insert(permission);
        entry.custom_denies.remove(&permission);
        drop(users);
        self.persist();
    }

    pub fn deny(&self, user_id: &str, permission: Permission) {
        let mut users = self.users.write();
        let entry = users.entry(user_id.to_owned()).or_default();
        entry.custom_denies.insert(permission);
        entry.custom_grants.remove(&permission);
        drop(users);
        self.persist();
    }

    /// Check whether the user holds a permission, optionally inside a group.
    ///
    /// Evaluation: global blacklist denies → global admins bypass → group
    /// membership gate → effective role = max(global, group) → role set ∪
    /// grants \ denies.
    pub fn check_permission(
        &self,
        user_id: &str,
        permission: Permission,
        group_id: Option<&str>,
    ) -> bool {
        self.check_permission_at(user_id, permission, group_id, Utc::now())
    }

    pub fn check_permission_at(
        &self,
        user_id: &str,
        permission: Permission,
        group_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.is_globally_blacklisted(user_id) {
            return false;
        }
        if self.is_global_admin(user_id) {
            return true;
        }

        let users = self.users.read();
        let user = users.get(user_id).cloned().unwrap_or_default();
        drop(users);

        let mut effective_role = user.role;
        if let Some(gid) = group_id {
            let groups = self.groups.read();
            if let Some(group) = groups.get(gid) {
                if !group.is_user_allowed(user_id) {
                    return false;
                }
                effective_role = effective_role.max(group.role_of(user_id));
            }
        }

        user.has(permission, effective_role, now)
    }

    // ── Elevation ────────────────────────────────────────────────────

    /// Grant the elevated bit for `ttl`.  Extends but never shortens an
    /// existing elevation.
    pub fn elevate(&self, user_id: &str, ttl: Duration) {
        let until = Utc::now() + ttl;
        let mut users = self.users.write();
        let entry = users.entry(user_id.to_owned()).or_default();
        entry.elevated_until = Some(entry.elevated_until.map_or(until, |cur| cur.max(until)));
        drop(users);
        tracing::info!(user_id, "elevation granted");
        self.persist();
    }

    pub fn revoke_elevation(&self, user_id: &str) {
        let mut users = self.users.write();
        if let Some(entry) = users.get_mut(user_id) {
            entry.elevated_until = None;
        }
        drop(users);
        self.persist();
    }

    pub fn is_elevated(&self, user_id: &str) -> bool {
        let users = self.users.read();
        users
            .get(user_id)
            .and_then(|u| u.elevated_until)
            .is_some_and(|until| Utc::now() < until)
    }

    // ── Groups ───────────────────────────────────────────────────────

    pub fn group(&self, group_id: &str) -> GroupSettings {
        self.groups.read().get(group_id).cloned().unwrap_or_default()
    }

    pub fn update_group<F>(&self, group_id: &str, f: F)
    where
        F: FnOnce(&mut GroupSettings),
    {
        let mut groups = self.groups.write();
        let entry = groups.entry(group_id.to_owned()).or_default();
        f(entry);
        drop(groups);
        self.persist();
    }

    pub fn add_group_admin(&self, group_id: &str, user_id: &str) {
        self.update_group(group_id, |g| {
            g.enabled = true;
            g.admins.insert(user_id.to_owned());
            g.moderators.remove(user_id);
        });
    }

    pub fn add_group_moderator(&self, group_id: &str, user_id: &str) {
        self.update_group(group_id, |g| {
            g.enabled = true;
            if !g.admins.contains(user_id) {
                g.moderators.insert(user_id.to_owned());
            }
        });
    }

    // ── Persistence ──────────────────────────────────────────────────

    fn persist(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let snapshot = PermissionSnapshot {
            users: self.users.read().clone(),
            groups: self.groups.read().clone(),
        };
        let json = match serde_json::to_string_pretty(&snapshot) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "permission snapshot serialize failed");
                return;
            }
        };
        if let Err(e) = std::fs::write(path, json) {
            tracing::warn!(error = %e, path = %path.display(), "permission snapshot write failed");
        }
    }
}

fn load_snapshot(path: &Path) -> Option<PermissionSnapshot> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt permission snapshot ignored");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PermissionManager {
        PermissionManager::from_config(&AccessConfig::default(), None)
    }

    #[test]
    fn roles_are_totally_ordered() {
        assert!(Role::User < Role::Moderator);
        assert!(Role::Moderator < Role::Admin);
        assert!(Role::Admin < Role::Owner);
    }

    #[test]
    fn default_user_permissions() {
        let m = manager();
        assert!(m.check_permission("u1", Permission::UseAgent, None));
        assert!(!m.check_permission("u1", Permission::ExecuteCode, None));
    }

    #[test]
    fn deny_wins_over_grant_and_role() {
        let m = manager();
        m.set_role("u1", Role::Admin);
        m.deny("u1", Permission::ExecuteCode);
        assert!(!m.check_permission("u1", Permission::ExecuteCode, None));

        // Re-granting flips the deny back off.
        m.grant("u1", Permission::ExecuteCode);
        assert!(m.check_permission("u1", Permission::ExecuteCode, None));
    }

    #[test]
    fn global_blacklist_denies_everything() {
        let m = manager();
        m.set_role("u1", Role::Owner);
        m.blacklist("u1");
        assert!(!m.check_permission("u1", Permission::SendMessage, None));
    }

    #[test]
    fn global_admin_bypasses_all_checks() {
        let m = manager();
        m.add_global_admin("root");
        assert!(m.check_permission("root", Permission::SystemAccess, None));
    }

    #[test]
    fn group_promotion_raises_effective_role() {
        let m = manager();
        m.add_group_admin("g1", "u1");
        // Admin role inside the group only.
        assert!(m.check_permission("u1", Permission::ManageGroup, Some("g1")));
        assert!(!m.check_permission("u1", Permission::ManageGroup, None));
    }

    #[test]
    fn group_never_downgrades_global_role() {
        let m = manager();
        m.set_role("u1", Role::Admin);
        m.update_group("g1", |g| {
            g.enabled = true;
        });
        // Plain member of the group, but globally admin — still admin.
        assert!(m.check_permission("u1", Permission::TerminalAccess, Some("g1")));
    }

    #[test]
    fn group_blacklist_blocks_member() {
        let m = manager();
        m.update_group("g1", |g| {
            g.enabled = true;
            g.blacklist.insert("u1".into());
        });
        assert!(!m.check_permission("u1", Permission::SendMessage, Some("g1")));
    }

    #[test]
    fn elevation_grants_only_the_elevated_bit() {
        let m = manager();
        assert!(!m.check_permission("u1", Permission::ElevatedOperations, None));

        m.elevate("u1", Duration::minutes(30));
        assert!(m.is_elevated("u1"));
        assert!(m.check_permission("u1", Permission::ElevatedOperations, None));
        // The role itself did not change.
        assert_eq!(m.role_of("u1"), Role::User);
        assert!(!m.check_permission("u1", Permission::ManageBot, None));

        m.revoke_elevation("u1");
        assert!(!m.is_elevated("u1"));
    }

    #[test]
    fn expired_elevation_is_inert() {
        let m = manager();
        m.elevate("u1", Duration::minutes(30));
        let past = Utc::now() + Duration::hours(1);
        assert!(!m.check_permission_at("u1", Permission::ElevatedOperations, None, past));
    }

    #[test]
    fn owner_seed_from_config() {
        let config = AccessConfig {
            owner: Some("boss".into()),
            ..Default::default()
        };
        let m = PermissionManager::from_config(&config, None);
        assert!(m.is_global_admin("boss"));
        assert_eq!(m.role_of("boss"), Role::Owner);
    }

    #[test]
    fn command_deny_set_takes_precedence() {
        let mut g = GroupSettings {
            enabled: true,
            ..Default::default()
        };
        g.allowed_commands.insert("/echo".into());
        g.disabled_commands.insert("/echo".into());
        assert!(!g.is_command_allowed("/echo"));
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let m = PermissionManager::from_config(&AccessConfig::default(), Some(dir.path()));
            m.set_role("u1", Role::Moderator);
            m.grant("u1", Permission::TerminalAccess);
        }
        let m = PermissionManager::from_config(&AccessConfig::default(), Some(dir.path()));
        assert_eq!(m.role_of("u1"), Role::Moderator);
        assert!(m.check_permission("u1", Permission::TerminalAccess, None));
    }
}
