//! Shared fixtures for engine integration tests.
//!
//! [`TestEngine`] wires an [`OgState`] over in-memory backends with one
//! group bundle (`node/group`) and one content bundle (`node/article`)
//! related through an unrestricted `og_audience` field.
#![allow(dead_code)]

use og_common::{Account, EntityId, EntityRef};
use og_engine::config::Config;
use og_engine::membership::{Membership, MembershipState};
use og_engine::memory::MemoryBackends;
use og_engine::storage::AudienceField;
use og_engine::{Extensions, OgState};

pub const GROUP_TYPE: &str = "node";
pub const GROUP_BUNDLE: &str = "group";
pub const CONTENT_BUNDLE: &str = "article";
pub const AUDIENCE_FIELD: &str = "og_audience";

/// User id designated as super user.
pub const SUPER_USER: EntityId = 1;

pub struct TestEngine {
    pub backends: MemoryBackends,
    pub state: OgState,
}

/// Engine with the core extensions and the default test config.
pub fn engine() -> TestEngine {
    engine_with(Config::default_for_test(), Extensions::with_core())
}

/// Engine with a custom config and extension set.
pub fn engine_with(config: Config, extensions: Extensions) -> TestEngine {
    let backends = MemoryBackends::new();
    backends.entities.add_bundle(GROUP_TYPE, GROUP_BUNDLE);
    backends.entities.add_bundle(GROUP_TYPE, CONTENT_BUNDLE);
    backends.entities.add_bundle("user", "user");
    backends.fields.add_field(AudienceField::new(
        AUDIENCE_FIELD,
        GROUP_TYPE,
        CONTENT_BUNDLE,
        GROUP_TYPE,
    ));
    backends.accounts.set_super_user(Some(SUPER_USER));

    let state = OgState::new(config, backends.backends(), extensions).expect("engine state");
    state
        .group_types
        .add_group(GROUP_TYPE, GROUP_BUNDLE)
        .expect("register group bundle");

    TestEngine { backends, state }
}

impl TestEngine {
    /// Store a `node/group` entity.
    pub fn group(&self, id: EntityId, owner: EntityId) -> EntityRef {
        let group = EntityRef::new(GROUP_TYPE, GROUP_BUNDLE, id).with_owner(owner);
        self.backends.entities.insert(group.clone());
        group
    }

    /// Store a `node/article` entity posted in `groups`.
    pub fn article(&self, id: EntityId, owner: EntityId, groups: &[&EntityRef]) -> EntityRef {
        let article = EntityRef::new(GROUP_TYPE, CONTENT_BUNDLE, id).with_owner(owner);
        self.backends.entities.insert(article.clone());
        self.backends
            .fields
            .set_references(&article, AUDIENCE_FIELD, groups.iter().map(|g| g.id));
        article
    }

    /// Save a membership holding the named extra roles.
    pub fn join(
        &self,
        group: &EntityRef,
        user_id: EntityId,
        state: MembershipState,
        roles: &[&str],
    ) -> Membership {
        let manager = self.state.membership_manager();
        let mut membership = manager
            .create_membership(group, &Account::authenticated(user_id), None)
            .expect("create membership")
            .with_state(state);
        for name in roles {
            let role = self
                .state
                .roles
                .role(&group.entity_type, &group.bundle, name)
                .expect("load role")
                .expect("role exists");
            membership.add_role(&role).expect("add role");
        }
        manager
            .save_membership(&mut membership)
            .expect("save membership");
        membership
    }

    /// Grant a permission to a role of the `node/group` bundle.
    pub fn grant(&self, role_name: &str, permission: &str) {
        let mut role = self
            .state
            .roles
            .role(GROUP_TYPE, GROUP_BUNDLE, role_name)
            .expect("load role")
            .expect("role exists");
        role.grant_permission(permission);
        self.state.roles.save_role(&role).expect("save role");
    }

    pub fn revoke(&self, role_name: &str, permission: &str) {
        let mut role = self
            .state
            .roles
            .role(GROUP_TYPE, GROUP_BUNDLE, role_name)
            .expect("load role")
            .expect("role exists");
        role.revoke_permission(permission);
        self.state.roles.save_role(&role).expect("save role");
    }

    /// Act as `user_id` for the rest of the test.
    pub fn login(&self, user_id: EntityId) -> Account {
        let account = Account::authenticated(user_id);
        self.backends.accounts.set_current(account);
        account
    }
}
